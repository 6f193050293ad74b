//! Delivery Protocol Layer.
//!
//! Moves a message from the request/response send path onto the push
//! channel, relays typing and receipt events between live connections, and
//! falls back to a stored notification when the receiver is unreachable.
//!
//! Persist-then-push is not atomic: if the process dies between the two the
//! message is durable and only the push is lost. Receipts and typing events
//! are never queued for offline users.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use courier_shared::protocol::{
    DeliveredPayload, ErrorPayload, MessagesSeenPayload, NewMessagePayload, TypingPayload,
    TypingRequest,
};
use courier_shared::{
    ClientEvent, Message, MessageId, PresenceProfile, SendMessageRequest, ServerEvent,
    UnreadCounts, UserId,
};
use courier_store::StoreError;

use crate::config::ServerConfig;
use crate::db::SharedDb;
use crate::error::ServerError;
use crate::fallback;
use crate::media::MediaResolver;
use crate::presence::{ConnectionHandle, PresenceRegistry};

/// Which side-channel carried a sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryRoute {
    Pushed,
    Notified,
}

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: Message,
    pub route: DeliveryRoute,
}

/// Result of a mark-as-read call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadOutcome {
    pub message_ids: Vec<MessageId>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Delivery {
    registry: PresenceRegistry,
    db: SharedDb,
    media: Arc<dyn MediaResolver>,
    max_text_len: usize,
    outbound_queue: usize,
}

impl Delivery {
    pub fn new(
        db: SharedDb,
        registry: PresenceRegistry,
        media: Arc<dyn MediaResolver>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            registry,
            db,
            media,
            max_text_len: config.max_text_len,
            outbound_queue: config.outbound_queue,
        }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub fn db(&self) -> &SharedDb {
        &self.db
    }

    // -----------------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------------

    /// Bind a new live connection for `user` and announce it.
    ///
    /// The returned receiver is the connection's outbound queue; its first
    /// event is the full online set.
    pub async fn connect(
        &self,
        user: &UserId,
    ) -> Result<(ConnectionHandle, mpsc::Receiver<ServerEvent>), ServerError> {
        let profile = self.profile_of(user).await;
        let (handle, rx) = ConnectionHandle::new(profile.clone(), self.outbound_queue);

        if let Some(previous) = self.registry.register(handle.clone()).await {
            info!(
                user = %user,
                old_conn = previous.id(),
                new_conn = handle.id(),
                "Replacing existing connection"
            );
            previous.close();
        }
        self.stamp_last_seen(user).await;

        info!(user = %user, conn = handle.id(), "User connected");
        self.announce(ServerEvent::UserOnline(profile)).await;

        Ok((handle, rx))
    }

    /// Drop the binding for a closed connection and announce it.
    pub async fn disconnect(&self, handle: &ConnectionHandle) {
        let user = handle.user_id();
        if !self.registry.unregister(user, handle.id()).await {
            debug!(user = %user, conn = handle.id(), "Superseded connection closed");
            return;
        }
        self.stamp_last_seen(user).await;

        info!(user = %user, conn = handle.id(), "User disconnected");
        self.announce(ServerEvent::UserOffline(handle.profile().clone()))
            .await;
    }

    async fn announce(&self, point_event: ServerEvent) {
        self.registry.broadcast_presence(&point_event).await;
    }

    async fn stamp_last_seen(&self, user: &UserId) {
        let id = user.clone();
        if let Err(e) = self
            .db
            .call(move |db| db.touch_last_seen(&id, Utc::now()))
            .await
        {
            warn!(user = %user, error = %e, "Failed to update last seen");
        }
    }

    async fn profile_of(&self, user: &UserId) -> PresenceProfile {
        let id = user.clone();
        match self.db.call(move |db| db.find_user(&id)).await {
            Ok(Some(found)) => PresenceProfile::from(&found),
            Ok(None) => PresenceProfile::anonymous(user.clone()),
            Err(e) => {
                warn!(user = %user, error = %e, "Profile lookup failed");
                PresenceProfile::anonymous(user.clone())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Send path
    // -----------------------------------------------------------------------

    /// Validate, persist, then push or fall back to a notification.
    ///
    /// Succeeds whether or not the receiver is reachable; reachability only
    /// picks the side-channel.
    pub async fn send_message(
        &self,
        sender: &UserId,
        receiver: &UserId,
        request: SendMessageRequest,
    ) -> Result<SendOutcome, ServerError> {
        let body = request.into_body(self.max_text_len)?;
        let body = self.media.resolve(body)?;

        let message = Message::new(sender.clone(), receiver.clone(), body);

        let stored = message.clone();
        let sender_row = self
            .db
            .call(move |db| {
                if db.find_user(&stored.receiver_id)?.is_none() {
                    return Ok(None);
                }
                db.insert_message(&stored)?;
                Ok(Some(db.find_user(&stored.sender_id)?))
            })
            .await?
            .ok_or_else(|| ServerError::UserNotFound(receiver.clone()))?;

        let sender_profile = sender_row
            .as_ref()
            .map(PresenceProfile::from)
            .unwrap_or_else(|| PresenceProfile::anonymous(sender.clone()));

        let route = match self.registry.lookup(receiver).await {
            Some(handle) => {
                handle.send(ServerEvent::NewMessage(NewMessagePayload {
                    message: message.clone(),
                    sender_name: sender_profile.full_name.clone(),
                    sender_profile_pic: sender_profile.profile_pic.clone(),
                }));
                DeliveryRoute::Pushed
            }
            None => {
                if let Err(e) = fallback::notify_offline(&self.db, &sender_profile, &message).await
                {
                    warn!(
                        message_id = %message.id,
                        error = %e,
                        "Failed to store offline notification"
                    );
                }
                DeliveryRoute::Notified
            }
        };

        info!(
            message_id = %message.id,
            from = %sender,
            to = %receiver,
            kind = %message.body.kind(),
            route = ?route,
            "Message sent"
        );

        Ok(SendOutcome { message, route })
    }

    // -----------------------------------------------------------------------
    // Push-channel relays
    // -----------------------------------------------------------------------

    /// Forward a typing indicator. Dropped when the target is offline.
    pub async fn forward_typing(&self, from: &ConnectionHandle, request: TypingRequest) -> bool {
        let profile = from.profile();
        let event = ServerEvent::Typing(TypingPayload {
            from: profile.user_id.clone(),
            is_typing: request.is_typing,
            sender_name: profile.full_name.clone(),
            sender_profile_pic: profile.profile_pic.clone(),
        });
        self.registry.send_to(&request.to, event).await
    }

    /// Relay a delivery acknowledgment from the receiver of `message_id` to
    /// its sender, looked up at this moment. Returns whether it was pushed.
    pub async fn acknowledge_delivered(
        &self,
        me: &UserId,
        message_id: MessageId,
    ) -> Result<bool, ServerError> {
        let message = self
            .db
            .call(move |db| db.get_message(message_id))
            .await
            .map_err(|e| match e {
                ServerError::Store(StoreError::NotFound) => ServerError::MessageNotFound(message_id),
                other => other,
            })?;

        if &message.receiver_id != me {
            return Err(ServerError::Forbidden(
                "only the receiver can acknowledge a message".into(),
            ));
        }

        let pushed = self
            .registry
            .send_to(
                &message.sender_id,
                ServerEvent::Delivered(DeliveredPayload { message_id }),
            )
            .await;
        if !pushed {
            debug!(message_id = %message_id, "Sender offline, delivery ack dropped");
        }
        Ok(pushed)
    }

    // -----------------------------------------------------------------------
    // Read receipts and unread counts
    // -----------------------------------------------------------------------

    /// Mark everything `counterpart` sent to `me` as read and tell the
    /// counterpart which messages were seen. Idempotent: a repeat call
    /// transitions nothing and emits nothing.
    pub async fn mark_as_read(
        &self,
        me: &UserId,
        counterpart: &UserId,
    ) -> Result<ReadOutcome, ServerError> {
        let at = Utc::now();
        let (reader, other) = (me.clone(), counterpart.clone());
        let message_ids = self
            .db
            .call(move |db| db.mark_conversation_read(&reader, &other, at))
            .await?;

        if !message_ids.is_empty() {
            let pushed = self
                .registry
                .send_to(
                    counterpart,
                    ServerEvent::MessagesSeen(MessagesSeenPayload {
                        receiver_id: me.clone(),
                        message_ids: message_ids.clone(),
                        timestamp: at,
                    }),
                )
                .await;
            debug!(
                reader = %me,
                counterpart = %counterpart,
                count = message_ids.len(),
                pushed,
                "Messages marked read"
            );
        }

        Ok(ReadOutcome {
            message_ids,
            updated_at: at,
        })
    }

    /// Unread messages per counterpart. Best-effort: a failing aggregate
    /// yields an empty map.
    pub async fn unread_counts(&self, me: &UserId) -> UnreadCounts {
        let id = me.clone();
        match self.db.call(move |db| db.unread_counts(&id)).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(user = %me, error = %e, "Unread count query failed");
                UnreadCounts::new()
            }
        }
    }

    pub async fn conversation(
        &self,
        me: &UserId,
        counterpart: &UserId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, ServerError> {
        let (a, b) = (me.clone(), counterpart.clone());
        self.db
            .call(move |db| db.conversation(&a, &b, limit, before))
            .await
    }

    // -----------------------------------------------------------------------
    // Inbound frames
    // -----------------------------------------------------------------------

    /// Act on one client frame. Returns an error event to send back to the
    /// same connection when the frame could not be honoured.
    pub async fn handle_client_event(
        &self,
        handle: &ConnectionHandle,
        event: ClientEvent,
    ) -> Option<ServerEvent> {
        let result = match event {
            ClientEvent::Typing(request) => {
                self.forward_typing(handle, request).await;
                Ok(())
            }
            ClientEvent::Delivered(ack) => self
                .acknowledge_delivered(handle.user_id(), ack.message_id)
                .await
                .map(|_| ()),
            ClientEvent::Seen(request) => self
                .mark_as_read(handle.user_id(), &request.counterpart_id)
                .await
                .map(|_| ()),
        };

        match result {
            Ok(()) => None,
            Err(e) => {
                debug!(user = %handle.user_id(), error = %e, "Client event rejected");
                Some(ServerEvent::Error(ErrorPayload {
                    message: e.to_string(),
                }))
            }
        }
    }
}
