//! Client-side working set.
//!
//! [`ChatState`] holds what a front-end renders: conversations with their
//! per-message delivery status, unread badges, and the presence and typing
//! view. It reconciles three sources that arrive in any order: optimistic
//! local sends, the send endpoint's response, and push events.
//!
//! The push channel gives no replay guarantee. After a reconnect the
//! front-end refetches each conversation returned by
//! [`ChatState::on_reconnected`] and feeds it to
//! [`ChatState::apply_history`], which is the only resynchronisation point.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use courier_shared::protocol::{DeliveredPayload, SeenRequest};
use courier_shared::{
    ClientEvent, Message, MessageBody, MessageId, ServerEvent, UnreadCounts, UserId,
};

use crate::status::DeliveryStatus;

/// Identifier of an optimistic entry that has no server id yet.
pub type TempId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Local(TempId),
    Server(MessageId),
}

/// One rendered message.
///
/// For outgoing entries `status` is the sender-side delivery state. For
/// incoming entries it records what this client has acknowledged
/// (`Delivered` on receipt, `Seen` once the conversation was open).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub key: EntryKey,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: MessageBody,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

impl ChatEntry {
    pub fn message_id(&self) -> Option<MessageId> {
        match self.key {
            EntryKey::Server(id) => Some(id),
            EntryKey::Local(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct ChatState {
    me: UserId,
    conversations: BTreeMap<UserId, Vec<ChatEntry>>,
    /// Server id → counterpart whose conversation holds it.
    owners: HashMap<MessageId, UserId>,
    unread: UnreadCounts,
    open: Option<UserId>,
    online: BTreeSet<UserId>,
    typing: BTreeSet<UserId>,
    connected: bool,
    next_temp: TempId,
}

impl ChatState {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            conversations: BTreeMap::new(),
            owners: HashMap::new(),
            unread: UnreadCounts::new(),
            open: None,
            online: BTreeSet::new(),
            typing: BTreeSet::new(),
            connected: false,
            next_temp: 1,
        }
    }

    // -----------------------------------------------------------------------
    // Outgoing messages
    // -----------------------------------------------------------------------

    /// Render a message immediately, before the server has seen it.
    pub fn submit(&mut self, to: UserId, body: MessageBody) -> TempId {
        let temp = self.next_temp;
        self.next_temp += 1;

        let entry = ChatEntry {
            key: EntryKey::Local(temp),
            sender_id: self.me.clone(),
            receiver_id: to.clone(),
            body,
            status: DeliveryStatus::Sending,
            created_at: Utc::now(),
        };
        self.conversations.entry(to).or_default().push(entry);
        temp
    }

    /// Replace the optimistic entry with the persisted message.
    pub fn confirm_sent(&mut self, temp: TempId, message: Message) -> bool {
        let counterpart = message.receiver_id.clone();
        let Some(entries) = self.conversations.get_mut(&counterpart) else {
            return false;
        };
        let Some(pos) = entries.iter().position(|e| e.key == EntryKey::Local(temp)) else {
            return false;
        };

        // A history refetch got there first; keep that entry.
        if self.owners.contains_key(&message.id) {
            entries.remove(pos);
            return true;
        }

        let entry = &mut entries[pos];
        entry.key = EntryKey::Server(message.id);
        entry.body = message.body;
        entry.created_at = message.created_at;
        entry.status.advance(DeliveryStatus::Sent);
        if message.read {
            entry.status.advance(DeliveryStatus::Seen);
        }

        self.owners.insert(message.id, counterpart);
        true
    }

    /// The send request failed. The entry stays visible in `Error`.
    pub fn fail_send(&mut self, temp: TempId) -> bool {
        match self.local_mut(temp) {
            Some(entry) => entry.status.advance(DeliveryStatus::Error),
            None => false,
        }
    }

    /// Queue a fresh attempt for a failed entry. The failed entry is kept.
    pub fn resend(&mut self, temp: TempId) -> Option<TempId> {
        let entry = self.local_mut(temp)?;
        if entry.status != DeliveryStatus::Error {
            return None;
        }
        let (to, body) = (entry.receiver_id.clone(), entry.body.clone());
        Some(self.submit(to, body))
    }

    // -----------------------------------------------------------------------
    // Push events
    // -----------------------------------------------------------------------

    /// Fold one server event into the working set. Returns the frames the
    /// caller should send back over the push channel.
    pub fn apply(&mut self, event: ServerEvent) -> Vec<ClientEvent> {
        match event {
            ServerEvent::NewMessage(payload) => return self.receive(payload.message),
            ServerEvent::Delivered(payload) => {
                self.advance_outgoing(payload.message_id, DeliveryStatus::Delivered);
            }
            ServerEvent::Seen(payload) => {
                for id in payload.message_ids {
                    self.advance_outgoing(id, DeliveryStatus::Seen);
                }
            }
            ServerEvent::MessagesSeen(payload) => {
                for id in payload.message_ids {
                    self.advance_outgoing(id, DeliveryStatus::Seen);
                }
            }
            ServerEvent::OnlineUsers(users) => {
                self.online = users.into_iter().collect();
                let online = &self.online;
                self.typing.retain(|u| online.contains(u));
            }
            ServerEvent::UserOnline(profile) => {
                self.online.insert(profile.user_id);
            }
            ServerEvent::UserOffline(profile) => {
                self.typing.remove(&profile.user_id);
                self.online.remove(&profile.user_id);
            }
            ServerEvent::Typing(payload) => {
                if payload.is_typing {
                    self.typing.insert(payload.from);
                } else {
                    self.typing.remove(&payload.from);
                }
            }
            ServerEvent::Error(payload) => {
                warn!(message = %payload.message, "Server rejected a frame");
            }
        }
        Vec::new()
    }

    fn receive(&mut self, message: Message) -> Vec<ClientEvent> {
        if message.receiver_id != self.me {
            debug!(message_id = %message.id, "Ignoring message addressed to someone else");
            return Vec::new();
        }

        let id = message.id;
        let from = message.sender_id.clone();
        let ack = ClientEvent::Delivered(DeliveredPayload { message_id: id });

        if self.owners.contains_key(&id) {
            return vec![ack];
        }

        let is_open = self.open.as_ref() == Some(&from);
        let status = if is_open {
            DeliveryStatus::Seen
        } else {
            DeliveryStatus::Delivered
        };

        self.conversations
            .entry(from.clone())
            .or_default()
            .push(ChatEntry {
                key: EntryKey::Server(id),
                sender_id: message.sender_id,
                receiver_id: message.receiver_id,
                body: message.body,
                status,
                created_at: message.created_at,
            });
        self.owners.insert(id, from.clone());
        self.typing.remove(&from);

        if is_open {
            vec![
                ack,
                ClientEvent::Seen(SeenRequest {
                    counterpart_id: from,
                }),
            ]
        } else {
            *self.unread.entry(from).or_insert(0) += 1;
            vec![ack]
        }
    }

    fn advance_outgoing(&mut self, id: MessageId, next: DeliveryStatus) {
        let me = self.me.clone();
        if let Some(entry) = self.entry_mut(id) {
            if entry.sender_id == me {
                entry.status.advance(next);
            }
            return;
        }
        debug!(message_id = %id, status = ?next, "Receipt for unknown message");
    }

    // -----------------------------------------------------------------------
    // Unread badges
    // -----------------------------------------------------------------------

    /// Focus a conversation and clear its badge optimistically. Returns
    /// whether the server needs a mark-read call.
    pub fn open_conversation(&mut self, counterpart: &UserId) -> bool {
        self.open = Some(counterpart.clone());
        let had_badge = self.unread.remove(counterpart).unwrap_or(0) > 0;

        let mut acknowledged = false;
        if let Some(entries) = self.conversations.get_mut(counterpart) {
            for entry in entries.iter_mut().filter(|e| &e.sender_id == counterpart) {
                acknowledged |= entry.status.advance(DeliveryStatus::Seen);
            }
        }
        had_badge || acknowledged
    }

    pub fn close_conversation(&mut self) {
        self.open = None;
    }

    /// Replace the badges with a server snapshot. The open conversation
    /// keeps no badge.
    pub fn set_unread_counts(&mut self, snapshot: UnreadCounts) {
        self.unread = snapshot;
        if let Some(open) = &self.open {
            self.unread.remove(open);
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    pub fn on_connected(&mut self) {
        self.connected = true;
    }

    /// Presence and typing are only meaningful while the channel is up.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        self.typing.clear();
        self.online.clear();
    }

    /// Conversations to refetch now that pushes may have been missed.
    pub fn on_reconnected(&mut self) -> Vec<UserId> {
        self.connected = true;
        let mut stale: BTreeSet<UserId> = self.conversations.keys().cloned().collect();
        if let Some(open) = &self.open {
            stale.insert(open.clone());
        }
        stale.into_iter().collect()
    }

    /// Merge a fetched page of history for `counterpart`.
    ///
    /// Server state wins for known ids (statuses only move forward), unknown
    /// ids are inserted, and local entries that are still pending or failed
    /// are kept.
    pub fn apply_history(&mut self, counterpart: &UserId, messages: Vec<Message>) {
        for message in messages {
            let outgoing = message.sender_id == self.me;
            let involved = outgoing || message.receiver_id == self.me;
            if !involved || message.counterpart_of(&self.me) != counterpart {
                debug!(message_id = %message.id, "History entry outside conversation");
                continue;
            }

            let target = if message.read {
                DeliveryStatus::Seen
            } else if outgoing {
                DeliveryStatus::Sent
            } else {
                DeliveryStatus::Delivered
            };

            if let Some(entry) = self.entry_mut(message.id) {
                entry.body = message.body;
                entry.created_at = message.created_at;
                entry.status.advance(target);
                continue;
            }

            self.conversations
                .entry(counterpart.clone())
                .or_default()
                .push(ChatEntry {
                    key: EntryKey::Server(message.id),
                    sender_id: message.sender_id,
                    receiver_id: message.receiver_id,
                    body: message.body,
                    status: target,
                    created_at: message.created_at,
                });
            self.owners.insert(message.id, counterpart.clone());
        }

        if let Some(entries) = self.conversations.get_mut(counterpart) {
            entries.sort_by_key(|e| e.created_at);
        }
    }

    // -----------------------------------------------------------------------
    // Read access
    // -----------------------------------------------------------------------

    pub fn me(&self) -> &UserId {
        &self.me
    }

    pub fn conversation(&self, counterpart: &UserId) -> &[ChatEntry] {
        self.conversations
            .get(counterpart)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn status_of(&self, id: MessageId) -> Option<DeliveryStatus> {
        let counterpart = self.owners.get(&id)?;
        self.conversations
            .get(counterpart)?
            .iter()
            .find(|e| e.key == EntryKey::Server(id))
            .map(|e| e.status)
    }

    pub fn local_status(&self, temp: TempId) -> Option<DeliveryStatus> {
        self.conversations
            .values()
            .flat_map(|entries| entries.iter())
            .find(|e| e.key == EntryKey::Local(temp))
            .map(|e| e.status)
    }

    pub fn unread_for(&self, counterpart: &UserId) -> u32 {
        self.unread.get(counterpart).copied().unwrap_or(0)
    }

    pub fn unread_counts(&self) -> &UnreadCounts {
        &self.unread
    }

    pub fn total_unread(&self) -> u32 {
        self.unread.values().sum()
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.contains(user)
    }

    pub fn online_users(&self) -> &BTreeSet<UserId> {
        &self.online
    }

    pub fn is_typing(&self, user: &UserId) -> bool {
        self.typing.contains(user)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn open_conversation_id(&self) -> Option<&UserId> {
        self.open.as_ref()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn entry_mut(&mut self, id: MessageId) -> Option<&mut ChatEntry> {
        let counterpart = self.owners.get(&id)?;
        self.conversations
            .get_mut(counterpart)?
            .iter_mut()
            .find(|e| e.key == EntryKey::Server(id))
    }

    fn local_mut(&mut self, temp: TempId) -> Option<&mut ChatEntry> {
        self.conversations
            .values_mut()
            .flat_map(|entries| entries.iter_mut())
            .find(|e| e.key == EntryKey::Local(temp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_shared::protocol::{
        DeliveredPayload, MessagesSeenPayload, NewMessagePayload, TypingPayload,
    };
    use courier_shared::PresenceProfile;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn text(s: &str) -> MessageBody {
        MessageBody::Text(s.into())
    }

    fn incoming(from: &str, to: &str, body: &str) -> ServerEvent {
        ServerEvent::NewMessage(NewMessagePayload {
            message: Message::new(uid(from), uid(to), text(body)),
            sender_name: from.to_string(),
            sender_profile_pic: None,
        })
    }

    #[test]
    fn test_optimistic_send_then_delivered_then_seen() {
        let mut alice = ChatState::new(uid("alice"));
        let temp = alice.submit(uid("bob"), text("hi"));
        assert_eq!(alice.local_status(temp), Some(DeliveryStatus::Sending));

        let server = Message::new(uid("alice"), uid("bob"), text("hi"));
        let id = server.id;
        assert!(alice.confirm_sent(temp, server));
        assert_eq!(alice.status_of(id), Some(DeliveryStatus::Sent));
        assert_eq!(alice.local_status(temp), None);

        alice.apply(ServerEvent::Delivered(DeliveredPayload { message_id: id }));
        assert_eq!(alice.status_of(id), Some(DeliveryStatus::Delivered));

        alice.apply(ServerEvent::MessagesSeen(MessagesSeenPayload {
            receiver_id: uid("bob"),
            message_ids: vec![id],
            timestamp: Utc::now(),
        }));
        assert_eq!(alice.status_of(id), Some(DeliveryStatus::Seen));

        // A late delivered ack does not regress the status.
        alice.apply(ServerEvent::Delivered(DeliveredPayload { message_id: id }));
        assert_eq!(alice.status_of(id), Some(DeliveryStatus::Seen));
    }

    #[test]
    fn test_receipt_before_send_response_is_dropped() {
        let mut alice = ChatState::new(uid("alice"));
        let temp = alice.submit(uid("bob"), text("hi"));
        let server = Message::new(uid("alice"), uid("bob"), text("hi"));
        let id = server.id;

        alice.apply(ServerEvent::Delivered(DeliveredPayload { message_id: id }));
        alice.confirm_sent(temp, server);
        assert_eq!(alice.status_of(id), Some(DeliveryStatus::Sent));
    }

    #[test]
    fn test_unknown_receipts_do_not_leak_into_history() {
        let mut alice = ChatState::new(uid("alice"));
        let _pending = alice.submit(uid("bob"), text("in flight"));

        // Receipts for ids this client never rendered, while a send is pending.
        let foreign = Message::new(uid("alice"), uid("bob"), text("from another device"));
        alice.apply(ServerEvent::MessagesSeen(MessagesSeenPayload {
            receiver_id: uid("bob"),
            message_ids: vec![foreign.id],
            timestamp: Utc::now(),
        }));
        for _ in 0..100 {
            alice.apply(ServerEvent::Delivered(DeliveredPayload {
                message_id: MessageId::new(),
            }));
        }

        // The later history fetch reports the server's status, not the stale receipt.
        let id = foreign.id;
        alice.apply_history(&uid("bob"), vec![foreign]);
        assert_eq!(alice.status_of(id), Some(DeliveryStatus::Sent));
    }

    #[test]
    fn test_unknown_receipt_is_noop() {
        let mut alice = ChatState::new(uid("alice"));
        let replies = alice.apply(ServerEvent::Delivered(DeliveredPayload {
            message_id: MessageId::new(),
        }));
        assert!(replies.is_empty());
        assert!(alice.conversation(&uid("bob")).is_empty());
    }

    #[test]
    fn test_failed_send_stays_visible_and_can_be_resent() {
        let mut alice = ChatState::new(uid("alice"));
        let temp = alice.submit(uid("bob"), text("hi"));
        assert!(alice.fail_send(temp));
        assert_eq!(alice.local_status(temp), Some(DeliveryStatus::Error));

        let retry = alice.resend(temp).unwrap();
        assert_ne!(retry, temp);
        assert_eq!(alice.local_status(retry), Some(DeliveryStatus::Sending));
        assert_eq!(alice.conversation(&uid("bob")).len(), 2);

        // Only failed entries can be resent.
        assert!(alice.resend(retry).is_none());
    }

    #[test]
    fn test_new_message_acks_and_bumps_badge() {
        let mut bob = ChatState::new(uid("bob"));
        let replies = bob.apply(incoming("alice", "bob", "hey"));
        assert_eq!(replies.len(), 1);
        assert!(matches!(replies[0], ClientEvent::Delivered(_)));
        assert_eq!(bob.unread_for(&uid("alice")), 1);

        bob.apply(incoming("alice", "bob", "you there?"));
        assert_eq!(bob.unread_for(&uid("alice")), 2);
        assert_eq!(bob.total_unread(), 2);

        assert!(bob.open_conversation(&uid("alice")));
        assert_eq!(bob.unread_for(&uid("alice")), 0);
        assert!(bob
            .conversation(&uid("alice"))
            .iter()
            .all(|e| e.status == DeliveryStatus::Seen));
    }

    #[test]
    fn test_new_message_in_open_conversation_is_seen() {
        let mut bob = ChatState::new(uid("bob"));
        assert!(!bob.open_conversation(&uid("alice")));

        let replies = bob.apply(incoming("alice", "bob", "hey"));
        assert_eq!(replies.len(), 2);
        assert!(matches!(
            &replies[1],
            ClientEvent::Seen(SeenRequest { counterpart_id }) if counterpart_id == &uid("alice")
        ));
        assert_eq!(bob.unread_for(&uid("alice")), 0);
    }

    #[test]
    fn test_duplicate_push_is_not_counted_twice() {
        let mut bob = ChatState::new(uid("bob"));
        let event = incoming("alice", "bob", "hey");
        bob.apply(event.clone());
        let replies = bob.apply(event);
        assert_eq!(replies.len(), 1);
        assert_eq!(bob.unread_for(&uid("alice")), 1);
        assert_eq!(bob.conversation(&uid("alice")).len(), 1);
    }

    #[test]
    fn test_snapshot_skips_open_conversation() {
        let mut bob = ChatState::new(uid("bob"));
        bob.open_conversation(&uid("alice"));
        let mut snapshot = UnreadCounts::new();
        snapshot.insert(uid("alice"), 3);
        snapshot.insert(uid("carol"), 1);
        bob.set_unread_counts(snapshot);
        assert_eq!(bob.unread_for(&uid("alice")), 0);
        assert_eq!(bob.unread_for(&uid("carol")), 1);
    }

    #[test]
    fn test_presence_and_typing() {
        let mut me = ChatState::new(uid("me"));
        me.apply(ServerEvent::OnlineUsers(vec![uid("a"), uid("b")]));
        assert!(me.is_online(&uid("a")));

        me.apply(ServerEvent::Typing(TypingPayload {
            from: uid("a"),
            is_typing: true,
            sender_name: "A".into(),
            sender_profile_pic: None,
        }));
        assert!(me.is_typing(&uid("a")));

        me.apply(ServerEvent::UserOffline(PresenceProfile::anonymous(uid("a"))));
        assert!(!me.is_online(&uid("a")));
        assert!(!me.is_typing(&uid("a")));

        me.apply(ServerEvent::UserOnline(PresenceProfile::anonymous(uid("c"))));
        assert_eq!(me.online_users().len(), 2);
    }

    #[test]
    fn test_reconnect_resync() {
        let mut alice = ChatState::new(uid("alice"));
        alice.on_connected();

        let sent = Message::new(uid("alice"), uid("bob"), text("1"));
        let id = sent.id;
        let temp = alice.submit(uid("bob"), text("1"));
        alice.confirm_sent(temp, sent.clone());
        let failed = alice.submit(uid("bob"), text("2"));
        alice.fail_send(failed);

        alice.apply(ServerEvent::OnlineUsers(vec![uid("bob")]));
        alice.on_disconnected();
        assert!(!alice.is_connected());
        assert!(!alice.is_online(&uid("bob")));

        // The seen receipt was lost while offline.
        assert_eq!(alice.on_reconnected(), vec![uid("bob")]);

        let mut read_copy = sent;
        read_copy.read = true;
        let reply = Message::new(uid("bob"), uid("alice"), text("3"));
        alice.apply_history(&uid("bob"), vec![read_copy, reply.clone()]);

        assert_eq!(alice.status_of(id), Some(DeliveryStatus::Seen));
        assert_eq!(alice.local_status(failed), Some(DeliveryStatus::Error));
        assert_eq!(alice.status_of(reply.id), Some(DeliveryStatus::Delivered));
        assert_eq!(alice.conversation(&uid("bob")).len(), 3);
    }

    #[test]
    fn test_history_after_confirm_race() {
        let mut alice = ChatState::new(uid("alice"));
        let temp = alice.submit(uid("bob"), text("1"));
        let sent = Message::new(uid("alice"), uid("bob"), text("1"));

        alice.apply_history(&uid("bob"), vec![sent.clone()]);
        assert!(alice.confirm_sent(temp, sent.clone()));

        let entries = alice.conversation(&uid("bob"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, EntryKey::Server(sent.id));
    }
}
