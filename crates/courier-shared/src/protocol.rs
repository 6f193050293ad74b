//! Push-channel event contract.
//!
//! Every frame on the live connection is a JSON text frame of the shape
//! `{"event": "<name>", "data": <payload>}`. Event names match the ones the
//! web and mobile clients listen for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::message::Message;
use crate::types::{MessageId, UserId};
use crate::user::PresenceProfile;

/// Events pushed from the server to a connected client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "new-message")]
    NewMessage(NewMessagePayload),

    #[serde(rename = "typing")]
    Typing(TypingPayload),

    #[serde(rename = "delivered")]
    Delivered(DeliveredPayload),

    /// Per-message seen receipt. The server reports reads as
    /// `messagesSeen` batches; this variant stays part of the wire contract
    /// and clients still decode it.
    #[serde(rename = "seen")]
    Seen(SeenPayload),

    /// Read-receipt batch produced by mark-as-read.
    #[serde(rename = "messagesSeen")]
    MessagesSeen(MessagesSeenPayload),

    /// Full online-id set, broadcast on every presence change.
    #[serde(rename = "getOnlineUsers")]
    OnlineUsers(Vec<UserId>),

    #[serde(rename = "user-online")]
    UserOnline(PresenceProfile),

    #[serde(rename = "user-offline")]
    UserOffline(PresenceProfile),

    /// Feedback for a frame the server could not act on.
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

/// Events a client sends over its live connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "typing")]
    Typing(TypingRequest),

    /// Acknowledges that a pushed message reached this client.
    #[serde(rename = "delivered")]
    Delivered(DeliveredPayload),

    /// Marks the conversation with `counterpart_id` as read.
    #[serde(rename = "seen")]
    Seen(SeenRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub message: Message,
    pub sender_name: String,
    pub sender_profile_pic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub from: UserId,
    pub is_typing: bool,
    pub sender_name: String,
    pub sender_profile_pic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub to: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredPayload {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeenPayload {
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeenRequest {
    pub counterpart_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagesSeenPayload {
    /// The reader, i.e. the receiver of the seen messages.
    pub receiver_id: UserId,
    pub message_ids: Vec<MessageId>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage(_) => "new-message",
            ServerEvent::Typing(_) => "typing",
            ServerEvent::Delivered(_) => "delivered",
            ServerEvent::Seen(_) => "seen",
            ServerEvent::MessagesSeen(_) => "messagesSeen",
            ServerEvent::OnlineUsers(_) => "getOnlineUsers",
            ServerEvent::UserOnline(_) => "user-online",
            ServerEvent::UserOffline(_) => "user-offline",
            ServerEvent::Error(_) => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBody;
    use uuid::Uuid;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    #[test]
    fn test_server_event_names_on_the_wire() {
        let msg = Message::new(uid("a"), uid("b"), MessageBody::Text("hi".into()));
        let events = vec![
            ServerEvent::NewMessage(NewMessagePayload {
                message: msg.clone(),
                sender_name: "A".into(),
                sender_profile_pic: None,
            }),
            ServerEvent::Delivered(DeliveredPayload { message_id: msg.id }),
            ServerEvent::OnlineUsers(vec![uid("a")]),
            ServerEvent::UserOffline(PresenceProfile::anonymous(uid("a"))),
        ];

        for event in events {
            let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
            assert_eq!(json["event"], event.name());
        }
    }

    #[test]
    fn test_messages_seen_uses_camel_case() {
        let event = ServerEvent::MessagesSeen(MessagesSeenPayload {
            receiver_id: uid("b"),
            message_ids: vec![MessageId::new()],
            timestamp: Utc::now(),
        });
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["data"]["receiverId"], "b");
        assert_eq!(json["data"]["messageIds"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_client_event_decoding() {
        let typing = ClientEvent::from_json(r#"{"event":"typing","data":{"to":"b","isTyping":true}}"#)
            .unwrap();
        assert_eq!(
            typing,
            ClientEvent::Typing(TypingRequest {
                to: uid("b"),
                is_typing: true
            })
        );

        let seen = ClientEvent::from_json(r#"{"event":"seen","data":{"counterpartId":"a"}}"#).unwrap();
        assert_eq!(
            seen,
            ClientEvent::Seen(SeenRequest {
                counterpart_id: uid("a")
            })
        );
    }

    #[test]
    fn test_client_event_user_ids_are_validated() {
        let padded =
            ClientEvent::from_json(r#"{"event":"typing","data":{"to":" b ","isTyping":false}}"#)
                .unwrap();
        assert_eq!(
            padded,
            ClientEvent::Typing(TypingRequest {
                to: uid("b"),
                is_typing: false
            })
        );
        assert!(
            ClientEvent::from_json(r#"{"event":"typing","data":{"to":"","isTyping":true}}"#)
                .is_err()
        );
        assert!(ClientEvent::from_json(r#"{"event":"seen","data":{"counterpartId":"  "}}"#).is_err());
    }

    #[test]
    fn test_per_message_seen_still_decodes() {
        let id = "7f1c2a5e-3b9d-4c8e-9a61-2d4f5b6c7e80";
        let frame = format!(r#"{{"event":"seen","data":{{"messageIds":["{id}"]}}}}"#);
        let event = ServerEvent::from_json(&frame).unwrap();
        assert_eq!(
            event,
            ServerEvent::Seen(SeenPayload {
                message_ids: vec![MessageId(Uuid::parse_str(id).unwrap())]
            })
        );
        assert_eq!(event.name(), "seen");
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(ClientEvent::from_json(r#"{"event":"shout","data":{}}"#).is_err());
        assert!(ClientEvent::from_json("not json").is_err());
    }
}
