//! The persisted message model.
//!
//! A [`Message`] carries exactly one [`MessageBody`] variant. Once stored it
//! is immutable apart from the `read` flag and `updated_at`, which the
//! mark-as-read operation stamps to give the sender a "seen at" time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MessageId, UserId};

/// Reference to an already-uploaded media object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDescriptor {
    pub url: String,
    pub file_name: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "content", rename_all = "lowercase")]
pub enum MessageBody {
    Text(String),
    Image(MediaRef),
    Video(MediaRef),
    Audio(MediaRef),
    Document(DocumentDescriptor),
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Text(_) => MessageKind::Text,
            MessageBody::Image(_) => MessageKind::Image,
            MessageBody::Video(_) => MessageKind::Video,
            MessageBody::Audio(_) => MessageKind::Audio,
            MessageBody::Document(_) => MessageKind::Document,
        }
    }

    /// The media URL for non-text bodies.
    pub fn reference(&self) -> Option<&str> {
        match self {
            MessageBody::Text(_) => None,
            MessageBody::Image(m) | MessageBody::Video(m) | MessageBody::Audio(m) => {
                Some(m.url.as_str())
            }
            MessageBody::Document(d) => Some(d.url.as_str()),
        }
    }
}

/// Coarse classification of a body, also used as the storage discriminant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
            MessageKind::Document => "document",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "video" => Ok(MessageKind::Video),
            "audio" => Ok(MessageKind::Audio),
            "document" => Ok(MessageKind::Document),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: MessageBody,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// A fresh, unread message stamped with the current time.
    pub fn new(sender_id: UserId, receiver_id: UserId, body: MessageBody) -> Self {
        let now = Utc::now();
        Self {
            id: MessageId::new(),
            sender_id,
            receiver_id,
            body,
            read: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// The other party of this message as seen from `me`.
    pub fn counterpart_of(&self, me: &UserId) -> &UserId {
        if &self.sender_id == me {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}
