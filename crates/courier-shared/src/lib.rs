//! # courier-shared
//!
//! Types shared by the Courier server, store and client crates: identifiers,
//! the persisted domain models, the push-channel protocol and send-payload
//! validation.

pub mod constants;
pub mod error;
pub mod message;
pub mod notification;
pub mod protocol;
pub mod types;
pub mod user;
pub mod validation;

pub use error::{ProtocolError, ValidationError};
pub use message::{DocumentDescriptor, MediaRef, Message, MessageBody, MessageKind};
pub use notification::{Notification, NotificationKind};
pub use protocol::{ClientEvent, ServerEvent};
pub use types::{MessageId, NotificationId, UnreadCounts, UserId};
pub use user::{PresenceProfile, User};
pub use validation::SendMessageRequest;
