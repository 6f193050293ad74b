//! # courier-client
//!
//! Platform-neutral client core for Courier front-ends: the local working
//! set that reconciles optimistic sends with server push events, and a thin
//! REST client for the Courier server.

pub mod api;
pub mod error;
pub mod state;
pub mod status;

pub use api::ApiClient;
pub use error::ClientError;
pub use state::{ChatEntry, ChatState, EntryKey, TempId};
pub use status::DeliveryStatus;
