//! # courier-store
//!
//! Persistence for the Courier delivery core, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed helpers for users, messages (including
//! the unread aggregate and the mark-as-read transition) and notifications.
//! Async callers are expected to run these helpers on a blocking thread.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod notifications;
pub mod users;

mod convert;
mod error;

pub use database::Database;
pub use error::{Result, StoreError};
