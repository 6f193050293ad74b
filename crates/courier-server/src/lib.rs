//! # courier-server
//!
//! Real-time delivery and presence service for Courier.
//!
//! - **Presence registry** mapping each online user to one live connection
//! - **Delivery layer** that persists a message and then pushes it over the
//!   receiver's WebSocket, or stores an offline notification instead
//! - **Read receipts** and derived unread counts
//! - **REST API** (axum) for sending, history, contacts and notifications

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod fallback;
pub mod media;
pub mod presence;
pub mod ws;
