//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use courier_shared::constants::{APP_NAME, DEFAULT_HTTP_PORT, MAX_DOCUMENT_SIZE, MAX_TEXT_LEN};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./courier.db`
    pub database_path: PathBuf,

    /// Maximum text message length in characters.
    /// Env: `MAX_TEXT_LEN`
    pub max_text_len: usize,

    /// Maximum document size accepted in a send payload, in bytes.
    /// Env: `MAX_DOCUMENT_SIZE`
    pub max_document_size: u64,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Courier"`
    pub instance_name: String,

    /// Events buffered per live connection before pushes start dropping.
    /// Env: `OUTBOUND_QUEUE`
    /// Default: `256`
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./courier.db"),
            max_text_len: MAX_TEXT_LEN,
            max_document_size: MAX_DOCUMENT_SIZE,
            instance_name: APP_NAME.to_string(),
            outbound_queue: 256,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        if let Some(val) = lookup("MAX_TEXT_LEN") {
            match parse_positive(&val) {
                Some(n) => config.max_text_len = n,
                None => tracing::warn!(value = %val, "Invalid MAX_TEXT_LEN, using default"),
            }
        }

        if let Some(val) = lookup("MAX_DOCUMENT_SIZE") {
            match parse_positive::<u64>(&val) {
                Some(n) => config.max_document_size = n,
                None => tracing::warn!(value = %val, "Invalid MAX_DOCUMENT_SIZE, using default"),
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(val) = lookup("OUTBOUND_QUEUE") {
            match parse_positive(&val) {
                Some(n) => config.outbound_queue = n,
                None => tracing::warn!(value = %val, "Invalid OUTBOUND_QUEUE, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_positive<T>(val: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    val.trim().parse::<T>().ok().filter(|n| *n > T::default())
}
