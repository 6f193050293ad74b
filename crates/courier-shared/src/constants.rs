/// Application name
pub const APP_NAME: &str = "Courier";

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Maximum text message length in characters
pub const MAX_TEXT_LEN: usize = 4096;

/// Maximum document size accepted by the media collaborator (25 MiB)
pub const MAX_DOCUMENT_SIZE: u64 = 25 * 1024 * 1024;

/// Characters of a text message copied into an offline notification body
pub const NOTIFICATION_PREVIEW_LEN: usize = 80;

/// Default page size for conversation history
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Upper bound for a single history page
pub const MAX_HISTORY_LIMIT: u32 = 500;

/// Header carrying the caller identity injected by the identity provider
pub const USER_ID_HEADER: &str = "x-user-id";
