use thiserror::Error;

/// Rejections of a send payload or identifier. Never persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("User id must not be empty")]
    EmptyUserId,

    #[error("Message has no content")]
    EmptyPayload,

    #[error("Message must carry exactly one content kind, got {0}")]
    MultiplePayloads(usize),

    #[error("Text too long: {len} chars (max {max})")]
    TextTooLong { len: usize, max: usize },

    #[error("Document too large: {size} bytes (max {max})")]
    DocumentTooLarge { size: u64, max: u64 },

    #[error("Invalid media reference: {0}")]
    InvalidReference(String),
}

/// Failures decoding or encoding a push-channel frame.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}
