//! Error types for the guest RPC channel

use thiserror::Error;

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors surfaced to callers of [`RpcClient`](super::client::RpcClient) and
/// [`RpcHost`](super::host::RpcHost).
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The other side answered with `llm:error`.
    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request timed out")]
    Timeout,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Request id {0} is already in flight")]
    DuplicateRequest(u64),
}

impl RpcError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RpcError::Cancelled)
    }
}

/// Why a frame body could not be turned into a [`Message`](super::protocol::Message).
///
/// Decode errors are never fatal: the demultiplexer logs and drops the frame.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("invalid `{kind}` payload: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("frame body contains a raw control byte")]
    RawControlByte,
}
