//! Error types for tagwire.

use thiserror::Error;

use crate::protocol::Tag;

/// Main error type for all tagwire operations.
#[derive(Debug, Error)]
pub enum TagwireError {
    /// I/O error on a connected socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not connect to a remote endpoint.
    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Could not bind a listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed frame or a stream that ended inside a frame.
    #[error("Framing error: {0}")]
    Framing(String),

    /// JSON payload encode/decode error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// No handler registered for the tag.
    #[error("Handler not found for tag: {0}")]
    HandlerNotFound(Tag),

    /// A handler is already registered for the tag.
    #[error("Handler already registered for tag: {0}")]
    DuplicateHandler(Tag),

    /// The connection is closing or closed; nothing more can be sent.
    #[error("Connection closed")]
    ConnectionClosed,

    /// `close()` was called on a connection that was already closing.
    #[error("Connection already closed")]
    AlreadyClosed,

    /// The endpoint has been closed.
    #[error("Endpoint closed")]
    EndpointClosed,

    /// Another task is already running the endpoint's accept loop.
    #[error("Accept loop already running")]
    AcceptLoopRunning,
}

impl TagwireError {
    /// Whether this error came from a payload codec.
    pub fn is_codec(&self) -> bool {
        matches!(
            self,
            TagwireError::Json(_) | TagwireError::MsgPackEncode(_) | TagwireError::MsgPackDecode(_)
        )
    }
}

/// Result type alias using TagwireError.
pub type Result<T> = std::result::Result<T, TagwireError>;
