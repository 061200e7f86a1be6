//! Error types for duplexwire.

use thiserror::Error;

/// Main error type for all duplexwire operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Decoder read an opcode byte outside the recognised set.
    #[error("unrecognised opcode {0:#04x}")]
    BadOpcode(u8),

    /// Frame payload length exceeds the configured cap.
    #[error("frame payload of {len} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared (or requested) payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Growing a protocol buffer failed.
    #[error("out of memory growing a protocol buffer")]
    OutOfMemory,

    /// JSON payload encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol violation (unexpected frame, unknown encoding, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Peer answered a request with an ERROR frame.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Error code from the frame header.
        code: u8,
        /// ERROR payload, rendered as text.
        message: String,
    },

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
