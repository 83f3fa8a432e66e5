//! Error type shared by every layer of the WebSocket stack.
//!
//! Every variant is fatal to the connection that produced it: there are no
//! retries anywhere, the owning task logs the error and tears the channel
//! down.

use std::io;

use thiserror::Error;

/// Errors produced by the handshake, the frame codec and the connection shell.
#[derive(Debug, Error)]
pub enum WsError {
    /// Read or write on the underlying byte channel failed.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Fewer bytes were available than the frame needs.
    #[error("short frame: got {len} bytes, need at least {min}")]
    ShortFrame { len: usize, min: usize },

    /// An incoming frame that must be masked had the mask bit clear.
    #[error("frame is not masked")]
    UnmaskedFrame,

    /// Payload too long for the simplified server reply path.
    #[error("payload of {len} bytes does not fit the reply path (limit {limit})")]
    PayloadTooLarge { len: usize, limit: usize },

    /// Declared payload length exceeds the configured maximum.
    #[error("payload length {len} exceeds maximum {max}")]
    FrameTooLarge { len: u64, max: u64 },

    /// 64-bit payload length with the most significant bit set.
    #[error("MSB of 64-bit payload length must be 0")]
    InvalidLength,

    /// Opcode other than text, binary or close.
    #[error("unknown opcode: 0x{0:X}")]
    UnknownOpcode(u8),

    /// The upgrade handshake could not be completed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The peer closed the connection (EOF or a close frame).
    #[error("connection closed")]
    ConnectionClosed,

    /// Invalid server or connection configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl WsError {
    /// Error returned by operations on a connection that was already closed.
    pub(crate) fn not_connected() -> Self {
        WsError::Transport(io::Error::new(
            io::ErrorKind::NotConnected,
            "connection already closed",
        ))
    }
}

/// Result type alias using [`WsError`].
pub type Result<T> = std::result::Result<T, WsError>;
