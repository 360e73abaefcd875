//! Mediawire wire protocol.
//!
//! Every message on the wire is a frame: a 4-byte big-endian length followed
//! by that many payload bytes. On top of framing sit the JSON control
//! message, the JSON status response, and the chunked file transfer that
//! moves one file as data frames closed by an empty frame.

pub mod connection;
pub mod control;
pub mod frame;
pub mod status;
pub mod transfer;

use std::time::Duration;

// Re-export public API
pub use connection::FramedConnection;
pub use control::{AspectRatio, CompressLevel, Operation, ValidationError};
pub use frame::{DEFAULT_MAX_FRAME_SIZE, FrameCodec, LENGTH_PREFIX_SIZE, read_frame, write_frame};
pub use status::StatusResponse;
pub use transfer::{TransferError, TransferStats, receive_file, send_file};

/// Fatal wire-level failures.
///
/// Any of these aborts the session; the peer is not guaranteed to receive a
/// status frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Frame of {length} bytes exceeds maximum {max}")]
    FrameTooLarge { length: u64, max: u32 },

    #[error("No data received for {after:?}")]
    IdleTimeout { after: Duration },

    #[error("Peer stopped reading for {after:?}")]
    WriteTimeout { after: Duration },

    #[error("Malformed status response: {reason}")]
    MalformedStatus { reason: String },

    #[error("Invalid file name: {reason}")]
    InvalidFileName { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Maps a failed exact read onto the protocol taxonomy.
    ///
    /// An unexpected EOF means the peer went away mid-frame.
    pub(crate) fn from_read_error(error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Io(error)
        }
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
