//! Mediawire Core - Remote media-editing jobs over TCP
//!
//! This crate provides the wire protocol (length-prefixed frames, JSON
//! control and status messages, chunked file transfer), the server-side
//! session state machine, job dispatch to a media backend, and the client
//! that submits jobs.

pub mod client;
pub mod config;
pub mod job;
pub mod protocol;
pub mod server;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use client::{ClientError, JobClient, JobReport};
pub use config::{ConfigError, MediawireConfig};
pub use job::{
    BackendError, FfmpegBackend, Job, JobDispatcher, MediaBackend, ProcessingError,
    SimulatedBackend,
};
pub use protocol::{Operation, ProtocolError, ValidationError};
pub use server::{JobServer, ServerError};
pub use session::{Session, SessionError, SessionOutcome, SessionState};

/// Errors that can bubble up from any Mediawire subsystem.
#[derive(Debug, thiserror::Error)]
pub enum MediawireError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediawireError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            MediawireError::Validation(e) => format!("Invalid job: {e}"),
            MediawireError::Client(e) => match e {
                ClientError::Rejected { message } => format!("Job rejected: {message}"),
                ClientError::ProcessingFailed { message } => {
                    format!("Processing failed: {message}")
                }
                ClientError::ConnectFailed { address, .. }
                | ClientError::ConnectTimeout { address, .. } => {
                    format!("Could not reach server at {address}")
                }
                ClientError::Source { path, .. } => {
                    format!("Cannot read {}", path.display())
                }
                ClientError::Output { path, .. } => {
                    format!("Cannot write {}", path.display())
                }
                ClientError::Protocol(_) => "Connection to server failed".to_string(),
            },
            MediawireError::Processing(e) => format!("Processing failed: {e}"),
            MediawireError::Backend(_) => "Media backend error occurred".to_string(),
            MediawireError::Protocol(_) | MediawireError::Session(_) => {
                "Connection error occurred".to_string()
            }
            MediawireError::Server(e) => format!("Server could not start: {e}"),
            MediawireError::Config(e) => format!("Configuration error: {e}"),
            MediawireError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            MediawireError::Validation(_)
                | MediawireError::Config(_)
                | MediawireError::Client(ClientError::Rejected { .. })
                | MediawireError::Client(ClientError::Source { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, MediawireError>;
