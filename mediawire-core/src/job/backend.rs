//! Media-processing backend abstraction

use std::path::Path;

use async_trait::async_trait;

use crate::protocol::Operation;

/// Errors raised by a media-processing backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Source could not be opened or probed.
    #[error("Failed to probe source: {reason}")]
    ProbeFailed {
        /// Why probing failed.
        reason: String,
    },

    /// Source has no stream of the kind the operation needs.
    #[error("Source has no usable {kind} stream")]
    MissingStream {
        /// Stream kind, e.g. "video".
        kind: &'static str,
    },

    /// The transformation itself failed.
    #[error("Transformation failed: {reason}")]
    TransformFailed {
        /// Tool output or other detail.
        reason: String,
    },

    /// Backend tooling is not installed or not runnable.
    #[error("Media backend unavailable: {reason}")]
    Unavailable {
        /// Why the backend could not run.
        reason: String,
    },

    /// I/O error occurred during a specific operation.
    #[error("IO error during {operation}: {source}")]
    IoErrorWithOperation {
        /// Description of the operation that failed.
        operation: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

pub type BackendResult<T> = Result<T, BackendError>;

/// One elementary stream reported by a probe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamInfo {
    /// "video", "audio", "subtitle", ...
    pub codec_type: String,
    pub codec_name: Option<String>,
    /// Bits per second, when the container reports it
    pub bit_rate: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Stream metadata of a media file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaProbe {
    pub streams: Vec<StreamInfo>,
    pub duration_seconds: Option<f64>,
    /// Overall container bitrate
    pub bit_rate: Option<u64>,
}

impl MediaProbe {
    /// First video stream, if any.
    pub fn video_stream(&self) -> Option<&StreamInfo> {
        self.streams
            .iter()
            .find(|stream| stream.codec_type == "video")
    }

    pub fn has_audio(&self) -> bool {
        self.streams
            .iter()
            .any(|stream| stream.codec_type == "audio")
    }

    /// Video bitrate, falling back to the container bitrate.
    pub fn video_bit_rate(&self) -> Option<u64> {
        self.video_stream()
            .and_then(|stream| stream.bit_rate)
            .or(self.bit_rate)
    }
}

/// External component performing the actual media transformation.
///
/// Implementations must be safe to share between concurrent sessions; each
/// call works on its own input and output paths.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Reads stream metadata from `path`.
    ///
    /// # Errors
    ///
    /// - `BackendError::ProbeFailed` - File missing or not a readable media file
    /// - `BackendError::Unavailable` - Probe tool cannot be run
    async fn probe(&self, path: &Path) -> BackendResult<MediaProbe>;

    /// Writes the result of `operation` applied to `input` at `output`.
    ///
    /// `probe` is the metadata already read from `input`. Completes only
    /// when the output is fully written.
    ///
    /// # Errors
    ///
    /// - `BackendError::TransformFailed` - Tool reported failure or produced no output
    /// - `BackendError::MissingStream` - Source lacks a stream the operation needs
    /// - `BackendError::Unavailable` - Transform tool cannot be run
    async fn transform(
        &self,
        input: &Path,
        output: &Path,
        operation: &Operation,
        probe: &MediaProbe,
    ) -> BackendResult<()>;
}
