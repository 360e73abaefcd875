//! Job construction and backend dispatch

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use super::backend::{BackendError, MediaBackend};
use crate::protocol::Operation;

/// Extension of `convert_to_audio` results.
pub const AUDIO_OUTPUT_EXTENSION: &str = "mp3";

/// Extension of `trim_by_time_range` results.
pub const TRIM_OUTPUT_EXTENSION: &str = "gif";

/// Failure of the media transformation, reported to the peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProcessingError {
    pub message: String,
}

impl ProcessingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<BackendError> for ProcessingError {
    fn from(error: BackendError) -> Self {
        Self::new(error.to_string())
    }
}

/// Picks the result extension for `operation` on a source at `source`.
///
/// Audio extraction and trimming change container; everything else keeps
/// the source's extension (empty when the source has none).
pub fn output_extension(operation: &Operation, source: &Path) -> String {
    match operation {
        Operation::ConvertToAudio => AUDIO_OUTPUT_EXTENSION.to_string(),
        Operation::TrimByTimeRange { .. } => TRIM_OUTPUT_EXTENSION.to_string(),
        _ => source
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

/// A validated operation bound to a fully uploaded source file.
#[derive(Debug, Clone)]
pub struct Job {
    pub operation: Operation,
    pub source_path: PathBuf,
}

impl Job {
    pub fn new(operation: Operation, source_path: PathBuf) -> Self {
        Self {
            operation,
            source_path,
        }
    }

    /// File name of the result: source stem plus the output extension.
    pub fn output_file_name(&self) -> String {
        let stem = self
            .source_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let extension = output_extension(&self.operation, &self.source_path);

        if extension.is_empty() {
            stem
        } else {
            format!("{stem}.{extension}")
        }
    }
}

/// Runs jobs against a media backend, writing results into one directory.
#[derive(Clone)]
pub struct JobDispatcher {
    backend: Arc<dyn MediaBackend>,
    output_dir: PathBuf,
}

impl JobDispatcher {
    pub fn new(backend: Arc<dyn MediaBackend>, output_dir: PathBuf) -> Self {
        Self {
            backend,
            output_dir,
        }
    }

    /// Path the result of `job` will be written to.
    pub fn output_path(&self, job: &Job) -> PathBuf {
        self.output_dir.join(job.output_file_name())
    }

    /// Probes the source, runs the transformation and returns the result path.
    ///
    /// # Errors
    ///
    /// - `ProcessingError` - Probe failed, the source has no media streams,
    ///   the transformation failed, or no output was produced
    pub async fn dispatch(&self, job: &Job) -> Result<PathBuf, ProcessingError> {
        let start_time = Instant::now();
        let output_path = self.output_path(job);

        let probe = self.backend.probe(&job.source_path).await?;
        if probe.streams.is_empty() {
            return Err(ProcessingError::new("source contains no media streams"));
        }
        tracing::debug!(
            "Probed {}: {} streams",
            job.source_path.display(),
            probe.streams.len()
        );

        self.backend
            .transform(&job.source_path, &output_path, &job.operation, &probe)
            .await?;

        if tokio::fs::metadata(&output_path).await.is_err() {
            return Err(ProcessingError::new(format!(
                "{} produced no output file",
                job.operation.name()
            )));
        }

        tracing::info!(
            "Job {} completed in {:.2}s: {}",
            job.operation,
            start_time.elapsed().as_secs_f64(),
            output_path.display()
        );
        Ok(output_path)
    }
}
