//! Deterministic in-process backend for tests and offline runs

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use super::backend::{BackendError, BackendResult, MediaBackend, MediaProbe, StreamInfo};
use crate::protocol::Operation;

/// Bitrate reported for every simulated video stream.
const SIMULATED_VIDEO_BIT_RATE: u64 = 1_000_000;

/// Backend that never touches real media tooling.
///
/// The output of a transformation is the operation's display form, a newline,
/// then the input bytes unchanged, so callers can predict results exactly.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBackend {
    fail_probe: bool,
    fail_transform: bool,
    processing_delay: Option<Duration>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every probe fail as if the source were not a media file.
    pub fn failing_probe(mut self) -> Self {
        self.fail_probe = true;
        self
    }

    /// Makes every transformation fail after a successful probe.
    pub fn failing_transform(mut self) -> Self {
        self.fail_transform = true;
        self
    }

    /// Sleeps this long inside each transformation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = Some(delay);
        self
    }

    /// Bytes the backend writes for `operation` applied to `input`.
    pub fn expected_output(operation: &Operation, input: &[u8]) -> Vec<u8> {
        let mut output = format!("{operation}\n").into_bytes();
        output.extend_from_slice(input);
        output
    }
}

#[async_trait]
impl MediaBackend for SimulatedBackend {
    async fn probe(&self, path: &Path) -> BackendResult<MediaProbe> {
        if self.fail_probe {
            return Err(BackendError::ProbeFailed {
                reason: "simulated probe failure".to_string(),
            });
        }

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| BackendError::ProbeFailed {
                reason: format!("cannot open {}: {e}", path.display()),
            })?;

        Ok(MediaProbe {
            streams: vec![
                StreamInfo {
                    codec_type: "video".to_string(),
                    codec_name: Some("h264".to_string()),
                    bit_rate: Some(SIMULATED_VIDEO_BIT_RATE),
                    width: Some(1280),
                    height: Some(720),
                },
                StreamInfo {
                    codec_type: "audio".to_string(),
                    codec_name: Some("aac".to_string()),
                    bit_rate: Some(128_000),
                    width: None,
                    height: None,
                },
            ],
            duration_seconds: Some(metadata.len() as f64 / SIMULATED_VIDEO_BIT_RATE as f64),
            bit_rate: Some(SIMULATED_VIDEO_BIT_RATE),
        })
    }

    async fn transform(
        &self,
        input: &Path,
        output: &Path,
        operation: &Operation,
        _probe: &MediaProbe,
    ) -> BackendResult<()> {
        if let Some(delay) = self.processing_delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_transform {
            return Err(BackendError::TransformFailed {
                reason: format!("simulated {} failure", operation.name()),
            });
        }

        let data = tokio::fs::read(input)
            .await
            .map_err(|e| BackendError::IoErrorWithOperation {
                operation: "read simulated input".to_string(),
                source: e,
            })?;

        tokio::fs::write(output, Self::expected_output(operation, &data))
            .await
            .map_err(|e| BackendError::IoErrorWithOperation {
                operation: "write simulated output".to_string(),
                source: e,
            })?;

        tracing::debug!(
            "Simulated {} wrote {}",
            operation.name(),
            output.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_transform_writes_expected_output() {
        let temp_dir = tempdir().unwrap();
        let input = temp_dir.path().join("clip.mp4");
        let output = temp_dir.path().join("clip.mp3");
        std::fs::write(&input, b"frames").unwrap();

        let backend = SimulatedBackend::new();
        let probe = backend.probe(&input).await.unwrap();
        backend
            .transform(&input, &output, &Operation::ConvertToAudio, &probe)
            .await
            .unwrap();

        let written = std::fs::read(&output).unwrap();
        assert_eq!(
            written,
            SimulatedBackend::expected_output(&Operation::ConvertToAudio, b"frames")
        );
        assert!(written.starts_with(b"convert_to_audio\n"));
    }

    #[tokio::test]
    async fn test_probe_missing_file_fails() {
        let temp_dir = tempdir().unwrap();
        let result = SimulatedBackend::new()
            .probe(&temp_dir.path().join("absent.mp4"))
            .await;

        assert!(matches!(result, Err(BackendError::ProbeFailed { .. })));
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let temp_dir = tempdir().unwrap();
        let input = temp_dir.path().join("clip.mp4");
        std::fs::write(&input, b"frames").unwrap();

        let probe = SimulatedBackend::new().failing_probe().probe(&input).await;
        assert!(matches!(probe, Err(BackendError::ProbeFailed { .. })));

        let transform = SimulatedBackend::new()
            .failing_transform()
            .transform(
                &input,
                &temp_dir.path().join("out.mp3"),
                &Operation::ConvertToAudio,
                &MediaProbe::default(),
            )
            .await;
        assert!(matches!(transform, Err(BackendError::TransformFailed { .. })));
    }
}
