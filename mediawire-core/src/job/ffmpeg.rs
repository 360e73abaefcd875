//! FFmpeg-backed media processing
//!
//! Shells out to `ffprobe` and `ffmpeg` through `tokio::process`, so a
//! running transformation never blocks the runtime and is killed if the
//! session owning it is dropped.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use super::backend::{BackendError, BackendResult, MediaBackend, MediaProbe, StreamInfo};
use crate::protocol::Operation;

/// Frame rate used when rendering a trimmed range as an animated GIF.
const GIF_FRAME_RATE: u32 = 10;

/// Output width of trimmed GIFs; height follows the source aspect ratio.
const GIF_WIDTH: u32 = 480;

/// Production backend driving the FFmpeg command-line tools.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegBackend {
    /// Uses `ffmpeg` and `ffprobe` from `PATH`.
    pub fn new() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }

    /// Uses explicit binaries instead of `PATH` lookup.
    pub fn with_binaries(ffmpeg_path: PathBuf, ffprobe_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
        }
    }

    /// Verifies that both tools can be executed.
    ///
    /// # Errors
    ///
    /// - `BackendError::Unavailable` - A binary is missing or returned an error
    pub async fn verify_installation(&self) -> BackendResult<()> {
        for binary in [&self.ffmpeg_path, &self.ffprobe_path] {
            let output = tokio::process::Command::new(binary)
                .arg("-version")
                .output()
                .await
                .map_err(|e| BackendError::Unavailable {
                    reason: format!("{} not runnable: {e}", binary.display()),
                })?;

            if !output.status.success() {
                return Err(BackendError::Unavailable {
                    reason: format!("{} -version exited with {}", binary.display(), output.status),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    async fn probe(&self, path: &Path) -> BackendResult<MediaProbe> {
        let output = tokio::process::Command::new(&self.ffprobe_path)
            .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackendError::Unavailable {
                reason: format!("failed to execute ffprobe: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::ProbeFailed {
                reason: format!("ffprobe exited with {}: {}", output.status, stderr.trim()),
            });
        }

        parse_probe_output(&output.stdout)
    }

    async fn transform(
        &self,
        input: &Path,
        output: &Path,
        operation: &Operation,
        probe: &MediaProbe,
    ) -> BackendResult<()> {
        let start_time = Instant::now();
        let args = build_transform_args(input, output, operation, probe)?;

        let mut cmd = tokio::process::Command::new(&self.ffmpeg_path);
        cmd.args(&args).kill_on_drop(true);

        tracing::info!(
            "Starting FFmpeg {}: {} -> {}",
            operation.name(),
            input.display(),
            output.display()
        );
        tracing::debug!("Executing FFmpeg command: {:?}", cmd);

        let result = cmd.output().await.map_err(|e| {
            tracing::error!("Failed to execute FFmpeg: {}", e);
            BackendError::Unavailable {
                reason: format!("failed to execute ffmpeg: {e}"),
            }
        })?;

        let stderr = String::from_utf8_lossy(&result.stderr);
        if !result.status.success() {
            tracing::error!("FFmpeg failed with exit code {}: {}", result.status, stderr);
            return Err(BackendError::TransformFailed {
                reason: format!("ffmpeg exited with {}: {}", result.status, last_line(&stderr)),
            });
        }
        if !stderr.is_empty() {
            tracing::debug!("FFmpeg stderr: {}", stderr);
        }

        let output_size = tokio::fs::metadata(output)
            .await
            .map_err(|e| BackendError::IoErrorWithOperation {
                operation: "read output metadata".to_string(),
                source: e,
            })?
            .len();
        if output_size == 0 {
            return Err(BackendError::TransformFailed {
                reason: "ffmpeg produced an empty output file".to_string(),
            });
        }

        tracing::info!(
            "FFmpeg {} finished: {} bytes in {:.2}s",
            operation.name(),
            output_size,
            start_time.elapsed().as_secs_f64()
        );

        Ok(())
    }
}

/// Builds the ffmpeg argument list for one operation.
///
/// `compress` derives its target bitrate from the video bitrate in `probe`.
/// Trimmed ranges are rendered through a generated palette.
///
/// # Errors
///
/// - `BackendError::MissingStream` - Compressing a source without a known video bitrate
pub fn build_transform_args(
    input: &Path,
    output: &Path,
    operation: &Operation,
    probe: &MediaProbe,
) -> BackendResult<Vec<OsString>> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.into()];

    match operation {
        Operation::Compress { level } => {
            let source_bit_rate = probe
                .video_bit_rate()
                .ok_or(BackendError::MissingStream { kind: "video" })?;
            let target = (source_bit_rate as f64 * level.bitrate_factor()) as u64;
            tracing::debug!(
                "Compressing video bitrate {} -> {} ({})",
                source_bit_rate,
                target,
                level
            );
            args.extend(["-c:v", "libx264", "-b:v"].map(OsString::from));
            args.push(target.to_string().into());
            args.extend(["-c:a", "copy"].map(OsString::from));
        }
        Operation::ChangeResolution { width, height } => {
            args.push("-vf".into());
            args.push(format!("scale={width}:{height}").into());
            args.extend(["-c:a", "copy"].map(OsString::from));
        }
        Operation::ChangeAspectRatio { ratio } => {
            args.push("-aspect".into());
            args.push(format!("{}:{}", ratio.width, ratio.height).into());
            args.extend(["-c", "copy"].map(OsString::from));
        }
        Operation::ConvertToAudio => {
            args.extend(["-vn", "-acodec", "libmp3lame", "-q:a", "2"].map(OsString::from));
        }
        Operation::TrimByTimeRange {
            start_seconds,
            end_seconds,
        } => {
            args.push("-ss".into());
            args.push(start_seconds.to_string().into());
            args.push("-to".into());
            args.push(end_seconds.to_string().into());
            args.push("-vf".into());
            args.push(
                format!(
                    "fps={GIF_FRAME_RATE},scale={GIF_WIDTH}:-1:flags=lanczos,\
                     split[a][b];[a]palettegen[p];[b][p]paletteuse"
                )
                .into(),
            );
            args.extend(["-loop", "0"].map(OsString::from));
        }
    }

    args.push(output.into());
    Ok(args)
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    bit_rate: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

/// Parses `ffprobe -print_format json` output.
///
/// ffprobe reports numeric fields as strings; unparsable ones become `None`.
///
/// # Errors
///
/// - `BackendError::ProbeFailed` - Output is not the expected JSON shape
pub fn parse_probe_output(stdout: &[u8]) -> BackendResult<MediaProbe> {
    let parsed: FfprobeOutput =
        serde_json::from_slice(stdout).map_err(|e| BackendError::ProbeFailed {
            reason: format!("unreadable ffprobe output: {e}"),
        })?;

    let streams = parsed
        .streams
        .into_iter()
        .map(|stream| StreamInfo {
            codec_type: stream.codec_type.unwrap_or_default(),
            codec_name: stream.codec_name,
            bit_rate: stream.bit_rate.and_then(|rate| rate.parse().ok()),
            width: stream.width,
            height: stream.height,
        })
        .collect();

    let (duration_seconds, bit_rate) = match parsed.format {
        Some(format) => (
            format.duration.and_then(|d| d.parse().ok()),
            format.bit_rate.and_then(|rate| rate.parse().ok()),
        ),
        None => (None, None),
    };

    Ok(MediaProbe {
        streams,
        duration_seconds,
        bit_rate,
    })
}

fn last_line(stderr: &str) -> &str {
    stderr.trim().lines().last().unwrap_or("no output")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AspectRatio, CompressLevel};

    fn args_as_strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    fn video_probe(bit_rate: u64) -> MediaProbe {
        MediaProbe {
            streams: vec![StreamInfo {
                codec_type: "video".to_string(),
                bit_rate: Some(bit_rate),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_compress_scales_bitrate() {
        let probe = video_probe(2_000_000);
        let args = build_transform_args(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            &Operation::Compress {
                level: CompressLevel::High,
            },
            &probe,
        )
        .unwrap();
        let args = args_as_strings(args);

        let position = args.iter().position(|arg| arg == "-b:v").unwrap();
        assert_eq!(args[position + 1], "1000000");
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_compress_without_bitrate_fails() {
        let result = build_transform_args(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            &Operation::Compress {
                level: CompressLevel::Low,
            },
            &MediaProbe::default(),
        );
        assert!(matches!(
            result,
            Err(BackendError::MissingStream { kind: "video" })
        ));
    }

    #[test]
    fn test_operation_specific_arguments() {
        let cases = vec![
            (
                Operation::ChangeResolution {
                    width: 640,
                    height: 360,
                },
                "scale=640:360",
            ),
            (
                Operation::ChangeAspectRatio {
                    ratio: AspectRatio {
                        width: 16,
                        height: 9,
                    },
                },
                "16:9",
            ),
            (Operation::ConvertToAudio, "libmp3lame"),
            (
                Operation::TrimByTimeRange {
                    start_seconds: 5,
                    end_seconds: 12,
                },
                "fps=10,scale=480:-1:flags=lanczos,split[a][b];[a]palettegen[p];[b][p]paletteuse",
            ),
        ];

        for (operation, expected) in cases {
            let args = build_transform_args(
                Path::new("in.mp4"),
                Path::new("out.bin"),
                &operation,
                &MediaProbe::default(),
            )
            .unwrap();
            let args = args_as_strings(args);
            assert!(
                args.iter().any(|arg| arg == expected),
                "{operation}: {args:?}"
            );
        }
    }

    #[test]
    fn test_trim_passes_time_range() {
        let args = build_transform_args(
            Path::new("in.mp4"),
            Path::new("out.gif"),
            &Operation::TrimByTimeRange {
                start_seconds: 5,
                end_seconds: 12,
            },
            &MediaProbe::default(),
        )
        .unwrap();
        let args = args_as_strings(args);

        let ss = args.iter().position(|arg| arg == "-ss").unwrap();
        let to = args.iter().position(|arg| arg == "-to").unwrap();
        assert_eq!(args[ss + 1], "5");
        assert_eq!(args[to + 1], "12");
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "bit_rate": "1500000", "width": 1920, "height": 1080},
                {"codec_type": "audio", "codec_name": "aac", "bit_rate": "N/A"}
            ],
            "format": {"duration": "12.500000", "bit_rate": "1650000"}
        }"#;

        let probe = parse_probe_output(json).unwrap();
        assert_eq!(probe.streams.len(), 2);
        assert_eq!(probe.video_bit_rate(), Some(1_500_000));
        assert_eq!(probe.streams[1].bit_rate, None);
        assert_eq!(probe.duration_seconds, Some(12.5));
        assert_eq!(probe.bit_rate, Some(1_650_000));
    }

    #[test]
    fn test_parse_probe_output_rejects_garbage() {
        assert!(matches!(
            parse_probe_output(b"not json"),
            Err(BackendError::ProbeFailed { .. })
        ));
    }
}
