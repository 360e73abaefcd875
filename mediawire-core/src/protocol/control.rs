//! Control message parsing and validation
//!
//! The first frame of every session is a JSON object naming the requested
//! operation and carrying its parameters. Validation runs in three passes and
//! the first failure wins: the `operation` tag must be known, the fields
//! required by that operation must be present and well-typed, and their
//! values must satisfy the operation's constraints.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Operation tags accepted by the server, in menu order.
pub const KNOWN_OPERATIONS: [&str; 5] = [
    "compress",
    "change_resolution",
    "change_aspect_ratio",
    "convert_to_audio",
    "trim_by_time_range",
];

static ASPECT_RATIO_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[1-9][0-9]*/[1-9][0-9]*$").ok());

/// Rejection of a control message, reported to the peer in a status frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Bitrate reduction requested by a `compress` job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressLevel {
    /// Keep 90% of the source bitrate
    Low,
    /// Keep 70% of the source bitrate
    Medium,
    /// Keep 50% of the source bitrate
    High,
}

impl CompressLevel {
    /// Multiplier applied to the source video bitrate.
    pub fn bitrate_factor(self) -> f64 {
        match self {
            CompressLevel::Low => 0.9,
            CompressLevel::Medium => 0.7,
            CompressLevel::High => 0.5,
        }
    }

    /// Maps a wire factor back to its level. Only exact matches count.
    pub fn from_factor(factor: f64) -> Option<Self> {
        [CompressLevel::Low, CompressLevel::Medium, CompressLevel::High]
            .into_iter()
            .find(|level| level.bitrate_factor() == factor)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompressLevel::Low => "low",
            CompressLevel::Medium => "medium",
            CompressLevel::High => "high",
        }
    }
}

impl FromStr for CompressLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(CompressLevel::Low),
            "medium" => Ok(CompressLevel::Medium),
            "high" => Ok(CompressLevel::High),
            _ => Err(ValidationError::new(format!(
                "invalid compress level: {s} (expected low, medium or high)"
            ))),
        }
    }
}

impl fmt::Display for CompressLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Display aspect ratio such as `16/9`. Both parts are positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl FromStr for AspectRatio {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ValidationError::new(format!(
                "invalid aspect ratio: {s} (expected N/M with both parts > 0)"
            ))
        };

        let matches = ASPECT_RATIO_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(s));
        if !matches {
            return Err(invalid());
        }

        let (width, height) = s.split_once('/').ok_or_else(invalid)?;
        Ok(Self {
            width: width.parse().map_err(|_| invalid())?,
            height: height.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.width, self.height)
    }
}

/// A validated media-editing request.
///
/// Built once from the first frame of a session and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Re-encode video at a fraction of its bitrate
    Compress { level: CompressLevel },
    /// Scale video to an exact frame size
    ChangeResolution { width: u32, height: u32 },
    /// Change the display aspect ratio
    ChangeAspectRatio { ratio: AspectRatio },
    /// Drop video and keep the audio track
    ConvertToAudio,
    /// Cut the clip down to `[start_seconds, end_seconds]`
    TrimByTimeRange { start_seconds: u64, end_seconds: u64 },
}

impl Operation {
    /// Wire tag of this operation.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Compress { .. } => "compress",
            Operation::ChangeResolution { .. } => "change_resolution",
            Operation::ChangeAspectRatio { .. } => "change_aspect_ratio",
            Operation::ConvertToAudio => "convert_to_audio",
            Operation::TrimByTimeRange { .. } => "trim_by_time_range",
        }
    }

    /// Parses and validates a control frame payload.
    ///
    /// # Errors
    ///
    /// - `ValidationError` - Payload is not a JSON object, the operation is
    ///   unknown, a required field is missing or mistyped, or a value is out
    ///   of range
    pub fn from_payload(payload: &[u8]) -> Result<Self, ValidationError> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| ValidationError::new(format!("malformed control message: {e}")))?;

        let Some(object) = value.as_object() else {
            return Err(ValidationError::new(
                "malformed control message: expected a JSON object",
            ));
        };

        let operation = object.get("operation").and_then(|tag| tag.as_str());
        let Some(operation) = operation.filter(|tag| KNOWN_OPERATIONS.contains(tag)) else {
            return Err(ValidationError::new("unknown operation"));
        };
        let operation = operation.to_string();

        let message: ControlMessage = serde_json::from_value(value).map_err(|e| {
            ValidationError::new(format!("invalid parameters for {operation}: {e}"))
        })?;

        message.validate()
    }

    /// Serializes this operation as a control frame payload.
    pub fn to_payload(&self) -> Vec<u8> {
        let message = ControlMessage::from(self);
        // Serializing plain enums, strings and numbers cannot fail
        serde_json::to_vec(&message).unwrap_or_default()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Compress { level } => write!(f, "compress ({level})"),
            Operation::ChangeResolution { width, height } => {
                write!(f, "change_resolution ({width}x{height})")
            }
            Operation::ChangeAspectRatio { ratio } => write!(f, "change_aspect_ratio ({ratio})"),
            Operation::ConvertToAudio => write!(f, "convert_to_audio"),
            Operation::TrimByTimeRange {
                start_seconds,
                end_seconds,
            } => write!(f, "trim_by_time_range ({start_seconds}s..{end_seconds}s)"),
        }
    }
}

/// Control message as it appears on the wire.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
enum ControlMessage {
    Compress {
        compress_level: CompressLevelField,
    },
    ChangeResolution {
        width: i64,
        height: i64,
    },
    ChangeAspectRatio {
        aspect_ratio: String,
    },
    ConvertToAudio,
    TrimByTimeRange {
        start_seconds: i64,
        end_seconds: i64,
    },
}

/// `compress_level` is either a bitrate factor or a level name.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum CompressLevelField {
    Factor(f64),
    Named(String),
}

impl ControlMessage {
    fn validate(self) -> Result<Operation, ValidationError> {
        match self {
            ControlMessage::Compress { compress_level } => {
                let level = match compress_level {
                    CompressLevelField::Factor(factor) => CompressLevel::from_factor(factor)
                        .ok_or_else(|| {
                            ValidationError::new(format!(
                                "invalid compress level: {factor} (expected 0.5, 0.7 or 0.9)"
                            ))
                        })?,
                    CompressLevelField::Named(name) => name.parse()?,
                };
                Ok(Operation::Compress { level })
            }
            ControlMessage::ChangeResolution { width, height } => Ok(Operation::ChangeResolution {
                width: positive_dimension("width", width)?,
                height: positive_dimension("height", height)?,
            }),
            ControlMessage::ChangeAspectRatio { aspect_ratio } => Ok(Operation::ChangeAspectRatio {
                ratio: aspect_ratio.parse()?,
            }),
            ControlMessage::ConvertToAudio => Ok(Operation::ConvertToAudio),
            ControlMessage::TrimByTimeRange {
                start_seconds,
                end_seconds,
            } => {
                let start = non_negative_seconds("start_seconds", start_seconds)?;
                let end = non_negative_seconds("end_seconds", end_seconds)?;
                if start > end {
                    return Err(ValidationError::new(format!(
                        "start_seconds ({start}) must not exceed end_seconds ({end})"
                    )));
                }
                Ok(Operation::TrimByTimeRange {
                    start_seconds: start,
                    end_seconds: end,
                })
            }
        }
    }
}

impl From<&Operation> for ControlMessage {
    fn from(operation: &Operation) -> Self {
        match operation {
            Operation::Compress { level } => ControlMessage::Compress {
                compress_level: CompressLevelField::Factor(level.bitrate_factor()),
            },
            Operation::ChangeResolution { width, height } => ControlMessage::ChangeResolution {
                width: i64::from(*width),
                height: i64::from(*height),
            },
            Operation::ChangeAspectRatio { ratio } => ControlMessage::ChangeAspectRatio {
                aspect_ratio: ratio.to_string(),
            },
            Operation::ConvertToAudio => ControlMessage::ConvertToAudio,
            Operation::TrimByTimeRange {
                start_seconds,
                end_seconds,
            } => ControlMessage::TrimByTimeRange {
                start_seconds: i64::try_from(*start_seconds).unwrap_or(i64::MAX),
                end_seconds: i64::try_from(*end_seconds).unwrap_or(i64::MAX),
            },
        }
    }
}

fn positive_dimension(field: &str, value: i64) -> Result<u32, ValidationError> {
    if value <= 0 {
        return Err(ValidationError::new(format!(
            "{field} must be a positive integer, got {value}"
        )));
    }
    u32::try_from(value)
        .map_err(|_| ValidationError::new(format!("{field} is out of range: {value}")))
}

fn non_negative_seconds(field: &str, value: i64) -> Result<u64, ValidationError> {
    u64::try_from(value)
        .map_err(|_| ValidationError::new(format!("{field} must be non-negative, got {value}")))
}
