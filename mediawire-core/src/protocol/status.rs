//! Status response frames
//!
//! Wire shape is `{"status": 0}` on success and
//! `{"status": 1, "error": "..."}` on failure. The `error` key is present
//! exactly when status is 1.

use serde::{Deserialize, Serialize};

use super::{ProtocolError, ProtocolResult};

const STATUS_OK: u8 = 0;
const STATUS_ERROR: u8 = 1;

/// Outcome of a handshake or processing step as reported to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusResponse {
    Ok,
    Error(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusPayload {
    status: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl StatusResponse {
    pub fn error(message: impl Into<String>) -> Self {
        StatusResponse::Error(message.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StatusResponse::Ok)
    }

    /// Serializes this response as a frame payload.
    pub fn to_payload(&self) -> Vec<u8> {
        let payload = match self {
            StatusResponse::Ok => StatusPayload {
                status: STATUS_OK,
                error: None,
            },
            StatusResponse::Error(message) => StatusPayload {
                status: STATUS_ERROR,
                error: Some(message.clone()),
            },
        };
        serde_json::to_vec(&payload).unwrap_or_default()
    }

    /// Parses a status frame payload.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MalformedStatus` - Not JSON, unknown status code, or
    ///   `error` present/absent inconsistently with the code
    pub fn from_payload(payload: &[u8]) -> ProtocolResult<Self> {
        let parsed: StatusPayload =
            serde_json::from_slice(payload).map_err(|e| ProtocolError::MalformedStatus {
                reason: e.to_string(),
            })?;

        match (parsed.status, parsed.error) {
            (STATUS_OK, None) => Ok(StatusResponse::Ok),
            (STATUS_ERROR, Some(message)) => Ok(StatusResponse::Error(message)),
            (STATUS_OK, Some(_)) => Err(ProtocolError::MalformedStatus {
                reason: "status 0 must not carry an error".to_string(),
            }),
            (STATUS_ERROR, None) => Err(ProtocolError::MalformedStatus {
                reason: "status 1 requires an error message".to_string(),
            }),
            (code, _) => Err(ProtocolError::MalformedStatus {
                reason: format!("unknown status code {code}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_wire_shape() {
        let payload = StatusResponse::Ok.to_payload();
        assert_eq!(payload, br#"{"status":0}"#);
    }

    #[test]
    fn test_error_wire_shape() {
        let payload = StatusResponse::error("unknown operation").to_payload();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(value["status"], 1);
        assert_eq!(value["error"], "unknown operation");
    }

    #[test]
    fn test_parse_both_variants() {
        assert_eq!(
            StatusResponse::from_payload(br#"{"status":0}"#).unwrap(),
            StatusResponse::Ok
        );
        assert_eq!(
            StatusResponse::from_payload(br#"{"status":1,"error":"boom"}"#).unwrap(),
            StatusResponse::error("boom")
        );
    }

    #[test]
    fn test_rejects_inconsistent_status() {
        let cases: [&[u8]; 4] = [
            br#"{"status":1}"#,
            br#"{"status":0,"error":"x"}"#,
            br#"{"status":2}"#,
            b"garbage",
        ];

        for payload in cases {
            assert!(matches!(
                StatusResponse::from_payload(payload),
                Err(ProtocolError::MalformedStatus { .. })
            ));
        }
    }
}
