//! Session lifecycle states and outcomes

use std::fmt;

/// Position of a session in the job lifecycle.
///
/// A session starts in `AwaitControl` and ends in exactly one terminal
/// state, after which the connection is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Waiting for the control frame
    #[default]
    AwaitControl,
    /// Checking the requested operation
    Validating,
    /// Control message refused; terminal
    Rejected,
    /// Waiting for the file name frame
    AwaitName,
    /// Receiving the source file
    Uploading,
    /// Backend is transforming the source
    Processing,
    /// Backend failed; terminal
    ProcessFailed,
    /// Sending the result file
    StreamingResult,
    /// Result delivered; terminal
    Done,
    /// I/O error, protocol violation or idle timeout; terminal
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Rejected
                | SessionState::ProcessFailed
                | SessionState::Done
                | SessionState::Aborted
        )
    }

    /// Whether `next` is a legal successor of this state.
    ///
    /// Any non-terminal state may abort.
    pub fn allows(self, next: SessionState) -> bool {
        use SessionState::*;

        if next == Aborted {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (AwaitControl, Validating)
                | (Validating, Rejected)
                | (Validating, AwaitName)
                | (AwaitName, Uploading)
                | (Uploading, Processing)
                | (Processing, StreamingResult)
                | (Processing, ProcessFailed)
                | (StreamingResult, Done)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::AwaitControl => "AWAIT_CONTROL",
            SessionState::Validating => "VALIDATING",
            SessionState::Rejected => "REJECTED",
            SessionState::AwaitName => "AWAIT_NAME",
            SessionState::Uploading => "UPLOADING",
            SessionState::Processing => "PROCESSING",
            SessionState::ProcessFailed => "PROCESS_FAILED",
            SessionState::StreamingResult => "STREAMING_RESULT",
            SessionState::Done => "DONE",
            SessionState::Aborted => "ABORTED",
        };
        write!(f, "{name}")
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Result streamed back in full
    Done {
        uploaded_bytes: u64,
        result_bytes: u64,
    },
    /// Control message failed validation
    Rejected { message: String },
    /// Backend could not process the upload
    ProcessFailed { message: String },
    /// Connection dropped, protocol violated, timed out, or local I/O failed
    Aborted { reason: String },
}

impl SessionOutcome {
    /// Terminal state matching this outcome.
    pub fn state(&self) -> SessionState {
        match self {
            SessionOutcome::Done { .. } => SessionState::Done,
            SessionOutcome::Rejected { .. } => SessionState::Rejected,
            SessionOutcome::ProcessFailed { .. } => SessionState::ProcessFailed,
            SessionOutcome::Aborted { .. } => SessionState::Aborted,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, SessionOutcome::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            SessionState::AwaitControl,
            SessionState::Validating,
            SessionState::AwaitName,
            SessionState::Uploading,
            SessionState::Processing,
            SessionState::StreamingResult,
            SessionState::Done,
        ];

        for pair in path.windows(2) {
            assert!(pair[0].allows(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!SessionState::AwaitControl.allows(SessionState::Uploading));
        assert!(!SessionState::Validating.allows(SessionState::Processing));
        assert!(!SessionState::Processing.allows(SessionState::Done));
        assert!(!SessionState::Done.allows(SessionState::AwaitControl));
    }

    #[test]
    fn test_abort_only_from_live_states() {
        assert!(SessionState::AwaitControl.allows(SessionState::Aborted));
        assert!(SessionState::StreamingResult.allows(SessionState::Aborted));
        assert!(!SessionState::Rejected.allows(SessionState::Aborted));
        assert!(!SessionState::Aborted.allows(SessionState::Aborted));
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = [
            SessionState::AwaitControl,
            SessionState::Validating,
            SessionState::Rejected,
            SessionState::AwaitName,
            SessionState::Uploading,
            SessionState::Processing,
            SessionState::ProcessFailed,
            SessionState::StreamingResult,
            SessionState::Done,
            SessionState::Aborted,
        ]
        .into_iter()
        .filter(|state| state.is_terminal())
        .collect();

        assert_eq!(
            terminal,
            vec![
                SessionState::Rejected,
                SessionState::ProcessFailed,
                SessionState::Done,
                SessionState::Aborted
            ]
        );
    }

    #[test]
    fn test_outcome_state() {
        let outcome = SessionOutcome::Rejected {
            message: "unknown operation".to_string(),
        };
        assert_eq!(outcome.state(), SessionState::Rejected);
        assert!(!outcome.is_done());
    }
}
