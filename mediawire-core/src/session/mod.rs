//! Server-side job session.
//!
//! One session serves one connection: it reads the control frame, validates
//! the operation, receives the source file, runs the job, and streams the
//! result back. Every session ends in exactly one terminal state and removes
//! its temporary files whichever state that is.

pub mod files;
pub mod state;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::Instrument;
use uuid::Uuid;

pub use files::SessionFiles;
pub use state::{SessionOutcome, SessionState};

use crate::config::MediawireConfig;
use crate::job::{Job, JobDispatcher};
use crate::protocol::{
    FramedConnection, Operation, ProtocolError, StatusResponse, TransferError, TransferStats,
    receive_file, send_file,
};

/// Errors that abort a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Local I/O failed during {operation}: {source}")]
    LocalResource {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    fn local(operation: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| SessionError::LocalResource { operation, source }
    }

    fn from_transfer(error: TransferError, operation: &'static str) -> Self {
        match error {
            TransferError::Protocol(error) => SessionError::Protocol(error),
            TransferError::Source(source) | TransferError::Destination(source) => {
                SessionError::LocalResource { operation, source }
            }
        }
    }
}

/// Extracts a safe file name from the name frame.
///
/// Only the final path component is kept, so a peer cannot write outside
/// the upload directory.
///
/// # Errors
///
/// - `ProtocolError::InvalidFileName` - Payload is empty, not UTF-8, or has
///   no final component (such as `..` or `/`)
pub fn sanitize_file_name(payload: &[u8]) -> Result<String, ProtocolError> {
    let raw = std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidFileName {
        reason: "name is not valid UTF-8".to_string(),
    })?;

    let name = Path::new(raw)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ProtocolError::InvalidFileName {
            reason: format!("{raw:?} has no usable file name"),
        })?;

    Ok(name.to_string())
}

/// One client connection driven through the job lifecycle.
pub struct Session<S> {
    id: Uuid,
    peer: Option<SocketAddr>,
    connection: FramedConnection<S>,
    dispatcher: JobDispatcher,
    upload_dir: PathBuf,
    output_dir: PathBuf,
    chunk_size: usize,
    state: SessionState,
    files: SessionFiles,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, config: &MediawireConfig, dispatcher: JobDispatcher) -> Self {
        let id = Uuid::new_v4();
        let connection = FramedConnection::new(stream)
            .with_idle_timeout(config.network.idle_timeout)
            .with_max_frame_size(config.protocol.max_frame_size);

        Self {
            id,
            peer: None,
            connection,
            dispatcher,
            upload_dir: config.storage.upload_dir(),
            output_dir: config.storage.output_dir(),
            chunk_size: config.storage.chunk_size,
            state: SessionState::AwaitControl,
            files: SessionFiles::new(id),
        }
    }

    /// Records the remote address for logging.
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Drives the session to a terminal state and closes the connection.
    pub async fn run(mut self) -> SessionOutcome {
        let peer = self
            .peer
            .map(|peer| peer.to_string())
            .unwrap_or_else(|| "local".to_string());
        let span = tracing::info_span!("session", id = %self.id.simple(), peer = %peer);

        async move {
            tracing::info!("Session started");

            let outcome = match self.drive().await {
                Ok(outcome) => outcome,
                Err(error) => {
                    match &error {
                        SessionError::LocalResource { .. } => {
                            tracing::error!("Session aborted: {}", error)
                        }
                        SessionError::Protocol(_) => tracing::warn!("Session aborted: {}", error),
                    }
                    self.transition(SessionState::Aborted);
                    SessionOutcome::Aborted {
                        reason: error.to_string(),
                    }
                }
            };

            if let Err(e) = self.connection.shutdown().await {
                tracing::debug!("Shutdown after {} failed: {}", self.state, e);
            }
            self.files.cleanup().await;

            tracing::info!("Session finished in {}", self.state);
            outcome
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self) -> Result<SessionOutcome, SessionError> {
        let control = self.connection.read_frame().await?;
        self.transition(SessionState::Validating);

        let operation = match Operation::from_payload(&control) {
            Ok(operation) => operation,
            Err(error) => {
                tracing::info!("Rejected control message: {}", error);
                self.send_status(StatusResponse::error(error.message.clone()))
                    .await?;
                self.transition(SessionState::Rejected);
                return Ok(SessionOutcome::Rejected {
                    message: error.message,
                });
            }
        };
        self.send_status(StatusResponse::Ok).await?;
        self.transition(SessionState::AwaitName);

        let name_frame = self.connection.read_frame().await?;
        let file_name = sanitize_file_name(&name_frame)?;
        let upload = self.receive_upload(&file_name).await?;

        self.transition(SessionState::Processing);
        let job = Job::new(operation, upload.0);
        self.files.track_output(self.dispatcher.output_path(&job));

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(SessionError::local("create output directory"))?;

        let result = match self.dispatcher.dispatch(&job).await {
            Ok(output_path) => tokio::fs::File::open(&output_path)
                .await
                .map_err(|e| format!("cannot open result: {e}")),
            Err(error) => Err(error.message),
        };

        let mut result_file = match result {
            Ok(file) => file,
            Err(message) => {
                tracing::warn!("Job {} failed: {}", job.operation, message);
                self.send_status(StatusResponse::error(message.clone()))
                    .await?;
                self.transition(SessionState::ProcessFailed);
                return Ok(SessionOutcome::ProcessFailed { message });
            }
        };

        self.send_status(StatusResponse::Ok).await?;
        self.transition(SessionState::StreamingResult);

        let sent = send_file(&mut self.connection, &mut result_file, self.chunk_size)
            .await
            .map_err(|e| SessionError::from_transfer(e, "read result file"))?;
        self.transition(SessionState::Done);

        Ok(SessionOutcome::Done {
            uploaded_bytes: upload.1.bytes,
            result_bytes: sent.bytes,
        })
    }

    async fn receive_upload(
        &mut self,
        file_name: &str,
    ) -> Result<(PathBuf, TransferStats), SessionError> {
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(SessionError::local("create upload directory"))?;

        let path = self.files.track_upload(&self.upload_dir, file_name);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(SessionError::local("create upload file"))?;

        self.transition(SessionState::Uploading);
        let stats = receive_file(&mut self.connection, &mut file)
            .await
            .map_err(|e| SessionError::from_transfer(e, "write upload file"))?;

        tracing::debug!(
            "Received {} ({} bytes, {} frames)",
            file_name,
            stats.bytes,
            stats.data_frames
        );
        Ok((path, stats))
    }

    async fn send_status(&mut self, status: StatusResponse) -> Result<(), SessionError> {
        self.connection.write_frame(&status.to_payload()).await?;
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.allows(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!("{} -> {}", self.state, next);
        self.state = next;
    }
}
