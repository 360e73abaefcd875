//! Job submission client
//!
//! Performs the client half of one job: control frame, file name, upload,
//! then download of the result next to the caller's other outputs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::MediawireConfig;
use crate::job::output_extension;
use crate::protocol::{
    FramedConnection, Operation, ProtocolError, StatusResponse, TransferError, TransferStats,
    receive_file, send_file,
};

/// Errors raised while submitting a job.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to connect to {address}: {source}")]
    ConnectFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to {address} after {after:?}")]
    ConnectTimeout { address: String, after: Duration },

    #[error("Server rejected the job: {message}")]
    Rejected { message: String },

    #[error("Server failed to process the job: {message}")]
    ProcessingFailed { message: String },

    #[error("Cannot read source {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write result {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Summary of a completed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub output_path: PathBuf,
    pub uploaded: TransferStats,
    pub downloaded: TransferStats,
}

/// Local path the result of `operation` on `source` is saved to.
///
/// The name is `<stem>_<operation>.<ext>` inside `output_dir`, with the
/// extension chosen the same way the server chooses it.
pub fn result_path(output_dir: &Path, operation: &Operation, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let extension = output_extension(operation, source);

    let name = if extension.is_empty() {
        format!("{stem}_{}", operation.name())
    } else {
        format!("{stem}_{}.{extension}", operation.name())
    };
    output_dir.join(name)
}

/// Client side of one job connection.
pub struct JobClient<S = TcpStream> {
    connection: FramedConnection<S>,
    chunk_size: usize,
    processing_timeout: Option<Duration>,
}

impl JobClient<TcpStream> {
    /// Connects to the configured server.
    ///
    /// # Errors
    ///
    /// - `ClientError::ConnectFailed` - Server unreachable
    /// - `ClientError::ConnectTimeout` - `connect_timeout` elapsed first
    pub async fn connect(config: &MediawireConfig) -> Result<Self, ClientError> {
        let address = config.endpoint();
        let connecting = TcpStream::connect(address.clone());

        let stream = match config.network.connect_timeout {
            Some(after) => tokio::time::timeout(after, connecting)
                .await
                .map_err(|_| ClientError::ConnectTimeout {
                    address: address.clone(),
                    after,
                })?,
            None => connecting.await,
        }
        .map_err(|source| ClientError::ConnectFailed {
            address: address.clone(),
            source,
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {}", e);
        }
        tracing::debug!("Connected to {}", address);

        Ok(Self::from_stream(stream, config))
    }
}

impl<S> JobClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an established stream.
    ///
    /// Frame reads and writes use the configured idle timeout, except the
    /// wait for processing, which uses `processing_timeout`.
    pub fn from_stream(stream: S, config: &MediawireConfig) -> Self {
        let connection = FramedConnection::new(stream)
            .with_idle_timeout(config.network.idle_timeout)
            .with_max_frame_size(config.protocol.max_frame_size);

        Self {
            connection,
            chunk_size: config.storage.chunk_size,
            processing_timeout: config.network.processing_timeout,
        }
    }

    /// Submits `source` for `operation` and saves the result in `output_dir`.
    ///
    /// Consumes the client; the server closes the connection after one job.
    /// No result file is left behind unless the job completes.
    ///
    /// # Errors
    ///
    /// - `ClientError::Source` - Source file cannot be opened or read
    /// - `ClientError::Rejected` - Server refused the control message
    /// - `ClientError::ProcessingFailed` - Server could not process the file
    /// - `ClientError::Output` - Result file cannot be written
    /// - `ClientError::Protocol` - Connection failed mid-job
    pub async fn submit(
        mut self,
        operation: &Operation,
        source: &Path,
        output_dir: &Path,
    ) -> Result<JobReport, ClientError> {
        let source_error = |source_err| ClientError::Source {
            path: source.to_path_buf(),
            source: source_err,
        };

        let file_name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                source_error(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "source has no UTF-8 file name",
                ))
            })?;
        let mut source_file = tokio::fs::File::open(source).await.map_err(source_error)?;

        self.connection.write_frame(&operation.to_payload()).await?;
        let status = self.connection.read_frame().await?;
        if let StatusResponse::Error(message) = StatusResponse::from_payload(&status)? {
            return Err(ClientError::Rejected { message });
        }

        self.connection.write_frame(file_name.as_bytes()).await?;
        let uploaded = send_file(&mut self.connection, &mut source_file, self.chunk_size)
            .await
            .map_err(|e| match e {
                TransferError::Protocol(e) => ClientError::Protocol(e),
                TransferError::Source(e) | TransferError::Destination(e) => source_error(e),
            })?;
        tracing::debug!("Uploaded {} ({} bytes)", file_name, uploaded.bytes);

        // The server is silent while the backend runs
        let status = self
            .connection
            .read_frame_within(self.processing_timeout)
            .await?;
        if let StatusResponse::Error(message) = StatusResponse::from_payload(&status)? {
            return Err(ClientError::ProcessingFailed { message });
        }

        let output_path = result_path(output_dir, operation, source);
        let downloaded = self.download(&output_path).await?;
        tracing::info!(
            "Saved {} result to {}",
            operation.name(),
            output_path.display()
        );

        Ok(JobReport {
            output_path,
            uploaded,
            downloaded,
        })
    }

    async fn download(&mut self, output_path: &Path) -> Result<TransferStats, ClientError> {
        let output_error = |source| ClientError::Output {
            path: output_path.to_path_buf(),
            source,
        };

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(output_error)?;
        }
        let mut output = tokio::fs::File::create(output_path)
            .await
            .map_err(output_error)?;

        match receive_file(&mut self.connection, &mut output).await {
            Ok(stats) => Ok(stats),
            Err(error) => {
                drop(output);
                if let Err(e) = tokio::fs::remove_file(output_path).await {
                    tracing::debug!("Failed to remove partial {}: {}", output_path.display(), e);
                }
                Err(match error {
                    TransferError::Protocol(e) => ClientError::Protocol(e),
                    TransferError::Source(e) | TransferError::Destination(e) => output_error(e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::job::{JobDispatcher, SimulatedBackend};
    use crate::protocol::CompressLevel;
    use crate::session::{Session, SessionState};

    #[test]
    fn test_result_path_naming() {
        let dir = Path::new("/out");

        assert_eq!(
            result_path(dir, &Operation::ConvertToAudio, Path::new("/in/clip.mp4")),
            PathBuf::from("/out/clip_convert_to_audio.mp3")
        );
        assert_eq!(
            result_path(
                dir,
                &Operation::Compress {
                    level: CompressLevel::Low
                },
                Path::new("movie.mkv")
            ),
            PathBuf::from("/out/movie_compress.mkv")
        );
        assert_eq!(
            result_path(
                dir,
                &Operation::TrimByTimeRange {
                    start_seconds: 1,
                    end_seconds: 2
                },
                Path::new("raw")
            ),
            PathBuf::from("/out/raw_trim_by_time_range.gif")
        );
    }

    #[tokio::test]
    async fn test_submit_against_in_process_session() {
        let work_dir = tempdir().unwrap();
        let output_dir = tempdir().unwrap();
        let config = MediawireConfig::for_testing(work_dir.path());
        let dispatcher = JobDispatcher::new(
            Arc::new(SimulatedBackend::new()),
            config.storage.output_dir(),
        );

        let source = work_dir.path().join("clip.mp4");
        std::fs::write(&source, vec![7u8; 40]).unwrap();

        let (client_stream, server_stream) = tokio::io::duplex(256);
        let session = tokio::spawn(Session::new(server_stream, &config, dispatcher).run());

        let report = JobClient::from_stream(client_stream, &config)
            .submit(&Operation::ConvertToAudio, &source, output_dir.path())
            .await
            .unwrap();

        assert_eq!(report.uploaded.data_frames, 3);
        assert_eq!(
            std::fs::read(&report.output_path).unwrap(),
            SimulatedBackend::expected_output(&Operation::ConvertToAudio, &[7u8; 40])
        );
        assert_eq!(session.await.unwrap().state(), SessionState::Done);
    }

    #[tokio::test]
    async fn test_processing_failure_leaves_no_output() {
        let work_dir = tempdir().unwrap();
        let output_dir = tempdir().unwrap();
        let config = MediawireConfig::for_testing(work_dir.path());
        let dispatcher = JobDispatcher::new(
            Arc::new(SimulatedBackend::new().failing_probe()),
            config.storage.output_dir(),
        );

        let source = work_dir.path().join("clip.mp4");
        std::fs::write(&source, b"not media").unwrap();

        let (client_stream, server_stream) = tokio::io::duplex(256);
        tokio::spawn(Session::new(server_stream, &config, dispatcher).run());

        let error = JobClient::from_stream(client_stream, &config)
            .submit(&Operation::ConvertToAudio, &source, output_dir.path())
            .await
            .unwrap_err();

        assert!(matches!(error, ClientError::ProcessingFailed { .. }));
        assert_eq!(std::fs::read_dir(output_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_processing_wait_outlasts_idle_timeout() {
        let work_dir = tempdir().unwrap();
        let output_dir = tempdir().unwrap();
        let mut config = MediawireConfig::for_testing(work_dir.path());
        config.network.idle_timeout = Duration::from_millis(200);
        let dispatcher = JobDispatcher::new(
            Arc::new(SimulatedBackend::new().with_delay(Duration::from_millis(600))),
            config.storage.output_dir(),
        );

        let source = work_dir.path().join("clip.mp4");
        std::fs::write(&source, vec![3u8; 20]).unwrap();

        let (client_stream, server_stream) = tokio::io::duplex(256);
        let session = tokio::spawn(Session::new(server_stream, &config, dispatcher).run());

        let report = JobClient::from_stream(client_stream, &config)
            .submit(&Operation::ConvertToAudio, &source, output_dir.path())
            .await
            .unwrap();

        assert!(report.output_path.exists());
        assert_eq!(session.await.unwrap().state(), SessionState::Done);
    }

    #[tokio::test]
    async fn test_processing_timeout_bounds_the_wait() {
        let work_dir = tempdir().unwrap();
        let output_dir = tempdir().unwrap();
        let mut config = MediawireConfig::for_testing(work_dir.path());
        config.network.processing_timeout = Some(Duration::from_millis(100));
        let dispatcher = JobDispatcher::new(
            Arc::new(SimulatedBackend::new().with_delay(Duration::from_millis(800))),
            config.storage.output_dir(),
        );

        let source = work_dir.path().join("clip.mp4");
        std::fs::write(&source, vec![3u8; 20]).unwrap();

        let (client_stream, server_stream) = tokio::io::duplex(256);
        tokio::spawn(Session::new(server_stream, &config, dispatcher).run());

        let error = JobClient::from_stream(client_stream, &config)
            .submit(&Operation::ConvertToAudio, &source, output_dir.path())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            ClientError::Protocol(ProtocolError::IdleTimeout { after })
                if after == Duration::from_millis(100)
        ));
        assert_eq!(std::fs::read_dir(output_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_sending() {
        let work_dir = tempdir().unwrap();
        let config = MediawireConfig::for_testing(work_dir.path());
        let (client_stream, _server_stream) = tokio::io::duplex(256);

        let error = JobClient::from_stream(client_stream, &config)
            .submit(
                &Operation::ConvertToAudio,
                &work_dir.path().join("absent.mp4"),
                work_dir.path(),
            )
            .await
            .unwrap_err();

        assert!(matches!(error, ClientError::Source { .. }));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let temp_dir = tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = MediawireConfig::for_testing(temp_dir.path());
        config.network.port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = JobClient::connect(&config).await;
        assert!(matches!(result, Err(ClientError::ConnectFailed { .. })));
    }
}
