//! TCP job server
//!
//! Accepts connections and runs one session per connection on its own
//! tokio task. Sessions share only the configuration, the backend handle
//! and the work directory.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::config::{ConfigError, MediawireConfig};
use crate::job::{JobDispatcher, MediaBackend};
use crate::session::{Session, SessionOutcome};

/// Errors starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to prepare work directory {path}: {source}")]
    WorkDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Listening server dispatching jobs to a media backend.
pub struct JobServer {
    listener: TcpListener,
    config: Arc<MediawireConfig>,
    dispatcher: JobDispatcher,
}

impl JobServer {
    /// Validates `config`, creates the work directories and binds the
    /// configured endpoint.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` - Configuration fails validation
    /// - `ServerError::WorkDirectory` - `before_process/` or `after_process/`
    ///   cannot be created
    /// - `ServerError::BindFailed` - Address is invalid or in use
    pub async fn bind(
        config: MediawireConfig,
        backend: Arc<dyn MediaBackend>,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        for path in [config.storage.upload_dir(), config.storage.output_dir()] {
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|source| ServerError::WorkDirectory { path, source })?;
        }

        let address = config.endpoint();
        let listener =
            TcpListener::bind(&address)
                .await
                .map_err(|source| ServerError::BindFailed {
                    address: address.clone(),
                    source,
                })?;

        let dispatcher = JobDispatcher::new(backend, config.storage.output_dir());
        tracing::info!("Job server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            config: Arc::new(config),
            dispatcher,
        })
    }

    /// Address actually bound, useful when the configured port is 0.
    ///
    /// # Errors
    ///
    /// - `ServerError::Io` - Socket address unavailable
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &MediawireConfig {
        &self.config
    }

    /// Accepts connections forever.
    ///
    /// Accept failures are logged and the loop continues.
    ///
    /// # Errors
    ///
    /// Reserved for fatal listener failures; currently always `Ok`.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Sessions already running keep going on their own tasks.
    ///
    /// # Errors
    ///
    /// Reserved for fatal listener failures; currently always `Ok`.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Job server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                        }
                        let config = Arc::clone(&self.config);
                        let dispatcher = self.dispatcher.clone();
                        tokio::spawn(async move {
                            Session::new(stream, &config, dispatcher)
                                .with_peer(peer)
                                .run()
                                .await
                        });
                    }
                    Err(e) => tracing::warn!("Failed to accept connection: {}", e),
                }
            }
        }
    }

    /// Runs one session on an already established stream.
    pub async fn serve_connection<S>(&self, stream: S, peer: Option<SocketAddr>) -> SessionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let session = Session::new(stream, &self.config, self.dispatcher.clone());
        match peer {
            Some(peer) => session.with_peer(peer).run().await,
            None => session.run().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::job::SimulatedBackend;
    use crate::protocol::{FramedConnection, StatusResponse};
    use crate::session::SessionState;

    #[tokio::test]
    async fn test_bind_creates_work_directories() {
        let temp_dir = tempdir().unwrap();
        let config = MediawireConfig::for_testing(&temp_dir.path().join("work"));

        let server = JobServer::bind(config, Arc::new(SimulatedBackend::new()))
            .await
            .unwrap();

        assert!(temp_dir.path().join("work/before_process").is_dir());
        assert!(temp_dir.path().join("work/after_process").is_dir());
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        let temp_dir = tempdir().unwrap();
        let mut config = MediawireConfig::for_testing(temp_dir.path());
        config.network.address = "not an address".to_string();

        let result = JobServer::bind(config, Arc::new(SimulatedBackend::new())).await;
        assert!(matches!(result, Err(ServerError::BindFailed { .. })));
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let temp_dir = tempdir().unwrap();
        let mut config = MediawireConfig::for_testing(temp_dir.path());
        config.storage.chunk_size = 0;

        let result = JobServer::bind(config, Arc::new(SimulatedBackend::new())).await;
        assert!(matches!(result, Err(ServerError::Config(_))));
        assert!(!temp_dir.path().join("before_process").exists());
    }

    #[tokio::test]
    async fn test_serve_connection_over_duplex() {
        let temp_dir = tempdir().unwrap();
        let config = MediawireConfig::for_testing(temp_dir.path());
        let server = JobServer::bind(config, Arc::new(SimulatedBackend::new()))
            .await
            .unwrap();

        let (client, stream) = tokio::io::duplex(1024);
        let mut client = FramedConnection::new(client);
        client.write_frame(br#"{"operation":"compress","compress_level":0.33}"#).await.unwrap();

        let outcome = server.serve_connection(stream, None).await;
        assert_eq!(outcome.state(), SessionState::Rejected);

        let status = StatusResponse::from_payload(&client.read_frame().await.unwrap()).unwrap();
        assert!(!status.is_ok());
    }
}
