//! Helpers for driving a real server in tests.
//!
//! Only available in tests or with the `test-utils` feature.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;

use crate::config::MediawireConfig;
use crate::job::MediaBackend;
use crate::server::{JobServer, ServerError};

/// Server bound to an ephemeral loopback port with its own work directory.
///
/// The accept loop is aborted and the work directory deleted on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    pub config: MediawireConfig,
    work_dir: TempDir,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Binds and starts accepting in the background.
    ///
    /// # Errors
    ///
    /// - `ServerError` - Temp directory or listener setup failed
    pub async fn spawn(backend: Arc<dyn MediaBackend>) -> Result<Self, ServerError> {
        Self::spawn_with(backend, |_| {}).await
    }

    /// Like `spawn`, with a hook to adjust the testing config first.
    ///
    /// # Errors
    ///
    /// - `ServerError` - Temp directory or listener setup failed
    pub async fn spawn_with(
        backend: Arc<dyn MediaBackend>,
        adjust: impl FnOnce(&mut MediawireConfig),
    ) -> Result<Self, ServerError> {
        let work_dir = TempDir::new()?;
        let mut config = MediawireConfig::for_testing(work_dir.path());
        adjust(&mut config);

        let server = JobServer::bind(config.clone(), backend).await?;
        let addr = server.local_addr()?;
        config.network.port = addr.port();

        let handle = tokio::spawn(server.run());
        Ok(Self {
            addr,
            config,
            work_dir,
            handle,
        })
    }

    /// Client-side config pointing at this server.
    pub fn client_config(&self) -> MediawireConfig {
        self.config.clone()
    }

    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    /// Files currently in `before_process/` and `after_process/`.
    pub fn temp_files(&self) -> Vec<PathBuf> {
        [self.config.storage.upload_dir(), self.config.storage.output_dir()]
            .iter()
            .filter_map(|dir| std::fs::read_dir(dir).ok())
            .flat_map(|entries| entries.filter_map(|entry| entry.ok().map(|e| e.path())))
            .collect()
    }

    /// Polls until both work directories are empty or `limit` elapses.
    ///
    /// Sessions clean up after closing the socket, so a client that saw
    /// EOF may still race the removal.
    pub async fn wait_for_clean_work_dir(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if self.temp_files().is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Deterministic bytes for upload fixtures.
pub fn sample_media_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Writes `len` fixture bytes to `dir/name` and returns the path.
///
/// # Errors
///
/// - `std::io::Error` - File cannot be written
pub fn create_sample_media(dir: &Path, name: &str, len: usize) -> std::io::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, sample_media_bytes(len))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::SimulatedBackend;

    #[tokio::test]
    async fn test_spawned_server_has_empty_work_dirs() {
        let server = TestServer::spawn(Arc::new(SimulatedBackend::new()))
            .await
            .unwrap();

        assert_eq!(server.client_config().network.port, server.addr.port());
        assert!(server.temp_files().is_empty());
    }

    #[test]
    fn test_sample_media_is_deterministic() {
        assert_eq!(sample_media_bytes(64), sample_media_bytes(64));
        assert_eq!(sample_media_bytes(0).len(), 0);
    }
}
