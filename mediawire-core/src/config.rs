//! Centralized configuration for Mediawire.
//!
//! All tunable parameters are defined here and passed explicitly into the
//! server, each session and the client. Values come from defaults, an
//! optional JSON file, then environment overrides; the CLI applies its
//! flags last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

/// Central configuration for all Mediawire components.
#[derive(Debug, Clone, Default)]
pub struct MediawireConfig {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub protocol: ProtocolConfig,
}

/// Listening address and connection timeouts.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Address the server binds to and the client connects to
    pub address: String,
    pub port: u16,
    /// Bound on every blocking frame read or write within a session
    pub idle_timeout: Duration,
    /// Bound on the client's wait for the processing status after upload;
    /// `None` waits as long as the server keeps processing.
    pub processing_timeout: Option<Duration>,
    /// Bound on the client's TCP connect; `None` waits for the OS.
    /// The server's accept loop is never bounded.
    pub connect_timeout: Option<Duration>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 9001,
            idle_timeout: Duration::from_secs(30),
            processing_timeout: None,
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Temporary file locations and transfer granularity.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root of `before_process/` and `after_process/`
    pub work_dir: PathBuf,
    /// Bytes per data frame when sending a file
    pub chunk_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("tmp"),
            chunk_size: 1024,
        }
    }
}

impl StorageConfig {
    /// Directory holding uploaded sources.
    pub fn upload_dir(&self) -> PathBuf {
        self.work_dir.join("before_process")
    }

    /// Directory holding transformation results.
    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("after_process")
    }
}

/// Wire protocol limits.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Largest frame payload accepted from a peer
    pub max_frame_size: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// On-disk configuration file shape.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    address: Option<String>,
    port: Option<u16>,
    /// Idle timeout in seconds
    client_connection_time_out: Option<u64>,
    work_dir: Option<PathBuf>,
    chunk_size: Option<usize>,
}

impl MediawireConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparsable values are ignored and the previous value is kept.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Loads a JSON config file over the defaults.
    ///
    /// Environment overrides are not applied; chain `with_env_overrides`.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Read` - File cannot be read
    /// - `ConfigError::Parse` - File is not valid config JSON
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config = Self::default();
        if let Some(address) = file.address {
            config.network.address = address;
        }
        if let Some(port) = file.port {
            config.network.port = port;
        }
        if let Some(seconds) = file.client_connection_time_out {
            config.network.idle_timeout = Duration::from_secs(seconds);
        }
        if let Some(work_dir) = file.work_dir {
            config.storage.work_dir = work_dir;
        }
        if let Some(chunk_size) = file.chunk_size {
            config.storage.chunk_size = chunk_size;
        }

        Ok(config)
    }

    /// Applies `MEDIAWIRE_*` environment variables on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(address) = std::env::var("MEDIAWIRE_ADDRESS") {
            self.network.address = address;
        }

        if let Ok(port) = std::env::var("MEDIAWIRE_PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            self.network.port = port;
        }

        if let Ok(timeout) = std::env::var("MEDIAWIRE_IDLE_TIMEOUT")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            self.network.idle_timeout = Duration::from_secs(seconds);
        }

        if let Ok(work_dir) = std::env::var("MEDIAWIRE_WORK_DIR") {
            self.storage.work_dir = PathBuf::from(work_dir);
        }

        if let Ok(chunk_size) = std::env::var("MEDIAWIRE_CHUNK_SIZE")
            && let Ok(size) = chunk_size.parse::<usize>()
        {
            self.storage.chunk_size = size;
        }

        self
    }

    /// Checks values that would make sessions unusable.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Invalid` - Zero chunk size, a zero timeout, or chunks
    ///   larger than the frame limit
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                reason: "chunk_size must be positive".to_string(),
            });
        }
        if self.storage.chunk_size as u64 > u64::from(self.protocol.max_frame_size) {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "chunk_size {} exceeds max_frame_size {}",
                    self.storage.chunk_size, self.protocol.max_frame_size
                ),
            });
        }
        if self.network.idle_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                reason: "idle timeout must be positive".to_string(),
            });
        }
        if self.network.processing_timeout.is_some_and(|after| after.is_zero()) {
            return Err(ConfigError::Invalid {
                reason: "processing timeout must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// `address:port` string for binding or connecting.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.network.address, self.network.port)
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Binds an ephemeral loopback port, times out quickly and uses small
    /// chunks so multi-frame transfers happen with tiny fixtures.
    pub fn for_testing(work_dir: &Path) -> Self {
        Self {
            network: NetworkConfig {
                address: "127.0.0.1".to_string(),
                port: 0,
                idle_timeout: Duration::from_secs(2),
                processing_timeout: None,
                connect_timeout: Some(Duration::from_secs(2)),
            },
            storage: StorageConfig {
                work_dir: work_dir.to_path_buf(),
                chunk_size: 16,
            },
            protocol: ProtocolConfig::default(),
        }
    }
}
