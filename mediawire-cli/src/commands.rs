//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Subcommand};
use mediawire_core::job::MediaBackend;
use mediawire_core::protocol::control::KNOWN_OPERATIONS;
use mediawire_core::protocol::{AspectRatio, CompressLevel, Operation};
use mediawire_core::{
    FfmpegBackend, JobClient, JobServer, MediawireConfig, MediawireError, SimulatedBackend,
};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the job server
    Serve {
        #[command(flatten)]
        endpoint: EndpointArgs,
        /// Idle timeout per read, in seconds
        #[arg(long)]
        idle_timeout: Option<u64>,
        /// Directory holding before_process/ and after_process/
        #[arg(long)]
        work_dir: Option<PathBuf>,
        /// Use the in-process simulated backend instead of ffmpeg
        #[arg(long)]
        simulate: bool,
        /// Path to the ffmpeg binary
        #[arg(long, default_value = "ffmpeg")]
        ffmpeg: PathBuf,
        /// Path to the ffprobe binary
        #[arg(long, default_value = "ffprobe")]
        ffprobe: PathBuf,
    },
    /// Submit a file for processing and save the result
    Submit {
        #[command(flatten)]
        endpoint: EndpointArgs,
        /// Media file to upload
        source: PathBuf,
        /// Directory the result is written to
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
        #[command(subcommand)]
        operation: OperationCommand,
    },
    /// List the supported operations
    Operations,
}

/// Server endpoint overrides shared by `serve` and `submit`.
#[derive(Args)]
pub struct EndpointArgs {
    /// Address to bind or connect to
    #[arg(long)]
    address: Option<String>,
    /// Port to bind or connect to
    #[arg(short, long)]
    port: Option<u16>,
    /// Bytes per data frame
    #[arg(long)]
    chunk_size: Option<usize>,
}

/// Operation to request from the server.
#[derive(Subcommand)]
pub enum OperationCommand {
    /// Reduce the video bitrate
    Compress {
        /// low, medium or high
        #[arg(default_value = "medium")]
        level: CompressLevel,
    },
    /// Scale the video to WIDTH x HEIGHT
    ChangeResolution { width: u32, height: u32 },
    /// Set the display aspect ratio, as W/H
    ChangeAspectRatio { ratio: AspectRatio },
    /// Extract the audio track as mp3
    ConvertToAudio,
    /// Cut [START, END] seconds into a gif
    TrimByTimeRange { start: u64, end: u64 },
}

impl From<OperationCommand> for Operation {
    fn from(command: OperationCommand) -> Self {
        match command {
            OperationCommand::Compress { level } => Operation::Compress { level },
            OperationCommand::ChangeResolution { width, height } => {
                Operation::ChangeResolution { width, height }
            }
            OperationCommand::ChangeAspectRatio { ratio } => Operation::ChangeAspectRatio { ratio },
            OperationCommand::ConvertToAudio => Operation::ConvertToAudio,
            OperationCommand::TrimByTimeRange { start, end } => Operation::TrimByTimeRange {
                start_seconds: start,
                end_seconds: end,
            },
        }
    }
}

/// Handle the CLI command
///
/// # Errors
/// Returns the failure of the command that ran, with context
pub async fn handle_command(command: Commands, config_path: Option<&Path>) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            endpoint,
            idle_timeout,
            work_dir,
            simulate,
            ffmpeg,
            ffprobe,
        } => {
            let mut config = load_config(config_path, &endpoint)?;
            if let Some(seconds) = idle_timeout {
                config.network.idle_timeout = Duration::from_secs(seconds);
            }
            if let Some(work_dir) = work_dir {
                config.storage.work_dir = work_dir;
            }
            config.validate()?;

            let backend: Arc<dyn MediaBackend> = if simulate {
                tracing::warn!("Using simulated backend; results are not real media");
                Arc::new(SimulatedBackend::new())
            } else {
                let backend = FfmpegBackend::with_binaries(ffmpeg, ffprobe);
                backend
                    .verify_installation()
                    .await
                    .context("ffmpeg is required unless --simulate is given")?;
                Arc::new(backend)
            };

            serve(config, backend).await
        }
        Commands::Submit {
            endpoint,
            source,
            output_dir,
            operation,
        } => {
            let config = load_config(config_path, &endpoint)?;
            config.validate()?;
            submit(&config, operation.into(), &source, &output_dir).await
        }
        Commands::Operations => {
            list_operations();
            Ok(())
        }
    }
}

/// Builds configuration: defaults, then file, then environment, then flags.
fn load_config(path: Option<&Path>, endpoint: &EndpointArgs) -> anyhow::Result<MediawireConfig> {
    let mut config = match path {
        Some(path) => MediawireConfig::from_file(path)?.with_env_overrides(),
        None => MediawireConfig::from_env(),
    };

    if let Some(address) = &endpoint.address {
        config.network.address = address.clone();
    }
    if let Some(port) = endpoint.port {
        config.network.port = port;
    }
    if let Some(chunk_size) = endpoint.chunk_size {
        config.storage.chunk_size = chunk_size;
    }

    Ok(config)
}

async fn serve(config: MediawireConfig, backend: Arc<dyn MediaBackend>) -> anyhow::Result<()> {
    let server = JobServer::bind(config, backend).await?;
    println!("Listening on {}", server.local_addr()?);
    println!("  Work directory: {}", server.config().storage.work_dir.display());

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    Ok(())
}

async fn submit(
    config: &MediawireConfig,
    operation: Operation,
    source: &Path,
    output_dir: &Path,
) -> anyhow::Result<()> {
    println!("Submitting {} for {}", source.display(), operation);

    let result = match JobClient::connect(config).await {
        Ok(client) => client.submit(&operation, source, output_dir).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(report) => {
            println!("Saved {}", report.output_path.display());
            println!(
                "  Uploaded {} bytes, downloaded {} bytes",
                report.uploaded.bytes, report.downloaded.bytes
            );
            Ok(())
        }
        Err(e) => {
            let error = MediawireError::from(e);
            let message = error.user_message();
            Err(anyhow::Error::new(error).context(message))
        }
    }
}

fn list_operations() {
    println!("Supported operations:");
    for name in KNOWN_OPERATIONS {
        let usage = match name {
            "compress" => "compress [low|medium|high]",
            "change_resolution" => "change-resolution <WIDTH> <HEIGHT>",
            "change_aspect_ratio" => "change-aspect-ratio <W/H>",
            "convert_to_audio" => "convert-to-audio",
            "trim_by_time_range" => "trim-by-time-range <START> <END>",
            _ => name,
        };
        println!("  {name:<22} mediawire submit <FILE> {usage}");
    }
}
