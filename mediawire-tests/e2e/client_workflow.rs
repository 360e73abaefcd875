//! Client submission workflows

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mediawire_core::job::{BackendResult, MediaBackend, MediaProbe};
use mediawire_core::protocol::{AspectRatio, CompressLevel, FramedConnection, Operation};
use mediawire_core::testing::{TestServer, create_sample_media, sample_media_bytes};
use mediawire_core::{ClientError, JobClient, SimulatedBackend};
use serde_json::json;
use tempfile::tempdir;
use tokio::net::TcpStream;

/// Simulated backend that remembers every operation it was asked to run.
#[derive(Default)]
struct RecordingBackend {
    inner: SimulatedBackend,
    operations: Mutex<Vec<Operation>>,
}

impl RecordingBackend {
    fn recorded(&self) -> Vec<Operation> {
        self.operations.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaBackend for RecordingBackend {
    async fn probe(&self, path: &Path) -> BackendResult<MediaProbe> {
        self.inner.probe(path).await
    }

    async fn transform(
        &self,
        input: &Path,
        output: &Path,
        operation: &Operation,
        probe: &MediaProbe,
    ) -> BackendResult<()> {
        self.operations.lock().unwrap().push(operation.clone());
        self.inner.transform(input, output, operation, probe).await
    }
}

#[tokio::test]
async fn test_every_operation_end_to_end() {
    let server = TestServer::spawn(Arc::new(SimulatedBackend::new()))
        .await
        .unwrap();
    let inputs = tempdir().unwrap();
    let outputs = tempdir().unwrap();
    let source = create_sample_media(inputs.path(), "clip.mp4", 50).unwrap();

    let cases = [
        (
            Operation::Compress {
                level: CompressLevel::Medium,
            },
            "clip_compress.mp4",
        ),
        (
            Operation::ChangeResolution {
                width: 1920,
                height: 1080,
            },
            "clip_change_resolution.mp4",
        ),
        (
            Operation::ChangeAspectRatio {
                ratio: AspectRatio {
                    width: 16,
                    height: 9,
                },
            },
            "clip_change_aspect_ratio.mp4",
        ),
        (Operation::ConvertToAudio, "clip_convert_to_audio.mp3"),
        (
            Operation::TrimByTimeRange {
                start_seconds: 0,
                end_seconds: 3,
            },
            "clip_trim_by_time_range.gif",
        ),
    ];

    for (operation, expected_name) in cases {
        let client = JobClient::connect(&server.client_config()).await.unwrap();
        let report = client
            .submit(&operation, &source, outputs.path())
            .await
            .unwrap();

        assert_eq!(report.output_path, outputs.path().join(expected_name));
        assert_eq!(report.uploaded.bytes, 50);
        assert_eq!(
            std::fs::read(&report.output_path).unwrap(),
            SimulatedBackend::expected_output(&operation, &sample_media_bytes(50))
        );
    }

    assert!(
        server
            .wait_for_clean_work_dir(Duration::from_secs(2))
            .await
    );
}

#[tokio::test]
async fn test_rejected_job_leaves_no_output() {
    let server = TestServer::spawn(Arc::new(SimulatedBackend::new()))
        .await
        .unwrap();
    let inputs = tempdir().unwrap();
    let outputs = tempdir().unwrap();
    let source = create_sample_media(inputs.path(), "clip.mp4", 10).unwrap();

    let client = JobClient::connect(&server.client_config()).await.unwrap();
    let error = client
        .submit(
            &Operation::TrimByTimeRange {
                start_seconds: 10,
                end_seconds: 5,
            },
            &source,
            outputs.path(),
        )
        .await
        .unwrap_err();

    assert!(matches!(error, ClientError::Rejected { .. }));
    assert_eq!(std::fs::read_dir(outputs.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_processing_failure_surfaces_server_message() {
    let server = TestServer::spawn(Arc::new(SimulatedBackend::new().failing_probe()))
        .await
        .unwrap();
    let inputs = tempdir().unwrap();
    let outputs = tempdir().unwrap();
    let source = create_sample_media(inputs.path(), "notes.txt", 10).unwrap();

    let client = JobClient::connect(&server.client_config()).await.unwrap();
    let error = client
        .submit(&Operation::ConvertToAudio, &source, outputs.path())
        .await
        .unwrap_err();

    match error {
        ClientError::ProcessingFailed { message } => assert!(message.contains("probe")),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(std::fs::read_dir(outputs.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_slow_job_completes_past_idle_timeout() {
    let backend = SimulatedBackend::new().with_delay(Duration::from_millis(800));
    let server = TestServer::spawn_with(Arc::new(backend), |config| {
        config.network.idle_timeout = Duration::from_millis(300);
    })
    .await
    .unwrap();
    let inputs = tempdir().unwrap();
    let outputs = tempdir().unwrap();
    let source = create_sample_media(inputs.path(), "clip.mp4", 40).unwrap();

    let client = JobClient::connect(&server.client_config()).await.unwrap();
    let report = client
        .submit(&Operation::ConvertToAudio, &source, outputs.path())
        .await
        .unwrap();

    assert_eq!(report.output_path, outputs.path().join("clip_convert_to_audio.mp3"));
    assert_eq!(
        std::fs::read(&report.output_path).unwrap(),
        SimulatedBackend::expected_output(&Operation::ConvertToAudio, &sample_media_bytes(40))
    );
    assert!(server.wait_for_clean_work_dir(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_named_compress_level_reaches_backend() {
    let backend = Arc::new(RecordingBackend::default());
    let server = TestServer::spawn(backend.clone()).await.unwrap();

    let stream = TcpStream::connect(server.addr).await.unwrap();
    let mut connection = FramedConnection::new(stream);
    let control = json!({"operation": "compress", "compress_level": "high"});

    connection
        .write_frame(control.to_string().as_bytes())
        .await
        .unwrap();
    let status: serde_json::Value =
        serde_json::from_slice(&connection.read_frame().await.unwrap()).unwrap();
    assert_eq!(status, json!({"status": 0}));

    connection.write_frame(b"clip.mp4").await.unwrap();
    connection.write_frame(b"payload").await.unwrap();
    connection.write_terminator().await.unwrap();

    let status: serde_json::Value =
        serde_json::from_slice(&connection.read_frame().await.unwrap()).unwrap();
    assert_eq!(status, json!({"status": 0}));

    assert_eq!(
        backend.recorded(),
        vec![Operation::Compress {
            level: CompressLevel::High
        }]
    );
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let config = {
        let server = TestServer::spawn(Arc::new(SimulatedBackend::new()))
            .await
            .unwrap();
        server.client_config()
    };
    // Accept loop aborted on drop; give the listener a moment to close
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = JobClient::connect(&config).await;
    assert!(matches!(result, Err(ClientError::ConnectFailed { .. })));
}
