//! Handshake, upload and result delivery over loopback TCP

use std::sync::Arc;
use std::time::Duration;

use mediawire_core::protocol::{Operation, StatusResponse};
use mediawire_core::testing::{TestServer, sample_media_bytes};
use mediawire_core::SimulatedBackend;
use tokio::io::AsyncWriteExt;

use crate::support::WireClient;

const CLEANUP_LIMIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_convert_to_audio_round_trip() {
    let server = TestServer::spawn(Arc::new(SimulatedBackend::new()))
        .await
        .unwrap();
    let mut client = WireClient::connect(server.addr).await;

    // 40 bytes at 16 per frame: three data frames
    let content = sample_media_bytes(40);

    client
        .send(br#"{"operation":"convert_to_audio"}"#)
        .await;
    assert_eq!(client.status().await, StatusResponse::Ok);

    client.send(b"clip.mp4").await;
    client.upload(&content, 16).await;
    assert_eq!(client.status().await, StatusResponse::Ok);

    let result = client.download().await;
    assert_eq!(
        result,
        SimulatedBackend::expected_output(&Operation::ConvertToAudio, &content)
    );

    assert!(client.is_closed().await);
    assert!(server.wait_for_clean_work_dir(CLEANUP_LIMIT).await);
}

#[tokio::test]
async fn test_result_arrives_in_configured_chunks() {
    let server = TestServer::spawn(Arc::new(SimulatedBackend::new()))
        .await
        .unwrap();
    let mut client = WireClient::connect(server.addr).await;
    let operation = Operation::ChangeResolution {
        width: 640,
        height: 360,
    };
    let content = sample_media_bytes(100);

    client.send(&operation.to_payload()).await;
    assert!(client.status().await.is_ok());
    client.send(b"movie.mov").await;
    client.upload(&content, 7).await;
    assert!(client.status().await.is_ok());

    let expected = SimulatedBackend::expected_output(&operation, &content);
    let chunk_size = server.config.storage.chunk_size;
    let mut received = Vec::new();
    let mut frames = 0;
    loop {
        let frame = client.connection.read_frame().await.unwrap();
        if frame.is_empty() {
            break;
        }
        assert!(frame.len() <= chunk_size);
        frames += 1;
        received.extend_from_slice(&frame);
    }

    assert_eq!(received, expected);
    assert_eq!(frames, expected.len().div_ceil(chunk_size));
}

#[tokio::test]
async fn test_invalid_control_messages_are_rejected() {
    let server = TestServer::spawn(Arc::new(SimulatedBackend::new()))
        .await
        .unwrap();

    let cases: [&[u8]; 4] = [
        br#"{"operation":"compress","compress_level":0.33}"#,
        br#"{"operation":"trim_by_time_range","start_seconds":10,"end_seconds":5}"#,
        br#"{"operation":"change_aspect_ratio","aspect_ratio":"16:9"}"#,
        br#"{"operation":"unknown_op"}"#,
    ];

    for payload in cases {
        let mut client = WireClient::connect(server.addr).await;
        client.send(payload).await;

        match client.status().await {
            StatusResponse::Error(message) => assert!(!message.is_empty()),
            StatusResponse::Ok => panic!(
                "accepted invalid control {}",
                String::from_utf8_lossy(payload)
            ),
        }
        assert!(client.is_closed().await);
    }

    assert!(server.wait_for_clean_work_dir(CLEANUP_LIMIT).await);
}

#[tokio::test]
async fn test_unknown_operation_message() {
    let server = TestServer::spawn(Arc::new(SimulatedBackend::new()))
        .await
        .unwrap();
    let mut client = WireClient::connect(server.addr).await;

    client.send(br#"{"operation":"unknown_op"}"#).await;
    assert_eq!(
        client.status().await,
        StatusResponse::error("unknown operation")
    );
}

#[tokio::test]
async fn test_processing_failure_is_reported_after_upload() {
    let server = TestServer::spawn(Arc::new(SimulatedBackend::new().failing_transform()))
        .await
        .unwrap();
    let mut client = WireClient::connect(server.addr).await;

    client
        .send(br#"{"operation":"compress","compress_level":"high"}"#)
        .await;
    assert!(client.status().await.is_ok());
    client.send(b"clip.mp4").await;
    client.upload(&sample_media_bytes(20), 16).await;

    assert!(!client.status().await.is_ok());
    assert!(client.is_closed().await);
    assert!(server.wait_for_clean_work_dir(CLEANUP_LIMIT).await);
}

#[tokio::test]
async fn test_oversized_frame_closes_without_status() {
    let server = TestServer::spawn_with(Arc::new(SimulatedBackend::new()), |config| {
        config.protocol.max_frame_size = 1024;
    })
    .await
    .unwrap();
    let mut client = WireClient::connect(server.addr).await;

    let stream = client.connection.get_mut();
    stream.write_all(&4096u32.to_be_bytes()).await.unwrap();
    stream.flush().await.unwrap();

    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_path_components_are_stripped_from_file_name() {
    let server = TestServer::spawn(Arc::new(SimulatedBackend::new()))
        .await
        .unwrap();
    let mut client = WireClient::connect(server.addr).await;
    let content = sample_media_bytes(10);

    client.send(&Operation::ConvertToAudio.to_payload()).await;
    assert!(client.status().await.is_ok());
    client.send(b"../../escape.mp4").await;
    client.upload(&content, 16).await;
    assert!(client.status().await.is_ok());
    client.download().await;

    assert!(!server.work_dir().join("escape.mp4").exists());
    assert!(!server.work_dir().parent().unwrap().join("escape.mp4").exists());
}
