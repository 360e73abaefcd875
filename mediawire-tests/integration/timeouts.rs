//! Idle timeout aborts, on reads and on writes

use std::sync::Arc;
use std::time::Duration;

use mediawire_core::SimulatedBackend;
use mediawire_core::protocol::Operation;
use mediawire_core::testing::TestServer;

use crate::support::WireClient;

const IDLE_TIMEOUT: Duration = Duration::from_millis(300);

async fn spawn_impatient_server() -> TestServer {
    TestServer::spawn_with(Arc::new(SimulatedBackend::new()), |config| {
        config.network.idle_timeout = IDLE_TIMEOUT;
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_silent_client_mid_upload_is_aborted() {
    let server = spawn_impatient_server().await;
    let mut client = WireClient::connect(server.addr).await;

    client.send(&Operation::ConvertToAudio.to_payload()).await;
    assert!(client.status().await.is_ok());
    client.send(b"clip.mp4").await;
    client.send(b"first chunk of a longer file").await;

    // Partial upload exists while the session waits for more data
    let mut saw_partial = false;
    for _ in 0..20 {
        if !server.temp_files().is_empty() {
            saw_partial = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(saw_partial);

    let closed = tokio::time::timeout(Duration::from_secs(5), client.is_closed())
        .await
        .unwrap();
    assert!(closed);
    assert!(server.wait_for_clean_work_dir(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_silent_client_before_control_is_aborted() {
    let server = spawn_impatient_server().await;
    let mut client = WireClient::connect(server.addr).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), client.is_closed())
        .await
        .unwrap();
    assert!(closed);
}

#[tokio::test]
async fn test_silent_after_handshake_before_name() {
    let server = spawn_impatient_server().await;
    let mut client = WireClient::connect(server.addr).await;

    client.send(&Operation::ConvertToAudio.to_payload()).await;
    assert!(client.status().await.is_ok());

    let closed = tokio::time::timeout(Duration::from_secs(5), client.is_closed())
        .await
        .unwrap();
    assert!(closed);
    assert!(server.temp_files().is_empty());
}

#[tokio::test]
async fn test_steady_client_is_not_timed_out() {
    let server = spawn_impatient_server().await;
    let mut client = WireClient::connect(server.addr).await;

    client.send(&Operation::ConvertToAudio.to_payload()).await;
    assert!(client.status().await.is_ok());
    client.send(b"clip.mp4").await;

    // Total upload time exceeds the idle timeout; each gap does not
    for _ in 0..4 {
        tokio::time::sleep(IDLE_TIMEOUT / 3).await;
        client.send(b"chunk").await;
    }
    client.connection.write_terminator().await.unwrap();

    assert!(client.status().await.is_ok());
    assert_eq!(
        client.download().await,
        SimulatedBackend::expected_output(&Operation::ConvertToAudio, b"chunkchunkchunkchunk")
    );
}

#[tokio::test]
async fn test_client_that_stops_reading_result_is_aborted() {
    const CHUNK: usize = 64 * 1024;
    let server = TestServer::spawn_with(Arc::new(SimulatedBackend::new()), |config| {
        config.network.idle_timeout = IDLE_TIMEOUT;
        config.storage.chunk_size = CHUNK;
    })
    .await
    .unwrap();
    let mut client = WireClient::connect(server.addr).await;

    // Far larger than what loopback socket buffers can hold
    let content = vec![5u8; 32 * 1024 * 1024];
    client.send(&Operation::ConvertToAudio.to_payload()).await;
    assert!(client.status().await.is_ok());
    client.send(b"clip.mp4").await;
    client.upload(&content, CHUNK).await;
    assert!(client.status().await.is_ok());

    // Upload and result both exist while the result is streaming
    assert_eq!(server.temp_files().len(), 2);

    assert!(server.wait_for_clean_work_dir(Duration::from_secs(5)).await);
    drop(client);
}
