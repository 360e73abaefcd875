//! Independent concurrent sessions

use std::sync::Arc;
use std::time::Duration;

use mediawire_core::SimulatedBackend;
use mediawire_core::protocol::Operation;
use mediawire_core::testing::TestServer;

use crate::support::WireClient;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_file_name_in_parallel_sessions() {
    let server = TestServer::spawn(Arc::new(SimulatedBackend::new().with_delay(Duration::from_millis(50))))
        .await
        .unwrap();
    let operation = Operation::ConvertToAudio;

    let mut handles = Vec::new();
    for client_index in 0..8u8 {
        let addr = server.addr;
        let operation = operation.clone();
        handles.push(tokio::spawn(async move {
            let content = vec![client_index; 64 + usize::from(client_index)];
            let mut client = WireClient::connect(addr).await;

            client.send(&operation.to_payload()).await;
            assert!(client.status().await.is_ok());
            client.send(b"clip.mp4").await;
            client.upload(&content, 16).await;
            assert!(client.status().await.is_ok());

            (client.download().await, content)
        }));
    }

    for handle in handles {
        let (result, content) = handle.await.unwrap();
        assert_eq!(result, SimulatedBackend::expected_output(&operation, &content));
    }

    assert!(server.wait_for_clean_work_dir(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_current_thread_runtime_multiplexes_sessions() {
    let server = TestServer::spawn(Arc::new(SimulatedBackend::new()))
        .await
        .unwrap();

    let mut first = WireClient::connect(server.addr).await;
    let mut second = WireClient::connect(server.addr).await;

    // Interleave two sessions step by step on one thread
    first.send(&Operation::ConvertToAudio.to_payload()).await;
    second
        .send(br#"{"operation":"change_aspect_ratio","aspect_ratio":"4/3"}"#)
        .await;
    assert!(second.status().await.is_ok());
    assert!(first.status().await.is_ok());

    second.send(b"b.mp4").await;
    first.send(b"a.mp4").await;
    first.upload(b"first", 16).await;
    second.upload(b"second", 16).await;

    assert!(second.status().await.is_ok());
    assert!(first.status().await.is_ok());
    assert_eq!(
        first.download().await,
        SimulatedBackend::expected_output(&Operation::ConvertToAudio, b"first")
    );
    assert!(second.download().await.ends_with(b"second"));
}
