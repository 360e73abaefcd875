//! Raw wire client shared by the integration tests

use std::net::SocketAddr;

use mediawire_core::protocol::{FramedConnection, StatusResponse, receive_file};
use tokio::net::TcpStream;

/// Client that speaks frames directly, with no job logic of its own.
pub struct WireClient {
    pub connection: FramedConnection<TcpStream>,
}

impl WireClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            connection: FramedConnection::new(stream),
        }
    }

    pub async fn send(&mut self, payload: &[u8]) {
        self.connection.write_frame(payload).await.unwrap();
    }

    pub async fn status(&mut self) -> StatusResponse {
        let payload = self.connection.read_frame().await.unwrap();
        StatusResponse::from_payload(&payload).unwrap()
    }

    /// Uploads `content` in `chunk_size` frames followed by the terminator.
    pub async fn upload(&mut self, content: &[u8], chunk_size: usize) {
        for chunk in content.chunks(chunk_size) {
            self.send(chunk).await;
        }
        self.connection.write_terminator().await.unwrap();
    }

    pub async fn download(&mut self) -> Vec<u8> {
        let mut result = Vec::new();
        receive_file(&mut self.connection, &mut result)
            .await
            .unwrap();
        result
    }

    /// True once the server has closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        self.connection.read_frame().await.is_err()
    }
}
