//! Chunked file transfer
//!
//! A file moves as a run of non-empty data frames followed by exactly one
//! zero-length terminator frame. The same pair of functions carries the
//! upload (client to server) and the result download (server to client).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{FramedConnection, ProtocolError};

/// Counters for one completed transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Non-empty frames moved, terminator excluded
    pub data_frames: u64,
    /// Payload bytes moved
    pub bytes: u64,
}

/// Failures while moving a file over a connection.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Failed to read transfer source: {0}")]
    Source(#[source] std::io::Error),

    #[error("Failed to write transfer destination: {0}")]
    Destination(#[source] std::io::Error),
}

/// Streams `source` to the peer in frames of at most `chunk_size` bytes.
///
/// Each frame is filled completely unless the source is exhausted, so a
/// source of `L` bytes produces `ceil(L / chunk_size)` data frames before
/// the terminator.
///
/// # Errors
///
/// - `TransferError::Source` - Reading the local source failed, or
///   `chunk_size` is zero
/// - `TransferError::Protocol` - Writing a frame failed
pub async fn send_file<S, R>(
    connection: &mut FramedConnection<S>,
    source: &mut R,
    chunk_size: usize,
) -> Result<TransferStats, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    R: AsyncRead + Unpin + ?Sized,
{
    if chunk_size == 0 {
        return Err(TransferError::Source(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "chunk size must be positive",
        )));
    }

    let mut stats = TransferStats::default();
    let mut buffer = vec![0u8; chunk_size];

    loop {
        let filled = fill_chunk(source, &mut buffer)
            .await
            .map_err(TransferError::Source)?;
        if filled == 0 {
            break;
        }

        connection.write_frame(&buffer[..filled]).await?;
        stats.data_frames += 1;
        stats.bytes += filled as u64;
    }

    connection.write_terminator().await?;
    tracing::trace!(
        "Sent {} bytes in {} frames",
        stats.bytes,
        stats.data_frames
    );

    Ok(stats)
}

/// Receives frames into `destination` until the zero-length terminator.
///
/// Reading stops at the terminator; nothing sent after it is consumed.
///
/// # Errors
///
/// - `TransferError::Protocol` - Connection closed, timed out, or sent an
///   oversized frame before the terminator
/// - `TransferError::Destination` - Writing the local destination failed
pub async fn receive_file<S, W>(
    connection: &mut FramedConnection<S>,
    destination: &mut W,
) -> Result<TransferStats, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut stats = TransferStats::default();

    loop {
        let chunk = connection.read_frame().await?;
        if chunk.is_empty() {
            break;
        }

        destination
            .write_all(&chunk)
            .await
            .map_err(TransferError::Destination)?;
        stats.data_frames += 1;
        stats.bytes += chunk.len() as u64;
    }

    destination
        .flush()
        .await
        .map_err(TransferError::Destination)?;
    tracing::trace!(
        "Received {} bytes in {} frames",
        stats.bytes,
        stats.data_frames
    );

    Ok(stats)
}

/// Reads until `buffer` is full or the source is exhausted.
async fn fill_chunk<R>(source: &mut R, buffer: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buffer.len() {
        let read = source.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tokio::io::duplex;

    use super::*;
    use crate::protocol::LENGTH_PREFIX_SIZE;

    async fn transfer(content: Vec<u8>, chunk_size: usize) -> (Vec<u8>, TransferStats) {
        let (left, right) = duplex(4096);
        let mut sender = FramedConnection::new(left);
        let mut receiver = FramedConnection::new(right);

        let send = tokio::spawn(async move {
            let mut source = content.as_slice();
            send_file(&mut sender, &mut source, chunk_size).await.unwrap()
        });

        let mut received = Vec::new();
        let receive_stats = receive_file(&mut receiver, &mut received).await.unwrap();
        let send_stats = send.await.unwrap();
        assert_eq!(send_stats, receive_stats);

        (received, receive_stats)
    }

    #[tokio::test]
    async fn test_empty_file_sends_only_terminator() {
        let (received, stats) = transfer(Vec::new(), 16).await;

        assert!(received.is_empty());
        assert_eq!(stats.data_frames, 0);
        assert_eq!(stats.bytes, 0);
    }

    #[tokio::test]
    async fn test_frame_count_is_ceiling_of_length() {
        let (_, stats) = transfer(vec![7u8; 2500], 1024).await;
        assert_eq!(stats.data_frames, 3);

        let (_, stats) = transfer(vec![7u8; 2048], 1024).await;
        assert_eq!(stats.data_frames, 2);
    }

    #[tokio::test]
    async fn test_sender_wire_layout() {
        let (left, mut right) = duplex(256);
        let mut sender = FramedConnection::new(left);
        let mut source: &[u8] = b"abcde";

        send_file(&mut sender, &mut source, 2).await.unwrap();
        drop(sender);

        let mut wire = Vec::new();
        right.read_to_end(&mut wire).await.unwrap();
        assert_eq!(
            wire,
            [
                0, 0, 0, 2, b'a', b'b', //
                0, 0, 0, 2, b'c', b'd', //
                0, 0, 0, 1, b'e', //
                0, 0, 0, 0,
            ]
        );
    }

    #[tokio::test]
    async fn test_receiver_stops_at_terminator() {
        let (mut left, right) = duplex(256);
        left.write_all(&[0, 0, 0, 3, b'x', b'y', b'z', 0, 0, 0, 0])
            .await
            .unwrap();
        left.write_all(&[0, 0, 0, 1, b'!']).await.unwrap();

        let mut receiver = FramedConnection::new(right);
        let mut received = Vec::new();
        receive_file(&mut receiver, &mut received).await.unwrap();
        assert_eq!(received, b"xyz");

        // The frame after the terminator is still waiting on the stream
        let trailing = receiver.read_frame().await.unwrap();
        assert_eq!(trailing.as_ref(), b"!");
    }

    #[tokio::test]
    async fn test_receiver_reports_truncated_stream() {
        let (mut left, right) = duplex(256);
        left.write_all(&[0, 0, 0, 4, b'a', b'b']).await.unwrap();
        drop(left);

        let mut receiver = FramedConnection::new(right);
        let mut received = Vec::new();
        let result = receive_file(&mut receiver, &mut received).await;

        assert!(matches!(
            result,
            Err(TransferError::Protocol(ProtocolError::ConnectionClosed))
        ));
    }

    #[tokio::test]
    async fn test_zero_chunk_size_is_an_error() {
        let (left, mut right) = duplex(256);
        let mut sender = FramedConnection::new(left);
        let mut source: &[u8] = b"abc";

        let result = send_file(&mut sender, &mut source, 0).await;
        assert!(matches!(
            result,
            Err(TransferError::Source(e)) if e.kind() == std::io::ErrorKind::InvalidInput
        ));
        drop(sender);

        // Nothing reached the wire, not even a terminator
        let mut wire = Vec::new();
        right.read_to_end(&mut wire).await.unwrap();
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn test_sender_fills_chunks_from_short_reads() {
        let mut source = tokio_test::io::Builder::new()
            .read(b"ab")
            .read(b"c")
            .read(b"d")
            .build();
        let (left, mut right) = duplex(256);
        let mut sender = FramedConnection::new(left);

        let stats = send_file(&mut sender, &mut source, 4).await.unwrap();
        assert_eq!(stats.data_frames, 1);
        drop(sender);

        let mut wire = Vec::new();
        right.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire.len(), LENGTH_PREFIX_SIZE + 4 + LENGTH_PREFIX_SIZE);
    }

    proptest! {
        #[test]
        fn test_chunked_transfer_reassembles(
            content in proptest::collection::vec(any::<u8>(), 0..6000),
            chunk_size in 1usize..2048,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let expected = content.clone();
            let (received, stats) = runtime.block_on(transfer(content, chunk_size));

            prop_assert_eq!(&received, &expected);
            prop_assert_eq!(stats.data_frames as usize, expected.len().div_ceil(chunk_size));
        }
    }
}
