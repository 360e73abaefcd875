//! Length-prefixed frame encoding and decoding

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{ProtocolError, ProtocolResult};

/// Size of the big-endian length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound on a single frame payload (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Frame serialization utilities for the Mediawire wire protocol.
pub struct FrameCodec;

impl FrameCodec {
    /// Serializes payload into a single length-prefixed buffer.
    ///
    /// # Errors
    /// - `ProtocolError::FrameTooLarge` - Payload length does not fit in a u32
    pub fn encode_frame(payload: &[u8]) -> ProtocolResult<Bytes> {
        let length = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
            length: payload.len() as u64,
            max: u32::MAX,
        })?;

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        buf.put_u32(length);
        buf.extend_from_slice(payload);
        Ok(buf.freeze())
    }

    /// Decodes the payload length from a prefix.
    pub fn decode_length(prefix: [u8; LENGTH_PREFIX_SIZE]) -> u32 {
        u32::from_be_bytes(prefix)
    }
}

/// Reads one frame and returns its payload.
///
/// `read_exact` accumulates across short reads, so the transport may deliver
/// the prefix and payload in any number of pieces. Nothing beyond the frame
/// is consumed from `reader`.
///
/// # Errors
/// - `ProtocolError::ConnectionClosed` - Stream ended before the frame was complete
/// - `ProtocolError::FrameTooLarge` - Announced length exceeds `max_frame_size`
/// - `ProtocolError::Io` - Underlying read failed
pub async fn read_frame<R>(reader: &mut R, max_frame_size: u32) -> ProtocolResult<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader
        .read_exact(&mut prefix)
        .await
        .map_err(ProtocolError::from_read_error)?;

    let length = FrameCodec::decode_length(prefix);
    if length > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            length: u64::from(length),
            max: max_frame_size,
        });
    }

    if length == 0 {
        return Ok(Bytes::new());
    }

    let mut payload = vec![0u8; length as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(ProtocolError::from_read_error)?;

    Ok(Bytes::from(payload))
}

/// Writes one frame: length prefix immediately followed by the payload.
///
/// Prefix and payload are assembled into one buffer and handed to a single
/// `write_all`, so a frame is never split by another logical frame.
///
/// # Errors
/// - `ProtocolError::FrameTooLarge` - Payload longer than `u32::MAX`
/// - `ProtocolError::Io` - Underlying write failed
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = FrameCodec::encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tokio::io::duplex;

    use super::*;

    #[test]
    fn test_encode_frame_big_endian_prefix() {
        let frame = FrameCodec::encode_frame(b"hello").unwrap();

        assert_eq!(&frame[..4], &[0, 0, 0, 5]);
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn test_encode_empty_frame() {
        let frame = FrameCodec::encode_frame(b"").unwrap();
        assert_eq!(frame.as_ref(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_decode_length() {
        assert_eq!(FrameCodec::decode_length([0x01, 0x02, 0x03, 0x04]), 0x0102_0304);
    }

    #[tokio::test]
    async fn test_read_frame_across_partial_reads() {
        let mut reader = tokio_test::io::Builder::new()
            .read(&[0, 0])
            .read(&[0, 5])
            .read(b"he")
            .read(b"l")
            .read(b"lo")
            .build();

        let payload = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(payload.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_read_frame_closed_during_prefix() {
        let mut reader = tokio_test::io::Builder::new().read(&[0, 0]).build();

        let result = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_read_frame_closed_during_payload() {
        let mut reader = tokio_test::io::Builder::new()
            .read(&[0, 0, 0, 10])
            .read(b"short")
            .build();

        let result = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_length() {
        let mut reader = tokio_test::io::Builder::new().read(&[0, 0, 1, 0]).build();

        let result = read_frame(&mut reader, 255).await;
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooLarge { length: 256, max: 255 })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_leaves_following_bytes_unread() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0, 0, 0, 2, b'o', b'k', 0xAA, 0xBB]).await.unwrap();

        let payload = read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(payload.as_ref(), b"ok");

        let mut rest = [0u8; 2];
        server.read_exact(&mut rest).await.unwrap();
        assert_eq!(rest, [0xAA, 0xBB]);
    }

    #[tokio::test]
    async fn test_write_frame_wire_bytes() {
        let mut writer = tokio_test::io::Builder::new()
            .write(&[0, 0, 0, 3, b'a', b'b', b'c'])
            .build();

        write_frame(&mut writer, b"abc").await.unwrap();
    }

    proptest! {
        #[test]
        fn test_frame_roundtrip(payload in proptest::collection::vec(any::<u8>(), 0..8192)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let received = runtime.block_on(async {
                let (mut client, mut server) = duplex(1024);
                let expected_len = payload.len();
                let writer = tokio::spawn(async move {
                    write_frame(&mut client, &payload).await.unwrap();
                    payload
                });
                let received = read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
                let sent = writer.await.unwrap();
                assert_eq!(received.len(), expected_len);
                (sent, received)
            });

            prop_assert_eq!(received.0.as_slice(), received.1.as_ref());
        }
    }
}
