//! Wire framing
//!
//! Frame layout: a 4-byte big-endian length followed by that many bytes of
//! bincode-encoded [`Packet`]. The header always uses bincode regardless of
//! the payload serializer.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::errors::{FrameError, Result};
use crate::packet::Packet;

/// Default upper bound on a single frame
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Encode a packet into a complete frame
pub fn encode_frame(packet: &Packet, max_frame_size: usize) -> Result<Vec<u8>> {
    let body = bincode::serialize(packet)?;
    if body.len() > max_frame_size {
        return Err(FrameError::TooLarge {
            size: body.len(),
            max_size: max_frame_size,
        }
        .into());
    }

    let length = u32::try_from(body.len()).map_err(|_| FrameError::TooLarge {
        size: body.len(),
        max_size: u32::MAX as usize,
    })?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one packet
pub async fn write_packet<W>(writer: &mut W, packet: &Packet, max_frame_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode_frame(packet, max_frame_size)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    trace!(
        packet_type = %packet.header.packet_type,
        bytes = frame.len(),
        "frame written"
    );
    Ok(())
}

/// Read one packet
///
/// A clean end of stream before the length prefix surfaces as an
/// `UnexpectedEof` IO error, which callers treat as a disconnect.
pub async fn read_packet<R>(reader: &mut R, max_frame_size: usize) -> Result<Packet>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = reader.read_u32().await? as usize;
    if len > max_frame_size {
        return Err(FrameError::TooLarge {
            size: len,
            max_size: max_frame_size,
        }
        .into());
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    let packet: Packet = bincode::deserialize(&body)?;
    trace!(packet_type = %packet.header.packet_type, bytes = len + 4, "frame read");
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::NetchatError;
    use crate::packet::MESSAGE_PACKET_TYPE;
    use crate::serialization::SendReceiveOptions;

    fn message(text: &str) -> Packet {
        Packet::new(
            MESSAGE_PACKET_TYPE,
            &text.to_string(),
            SendReceiveOptions::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_back_to_back_frames_stay_separate() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_packet(&mut a, &message("one"), DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        write_packet(&mut a, &message("two"), DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();

        let first = read_packet(&mut b, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        let second = read_packet(&mut b, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(first.decode_payload::<String>().unwrap(), "one");
        assert_eq!(second.decode_payload::<String>().unwrap(), "two");
    }

    #[test]
    fn test_oversized_frame_rejected_on_encode() {
        let big = message(&"x".repeat(512));
        let err = encode_frame(&big, 64).unwrap_err();
        assert!(matches!(err, NetchatError::Frame(FrameError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected_on_read() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(1_000_000u32).to_be_bytes()).await.unwrap();
        let err = read_packet(&mut b, 1024).await.unwrap_err();
        assert!(matches!(err, NetchatError::Frame(FrameError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn test_closed_stream_is_disconnect() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let err = read_packet(&mut b, 1024).await.unwrap_err();
        assert!(err.is_disconnect());
    }
}
