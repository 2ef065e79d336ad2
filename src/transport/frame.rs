//! Wire framing over a raw byte stream.
//!
//! Two micro-formats share one stream:
//!
//! ```text
//! handshake line:  <ascii text> '\n'
//! payload frame:   +----------------+------------------+
//!                  | length: u32 BE | payload (length) |
//!                  +----------------+------------------+
//! ```
//!
//! Lines are read one byte at a time so that nothing past the terminator is
//! consumed; the first payload frame may already be in flight behind the
//! second handshake line. Frames are atomic: a stream that ends between
//! frames yields `None`, one that ends part-way through a frame is a
//! stream-closed error, and a short payload is never returned.

use crate::utils::{MessengerError, ProtocolError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload a frame may declare
pub const MAX_FRAME_SIZE: usize = crate::MAX_MESSAGE_SIZE;

/// Largest handshake line accepted, terminator excluded
pub const MAX_LINE_LENGTH: usize = 8 * 1024;

/// Write one length-prefixed frame and flush it
///
/// # Errors
///
/// Returns `ProtocolError::FrameTooLarge` for payloads over [`MAX_FRAME_SIZE`],
/// or an I/O error from the stream.
pub async fn send_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        }
        .into());
    }
    let length = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
        size: payload.len(),
        max: MAX_FRAME_SIZE,
    })?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(payload);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly `n` bytes, or `None` if the stream ends first
pub async fn recv_exact<R>(reader: &mut R, n: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; n];
    if fill(reader, &mut buf).await? < n {
        return Ok(None);
    }
    Ok(Some(buf))
}

/// Read one length-prefixed frame, or `None` if the stream ends between frames
///
/// # Errors
///
/// * `ProtocolError::FrameTooLarge` when the header declares more than
///   [`MAX_FRAME_SIZE`] bytes
/// * `NetworkError::StreamClosed` when the stream ends inside a frame
pub async fn recv_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    match fill(reader, &mut prefix).await? {
        0 => return Ok(None),
        LENGTH_PREFIX_SIZE => {}
        _ => return Err(MessengerError::stream_closed("frame header")),
    }

    let length = usize::try_from(u32::from_be_bytes(prefix)).unwrap_or(usize::MAX);
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        }
        .into());
    }

    let mut payload = vec![0u8; length];
    if fill(reader, &mut payload).await? < length {
        return Err(MessengerError::stream_closed("frame payload"));
    }
    Ok(Some(payload))
}

/// Read until `buf` is full or the stream ends; returns the bytes filled
async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

/// Write `line` followed by a `\n` terminator
pub async fn send_line<W>(writer: &mut W, line: &str) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(b'\n');

    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one `\n`-terminated line with the terminator stripped
///
/// Returns `None` if the stream ends before a terminator arrives.
///
/// # Errors
///
/// Returns `ProtocolError::LineTooLong` past [`MAX_LINE_LENGTH`] bytes.
pub async fn recv_line<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if reader.read(&mut byte).await? == 0 {
            return Ok(None);
        }
        if byte[0] == b'\n' {
            return Ok(Some(line));
        }
        if line.len() >= MAX_LINE_LENGTH {
            return Err(ProtocolError::LineTooLong {
                max: MAX_LINE_LENGTH,
            }
            .into());
        }
        line.push(byte[0]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    async fn encode(payload: &[u8]) -> Vec<u8> {
        let mut wire = Vec::new();
        send_frame(&mut wire, payload).await.unwrap();
        wire
    }

    /// A mock stream that hands out `wire` one byte per read
    fn trickle(wire: &[u8]) -> tokio_test::io::Mock {
        let mut builder = Builder::new();
        for byte in wire {
            builder.read(std::slice::from_ref(byte));
        }
        builder.build()
    }

    #[tokio::test]
    async fn test_frame_layout() {
        let wire = encode(b"abc").await;
        assert_eq!(wire, vec![0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_frame_round_trip_byte_at_a_time() {
        let payloads: Vec<Vec<u8>> = vec![
            Vec::new(),
            b"x".to_vec(),
            b"hello frame".to_vec(),
            (0..=255u8).collect(),
            vec![b'\n'; 40],
        ];

        for payload in payloads {
            let wire = encode(&payload).await;
            let mut stream = trickle(&wire);
            let received = recv_frame(&mut stream).await.unwrap();
            assert_eq!(received, Some(payload));
        }
    }

    #[tokio::test]
    async fn test_frames_preserve_order() {
        let payloads: [&[u8]; 3] = [b"first", b"", b"third"];
        let mut wire = Vec::new();
        for payload in payloads {
            wire.extend(encode(payload).await);
        }

        let mut reader: &[u8] = &wire;
        assert_eq!(recv_frame(&mut reader).await.unwrap(), Some(b"first".to_vec()));
        assert_eq!(recv_frame(&mut reader).await.unwrap(), Some(Vec::new()));
        assert_eq!(recv_frame(&mut reader).await.unwrap(), Some(b"third".to_vec()));
        assert_eq!(recv_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_mid_payload() {
        let mut stream = Builder::new()
            .read(&10u32.to_be_bytes())
            .read(&[1, 2, 3])
            .build();

        let err = recv_frame(&mut stream).await.unwrap_err();
        assert!(err.is_stream_closed());
    }

    #[tokio::test]
    async fn test_close_mid_header() {
        let mut stream = Builder::new().read(&[0, 0]).build();
        let err = recv_frame(&mut stream).await.unwrap_err();
        assert!(err.is_stream_closed());
    }

    #[tokio::test]
    async fn test_recv_exact_short_stream() {
        let mut reader: &[u8] = &[1, 2, 3];
        assert_eq!(recv_exact(&mut reader, 4).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_recv_exact_zero() {
        let mut reader: &[u8] = &[];
        assert_eq!(recv_exact(&mut reader, 0).await.unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut reader: &[u8] = &u32::MAX.to_be_bytes();
        let err = recv_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), crate::utils::FailureKind::Protocol);

        let mut sink = Vec::new();
        let big = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(send_frame(&mut sink, &big).await.is_err());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_line_leaves_following_bytes() {
        let mut wire = b"17,3233\n".to_vec();
        wire.extend(encode(b"payload").await);

        let mut reader: &[u8] = &wire;
        assert_eq!(recv_line(&mut reader).await.unwrap(), Some(b"17,3233".to_vec()));
        assert_eq!(recv_frame(&mut reader).await.unwrap(), Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn test_line_round_trip_trickled() {
        let mut wire = Vec::new();
        send_line(&mut wire, "7:0a1b").await.unwrap();
        assert_eq!(wire, b"7:0a1b\n");

        let mut stream = trickle(&wire);
        assert_eq!(recv_line(&mut stream).await.unwrap(), Some(b"7:0a1b".to_vec()));
    }

    #[tokio::test]
    async fn test_line_without_terminator() {
        let mut reader: &[u8] = b"no newline here";
        assert_eq!(recv_line(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let wire = vec![b'9'; MAX_LINE_LENGTH + 10];
        let mut reader: &[u8] = &wire;
        assert!(recv_line(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_duplex_frames() {
        let (mut client, mut server) = tokio::io::duplex(16);

        let writer = tokio::spawn(async move {
            for i in 0..10u8 {
                send_frame(&mut client, &vec![i; 100]).await.unwrap();
            }
        });

        for i in 0..10u8 {
            let frame = recv_frame(&mut server).await.unwrap();
            assert_eq!(frame, Some(vec![i; 100]));
        }
        writer.await.unwrap();
        assert_eq!(recv_frame(&mut server).await.unwrap(), None);
    }
}
