//! Length-prefixed bincode framing over any async byte stream
//!
//! Each frame is a 4-byte big-endian payload length followed by one
//! bincode-encoded [`Packet`]. Both the server connection tasks and the
//! client use these helpers so the two ends can never disagree on framing.

use crate::Packet;
use bincode::{deserialize, serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed packet: {0}")]
    Malformed(#[from] bincode::Error),

    #[error("Frame of {0} bytes exceeds the {} byte limit", MAX_FRAME_LEN)]
    FrameTooLarge(usize),

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Serializes and writes one packet, flushing the stream.
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let payload = serialize(packet)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(payload.len()));
    }

    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one packet. A clean EOF before the length prefix yields
/// [`CodecError::ConnectionClosed`].
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, CodecError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(CodecError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }

    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer).await?;
    Ok(deserialize(&buffer)?)
}
