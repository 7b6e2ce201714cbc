//! Length-framed message transport for the internal lookup protocol.
//!
//! A frame is a big-endian `u32` length followed by that many bytes. The
//! byte count covers payload *and* padding, so two frames with equal lengths
//! are indistinguishable on the wire regardless of how many real payload
//! bytes each carries.

use std::io;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

/// Upper bound on accepted frames. Keeps a malformed or hostile length
/// prefix from provoking an unbounded allocation.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Write `payload` followed by `padding` zero bytes as one frame.
pub(crate) async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
    padding: usize,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total = payload.len() + padding;
    if total > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "frame too large"));
    }
    writer.write_u32(total as u32).await?;
    writer.write_all(payload).await?;
    if padding > 0 {
        writer.write_all(&vec![0u8; padding]).await?;
    }
    writer.flush().await
}

/// Read one frame, padding included.
pub(crate) async fn read_frame<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}
