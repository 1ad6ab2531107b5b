//! Frame framing helpers for simulated TCP streams.
//!
//! The simulation carries frames over turmoil TCP instead of QUIC streams,
//! so both sides need the same header-then-payload read discipline the
//! production transport uses.

use std::io::{self, ErrorKind};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use vibe_proto::{Frame, FrameHeader};

/// Read one frame: fixed-size header, then `payload_size` bytes.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Frame> {
    let mut buf = vec![0u8; FrameHeader::SIZE];
    reader.read_exact(&mut buf).await?;

    let payload_size = {
        let header = FrameHeader::from_bytes(&buf)
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
        header.payload_size() as usize
    };

    if payload_size > 0 {
        buf.resize(FrameHeader::SIZE + payload_size, 0);
        reader.read_exact(&mut buf[FrameHeader::SIZE..]).await?;
    }

    Frame::decode(&buf).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
}

/// Encode and write one frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> io::Result<()> {
    let mut buf = Vec::with_capacity(frame.encoded_len());
    frame.encode(&mut buf).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;

    writer.write_all(&buf).await?;
    writer.flush().await
}
