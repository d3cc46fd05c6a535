// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame format for socket transports.
//!
//! Wire format: 4-byte length prefix (big-endian) + envelope + payload.
//! The envelope carries source, destination, and tag so a relay node
//! can forward frames it is not the destination of.

use crate::buffer::{DataBuffer, WireError};
use dvm_core::id::ProcName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum frame size (64 MB). Launch payloads for large jobs are the
/// biggest legitimate frames by far.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// One routed message on a socket transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub src: ProcName,
    pub dst: ProcName,
    pub tag: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = DataBuffer::new();
        buf.pack_proc(&self.src);
        buf.pack_proc(&self.dst);
        buf.pack_u16(self.tag);
        buf.pack_bytes(&self.payload);
        let bytes = buf.into_vec();
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(WireError::TooLarge { size: bytes.len(), max: MAX_FRAME_SIZE });
        }
        Ok(bytes)
    }

    pub fn decode(bytes: Vec<u8>) -> Result<Self, WireError> {
        let mut buf = DataBuffer::from_vec(bytes);
        let src = buf.unpack_proc()?;
        let dst = buf.unpack_proc()?;
        let tag = buf.unpack_u16()?;
        let payload = buf.unpack_bytes()?;
        Ok(Self { src, dst, tag, payload })
    }
}

/// Read one length-prefixed frame from an async reader.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Frame, WireError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(WireError::TooLarge { size: len, max: MAX_FRAME_SIZE });
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    Frame::decode(bytes)
}

/// Write one length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), WireError> {
    let bytes = frame.encode()?;
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "framing_tests.rs"]
mod tests;
