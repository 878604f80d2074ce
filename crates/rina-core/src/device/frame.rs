//! Length-prefixed framing for the control device.
//!
//! ```text
//! [u32 BE: len][control message of len bytes]
//! ```
//!
//! A request the session rejects is answered with an error frame instead of
//! a control message. It reuses the control header layout with a type no
//! control message uses:
//!
//! ```text
//! [u16 LE 0xFFFF][u32 LE event id][i32 LE errno]
//! ```

use crate::config::ControlConfig;
use crate::error::{Result, RinaError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Message type marking an error frame.
pub const ERROR_FRAME_TYPE: u16 = 0xFFFF;
const ERROR_FRAME_LEN: usize = ControlConfig::HEADER_SIZE + 4;

/// Encode the error frame reporting `errno` for request `event_id`.
pub fn error_frame(event_id: u32, errno: i32) -> Bytes {
    let mut out = BytesMut::with_capacity(ERROR_FRAME_LEN);
    out.put_u16_le(ERROR_FRAME_TYPE);
    out.put_u32_le(event_id);
    out.put_i32_le(errno);
    out.freeze()
}

/// Decode an error frame into `(event_id, errno)`. Returns `None` for
/// anything else.
pub fn parse_error_frame(mut frame: &[u8]) -> Option<(u32, i32)> {
    if frame.len() != ERROR_FRAME_LEN || frame.get_u16_le() != ERROR_FRAME_TYPE {
        return None;
    }
    Some((frame.get_u32_le(), frame.get_i32_le()))
}

/// Read one frame. Returns `None` on clean EOF.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > ControlConfig::MAX_FRAME_SIZE {
        return Err(RinaError::bad_message(format!(
            "frame of {} bytes exceeds maximum {}",
            len,
            ControlConfig::MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one frame and flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > ControlConfig::MAX_FRAME_SIZE {
        return Err(RinaError::invalid_argument(format!(
            "frame of {} bytes exceeds maximum {}",
            payload.len(),
            ControlConfig::MAX_FRAME_SIZE
        )));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
