//! Bounds-checked primitive readers and writers shared by the wire formats.

use crate::error::{Result, RinaError};
use crate::name::ProcessName;
use bytes::{Buf, BufMut, BytesMut};

/// Cursor over a received buffer; every read checks the remaining length
/// first so malformed input is an error, never a panic.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(RinaError::bad_message(format!(
                "truncated {}: need {} bytes, {} left",
                what,
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self, what: &str) -> Result<u8> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn u16(&mut self, what: &str) -> Result<u16> {
        self.need(2, what)?;
        Ok(self.buf.get_u16_le())
    }

    pub(crate) fn u32(&mut self, what: &str) -> Result<u32> {
        self.need(4, what)?;
        Ok(self.buf.get_u32_le())
    }

    pub(crate) fn u64(&mut self, what: &str) -> Result<u64> {
        self.need(8, what)?;
        Ok(self.buf.get_u64_le())
    }

    fn text(&mut self, what: &str) -> Result<Option<String>> {
        let len = self.u16(what)? as usize;
        if len == 0 {
            return Ok(None);
        }
        self.need(len, what)?;
        let text = std::str::from_utf8(&self.buf[..len])
            .map_err(|_| RinaError::bad_message(format!("{} is not valid UTF-8", what)))?
            .to_string();
        self.buf.advance(len);
        Ok(Some(text))
    }

    pub(crate) fn name(&mut self, what: &str) -> Result<ProcessName> {
        let parts = [
            self.text(what)?,
            self.text(what)?,
            self.text(what)?,
            self.text(what)?,
        ];
        Ok(ProcessName::from_parts(parts))
    }

    /// Fail if bytes are left over after the last field.
    pub(crate) fn finish(&self) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(RinaError::bad_message(format!(
                "{} trailing bytes after message body",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}

pub(crate) fn name_len(name: &ProcessName) -> usize {
    name.parts()
        .iter()
        .map(|part| 2 + part.map_or(0, str::len))
        .sum()
}

pub(crate) fn put_name(out: &mut BytesMut, name: &ProcessName) -> Result<()> {
    for part in name.parts() {
        let text = part.unwrap_or("");
        let len = u16::try_from(text.len()).map_err(|_| {
            RinaError::invalid_argument(format!("name component of {} bytes", text.len()))
        })?;
        out.put_u16_le(len);
        out.put_slice(text.as_bytes());
    }
    Ok(())
}
