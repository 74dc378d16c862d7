//! Typed big-endian buffers used to build and parse frame payloads.
//!
//! [`WriteBuffer`] supports deferred slots: space is reserved up front and
//! filled once the value is known. Each reservation returns a ref that is
//! consumed by the matching `fill_*` call, so a slot cannot be filled twice
//! or with a value of the wrong width.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Reserved single byte in a [`WriteBuffer`].
#[must_use = "a deferred byte must be filled"]
#[derive(Debug)]
pub struct ByteRef {
    offset: usize,
}

/// Reserved big-endian `u16` in a [`WriteBuffer`].
#[must_use = "a deferred u16 must be filled"]
#[derive(Debug)]
pub struct U16Ref {
    offset: usize,
}

/// Reserved fixed-length byte run in a [`WriteBuffer`].
#[must_use = "deferred bytes must be filled"]
#[derive(Debug)]
pub struct BytesRef {
    offset: usize,
    len: usize,
}

impl BytesRef {
    /// Number of bytes reserved.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the reservation is zero-length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Bounded write cursor over an owned buffer.
#[derive(Debug)]
pub struct WriteBuffer {
    buf: BytesMut,
    limit: usize,
}

impl WriteBuffer {
    /// Wrap `buf` (cleared first), accepting at most `limit` bytes.
    pub fn new(mut buf: BytesMut, limit: usize) -> Self {
        buf.clear();
        Self { buf, limit }
    }

    /// Allocate a fresh buffer accepting at most `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self::new(BytesMut::with_capacity(limit), limit)
    }

    /// Bytes written so far, deferred slots included.
    pub fn bytes_written(&self) -> usize {
        self.buf.len()
    }

    /// Bytes that can still be written.
    pub fn bytes_remaining(&self) -> usize {
        self.limit - self.buf.len()
    }

    /// Bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Give back the underlying buffer.
    pub fn into_inner(self) -> BytesMut {
        self.buf
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        let remaining = self.bytes_remaining();
        if needed > remaining {
            return Err(FrameError::BufferOverflow { needed, remaining });
        }
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.ensure(1)?;
        self.buf.put_u8(value);
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.ensure(2)?;
        self.buf.put_u16(value);
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.ensure(4)?;
        self.buf.put_u32(value);
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.ensure(8)?;
        self.buf.put_u64(value);
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure(bytes.len())?;
        self.buf.put_slice(bytes);
        Ok(())
    }

    /// Write a string prefixed by a 1-byte length.
    pub fn write_len8_str(&mut self, s: &str) -> Result<()> {
        let len = u8::try_from(s.len()).map_err(|_| FrameError::StringTooLong {
            len: s.len(),
            max: usize::from(u8::MAX),
        })?;
        self.ensure(1 + s.len())?;
        self.buf.put_u8(len);
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    /// Write a string prefixed by a 2-byte length.
    pub fn write_len16_str(&mut self, s: &str) -> Result<()> {
        let len = u16::try_from(s.len()).map_err(|_| FrameError::StringTooLong {
            len: s.len(),
            max: usize::from(u16::MAX),
        })?;
        self.ensure(2 + s.len())?;
        self.buf.put_u16(len);
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    /// Reserve a byte to be filled later with [`fill_u8`](Self::fill_u8).
    pub fn defer_u8(&mut self) -> Result<ByteRef> {
        let offset = self.buf.len();
        self.write_u8(0)?;
        Ok(ByteRef { offset })
    }

    /// Reserve a `u16` to be filled later with [`fill_u16`](Self::fill_u16).
    pub fn defer_u16(&mut self) -> Result<U16Ref> {
        let offset = self.buf.len();
        self.write_u16(0)?;
        Ok(U16Ref { offset })
    }

    /// Reserve `len` bytes to be filled later with [`fill_bytes`](Self::fill_bytes).
    pub fn defer_bytes(&mut self, len: usize) -> Result<BytesRef> {
        self.ensure(len)?;
        let offset = self.buf.len();
        self.buf.put_bytes(0, len);
        Ok(BytesRef { offset, len })
    }

    pub fn fill_u8(&mut self, slot: ByteRef, value: u8) {
        self.buf[slot.offset] = value;
    }

    pub fn fill_u16(&mut self, slot: U16Ref, value: u16) {
        self.buf[slot.offset..slot.offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    pub fn fill_bytes(&mut self, slot: BytesRef, value: &[u8]) -> Result<()> {
        if value.len() != slot.len {
            return Err(FrameError::DeferredLengthMismatch {
                expected: slot.len,
                actual: value.len(),
            });
        }
        self.buf[slot.offset..slot.offset + slot.len].copy_from_slice(value);
        Ok(())
    }
}

/// Read cursor over a frozen payload.
#[derive(Debug, Clone)]
pub struct ReadBuffer {
    buf: Bytes,
}

impl ReadBuffer {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Bytes left to read.
    pub fn bytes_remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        let remaining = self.bytes_remaining();
        if needed > remaining {
            return Err(FrameError::Truncated { needed, remaining });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64())
    }

    /// Split off the next `len` bytes without copying.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Read a string prefixed by a 1-byte length.
    pub fn read_len8_string(&mut self, field: &'static str) -> Result<String> {
        let len = usize::from(self.read_u8()?);
        self.read_string(len, field)
    }

    /// Read a string prefixed by a 2-byte length.
    pub fn read_len16_string(&mut self, field: &'static str) -> Result<String> {
        let len = usize::from(self.read_u16()?);
        self.read_string(len, field)
    }

    fn read_string(&mut self, len: usize, field: &'static str) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::InvalidString(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deferred_slots_filled_after_the_fact() {
        let mut wbuf = WriteBuffer::with_limit(32);
        let flags = wbuf.defer_u8().unwrap();
        wbuf.write_u32(0xDEAD_BEEF).unwrap();
        let size = wbuf.defer_u16().unwrap();
        let digest = wbuf.defer_bytes(4).unwrap();
        wbuf.write_bytes(b"tail").unwrap();

        wbuf.fill_u8(flags, 0x01);
        wbuf.fill_u16(size, 0x0203);
        wbuf.fill_bytes(digest, &[9, 8, 7, 6]).unwrap();

        assert_eq!(
            wbuf.as_slice(),
            &[1, 0xDE, 0xAD, 0xBE, 0xEF, 2, 3, 9, 8, 7, 6, b't', b'a', b'i', b'l']
        );
    }

    #[test]
    fn fill_bytes_rejects_wrong_width() {
        let mut wbuf = WriteBuffer::with_limit(8);
        let slot = wbuf.defer_bytes(4).unwrap();
        let err = wbuf.fill_bytes(slot, &[1, 2]).unwrap_err();
        assert!(matches!(
            err,
            FrameError::DeferredLengthMismatch {
                expected: 4,
                actual: 2
            }
        ));
    }

    #[test]
    fn writes_past_limit_overflow() {
        let mut wbuf = WriteBuffer::with_limit(3);
        wbuf.write_u16(1).unwrap();
        let err = wbuf.write_u16(2).unwrap_err();
        assert!(matches!(
            err,
            FrameError::BufferOverflow {
                needed: 2,
                remaining: 1
            }
        ));
        assert_eq!(wbuf.bytes_written(), 2);
        assert!(wbuf.defer_bytes(2).is_err());
    }

    #[test]
    fn new_clears_recycled_buffer() {
        let wbuf = WriteBuffer::new(BytesMut::from(&b"stale"[..]), 16);
        assert_eq!(wbuf.bytes_written(), 0);
        assert_eq!(wbuf.bytes_remaining(), 16);
    }

    #[test]
    fn strings_roundtrip_through_read_buffer() {
        let mut wbuf = WriteBuffer::with_limit(64);
        wbuf.write_len8_str("svc").unwrap();
        wbuf.write_len16_str("a longer message").unwrap();
        wbuf.write_u64(42).unwrap();

        let mut rbuf = ReadBuffer::new(wbuf.into_inner().freeze());
        assert_eq!(rbuf.read_len8_string("service").unwrap(), "svc");
        assert_eq!(rbuf.read_len16_string("message").unwrap(), "a longer message");
        assert_eq!(rbuf.read_u64().unwrap(), 42);
        assert_eq!(rbuf.bytes_remaining(), 0);
    }

    #[test]
    fn len8_string_too_long() {
        let mut wbuf = WriteBuffer::with_limit(1024);
        let long = "x".repeat(300);
        let err = wbuf.write_len8_str(&long).unwrap_err();
        assert!(matches!(err, FrameError::StringTooLong { len: 300, max: 255 }));
        assert_eq!(wbuf.bytes_written(), 0);
    }

    #[test]
    fn truncated_reads_fail_without_consuming() {
        let mut rbuf = ReadBuffer::new(Bytes::from_static(&[0x01, 0x02, 0x03]));
        let err = rbuf.read_u32().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                needed: 4,
                remaining: 3
            }
        ));
        assert_eq!(rbuf.read_u16().unwrap(), 0x0102);
        assert!(rbuf.read_bytes(2).is_err());
        assert_eq!(rbuf.read_bytes(1).unwrap().as_ref(), &[0x03]);
    }

    #[test]
    fn invalid_utf8_reported_with_field() {
        let mut rbuf = ReadBuffer::new(Bytes::from_static(&[0x02, 0xFF, 0xFE]));
        let err = rbuf.read_len8_string("service").unwrap_err();
        assert!(matches!(err, FrameError::InvalidString("service")));
    }
}
