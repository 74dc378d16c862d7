use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: size (2) + type (1) + reserved (1) + id (4) + reserved (8) = 16 bytes.
pub const HEADER_SIZE: usize = 16;

/// Largest frame the 2-byte size field can describe.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Largest payload that fits in a single frame.
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - HEADER_SIZE;

const RESERVED_TAIL: usize = 8;

/// Message type codes carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// First fragment of a call request.
    CallReq = 0x03,
    /// First fragment of a call response.
    CallRes = 0x04,
    /// Follow-on fragment of a call request.
    CallReqContinue = 0x13,
    /// Follow-on fragment of a call response.
    CallResContinue = 0x14,
    /// Protocol-level error reported by the peer.
    Error = 0xFF,
}

impl MessageType {
    /// The wire code for this message type.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up a message type by wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x03 => Some(Self::CallReq),
            0x04 => Some(Self::CallRes),
            0x13 => Some(Self::CallReqContinue),
            0x14 => Some(Self::CallResContinue),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }

    /// Returns a human-readable name for the message type.
    pub fn name(self) -> &'static str {
        match self {
            Self::CallReq => "call-req",
            Self::CallRes => "call-res",
            Self::CallReqContinue => "call-req-continue",
            Self::CallResContinue => "call-res-continue",
            Self::Error => "error",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = FrameError;

    fn try_from(code: u8) -> Result<Self> {
        Self::from_code(code).ok_or(FrameError::InvalidValue {
            field: "message type",
            value: u64::from(code),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#04x})", self.name(), self.code())
    }
}

/// The fixed header preceding every frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Correlation id of the call this frame belongs to.
    pub id: u32,
    /// What the payload contains.
    pub message_type: MessageType,
    payload_size: u16,
}

impl FrameHeader {
    /// Create a header with an empty payload.
    pub fn new(id: u32, message_type: MessageType) -> Self {
        Self {
            id,
            message_type,
            payload_size: 0,
        }
    }

    /// Declared payload size in bytes.
    pub fn payload_size(&self) -> usize {
        usize::from(self.payload_size)
    }

    /// Declared total frame size (header + payload).
    pub fn frame_size(&self) -> usize {
        HEADER_SIZE + self.payload_size()
    }
}

/// A frame with a bounded payload region.
///
/// Frames handed out by a [`FramePool`](crate::FramePool) carry a payload
/// capacity; fragments are built into that region and never grow past it.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The frame header.
    pub header: FrameHeader,
    payload: BytesMut,
    capacity: usize,
}

impl Frame {
    /// Create an empty frame that accepts at most `capacity` payload bytes.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_PAYLOAD_SIZE);
        Self {
            header: FrameHeader::new(0, MessageType::CallReq),
            payload: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Create a frame around an existing payload.
    pub fn with_payload(id: u32, message_type: MessageType, payload: &[u8]) -> Result<Self> {
        let mut frame = Self::new(MAX_PAYLOAD_SIZE);
        frame.header = FrameHeader::new(id, message_type);
        frame.set_payload(BytesMut::from(payload))?;
        Ok(frame)
    }

    /// Maximum payload this frame accepts.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The payload bytes covered by the header's declared size.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.header.payload_size()]
    }

    /// Move the payload region out for writing, leaving the frame empty.
    pub fn take_payload(&mut self) -> BytesMut {
        self.header.payload_size = 0;
        let mut payload = std::mem::take(&mut self.payload);
        payload.clear();
        payload
    }

    /// Install a payload and declare its size in the header.
    pub fn set_payload(&mut self, payload: BytesMut) -> Result<()> {
        if payload.len() > self.capacity {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.capacity,
            });
        }
        self.header.payload_size = payload.len() as u16;
        self.payload = payload;
        Ok(())
    }

    /// Consume the frame, returning only the declared payload bytes.
    pub fn into_payload(mut self) -> Bytes {
        self.payload.truncate(self.header.payload_size());
        self.payload.freeze()
    }

    /// Clear header and payload for reuse.
    pub fn reset(&mut self) {
        self.header = FrameHeader::new(0, MessageType::CallReq);
        self.payload.clear();
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        self.header.frame_size()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────────┬──────────┬──────────┬───────────┬──────────────┬───────────────┐
/// │ Size      │ Type     │ Reserved │ Id        │ Reserved     │ Payload       │
/// │ (2B BE)   │ (1B)     │ (1B)     │ (4B BE)   │ (8B)         │ (Size - 16 B) │
/// └───────────┴──────────┴──────────┴───────────┴──────────────┴───────────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    let size = frame.wire_size();
    if size > MAX_FRAME_SIZE {
        return Err(FrameError::PayloadTooLarge {
            size: frame.header.payload_size(),
            max: MAX_PAYLOAD_SIZE,
        });
    }
    dst.reserve(size);
    dst.put_u16(size as u16);
    dst.put_u8(frame.header.message_type.code());
    dst.put_u8(0);
    dst.put_u32(frame.header.id);
    dst.put_bytes(0, RESERVED_TAIL);
    dst.put_slice(frame.payload());
    Ok(())
}

/// Parse a frame header, checking its declared size against `max_payload`.
///
/// The returned header carries the declared payload size; no payload bytes
/// are needed to validate it.
pub fn decode_header(bytes: &[u8; HEADER_SIZE], max_payload: usize) -> Result<FrameHeader> {
    let size = usize::from(u16::from_be_bytes([bytes[0], bytes[1]]));
    if size < HEADER_SIZE {
        return Err(FrameError::InvalidSize(size));
    }

    let payload_len = size - HEADER_SIZE;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    Ok(FrameHeader {
        id: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        message_type: MessageType::try_from(bytes[2])?,
        payload_size: payload_len as u16,
    })
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some(prefix) = src.get(..HEADER_SIZE) else {
        return Ok(None);
    };
    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(prefix);
    let header = decode_header(&header_bytes, max_payload)?;

    if src.len() < header.frame_size() {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(header.payload_size());

    let mut frame = Frame::new(MAX_PAYLOAD_SIZE);
    frame.header = FrameHeader::new(header.id, header.message_type);
    frame.set_payload(payload)?;
    Ok(Some(frame))
}

/// Configuration for the frame stream reader and writer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: [`MAX_PAYLOAD_SIZE`].
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: u32, message_type: MessageType, payload: &[u8]) -> Frame {
        Frame::with_payload(id, message_type, payload).unwrap()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let original = frame(7, MessageType::CallReq, b"hello, argwire!");

        encode_frame(&original, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 15);

        let decoded = decode_frame(&mut buf, MAX_PAYLOAD_SIZE).unwrap().unwrap();
        assert_eq!(decoded.header, original.header);
        assert_eq!(decoded.payload(), b"hello, argwire!");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_header_layout() {
        let mut buf = BytesMut::new();
        encode_frame(&frame(0x0102_0304, MessageType::CallResContinue, b"ab"), &mut buf).unwrap();

        assert_eq!(&buf[0..2], &[0x00, 0x12]);
        assert_eq!(buf[2], 0x14);
        assert_eq!(buf[3], 0x00);
        assert_eq!(&buf[4..8], &[0x01, 0x02, 0x03, 0x04]);
        assert!(buf[8..16].iter().all(|b| *b == 0));
        assert_eq!(&buf[16..], b"ab");
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x00, 0x20, 0x03][..]);
        assert!(decode_frame(&mut buf, MAX_PAYLOAD_SIZE).unwrap().is_none());
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(&frame(1, MessageType::CallReq, b"hello"), &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);

        assert!(decode_frame(&mut buf, MAX_PAYLOAD_SIZE).unwrap().is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 2);
    }

    #[test]
    fn test_decode_size_smaller_than_header() {
        let mut buf = BytesMut::from(&[0x00, 0x04, 0x03, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0][..]);
        let result = decode_frame(&mut buf, MAX_PAYLOAD_SIZE);
        assert!(matches!(result, Err(FrameError::InvalidSize(4))));
    }

    #[test]
    fn test_decode_unknown_message_type() {
        let mut buf = BytesMut::new();
        buf.put_u16(HEADER_SIZE as u16);
        buf.put_u8(0x42);
        buf.put_bytes(0, 13);

        let result = decode_frame(&mut buf, MAX_PAYLOAD_SIZE);
        assert!(matches!(
            result,
            Err(FrameError::InvalidValue { value: 0x42, .. })
        ));
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        encode_frame(&frame(1, MessageType::CallReq, &[0u8; 64]), &mut buf).unwrap();

        let result = decode_frame(&mut buf, 32);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { size: 64, max: 32 })));
    }

    #[test]
    fn test_multiple_frames() {
        let mut buf = BytesMut::new();
        encode_frame(&frame(1, MessageType::CallReq, b"first"), &mut buf).unwrap();
        encode_frame(&frame(1, MessageType::CallReqContinue, b"second"), &mut buf).unwrap();

        let f1 = decode_frame(&mut buf, MAX_PAYLOAD_SIZE).unwrap().unwrap();
        assert_eq!(f1.header.message_type, MessageType::CallReq);
        assert_eq!(f1.payload(), b"first");

        let f2 = decode_frame(&mut buf, MAX_PAYLOAD_SIZE).unwrap().unwrap();
        assert_eq!(f2.header.message_type, MessageType::CallReqContinue);
        assert_eq!(f2.payload(), b"second");

        assert!(buf.is_empty());
    }

    #[test]
    fn test_set_payload_respects_capacity() {
        let mut small = Frame::new(4);
        let err = small.set_payload(BytesMut::from(&b"too long"[..])).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 8, max: 4 }));
    }

    #[test]
    fn test_take_payload_resets_size() {
        let mut f = frame(3, MessageType::CallRes, b"xyz");
        let payload = f.take_payload();
        assert!(payload.is_empty());
        assert_eq!(f.header.payload_size(), 0);
        assert!(f.payload().is_empty());
    }

    #[test]
    fn test_message_type_codes() {
        for ty in [
            MessageType::CallReq,
            MessageType::CallRes,
            MessageType::CallReqContinue,
            MessageType::CallResContinue,
            MessageType::Error,
        ] {
            assert_eq!(MessageType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(MessageType::from_code(0x01), None);
        assert_eq!(MessageType::CallReq.to_string(), "call-req(0x03)");
    }
}
