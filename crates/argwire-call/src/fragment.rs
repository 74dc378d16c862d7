//! Fragment construction and parsing.
//!
//! Payload layout of every fragment:
//!
//! ```text
//! flags:1 | message fields | checksum type:1 | checksum:N | (chunk len:2, chunk bytes)*
//! ```
//!
//! The flag byte and checksum value are reserved when the fragment is built
//! and filled in once all argument bytes for the fragment are known.

use argwire_frame::{ByteRef, BytesRef, Frame, FrameError, ReadBuffer, WriteBuffer};
use bytes::Bytes;

use crate::checksum::{Checksum, ChecksumType};
use crate::error::{CallError, Result};
use crate::message::Message;

/// Flag bit set when more fragments of the same call follow.
pub const HAS_MORE_FRAGMENTS_FLAG: u8 = 0x01;

/// Size of the length prefix in front of every chunk.
pub const CHUNK_HEADER_SIZE: usize = 2;

/// An outbound fragment under construction.
#[derive(Debug)]
pub struct WritableFragment {
    frame: Frame,
    flags_ref: ByteRef,
    checksum_ref: BytesRef,
    contents: WriteBuffer,
}

impl WritableFragment {
    /// Build a fragment into `frame`: stamp the header, reserve the flag byte,
    /// write `message`, then the checksum type and a reserved checksum slot.
    pub fn build(
        mut frame: Frame,
        id: u32,
        message: &dyn Message,
        checksum: &dyn Checksum,
    ) -> std::result::Result<Self, FrameError> {
        frame.header.id = id;
        frame.header.message_type = message.message_type();

        let capacity = frame.capacity();
        let mut contents = WriteBuffer::new(frame.take_payload(), capacity);
        let flags_ref = contents.defer_u8()?;
        message.write(&mut contents)?;
        contents.write_u8(checksum.type_code().code())?;
        let checksum_ref = contents.defer_bytes(checksum.size())?;

        Ok(Self {
            frame,
            flags_ref,
            checksum_ref,
            contents,
        })
    }

    /// Write cursor over the argument region of the fragment.
    pub fn contents(&mut self) -> &mut WriteBuffer {
        &mut self.contents
    }

    /// Bytes still available for chunks.
    pub fn bytes_remaining(&self) -> usize {
        self.contents.bytes_remaining()
    }

    /// Fill the deferred checksum and flag slots and size the frame.
    pub fn finish(
        mut self,
        checksum: &dyn Checksum,
        has_more_fragments: bool,
    ) -> std::result::Result<Frame, FrameError> {
        self.contents.fill_bytes(self.checksum_ref, &checksum.sum())?;
        let flags = if has_more_fragments {
            HAS_MORE_FRAGMENTS_FLAG
        } else {
            0
        };
        self.contents.fill_u8(self.flags_ref, flags);
        self.frame.set_payload(self.contents.into_inner())?;
        Ok(self.frame)
    }
}

/// An inbound fragment whose envelope has been parsed.
#[derive(Debug)]
pub struct ReadableFragment {
    pub flags: u8,
    pub checksum_type: ChecksumType,
    pub checksum: Bytes,
    /// The chunk region, positioned at the first chunk.
    pub contents: ReadBuffer,
}

impl ReadableFragment {
    pub fn has_more_fragments(&self) -> bool {
        self.flags & HAS_MORE_FRAGMENTS_FLAG == HAS_MORE_FRAGMENTS_FLAG
    }
}

/// Parse `frame` as a fragment enveloped by `message`.
pub fn parse_inbound_fragment(frame: Frame, message: &mut dyn Message) -> Result<ReadableFragment> {
    let mut rbuf = ReadBuffer::new(frame.into_payload());
    let flags = rbuf.read_u8()?;
    message.read(&mut rbuf)?;

    let code = rbuf.read_u8()?;
    let checksum_type = ChecksumType::from_code(code).ok_or_else(|| {
        CallError::from(FrameError::InvalidValue {
            field: "checksum type",
            value: u64::from(code),
        })
    })?;
    let checksum = rbuf.read_bytes(checksum_type.size())?;

    Ok(ReadableFragment {
        flags,
        checksum_type,
        checksum,
        contents: rbuf,
    })
}
