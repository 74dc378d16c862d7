//! Blocking frame input.

use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tracing::trace;

use crate::codec::{decode_header, Frame, FrameConfig, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::{FrameError, Result};

/// Reads whole frames from a byte stream.
///
/// The header is read and validated first, so an oversized or malformed
/// frame is rejected before any of its payload is pulled off the stream.
pub struct FrameReader<R> {
    inner: R,
    config: FrameConfig,
    header: [u8; HEADER_SIZE],
    frames_read: u64,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: R, config: FrameConfig) -> Self {
        Self {
            inner,
            config,
            header: [0; HEADER_SIZE],
            frames_read: 0,
        }
    }

    /// Block until the next frame has been read.
    ///
    /// End of stream, whether between frames or inside one, is
    /// `FrameError::ConnectionClosed`.
    pub fn read_frame(&mut self) -> Result<Frame> {
        fill(&mut self.inner, &mut self.header)?;
        let header = decode_header(&self.header, self.config.max_payload_size)?;

        let mut payload = BytesMut::zeroed(header.payload_size());
        fill(&mut self.inner, &mut payload)?;

        let mut frame = Frame::new(MAX_PAYLOAD_SIZE);
        frame.header = header;
        frame.set_payload(payload)?;
        self.frames_read += 1;
        trace!(
            id = header.id,
            message_type = %header.message_type,
            size = header.frame_size(),
            "read frame"
        );
        Ok(frame)
    }

    /// Number of frames returned so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Read exactly `buf.len()` bytes, retrying interrupted reads.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}
