//! Blocking frame output.

use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use tracing::trace;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

/// Writes whole frames to a byte stream, flushing after each one.
pub struct FrameWriter<W> {
    inner: W,
    config: FrameConfig,
    scratch: BytesMut,
    frames_written: u64,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: W, config: FrameConfig) -> Self {
        Self {
            inner,
            config,
            scratch: BytesMut::new(),
            frames_written: 0,
        }
    }

    /// Encode `frame`, write all of it, and flush.
    ///
    /// A frame over the configured payload limit is rejected before anything
    /// reaches the stream.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let size = frame.header.payload_size();
        if size > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.config.max_payload_size,
            });
        }

        self.scratch.clear();
        encode_frame(frame, &mut self.scratch)?;
        write_all(&mut self.inner, &self.scratch)?;
        flush(&mut self.inner)?;

        self.frames_written += 1;
        trace!(
            id = frame.header.id,
            message_type = %frame.header.message_type,
            size = frame.wire_size(),
            "wrote frame"
        );
        Ok(())
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

fn write_all<W: Write>(writer: &mut W, mut bytes: &[u8]) -> Result<()> {
    while !bytes.is_empty() {
        match writer.write(bytes) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => bytes = &bytes[n..],
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}

fn flush<W: Write>(writer: &mut W) -> Result<()> {
    loop {
        match writer.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}
