//! Splits argument byte streams across as many fragments as needed.
//!
//! Within a fragment each argument is carried as one or more chunks
//! (`len:2 bytes`). The running checksum covers every chunk byte written so
//! far and is stamped into each fragment as it is flushed.

use argwire_frame::{Frame, U16Ref};

use crate::checksum::Checksum;
use crate::error::{CallError, FragmentError, Result};
use crate::fragment::{WritableFragment, CHUNK_HEADER_SIZE};

/// Produces and flushes fragments on behalf of a [`FragmentingWriter`].
pub trait FragmentSender {
    /// Build an empty fragment; `initial` is true only for the first one.
    fn new_fragment(&mut self, initial: bool, checksum: &dyn Checksum) -> Result<WritableFragment>;

    /// Hand a finished fragment to the transport.
    fn flush_fragment(&mut self, frame: Frame) -> Result<()>;

    /// Called once after the last fragment has been flushed.
    fn done_sending(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Start,
    InArgument,
    InLastArgument,
    WaitingForArgument,
    Complete,
}

impl WriterState {
    fn is_writing_argument(self) -> bool {
        matches!(self, WriterState::InArgument | WriterState::InLastArgument)
    }
}

struct WritableChunk {
    size: u16,
    size_ref: U16Ref,
}

impl WritableChunk {
    fn begin(fragment: &mut WritableFragment) -> Result<Self> {
        let size_ref = fragment.contents().defer_u16()?;
        Ok(Self { size: 0, size_ref })
    }

    /// Write as much of `bytes` as the fragment has room for.
    fn write_as_fits(
        &mut self,
        fragment: &mut WritableFragment,
        checksum: &mut dyn Checksum,
        bytes: &[u8],
    ) -> Result<usize> {
        let n = bytes.len().min(fragment.bytes_remaining());
        let bytes = &bytes[..n];
        checksum.add(bytes);
        fragment.contents().write_bytes(bytes)?;
        self.size += n as u16;
        Ok(n)
    }

    fn finish(self, fragment: &mut WritableFragment) {
        fragment.contents().fill_u16(self.size_ref, self.size);
    }
}

/// Writes the three arguments of one call direction as fragments.
pub struct FragmentingWriter {
    checksum: Box<dyn Checksum>,
    cur_fragment: Option<WritableFragment>,
    cur_chunk: Option<WritableChunk>,
    state: WriterState,
    err: Option<CallError>,
}

impl FragmentingWriter {
    pub fn new(checksum: Box<dyn Checksum>) -> Self {
        Self {
            checksum,
            cur_fragment: None,
            cur_chunk: None,
            state: WriterState::Start,
            err: None,
        }
    }

    /// Whether the last argument has been closed.
    pub fn is_complete(&self) -> bool {
        self.state == WriterState::Complete
    }

    /// Whether an argument has been begun but not closed.
    pub fn in_argument(&self) -> bool {
        self.state.is_writing_argument()
    }

    fn check(&self) -> Result<()> {
        match &self.err {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn fail(&mut self, err: CallError) -> CallError {
        if let Some(existing) = &self.err {
            return existing.clone();
        }
        self.err = Some(err.clone());
        err
    }

    /// Start the next argument; `last` marks the final one.
    pub fn begin_argument<S: FragmentSender>(&mut self, sender: &mut S, last: bool) -> Result<()> {
        self.check()?;
        if self.state == WriterState::Complete {
            return Err(self.fail(FragmentError::Complete.into()));
        }
        if self.state.is_writing_argument() {
            return Err(self.fail(FragmentError::AlreadyInArgument.into()));
        }

        match self.open_chunk(sender) {
            Ok(()) => {
                self.state = if last {
                    WriterState::InLastArgument
                } else {
                    WriterState::InArgument
                };
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn open_chunk<S: FragmentSender>(&mut self, sender: &mut S) -> Result<()> {
        if self.cur_fragment.is_none() {
            let initial = self.state == WriterState::Start;
            self.cur_fragment = Some(sender.new_fragment(initial, self.checksum.as_ref())?);
        }
        let fragment = self
            .cur_fragment
            .as_mut()
            .ok_or(FragmentError::NotInArgument)?;

        let remaining = fragment.bytes_remaining();
        if remaining <= CHUNK_HEADER_SIZE {
            return Err(FragmentError::NoRoomForArgument(remaining).into());
        }
        self.cur_chunk = Some(WritableChunk::begin(fragment)?);
        Ok(())
    }

    /// Write `bytes` into the current argument, flushing full fragments.
    pub fn write<S: FragmentSender>(&mut self, sender: &mut S, mut bytes: &[u8]) -> Result<usize> {
        self.check()?;
        if !self.state.is_writing_argument() {
            return Err(self.fail(FragmentError::NotInArgument.into()));
        }

        let mut total = 0;
        loop {
            let written = match self.write_as_fits(bytes) {
                Ok(n) => n,
                Err(err) => return Err(self.fail(err)),
            };
            total += written;
            if written == bytes.len() {
                return Ok(total);
            }

            // More data than fit: flush and continue in a fresh fragment.
            if let Err(err) = self.flush(sender) {
                return Err(self.fail(err));
            }
            bytes = &bytes[written..];
        }
    }

    fn write_as_fits(&mut self, bytes: &[u8]) -> Result<usize> {
        let (Some(fragment), Some(chunk)) = (self.cur_fragment.as_mut(), self.cur_chunk.as_mut())
        else {
            return Err(FragmentError::NotInArgument.into());
        };
        chunk.write_as_fits(fragment, self.checksum.as_mut(), bytes)
    }

    fn finish_chunk(&mut self) -> Result<()> {
        let (Some(fragment), Some(chunk)) = (self.cur_fragment.as_mut(), self.cur_chunk.take())
        else {
            return Err(FragmentError::NotInArgument.into());
        };
        chunk.finish(fragment);
        Ok(())
    }

    fn flush_current<S: FragmentSender>(&mut self, sender: &mut S, has_more: bool) -> Result<()> {
        let fragment = self
            .cur_fragment
            .take()
            .ok_or(FragmentError::NotInArgument)?;
        let frame = fragment.finish(self.checksum.as_ref(), has_more)?;
        sender.flush_fragment(frame)
    }

    /// Flush mid-argument and continue the argument in a new fragment.
    fn flush<S: FragmentSender>(&mut self, sender: &mut S) -> Result<()> {
        self.finish_chunk()?;
        self.flush_current(sender, true)?;

        let mut fragment = sender.new_fragment(false, self.checksum.as_ref())?;
        let chunk = WritableChunk::begin(&mut fragment)?;
        if fragment.bytes_remaining() == 0 {
            return Err(FragmentError::NoRoomForArgument(0).into());
        }
        self.cur_fragment = Some(fragment);
        self.cur_chunk = Some(chunk);
        Ok(())
    }

    /// Finish the current argument.
    pub fn close<S: FragmentSender>(&mut self, sender: &mut S) -> Result<()> {
        self.check()?;
        if !self.state.is_writing_argument() {
            return Err(self.fail(FragmentError::NotInArgument.into()));
        }

        let last = self.state == WriterState::InLastArgument;
        self.close_argument(sender, last)
            .map_err(|err| self.fail(err))
    }

    fn close_argument<S: FragmentSender>(&mut self, sender: &mut S, last: bool) -> Result<()> {
        self.finish_chunk()?;

        if last {
            self.state = WriterState::Complete;
            self.flush_current(sender, false)?;
            sender.done_sending();
            return Ok(());
        }

        self.state = WriterState::WaitingForArgument;
        let remaining = self
            .cur_fragment
            .as_ref()
            .map_or(0, WritableFragment::bytes_remaining);
        if remaining > CHUNK_HEADER_SIZE {
            // Room for the next argument's first chunk in this fragment.
            return Ok(());
        }

        // Full: flush, and open the next fragment with an empty chunk that
        // terminates the argument just closed.
        self.flush_current(sender, true)?;
        let mut fragment = sender.new_fragment(false, self.checksum.as_ref())?;
        fragment.contents().write_u16(0)?;
        self.cur_fragment = Some(fragment);
        Ok(())
    }
}
