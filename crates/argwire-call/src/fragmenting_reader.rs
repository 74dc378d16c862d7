//! Reassembles argument byte streams from inbound fragments.

use std::collections::VecDeque;
use std::future::Future;

use bytes::{Buf, Bytes};

use crate::checksum::Checksum;
use crate::error::{CallError, FragmentError, Result};
use crate::fragment::ReadableFragment;

/// Supplies parsed fragments to a [`FragmentingReader`].
pub trait FragmentReceiver: Send {
    /// Wait for the next fragment; `initial` is true only for the first one.
    fn recv_next_fragment(
        &mut self,
        initial: bool,
    ) -> impl Future<Output = Result<ReadableFragment>> + Send;

    /// Called once after the last argument has been closed.
    fn done_reading(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Start,
    InArgument,
    InLastArgument,
    WaitingForArgument,
    Complete,
}

impl ReaderState {
    fn is_reading_argument(self) -> bool {
        matches!(self, ReaderState::InArgument | ReaderState::InLastArgument)
    }
}

/// Reads the three arguments of one call direction from fragments.
pub struct FragmentingReader {
    state: ReaderState,
    cur_chunk: Bytes,
    remaining_chunks: VecDeque<Bytes>,
    has_more_fragments: bool,
    checksum: Option<Box<dyn Checksum>>,
    err: Option<CallError>,
}

impl Default for FragmentingReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentingReader {
    pub fn new() -> Self {
        Self {
            state: ReaderState::Start,
            cur_chunk: Bytes::new(),
            remaining_chunks: VecDeque::new(),
            has_more_fragments: false,
            checksum: None,
            err: None,
        }
    }

    /// Whether an argument has been begun but not closed.
    pub fn in_argument(&self) -> bool {
        self.state.is_reading_argument()
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

    /// Start reading the next argument; `last` marks the final one.
    pub async fn begin_argument<R: FragmentReceiver>(
        &mut self,
        receiver: &mut R,
        last: bool,
    ) -> Result<()> {
        self.check()?;
        if self.state == ReaderState::Complete {
            return Err(self.fail(FragmentError::Complete.into()));
        }
        if self.state.is_reading_argument() {
            return Err(self.fail(FragmentError::AlreadyInArgument.into()));
        }

        if self.state == ReaderState::Start {
            if let Err(err) = self.recv_and_parse_next_fragment(receiver, true).await {
                return Err(self.fail(err));
            }
        }

        self.state = if last {
            ReaderState::InLastArgument
        } else {
            ReaderState::InArgument
        };
        Ok(())
    }

    /// Read argument bytes into `buf`.
    ///
    /// Returns as soon as any bytes have been copied. `Ok(0)` with a
    /// non-empty `buf` means the argument has ended.
    pub async fn read<R: FragmentReceiver>(
        &mut self,
        receiver: &mut R,
        buf: &mut [u8],
    ) -> Result<usize> {
        self.check()?;
        if !self.state.is_reading_argument() {
            return Err(self.fail(FragmentError::NotInArgument.into()));
        }

        let mut total = 0;
        loop {
            let n = (buf.len() - total).min(self.cur_chunk.len());
            buf[total..total + n].copy_from_slice(&self.cur_chunk[..n]);
            self.cur_chunk.advance(n);
            total += n;

            if total == buf.len() {
                return Ok(total);
            }
            if !self.remaining_chunks.is_empty() || !self.has_more_fragments {
                // The argument ends inside this fragment.
                return Ok(total);
            }
            if total > 0 {
                return Ok(total);
            }

            if let Err(err) = self.recv_and_parse_next_fragment(receiver, false).await {
                return Err(self.fail(err));
            }
        }
    }

    /// Finish the current argument. All of its bytes must have been read.
    pub async fn close<R: FragmentReceiver>(&mut self, receiver: &mut R) -> Result<()> {
        self.check()?;
        if !self.state.is_reading_argument() {
            return Err(self.fail(FragmentError::NotInArgument.into()));
        }

        let last = self.state == ReaderState::InLastArgument;
        match self.close_argument(receiver, last).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn close_argument<R: FragmentReceiver>(&mut self, receiver: &mut R, last: bool) -> Result<()> {
        if !self.cur_chunk.is_empty() {
            return Err(FragmentError::DataLeftover.into());
        }

        if last {
            if !self.remaining_chunks.is_empty() || self.has_more_fragments {
                return Err(FragmentError::TooManyArguments.into());
            }
            self.state = ReaderState::Complete;
            receiver.done_reading();
            return Ok(());
        }

        self.state = ReaderState::WaitingForArgument;
        if let Some(next) = self.remaining_chunks.pop_front() {
            self.cur_chunk = next;
            return Ok(());
        }
        if !self.has_more_fragments {
            return Err(FragmentError::TooFewArguments.into());
        }

        // The argument ended on a fragment boundary; the next fragment must
        // open with the empty chunk that terminates it.
        self.recv_and_parse_next_fragment(receiver, false).await?;
        if !self.cur_chunk.is_empty() {
            return Err(FragmentError::NotAtArgumentEnd.into());
        }
        self.cur_chunk = self
            .remaining_chunks
            .pop_front()
            .ok_or(FragmentError::TooFewArguments)?;
        Ok(())
    }

    async fn recv_and_parse_next_fragment<R: FragmentReceiver>(
        &mut self,
        receiver: &mut R,
        initial: bool,
    ) -> Result<()> {
        let fragment = receiver.recv_next_fragment(initial).await?;
        let mut checksum = match self.checksum.take() {
            Some(checksum) => checksum,
            None => fragment.checksum_type.new_checksum()?,
        };
        let result = self.absorb_fragment(fragment, checksum.as_mut());
        self.checksum = Some(checksum);
        result
    }

    /// Split `fragment` into chunks and verify its running checksum.
    fn absorb_fragment(
        &mut self,
        mut fragment: ReadableFragment,
        checksum: &mut dyn Checksum,
    ) -> Result<()> {
        if checksum.type_code() != fragment.checksum_type {
            return Err(FragmentError::ChecksumTypeMismatch {
                expected: checksum.type_code().code(),
                actual: fragment.checksum_type.code(),
            }
            .into());
        }

        self.has_more_fragments = fragment.has_more_fragments();
        self.remaining_chunks.clear();
        while fragment.contents.bytes_remaining() > 0 {
            let size = usize::from(fragment.contents.read_u16()?);
            let remaining = fragment.contents.bytes_remaining();
            if size > remaining {
                return Err(FragmentError::ChunkExceedsFragment { size, remaining }.into());
            }
            let chunk = fragment.contents.read_bytes(size)?;
            checksum.add(&chunk);
            self.remaining_chunks.push_back(chunk);
        }

        if checksum.sum().as_slice() != fragment.checksum.as_ref() {
            self.remaining_chunks.clear();
            return Err(FragmentError::ChecksumMismatch.into());
        }

        self.cur_chunk = self.remaining_chunks.pop_front().unwrap_or_default();
        Ok(())
    }
}
