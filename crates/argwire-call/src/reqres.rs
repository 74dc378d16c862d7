//! Ordered three-argument writers and readers bound to a message exchange.
//!
//! A call direction transfers exactly three arguments in order. Every
//! operation first returns any error already latched on the writer or
//! reader, then checks the argument order. The first failure is latched, the
//! exchange is shut down once, and the error is handed back on every later
//! operation.

use std::io;
use std::sync::Arc;

use argwire_frame::Frame;
use tracing::{debug, trace};

use crate::channel::FrameChannel;
use crate::checksum::Checksum;
use crate::error::{CallError, Direction, Result};
use crate::exchange::MessageExchange;
use crate::fragment::{parse_inbound_fragment, ReadableFragment, WritableFragment};
use crate::fragmenting_reader::{FragmentReceiver, FragmentingReader};
use crate::fragmenting_writer::{FragmentSender, FragmentingWriter};
use crate::message::FragmentMessages;

/// One of the three arguments of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    Arg1,
    Arg2,
    Arg3,
}

impl Arg {
    pub fn is_last(self) -> bool {
        self == Arg::Arg3
    }
}

/// Progress of one call direction through its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgState {
    PreArg1,
    PreArg2,
    PreArg3,
    Complete,
}

impl ArgState {
    /// State reached by opening `arg`, or `None` if `arg` is out of order.
    pub fn open(self, arg: Arg) -> Option<ArgState> {
        match (self, arg) {
            (ArgState::PreArg1, Arg::Arg1) => Some(ArgState::PreArg2),
            (ArgState::PreArg2, Arg::Arg2) => Some(ArgState::PreArg3),
            (ArgState::PreArg3, Arg::Arg3) => Some(ArgState::Complete),
            _ => None,
        }
    }
}

struct OutboundFragments<M> {
    channel: FrameChannel,
    mex: Arc<MessageExchange>,
    messages: M,
    shutdown_when_done: bool,
    err: Option<CallError>,
}

impl<M> OutboundFragments<M> {
    fn failed(&mut self, err: CallError) -> CallError {
        if let Some(existing) = &self.err {
            return existing.clone();
        }
        debug!(id = self.mex.id(), error = %err, "call writer failed");
        self.mex.shutdown();
        self.err = Some(err.clone());
        err
    }
}

impl<M: FragmentMessages> FragmentSender for OutboundFragments<M> {
    fn new_fragment(&mut self, initial: bool, checksum: &dyn Checksum) -> Result<WritableFragment> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        let frame = self.channel.pool().get();
        let message = self.messages.for_fragment(initial);
        WritableFragment::build(frame, self.mex.id(), message, checksum)
            .map_err(|err| self.failed(err.into()))
    }

    fn flush_fragment(&mut self, frame: Frame) -> Result<()> {
        if let Some(err) = &self.err {
            let err = err.clone();
            self.channel.pool().release(frame);
            return Err(err);
        }
        if let Err(err) = self.mex.ensure_live() {
            self.channel.pool().release(frame);
            return Err(self.failed(err));
        }

        trace!(
            id = frame.header.id,
            message_type = %frame.header.message_type,
            size = frame.wire_size(),
            "flushing fragment"
        );
        self.channel
            .try_send(frame)
            .map_err(|err| self.failed(err))
    }

    fn done_sending(&mut self) {
        if self.shutdown_when_done {
            self.mex.shutdown();
        }
    }
}

/// Writes the three arguments of one call direction.
pub struct ReqResWriter<M> {
    state: ArgState,
    contents: FragmentingWriter,
    outbound: OutboundFragments<M>,
}

impl<M: FragmentMessages> ReqResWriter<M> {
    pub fn new(
        channel: FrameChannel,
        mex: Arc<MessageExchange>,
        messages: M,
        checksum: Box<dyn Checksum>,
    ) -> Self {
        Self {
            state: ArgState::PreArg1,
            contents: FragmentingWriter::new(checksum),
            outbound: OutboundFragments {
                channel,
                mex,
                messages,
                shutdown_when_done: false,
                err: None,
            },
        }
    }

    /// Shut the exchange down once the last fragment has been sent.
    pub fn shutdown_when_done(mut self) -> Self {
        self.outbound.shutdown_when_done = true;
        self
    }

    pub fn state(&self) -> ArgState {
        self.state
    }

    /// The latched failure, if any.
    pub fn error(&self) -> Option<&CallError> {
        self.outbound.err.as_ref()
    }

    pub fn exchange(&self) -> &Arc<MessageExchange> {
        &self.outbound.mex
    }

    pub fn messages(&self) -> &M {
        &self.outbound.messages
    }

    /// Envelopes for fragments not yet built. Changes made after
    /// `arg1_writer` only affect continuation fragments.
    pub fn messages_mut(&mut self) -> &mut M {
        &mut self.outbound.messages
    }

    pub fn arg1_writer(&mut self) -> Result<ArgWriter<'_, M>> {
        self.arg_writer(Arg::Arg1)
    }

    pub fn arg2_writer(&mut self) -> Result<ArgWriter<'_, M>> {
        self.arg_writer(Arg::Arg2)
    }

    pub fn arg3_writer(&mut self) -> Result<ArgWriter<'_, M>> {
        self.arg_writer(Arg::Arg3)
    }

    fn arg_writer(&mut self, arg: Arg) -> Result<ArgWriter<'_, M>> {
        if let Some(err) = &self.outbound.err {
            return Err(err.clone());
        }
        let next = self.state.open(arg).filter(|_| !self.contents.in_argument());
        let Some(next) = next else {
            return Err(self.outbound.failed(CallError::StateMismatch(Direction::Write)));
        };
        if let Err(err) = self.contents.begin_argument(&mut self.outbound, arg.is_last()) {
            return Err(self.outbound.failed(err));
        }

        self.state = next;
        Ok(ArgWriter {
            contents: &mut self.contents,
            outbound: &mut self.outbound,
        })
    }

    /// Write all three arguments in order.
    pub fn write_args(&mut self, arg1: &[u8], arg2: &[u8], arg3: &[u8]) -> Result<()> {
        for (arg, bytes) in [(Arg::Arg1, arg1), (Arg::Arg2, arg2), (Arg::Arg3, arg3)] {
            let mut writer = self.arg_writer(arg)?;
            writer.write_bytes(bytes)?;
            writer.close()?;
        }
        Ok(())
    }
}

/// Byte sink for one argument. Must be closed before the next argument.
pub struct ArgWriter<'a, M> {
    contents: &'a mut FragmentingWriter,
    outbound: &'a mut OutboundFragments<M>,
}

impl<M: FragmentMessages> ArgWriter<'_, M> {
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        match self.contents.write(&mut *self.outbound, bytes) {
            Ok(_) => Ok(()),
            Err(err) => Err(self.outbound.failed(err)),
        }
    }

    /// Finish the argument; for the last argument this sends the final fragment.
    pub fn close(self) -> Result<()> {
        self.contents
            .close(&mut *self.outbound)
            .map_err(|err| self.outbound.failed(err))
    }
}

impl<M: FragmentMessages> io::Write for ArgWriter<'_, M> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct InboundFragments<M> {
    mex: Arc<MessageExchange>,
    messages: M,
    initial_fragment: Option<ReadableFragment>,
    shutdown_when_done: bool,
    err: Option<CallError>,
}

impl<M> InboundFragments<M> {
    fn failed(&mut self, err: CallError) -> CallError {
        if let Some(existing) = &self.err {
            return existing.clone();
        }
        debug!(id = self.mex.id(), error = %err, "call reader failed");
        self.mex.shutdown();
        self.err = Some(err.clone());
        err
    }
}

impl<M: FragmentMessages> FragmentReceiver for InboundFragments<M> {
    async fn recv_next_fragment(&mut self, initial: bool) -> Result<ReadableFragment> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        if let Some(fragment) = self.initial_fragment.take() {
            return Ok(fragment);
        }

        let expected = self.messages.for_fragment(initial).message_type();
        let frame = match self.mex.recv_peer_frame_of_type(expected).await {
            Ok(frame) => frame,
            Err(err) => return Err(self.failed(err)),
        };
        trace!(id = frame.header.id, size = frame.wire_size(), "received fragment");
        parse_inbound_fragment(frame, self.messages.for_fragment(initial))
            .map_err(|err| self.failed(err))
    }

    fn done_reading(&mut self) {
        if self.shutdown_when_done {
            self.mex.shutdown();
        }
    }
}

/// Reads the three arguments of one call direction.
pub struct ReqResReader<M> {
    state: ArgState,
    contents: FragmentingReader,
    inbound: InboundFragments<M>,
}

impl<M: FragmentMessages> ReqResReader<M> {
    pub fn new(mex: Arc<MessageExchange>, messages: M) -> Self {
        Self {
            state: ArgState::PreArg1,
            contents: FragmentingReader::new(),
            inbound: InboundFragments {
                mex,
                messages,
                initial_fragment: None,
                shutdown_when_done: false,
                err: None,
            },
        }
    }

    /// Create a reader whose first fragment was already parsed, e.g. by the
    /// connection while routing a new inbound call.
    pub fn with_initial_fragment(
        mex: Arc<MessageExchange>,
        messages: M,
        fragment: ReadableFragment,
    ) -> Self {
        let mut reader = Self::new(mex, messages);
        reader.inbound.initial_fragment = Some(fragment);
        reader
    }

    /// Shut the exchange down once the last argument has been read.
    pub fn shutdown_when_done(mut self) -> Self {
        self.inbound.shutdown_when_done = true;
        self
    }

    pub fn state(&self) -> ArgState {
        self.state
    }

    /// The latched failure, if any.
    pub fn error(&self) -> Option<&CallError> {
        self.inbound.err.as_ref()
    }

    pub fn exchange(&self) -> &Arc<MessageExchange> {
        &self.inbound.mex
    }

    /// Envelopes as parsed so far; the initial one is filled in by the
    /// first fragment.
    pub fn messages(&self) -> &M {
        &self.inbound.messages
    }

    pub async fn arg1_reader(&mut self) -> Result<ArgReader<'_, M>> {
        self.arg_reader(Arg::Arg1).await
    }

    pub async fn arg2_reader(&mut self) -> Result<ArgReader<'_, M>> {
        self.arg_reader(Arg::Arg2).await
    }

    pub async fn arg3_reader(&mut self) -> Result<ArgReader<'_, M>> {
        self.arg_reader(Arg::Arg3).await
    }

    async fn arg_reader(&mut self, arg: Arg) -> Result<ArgReader<'_, M>> {
        if let Some(err) = &self.inbound.err {
            return Err(err.clone());
        }
        let next = self.state.open(arg).filter(|_| !self.contents.in_argument());
        let Some(next) = next else {
            return Err(self.inbound.failed(CallError::StateMismatch(Direction::Read)));
        };
        if let Err(err) = self
            .contents
            .begin_argument(&mut self.inbound, arg.is_last())
            .await
        {
            return Err(self.inbound.failed(err));
        }

        self.state = next;
        Ok(ArgReader {
            contents: &mut self.contents,
            inbound: &mut self.inbound,
        })
    }

    /// Read all three arguments in order.
    pub async fn read_args(&mut self) -> Result<[Vec<u8>; 3]> {
        let mut args: [Vec<u8>; 3] = Default::default();
        for (arg, out) in [Arg::Arg1, Arg::Arg2, Arg::Arg3].into_iter().zip(args.iter_mut()) {
            let mut reader = self.arg_reader(arg).await?;
            *out = reader.read_to_end().await?;
            reader.close().await?;
        }
        Ok(args)
    }
}

/// Byte source for one argument. Must be closed before the next argument.
pub struct ArgReader<'a, M> {
    contents: &'a mut FragmentingReader,
    inbound: &'a mut InboundFragments<M>,
}

impl<M: FragmentMessages> ArgReader<'_, M> {
    /// Read up to `buf.len()` bytes; `Ok(0)` marks the end of the argument.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.contents.read(&mut *self.inbound, buf).await {
            Ok(n) => Ok(n),
            Err(err) => Err(self.inbound.failed(err)),
        }
    }

    /// Read the rest of the argument.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Finish the argument. All of its bytes must have been read.
    pub async fn close(self) -> Result<()> {
        match self.contents.close(&mut *self.inbound).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.inbound.failed(err)),
        }
    }
}
