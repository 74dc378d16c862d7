//! Routing between a peer's frame stream and the calls multiplexed on it.
//!
//! The connection never touches the socket. Outbound frames are queued on
//! the receiver returned by [`Connection::new`]; inbound frames are pushed in
//! through [`Connection::handle_frame`] by whoever reads the socket.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use argwire_frame::{Frame, FramePool, HeapFramePool, MessageType};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::call::{InboundCall, OutboundCall};
use crate::channel::FrameChannel;
use crate::config::CallConfig;
use crate::error::Result;
use crate::exchange::MessageExchangeSet;
use crate::fragment::parse_inbound_fragment;
use crate::message::{CallReq, FragmentMessages, RequestMessages};

/// Both directions of call traffic over one peer connection.
#[derive(Debug)]
pub struct Connection {
    config: CallConfig,
    channel: FrameChannel,
    outbound: MessageExchangeSet,
    inbound: MessageExchangeSet,
    next_message_id: AtomicU32,
    cancel: CancellationToken,
}

impl Connection {
    /// Create a connection and the queue its outbound frames appear on.
    pub fn new(config: CallConfig) -> (Self, mpsc::Receiver<Frame>) {
        let pool = Arc::new(HeapFramePool::new(config.frame_payload_capacity));
        Self::with_frame_pool(config, pool)
    }

    pub fn with_frame_pool(
        config: CallConfig,
        pool: Arc<dyn FramePool>,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (channel, receiver) = FrameChannel::bounded(config.send_buffer_size, pool);
        let cancel = CancellationToken::new();
        let connection = Self {
            outbound: MessageExchangeSet::new("outbound", config.exchange_buffer_size, &cancel),
            inbound: MessageExchangeSet::new("inbound", config.exchange_buffer_size, &cancel),
            config,
            channel,
            next_message_id: AtomicU32::new(1),
            cancel,
        };
        (connection, receiver)
    }

    /// Start a call to the peer under a fresh message id.
    pub fn begin_call(&self, call_req: CallReq) -> Result<OutboundCall> {
        let checksum = self.config.checksum_type.new_checksum()?;
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let mex = self.outbound.new_exchange(id, deadline_after(call_req.ttl))?;
        debug!(id, service = %call_req.service, "beginning outbound call");
        Ok(OutboundCall::new(self.channel.clone(), mex, call_req, checksum))
    }

    /// Route one frame read from the peer.
    ///
    /// A `CallReq` opens a new inbound call, which is returned. Every other
    /// frame is queued on the exchange of the call it belongs to.
    pub fn handle_frame(&self, frame: Frame) -> Result<Option<InboundCall>> {
        match frame.header.message_type {
            MessageType::CallReq => self.accept_call(frame).map(Some),
            MessageType::CallReqContinue => {
                self.inbound.forward_peer_frame(frame)?;
                Ok(None)
            }
            MessageType::CallRes | MessageType::CallResContinue | MessageType::Error => {
                self.outbound.forward_peer_frame(frame)?;
                Ok(None)
            }
        }
    }

    fn accept_call(&self, frame: Frame) -> Result<InboundCall> {
        let id = frame.header.id;
        let mut messages = RequestMessages::default();
        let fragment = parse_inbound_fragment(frame, messages.initial())?;
        let checksum = self.config.checksum_type.new_checksum()?;
        let mex = self
            .inbound
            .new_exchange(id, deadline_after(messages.call_req.ttl))?;
        debug!(id, service = %messages.call_req.service, "accepted inbound call");
        Ok(InboundCall::new(
            self.channel.clone(),
            mex,
            messages,
            fragment,
            checksum,
        ))
    }

    /// Calls started here that have not finished.
    pub fn outbound_calls(&self) -> usize {
        self.outbound.len()
    }

    /// Calls from the peer that have not finished.
    pub fn inbound_calls(&self) -> usize {
        self.inbound.len()
    }

    /// Cancel every call on the connection and forget them.
    pub fn close(&self) {
        debug!(
            outbound = self.outbound.len(),
            inbound = self.inbound.len(),
            "closing connection"
        );
        self.cancel.cancel();
        self.outbound.shutdown_all();
        self.inbound.shutdown_all();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn deadline_after(ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Some(Instant::now() + ttl)
    }
}
