//! Per-call correlation of inbound frames.
//!
//! A [`MessageExchange`] is the meeting point of one call's writer and reader:
//! it owns the call's cancellation token and deadline, buffers frames routed
//! to the call's id, and tears the call down exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use argwire_frame::{Frame, MessageType, ReadBuffer};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{CallError, Result};
use crate::message::{ErrorMessage, Message};

type ExchangeMap = Mutex<HashMap<u32, Arc<MessageExchange>>>;

/// The inbound side of one in-flight call.
#[derive(Debug)]
pub struct MessageExchange {
    id: u32,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    sender: mpsc::Sender<Frame>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Frame>>,
    terminated: AtomicBool,
    shutdown_requests: AtomicUsize,
    registry: Weak<ExchangeMap>,
}

impl MessageExchange {
    /// Correlation id shared by every frame of this call.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Token fired when the call is cancelled or torn down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail fast if the call has been cancelled or has run out of time.
    pub fn ensure_live(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(CallError::Timeout);
        }
        Ok(())
    }

    /// Queue a frame from the peer without blocking.
    ///
    /// A frame that does not fit is lost, so the call can no longer complete:
    /// the exchange is shut down and its reader fails with `Cancelled`.
    pub fn forward_peer_frame(&self, frame: Frame) -> Result<()> {
        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                warn!(
                    id = self.id,
                    message_type = %frame.header.message_type,
                    "peer frame queue full, abandoning call"
                );
                self.shutdown();
                Err(CallError::BackpressureExceeded)
            }
            Err(TrySendError::Closed(_)) => Err(CallError::ConnectionClosed),
        }
    }

    /// Wait for the next frame of `expected` type from the peer.
    ///
    /// Returns early with `Cancelled` or `Timeout` when the call's token fires
    /// or its deadline passes, whichever comes first.
    pub async fn recv_peer_frame_of_type(&self, expected: MessageType) -> Result<Frame> {
        let mut receiver = self.receiver.lock().await;
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        let frame = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(CallError::Cancelled),
            _ = deadline => return Err(CallError::Timeout),
            frame = receiver.recv() => frame.ok_or(CallError::ConnectionClosed)?,
        };

        let actual = frame.header.message_type;
        trace!(id = self.id, message_type = %actual, "received peer frame");
        if actual == expected {
            return Ok(frame);
        }
        if actual == MessageType::Error {
            let mut message = ErrorMessage::default();
            message.read(&mut ReadBuffer::new(frame.into_payload()))?;
            return Err(CallError::Peer {
                code: message.code,
                message: message.message,
            });
        }
        Err(CallError::UnexpectedMessage { expected, actual })
    }

    /// Tear the exchange down: cancel the call and unregister it.
    ///
    /// Safe to call any number of times from any path; only the first call
    /// has an effect.
    pub fn shutdown(&self) {
        self.shutdown_requests.fetch_add(1, Ordering::Relaxed);
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(id = self.id, "shutting down message exchange");
        self.cancel.cancel();
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut exchanges) = registry.lock() {
                exchanges.remove(&self.id);
            }
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shutdown(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// How many times shutdown has been requested.
    pub fn shutdown_requests(&self) -> usize {
        self.shutdown_requests.load(Ordering::Relaxed)
    }
}

/// Registry of live exchanges keyed by correlation id.
#[derive(Debug)]
pub struct MessageExchangeSet {
    name: &'static str,
    exchanges: Arc<ExchangeMap>,
    buffer_size: usize,
    cancel: CancellationToken,
}

impl MessageExchangeSet {
    /// Create a registry whose exchanges are cancelled along with `parent`.
    pub fn new(name: &'static str, buffer_size: usize, parent: &CancellationToken) -> Self {
        Self {
            name,
            exchanges: Arc::new(Mutex::new(HashMap::new())),
            buffer_size: buffer_size.max(1),
            cancel: parent.child_token(),
        }
    }

    /// Register a new exchange for `id`.
    pub fn new_exchange(&self, id: u32, deadline: Option<Instant>) -> Result<Arc<MessageExchange>> {
        let (sender, receiver) = mpsc::channel(self.buffer_size);
        let exchange = Arc::new(MessageExchange {
            id,
            cancel: self.cancel.child_token(),
            deadline,
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            terminated: AtomicBool::new(false),
            shutdown_requests: AtomicUsize::new(0),
            registry: Arc::downgrade(&self.exchanges),
        });

        let mut exchanges = self
            .exchanges
            .lock()
            .map_err(|_| CallError::ConnectionClosed)?;
        if exchanges.contains_key(&id) {
            return Err(CallError::DuplicateExchange(id));
        }
        exchanges.insert(id, Arc::clone(&exchange));
        debug!(set = self.name, id, "added message exchange");
        Ok(exchange)
    }

    /// Look up the exchange registered for `id`.
    pub fn get(&self, id: u32) -> Option<Arc<MessageExchange>> {
        self.exchanges.lock().ok()?.get(&id).cloned()
    }

    /// Route a peer frame to the exchange for its id.
    ///
    /// Returns `Ok(false)` when no exchange is waiting for the frame; such
    /// frames belong to calls that already finished and are dropped.
    pub fn forward_peer_frame(&self, frame: Frame) -> Result<bool> {
        let id = frame.header.id;
        let Some(exchange) = self.get(id) else {
            warn!(
                set = self.name,
                id,
                message_type = %frame.header.message_type,
                "dropping frame for unknown message exchange"
            );
            return Ok(false);
        };
        exchange.forward_peer_frame(frame)?;
        Ok(true)
    }

    /// Shut down and unregister every exchange.
    pub fn shutdown_all(&self) {
        let drained: Vec<Arc<MessageExchange>> = match self.exchanges.lock() {
            Ok(mut exchanges) => exchanges.drain().map(|(_, exchange)| exchange).collect(),
            Err(_) => return,
        };
        if !drained.is_empty() {
            debug!(set = self.name, count = drained.len(), "shutting down message exchanges");
        }
        for exchange in drained {
            exchange.shutdown();
        }
    }

    /// Number of registered exchanges.
    pub fn len(&self) -> usize {
        self.exchanges.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use argwire_frame::WriteBuffer;

    use super::*;
    use crate::message::Tracing;

    fn set() -> MessageExchangeSet {
        MessageExchangeSet::new("test", 4, &CancellationToken::new())
    }

    fn frame(id: u32, message_type: MessageType) -> Frame {
        Frame::with_payload(id, message_type, b"payload").unwrap()
    }

    #[tokio::test]
    async fn delivers_frames_in_order() {
        let set = set();
        let mex = set.new_exchange(1, None).unwrap();

        assert!(set.forward_peer_frame(frame(1, MessageType::CallRes)).unwrap());
        assert!(set
            .forward_peer_frame(frame(1, MessageType::CallResContinue))
            .unwrap());

        let first = mex.recv_peer_frame_of_type(MessageType::CallRes).await.unwrap();
        let second = mex
            .recv_peer_frame_of_type(MessageType::CallResContinue)
            .await
            .unwrap();
        assert_eq!(first.header.message_type, MessageType::CallRes);
        assert_eq!(second.header.message_type, MessageType::CallResContinue);
    }

    #[tokio::test]
    async fn unknown_ids_are_dropped() {
        let set = set();
        assert!(!set.forward_peer_frame(frame(9, MessageType::CallRes)).unwrap());
    }

    #[tokio::test]
    async fn duplicate_ids_rejected() {
        let set = set();
        let _mex = set.new_exchange(3, None).unwrap();
        assert!(matches!(
            set.new_exchange(3, None),
            Err(CallError::DuplicateExchange(3))
        ));
    }

    #[tokio::test]
    async fn full_exchange_reports_backpressure_and_shuts_down() {
        let set = MessageExchangeSet::new("tiny", 1, &CancellationToken::new());
        let mex = set.new_exchange(1, None).unwrap();
        set.forward_peer_frame(frame(1, MessageType::CallRes)).unwrap();
        assert!(matches!(
            set.forward_peer_frame(frame(1, MessageType::CallResContinue)),
            Err(CallError::BackpressureExceeded)
        ));

        assert!(mex.is_shutdown());
        assert!(set.is_empty());
        assert!(matches!(
            mex.recv_peer_frame_of_type(MessageType::CallRes).await,
            Err(CallError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn shutdown_all_empties_the_set() {
        let set = set();
        let first = set.new_exchange(1, None).unwrap();
        let second = set.new_exchange(2, None).unwrap();

        set.shutdown_all();

        assert!(set.is_empty());
        assert!(first.is_shutdown() && second.is_shutdown());
        assert_eq!(first.shutdown_requests(), 1);
        set.shutdown_all();
    }

    #[tokio::test]
    async fn unexpected_type_is_an_error() {
        let set = set();
        let mex = set.new_exchange(1, None).unwrap();
        mex.forward_peer_frame(frame(1, MessageType::CallReq)).unwrap();

        let err = mex
            .recv_peer_frame_of_type(MessageType::CallRes)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CallError::UnexpectedMessage {
                expected: MessageType::CallRes,
                actual: MessageType::CallReq
            }
        ));
    }

    #[tokio::test]
    async fn error_frames_become_peer_errors() {
        let set = set();
        let mex = set.new_exchange(4, None).unwrap();

        let mut wbuf = WriteBuffer::with_limit(128);
        ErrorMessage {
            code: 0x03,
            tracing: Tracing::default(),
            message: "busy".into(),
        }
        .write(&mut wbuf)
        .unwrap();
        let error_frame = Frame::with_payload(4, MessageType::Error, wbuf.as_slice()).unwrap();
        mex.forward_peer_frame(error_frame).unwrap();

        let err = mex
            .recv_peer_frame_of_type(MessageType::CallRes)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Peer { code: 0x03, ref message } if message == "busy"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let set = set();
        let mex = set.new_exchange(1, None).unwrap();

        let waiter = {
            let mex = Arc::clone(&mex);
            tokio::spawn(async move { mex.recv_peer_frame_of_type(MessageType::CallRes).await })
        };
        tokio::task::yield_now().await;
        mex.cancellation().cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(CallError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_wait() {
        let set = set();
        let mex = set
            .new_exchange(1, Some(Instant::now() + Duration::from_millis(50)))
            .unwrap();

        let err = mex
            .recv_peer_frame_of_type(MessageType::CallRes)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Timeout));
        assert!(matches!(mex.ensure_live(), Err(CallError::Timeout)));
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_exchanges() {
        let parent = CancellationToken::new();
        let set = MessageExchangeSet::new("parent", 4, &parent);
        let mex = set.new_exchange(1, None).unwrap();

        parent.cancel();
        assert!(matches!(mex.ensure_live(), Err(CallError::Cancelled)));
    }

    #[tokio::test]
    async fn shutdown_runs_once_and_unregisters() {
        let set = set();
        let mex = set.new_exchange(1, None).unwrap();

        mex.shutdown();
        mex.shutdown();

        assert!(mex.is_shutdown());
        assert_eq!(mex.shutdown_requests(), 2);
        assert!(mex.cancellation().is_cancelled());
        assert!(set.is_empty());
        assert!(!set.forward_peer_frame(frame(1, MessageType::CallRes)).unwrap());
    }
}
