//! Outbound frame queue shared by every call on a connection.

use std::fmt;
use std::sync::Arc;

use argwire_frame::{Frame, FramePool};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{CallError, Result};

/// Bounded queue of frames waiting to be written to the peer, plus the pool
/// new frames are taken from.
#[derive(Clone)]
pub struct FrameChannel {
    sender: mpsc::Sender<Frame>,
    pool: Arc<dyn FramePool>,
}

impl FrameChannel {
    pub fn new(sender: mpsc::Sender<Frame>, pool: Arc<dyn FramePool>) -> Self {
        Self { sender, pool }
    }

    /// Create a channel holding at most `capacity` queued frames.
    pub fn bounded(capacity: usize, pool: Arc<dyn FramePool>) -> (Self, mpsc::Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(sender, pool), receiver)
    }

    pub fn pool(&self) -> &dyn FramePool {
        self.pool.as_ref()
    }

    /// Queue `frame` without waiting for room.
    ///
    /// A frame that cannot be queued goes back to the pool.
    pub fn try_send(&self, frame: Frame) -> Result<()> {
        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                self.pool.release(frame);
                Err(CallError::BackpressureExceeded)
            }
            Err(TrySendError::Closed(frame)) => {
                self.pool.release(frame);
                Err(CallError::ConnectionClosed)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl fmt::Debug for FrameChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameChannel")
            .field("capacity", &self.sender.max_capacity())
            .field("available", &self.sender.capacity())
            .finish_non_exhaustive()
    }
}
