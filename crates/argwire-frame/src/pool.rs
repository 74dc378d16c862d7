use std::sync::Mutex;

use tracing::trace;

use crate::codec::{Frame, MAX_PAYLOAD_SIZE};

/// Source of frames for outbound fragments.
///
/// Callers `get` a frame before building a fragment; whoever ends up owning
/// the frame after it is sent hands it back with `release`.
pub trait FramePool: Send + Sync {
    /// Obtain an empty frame.
    fn get(&self) -> Frame;

    /// Return a frame that is no longer referenced.
    fn release(&self, frame: Frame);
}

/// Allocates a fresh frame on every `get`; released frames are dropped.
#[derive(Debug, Clone)]
pub struct HeapFramePool {
    payload_capacity: usize,
}

impl HeapFramePool {
    /// Create a pool handing out frames with `payload_capacity` bytes of payload.
    pub fn new(payload_capacity: usize) -> Self {
        Self {
            payload_capacity: payload_capacity.min(MAX_PAYLOAD_SIZE),
        }
    }
}

impl Default for HeapFramePool {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

impl FramePool for HeapFramePool {
    fn get(&self) -> Frame {
        Frame::new(self.payload_capacity)
    }

    fn release(&self, _frame: Frame) {}
}

/// Keeps released frames around for reuse, up to `max_idle` of them.
#[derive(Debug)]
pub struct RecyclingFramePool {
    payload_capacity: usize,
    max_idle: usize,
    idle: Mutex<Vec<Frame>>,
}

impl RecyclingFramePool {
    /// Create a pool of frames with `payload_capacity` bytes of payload.
    pub fn new(payload_capacity: usize, max_idle: usize) -> Self {
        Self {
            payload_capacity: payload_capacity.min(MAX_PAYLOAD_SIZE),
            max_idle,
            idle: Mutex::new(Vec::with_capacity(max_idle)),
        }
    }

    /// Number of frames currently waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

impl FramePool for RecyclingFramePool {
    fn get(&self) -> Frame {
        let recycled = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        recycled.unwrap_or_else(|| Frame::new(self.payload_capacity))
    }

    fn release(&self, mut frame: Frame) {
        // Frames from another pool (or decoded off the wire) have a different shape.
        if frame.capacity() != self.payload_capacity {
            return;
        }
        frame.reset();
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(frame);
            } else {
                trace!(max_idle = self.max_idle, "frame pool full, dropping frame");
            }
        }
    }
}
