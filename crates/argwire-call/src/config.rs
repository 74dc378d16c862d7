use argwire_frame::MAX_PAYLOAD_SIZE;

use crate::checksum::ChecksumType;

/// Per-connection call settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallConfig {
    /// Checksum used for every argument stream this side writes.
    pub checksum_type: ChecksumType,
    /// Frames that may wait in the outbound send queue before flushes fail
    /// with `BackpressureExceeded`.
    pub send_buffer_size: usize,
    /// Inbound frames buffered per call before routing fails.
    pub exchange_buffer_size: usize,
    /// Payload capacity of frames taken from the pool.
    pub frame_payload_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            checksum_type: ChecksumType::Crc32,
            send_buffer_size: 512,
            exchange_buffer_size: 512,
            frame_payload_capacity: MAX_PAYLOAD_SIZE,
        }
    }
}
