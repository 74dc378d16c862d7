/// Errors that can occur during frame and buffer encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The declared frame size is smaller than the frame header.
    #[error("invalid frame size {0} (header alone is 16 bytes)")]
    InvalidSize(usize),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A write did not fit in the remaining buffer space.
    #[error("buffer overflow (needed {needed} bytes, {remaining} remaining)")]
    BufferOverflow { needed: usize, remaining: usize },

    /// A read ran past the end of the buffer.
    #[error("buffer truncated (needed {needed} bytes, {remaining} remaining)")]
    Truncated { needed: usize, remaining: usize },

    /// A length-prefixed string is longer than its prefix can express.
    #[error("string of {len} bytes exceeds {max} byte length prefix")]
    StringTooLong { len: usize, max: usize },

    /// A decoded string was not valid UTF-8.
    #[error("invalid utf-8 in {0}")]
    InvalidString(&'static str),

    /// A decoded field held a value outside its known range.
    #[error("invalid {field} value {value:#x}")]
    InvalidValue { field: &'static str, value: u64 },

    /// A deferred slot was filled with the wrong number of bytes.
    #[error("deferred slot holds {expected} bytes, got {actual}")]
    DeferredLengthMismatch { expected: usize, actual: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
