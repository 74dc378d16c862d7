use std::fmt;
use std::sync::Arc;

use argwire_frame::{FrameError, MessageType};

/// Which half of a call raised a state error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

/// Violations of the fragment/chunk layout of an argument stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FragmentError {
    #[error("argument already in progress")]
    AlreadyInArgument,

    #[error("no argument in progress")]
    NotInArgument,

    #[error("all arguments already transferred")]
    Complete,

    #[error("fragment has {0} bytes left, not enough to begin an argument")]
    NoRoomForArgument(usize),

    #[error("chunk of {size} bytes exceeds the {remaining} bytes left in the fragment")]
    ChunkExceedsFragment { size: usize, remaining: usize },

    #[error("fragment checksum does not match the received bytes")]
    ChecksumMismatch,

    #[error("checksum type changed from {expected} to {actual} mid-call")]
    ChecksumTypeMismatch { expected: u8, actual: u8 },

    #[error("checksum type {0} is not supported")]
    UnsupportedChecksum(u8),

    #[error("argument closed with unread data")]
    DataLeftover,

    #[error("more arguments follow the last argument")]
    TooManyArguments,

    #[error("call ended before all arguments were received")]
    TooFewArguments,

    #[error("continuation fragment does not close the previous argument")]
    NotAtArgumentEnd,
}

/// Errors surfaced by call writers, readers and message exchanges.
///
/// `Clone` so that a latched failure can be handed back on every later call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    /// An argument was opened out of order, or after completion or failure.
    #[error("attempting {0} outside of expected state")]
    StateMismatch(Direction),

    /// Malformed or truncated bytes while building or parsing a fragment.
    #[error("codec error: {0}")]
    Codec(#[source] Arc<FrameError>),

    /// The argument stream violated the fragment layout.
    #[error("fragment error: {0}")]
    Fragment(#[from] FragmentError),

    /// The send queue could not take a frame without blocking.
    #[error("send buffer full")]
    BackpressureExceeded,

    /// The call was cancelled before the operation completed.
    #[error("call cancelled")]
    Cancelled,

    /// The call outlived its time-to-live.
    #[error("call timed out")]
    Timeout,

    /// The other end of the send queue or exchange is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer answered with an error frame.
    #[error("peer error {code:#04x}: {message}")]
    Peer { code: u8, message: String },

    /// A frame of the wrong type arrived for this exchange.
    #[error("unexpected message {actual} (expected {expected})")]
    UnexpectedMessage {
        expected: MessageType,
        actual: MessageType,
    },

    /// An exchange with this id is already registered.
    #[error("duplicate message exchange id {0}")]
    DuplicateExchange(u32),
}

impl CallError {
    /// Whether the call was abandoned rather than failed.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CallError::Cancelled | CallError::Timeout)
    }
}

impl From<FrameError> for CallError {
    fn from(err: FrameError) -> Self {
        CallError::Codec(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
