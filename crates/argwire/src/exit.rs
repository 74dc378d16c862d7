use std::fmt;
use std::io;

use argwire_call::CallError;
use argwire_frame::FrameError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TEMPFAIL: i32 = 75;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => USAGE,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn call_error(context: &str, err: CallError) -> CliError {
    let code = match &err {
        CallError::Cancelled | CallError::Timeout => TIMEOUT,
        CallError::BackpressureExceeded => TEMPFAIL,
        CallError::Codec(_) | CallError::Fragment(_) | CallError::UnexpectedMessage { .. } => {
            DATA_INVALID
        }
        CallError::ConnectionClosed | CallError::Peer { .. } => FAILURE,
        CallError::StateMismatch(_) | CallError::DuplicateExchange(_) => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use argwire_call::FragmentError;

    #[test]
    fn call_errors_map_to_exit_codes() {
        assert_eq!(call_error("x", CallError::Timeout).code, TIMEOUT);
        assert_eq!(call_error("x", CallError::BackpressureExceeded).code, TEMPFAIL);
        assert_eq!(
            call_error("x", FragmentError::ChecksumMismatch.into()).code,
            DATA_INVALID
        );
        let err = call_error("reading response", CallError::ConnectionClosed);
        assert_eq!(err.code, FAILURE);
        assert_eq!(err.to_string(), "reading response: connection closed");
    }

    #[test]
    fn frame_io_errors_keep_kind() {
        let err = frame_error(
            "decode",
            FrameError::Io(io::Error::from(io::ErrorKind::PermissionDenied)),
        );
        assert_eq!(err.code, PERMISSION_DENIED);
    }
}
