//! Typed envelopes written at the front of every fragment.
//!
//! Field layouts (`~N` is an N-byte length prefix):
//!
//! ```text
//! call-req:           ttl:4 tracing:25 service~1 nh:1 (hk~1 hv~1){nh}
//! call-res:           code:1 tracing:25 nh:1 (hk~1 hv~1){nh}
//! call-*-continue:    (no fields)
//! error:              code:1 tracing:25 message~2
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use argwire_frame::{FrameError, MessageType, ReadBuffer, Result, WriteBuffer};

/// Transport headers carried by the initial fragment of a call.
pub type TransportHeaders = BTreeMap<String, String>;

/// A serializable fragment envelope.
pub trait Message: Send {
    /// Frame message type this envelope is sent as.
    fn message_type(&self) -> MessageType;

    /// Serialize the envelope fields.
    fn write(&self, wbuf: &mut WriteBuffer) -> Result<()>;

    /// Parse the envelope fields in place.
    fn read(&mut self, rbuf: &mut ReadBuffer) -> Result<()>;
}

/// Selects the envelope for an initial or follow-on fragment.
pub trait FragmentMessages: Send {
    /// Envelope of the first fragment.
    fn initial(&mut self) -> &mut dyn Message;

    /// Envelope of every later fragment.
    fn continuation(&mut self) -> &mut dyn Message;

    fn for_fragment(&mut self, initial: bool) -> &mut dyn Message {
        if initial {
            self.initial()
        } else {
            self.continuation()
        }
    }
}

/// Zipkin-style tracing identifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tracing {
    pub span_id: u64,
    pub parent_id: u64,
    pub trace_id: u64,
    pub flags: u8,
}

impl Tracing {
    fn write(&self, wbuf: &mut WriteBuffer) -> Result<()> {
        wbuf.write_u64(self.span_id)?;
        wbuf.write_u64(self.parent_id)?;
        wbuf.write_u64(self.trace_id)?;
        wbuf.write_u8(self.flags)
    }

    fn read(rbuf: &mut ReadBuffer) -> Result<Self> {
        Ok(Self {
            span_id: rbuf.read_u64()?,
            parent_id: rbuf.read_u64()?,
            trace_id: rbuf.read_u64()?,
            flags: rbuf.read_u8()?,
        })
    }
}

fn write_headers(headers: &TransportHeaders, wbuf: &mut WriteBuffer) -> Result<()> {
    let count = u8::try_from(headers.len()).map_err(|_| FrameError::InvalidValue {
        field: "header count",
        value: headers.len() as u64,
    })?;
    wbuf.write_u8(count)?;
    for (key, value) in headers {
        wbuf.write_len8_str(key)?;
        wbuf.write_len8_str(value)?;
    }
    Ok(())
}

fn read_headers(rbuf: &mut ReadBuffer) -> Result<TransportHeaders> {
    let count = rbuf.read_u8()?;
    let mut headers = TransportHeaders::new();
    for _ in 0..count {
        let key = rbuf.read_len8_string("header key")?;
        let value = rbuf.read_len8_string("header value")?;
        headers.insert(key, value);
    }
    Ok(headers)
}

/// Initial fragment of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallReq {
    /// Time the caller is willing to wait; millisecond precision on the wire.
    pub ttl: Duration,
    pub tracing: Tracing,
    pub service: String,
    pub headers: TransportHeaders,
}

impl CallReq {
    pub fn new(service: impl Into<String>, ttl: Duration) -> Self {
        Self {
            ttl,
            service: service.into(),
            ..Self::default()
        }
    }
}

impl Message for CallReq {
    fn message_type(&self) -> MessageType {
        MessageType::CallReq
    }

    fn write(&self, wbuf: &mut WriteBuffer) -> Result<()> {
        let ttl_ms = u32::try_from(self.ttl.as_millis()).unwrap_or(u32::MAX);
        wbuf.write_u32(ttl_ms)?;
        self.tracing.write(wbuf)?;
        wbuf.write_len8_str(&self.service)?;
        write_headers(&self.headers, wbuf)
    }

    fn read(&mut self, rbuf: &mut ReadBuffer) -> Result<()> {
        self.ttl = Duration::from_millis(u64::from(rbuf.read_u32()?));
        self.tracing = Tracing::read(rbuf)?;
        self.service = rbuf.read_len8_string("service")?;
        self.headers = read_headers(rbuf)?;
        Ok(())
    }
}

/// Follow-on fragment of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallReqContinue;

impl Message for CallReqContinue {
    fn message_type(&self) -> MessageType {
        MessageType::CallReqContinue
    }

    fn write(&self, _wbuf: &mut WriteBuffer) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, _rbuf: &mut ReadBuffer) -> Result<()> {
        Ok(())
    }
}

/// Outcome flag of a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    #[default]
    Ok = 0x00,
    /// The handler ran and reported an application error.
    Error = 0x01,
}

/// Initial fragment of a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRes {
    pub code: ResponseCode,
    pub tracing: Tracing,
    pub headers: TransportHeaders,
}

impl Message for CallRes {
    fn message_type(&self) -> MessageType {
        MessageType::CallRes
    }

    fn write(&self, wbuf: &mut WriteBuffer) -> Result<()> {
        wbuf.write_u8(self.code as u8)?;
        self.tracing.write(wbuf)?;
        write_headers(&self.headers, wbuf)
    }

    fn read(&mut self, rbuf: &mut ReadBuffer) -> Result<()> {
        self.code = match rbuf.read_u8()? {
            0x00 => ResponseCode::Ok,
            0x01 => ResponseCode::Error,
            other => {
                return Err(FrameError::InvalidValue {
                    field: "response code",
                    value: u64::from(other),
                })
            }
        };
        self.tracing = Tracing::read(rbuf)?;
        self.headers = read_headers(rbuf)?;
        Ok(())
    }
}

/// Follow-on fragment of a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallResContinue;

impl Message for CallResContinue {
    fn message_type(&self) -> MessageType {
        MessageType::CallResContinue
    }

    fn write(&self, _wbuf: &mut WriteBuffer) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, _rbuf: &mut ReadBuffer) -> Result<()> {
        Ok(())
    }
}

/// Error frame sent by a peer in place of a call fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorMessage {
    pub code: u8,
    pub tracing: Tracing,
    pub message: String,
}

impl Message for ErrorMessage {
    fn message_type(&self) -> MessageType {
        MessageType::Error
    }

    fn write(&self, wbuf: &mut WriteBuffer) -> Result<()> {
        wbuf.write_u8(self.code)?;
        self.tracing.write(wbuf)?;
        wbuf.write_len16_str(&self.message)
    }

    fn read(&mut self, rbuf: &mut ReadBuffer) -> Result<()> {
        self.code = rbuf.read_u8()?;
        self.tracing = Tracing::read(rbuf)?;
        self.message = rbuf.read_len16_string("error message")?;
        Ok(())
    }
}

/// Envelopes for the request direction of a call.
#[derive(Debug, Clone, Default)]
pub struct RequestMessages {
    pub call_req: CallReq,
    continuation: CallReqContinue,
}

impl RequestMessages {
    pub fn new(call_req: CallReq) -> Self {
        Self {
            call_req,
            continuation: CallReqContinue,
        }
    }
}

impl FragmentMessages for RequestMessages {
    fn initial(&mut self) -> &mut dyn Message {
        &mut self.call_req
    }

    fn continuation(&mut self) -> &mut dyn Message {
        &mut self.continuation
    }
}

/// Envelopes for the response direction of a call.
#[derive(Debug, Clone, Default)]
pub struct ResponseMessages {
    pub call_res: CallRes,
    continuation: CallResContinue,
}

impl ResponseMessages {
    pub fn new(call_res: CallRes) -> Self {
        Self {
            call_res,
            continuation: CallResContinue,
        }
    }
}

impl FragmentMessages for ResponseMessages {
    fn initial(&mut self) -> &mut dyn Message {
        &mut self.call_res
    }

    fn continuation(&mut self) -> &mut dyn Message {
        &mut self.continuation
    }
}
