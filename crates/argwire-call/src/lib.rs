//! Three-argument call streaming over checksummed frame fragments.
//!
//! Each direction of a call carries exactly three opaque arguments, written
//! and read in order as byte streams. Arguments are split into chunks packed
//! into fragments; each fragment is one frame whose payload starts with a
//! flag byte, the message envelope, and the running checksum over every
//! argument byte sent so far.
//!
//! - [`ReqResWriter`] turns argument writes into fragments and queues them on
//!   a [`FrameChannel`] without ever blocking.
//! - [`ReqResReader`] pulls fragments from a [`MessageExchange`] and hands
//!   argument bytes back, suspending only while waiting for the peer.
//! - [`Connection`] routes peer frames to the exchange of the call they
//!   belong to and creates [`OutboundCall`]s and [`InboundCall`]s.
//!
//! The first failure on a writer or reader is latched: it shuts the call's
//! exchange down once and is returned from every later operation.

pub mod call;
pub mod channel;
pub mod checksum;
pub mod config;
pub mod connection;
pub mod error;
pub mod exchange;
pub mod fragment;
pub mod fragmenting_reader;
pub mod fragmenting_writer;
pub mod message;
pub mod reqres;

pub use call::{InboundCall, OutboundCall};
pub use channel::FrameChannel;
pub use checksum::{Checksum, ChecksumType, Crc32CChecksum, Crc32Checksum, NoChecksum};
pub use config::CallConfig;
pub use connection::Connection;
pub use error::{CallError, Direction, FragmentError, Result};
pub use exchange::{MessageExchange, MessageExchangeSet};
pub use fragment::{
    parse_inbound_fragment, ReadableFragment, WritableFragment, CHUNK_HEADER_SIZE,
    HAS_MORE_FRAGMENTS_FLAG,
};
pub use fragmenting_reader::{FragmentReceiver, FragmentingReader};
pub use fragmenting_writer::{FragmentSender, FragmentingWriter};
pub use message::{
    CallReq, CallReqContinue, CallRes, CallResContinue, ErrorMessage, FragmentMessages, Message,
    RequestMessages, ResponseCode, ResponseMessages, TransportHeaders, Tracing,
};
pub use reqres::{Arg, ArgReader, ArgState, ArgWriter, ReqResReader, ReqResWriter};
