//! Fixed-header wire frames for argwire.
//!
//! Every frame on the wire carries a 16-byte header:
//! - A 2-byte big-endian total frame size (header included)
//! - A 1-byte message type
//! - A 4-byte big-endian correlation id
//! - Reserved bytes, always written as zero
//!
//! On top of the frame codec this crate provides the pieces the call layer
//! builds fragments with: a frame pool, and typed buffers whose deferred slots
//! are filled in once a fragment's final size is known.

pub mod buffer;
pub mod codec;
pub mod error;
pub mod pool;
pub mod reader;
pub mod writer;

pub use buffer::{ByteRef, BytesRef, ReadBuffer, U16Ref, WriteBuffer};
pub use codec::{
    decode_frame, decode_header, encode_frame, Frame, FrameConfig, FrameHeader, MessageType,
    HEADER_SIZE, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE,
};
pub use error::{FrameError, Result};
pub use pool::{FramePool, HeapFramePool, RecyclingFramePool};
pub use reader::FrameReader;
pub use writer::FrameWriter;
