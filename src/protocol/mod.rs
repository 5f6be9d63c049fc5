//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary framing shared by requests and responses:
//! - 12-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{Header, BROADCAST_TOKEN, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
