//! Frame struct: a header plus its payload.
//!
//! Uses `bytes::Bytes` so a decoded payload can be handed between tasks
//! without copying.
//!
//! # Example
//!
//! ```
//! use reql_client::protocol::{build_frame, Frame, Header};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Header::new(42, 5), Bytes::from_static(b"hello"));
//! assert_eq!(frame.token(), 42);
//! assert_eq!(build_frame(&frame.header, frame.payload()).len(), 12 + 5);
//! ```

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Create a frame for `token` carrying a copy of `payload`.
    pub fn from_parts(token: i64, payload: &[u8]) -> Self {
        Self {
            header: Header::new(token, payload.len() as u32),
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the token.
    #[inline]
    pub fn token(&self) -> i64 {
        self.header.token
    }

    /// Check if this frame is addressed to every waiter.
    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.header.is_broadcast()
    }
}

/// Build a complete frame as a single byte vector.
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
