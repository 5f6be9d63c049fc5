//! Wire format encoding and decoding.
//!
//! Every request and response uses the same 12-byte header:
//! ```text
//! ┌──────────────┬──────────┐
//! │ Token        │ Length   │
//! │ 8 bytes      │ 4 bytes  │
//! │ int64 LE     │ uint32 LE│
//! └──────────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Little Endian.

use crate::error::{ReqlError, Result};

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// Default maximum payload size accepted from the server (64 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Token the server uses for messages addressed to every waiter.
pub const BROADCAST_TOKEN: i64 = -1;

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Query token this frame belongs to.
    pub token: i64,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(token: i64, payload_length: u32) -> Self {
        Self {
            token,
            payload_length,
        }
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use reql_client::protocol::Header;
    ///
    /// let bytes = Header::new(1, 100).encode();
    /// assert_eq!(bytes.len(), 12);
    /// assert_eq!(bytes[0], 1);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..8].copy_from_slice(&self.token.to_le_bytes());
        buf[8..12].copy_from_slice(&self.payload_length.to_le_bytes());
    }

    /// Decode header from bytes (Little Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let mut token = [0u8; 8];
        token.copy_from_slice(&buf[0..8]);
        let mut length = [0u8; 4];
        length.copy_from_slice(&buf[8..12]);
        Some(Self {
            token: i64::from_le_bytes(token),
            payload_length: u32::from_le_bytes(length),
        })
    }

    /// Check that the payload length does not exceed `max_payload_size`.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(ReqlError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }
        Ok(())
    }

    /// Check if this frame is addressed to every waiter.
    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.token == BROADCAST_TOKEN
    }
}
