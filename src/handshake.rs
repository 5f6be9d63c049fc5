//! Version/auth exchange performed every time a socket is (re)opened.
//!
//! The client sends:
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬──────────────┐
//! │ Magic        │ Key length   │ Auth key     │ Protocol     │
//! │ uint32 LE    │ uint32 LE    │ N bytes      │ uint32 LE    │
//! └──────────────┴──────────────┴──────────────┴──────────────┘
//! ```
//! and the server answers with ASCII text terminated by a single NUL byte.
//! Anything other than `SUCCESS` is a [`ReqlError::Handshake`].

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::{ReqlError, Result};
use crate::transport::BoundedReader;

/// Protocol version magic number (V0_3).
pub const MAGIC_V0_3: u32 = 0x5f75_e83e;

/// Wire protocol selector for JSON payloads.
pub const PROTOCOL_JSON: u32 = 0x7e69_70c7;

/// Default read timeout applied to each byte of the server's reply.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// Longest reply accepted before giving up on the terminating NUL.
pub const MAX_REPLY_LEN: usize = 4096;

const SUCCESS: &str = "SUCCESS";

/// Build the bytes the client sends.
///
/// # Example
///
/// ```
/// use reql_client::handshake::build_handshake;
///
/// let bytes = build_handshake("");
/// assert_eq!(bytes.len(), 12);
/// assert_eq!(&bytes[0..4], &0x5f75e83eu32.to_le_bytes());
/// ```
pub fn build_handshake(auth_key: &str) -> Vec<u8> {
    let key = auth_key.as_bytes();
    let mut buf = Vec::with_capacity(12 + key.len());
    buf.extend_from_slice(&MAGIC_V0_3.to_le_bytes());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(&PROTOCOL_JSON.to_le_bytes());
    buf
}

/// Write the handshake and check the server's reply.
pub async fn perform<R, W>(
    reader: &mut BoundedReader<R>,
    writer: &mut W,
    auth_key: &str,
    per_byte_timeout: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(&build_handshake(auth_key)).await?;
    writer.flush().await?;

    let reply = read_reply(reader, per_byte_timeout).await?;
    if reply != SUCCESS {
        return Err(ReqlError::Handshake(reply));
    }
    tracing::debug!("Handshake complete");
    Ok(())
}

async fn read_reply<R: AsyncRead + Unpin>(
    reader: &mut BoundedReader<R>,
    per_byte_timeout: Duration,
) -> Result<String> {
    let mut reply = Vec::new();
    loop {
        let byte = reader
            .read_exact_timeout(1, per_byte_timeout)
            .await
            .map_err(|e| ReqlError::Handshake(format!("no handshake reply: {e}")))?;
        if byte[0] == 0 {
            break;
        }
        if reply.len() >= MAX_REPLY_LEN {
            return Err(ReqlError::Handshake(format!(
                "reply exceeds {MAX_REPLY_LEN} bytes without terminator"
            )));
        }
        reply.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&reply).into_owned())
}
