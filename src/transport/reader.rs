//! Read side of the socket.
//!
//! [`BoundedReader`] is built once when a socket is opened. The handshake uses
//! its bounded read so a peer that stops talking cannot hang the open; the
//! response listener then takes it over for unbounded chunked reads.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ReqlError, Result};

/// Socket reader with an explicit bounded-read operation.
pub struct BoundedReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> BoundedReader<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read exactly `len` bytes; EOF before that is a closed connection.
    pub async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        match self.inner.read_exact(&mut buf).await {
            Ok(_) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
                ReqlError::ConnectionClosed("Connection closed by server.".to_string()),
            ),
            Err(e) => Err(ReqlError::Io(e)),
        }
    }

    /// Read exactly `len` bytes, failing with `TimedOut` after `timeout`.
    pub async fn read_exact_timeout(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        match tokio::time::timeout(timeout, self.read_exact(len)).await {
            Ok(result) => result,
            Err(_) => Err(ReqlError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no data from server within {timeout:?}"),
            ))),
        }
    }

    /// Read whatever is available into `buf`. `Ok(0)` means EOF.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.inner.read(buf).await?)
    }

    /// Unwrap the reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}
