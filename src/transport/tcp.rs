//! TCP socket opening.
//!
//! # Example
//!
//! ```ignore
//! use reql_client::transport::connect;
//!
//! let socket = connect("localhost", 28015).await?;
//! let (reader, writer) = socket.into_split();
//! ```

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::BoundedReader;
use crate::error::{ReqlError, Result};

/// A connected socket, not yet split.
pub struct Socket {
    stream: TcpStream,
}

impl Socket {
    /// Split into the bounded reader used by the handshake and listener, and the write half.
    pub fn into_split(self) -> (BoundedReader<OwnedReadHalf>, OwnedWriteHalf) {
        let (read_half, write_half) = self.stream.into_split();
        (BoundedReader::new(read_half), write_half)
    }

    /// Get a reference to the underlying stream.
    pub fn inner(&self) -> &TcpStream {
        &self.stream
    }
}

/// Open a TCP connection to `host:port` with `TCP_NODELAY` set.
pub async fn connect(host: &str, port: u16) -> Result<Socket> {
    let stream = TcpStream::connect((host, port)).await.map_err(|e| {
        ReqlError::ConnectionClosed(format!("could not connect to {host}:{port}: {e}"))
    })?;
    stream.set_nodelay(true)?;
    tracing::debug!("Connected to {}:{}", host, port);
    Ok(Socket { stream })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_and_split() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"ok").await.unwrap();
        });

        let socket = connect("127.0.0.1", port).await.unwrap();
        assert!(socket.inner().nodelay().unwrap());

        let (mut reader, _writer) = socket.into_split();
        assert_eq!(reader.read_exact(2).await.unwrap(), b"ok");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect("127.0.0.1", port).await;
        assert!(matches!(result, Err(ReqlError::ConnectionClosed(_))));
    }
}
