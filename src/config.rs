//! Connection configuration.
//!
//! [`ConnectOptions`] is a fluent builder; call [`ConnectOptions::connect`]
//! to open a [`Connection`].
//!
//! # Example
//!
//! ```ignore
//! use reql_client::ConnectOptions;
//!
//! let conn = ConnectOptions::new()
//!     .host("db.internal")
//!     .db("blog")
//!     .auto_reconnect(true)
//!     .connect()
//!     .await?;
//! ```

use std::fmt;
use std::time::Duration;

use crate::connection::Connection;
use crate::error::Result;
use crate::handshake::DEFAULT_HANDSHAKE_TIMEOUT;
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::writer::DEFAULT_CHANNEL_CAPACITY;

/// Default server host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default client driver port.
pub const DEFAULT_PORT: u16 = 28015;

/// Options used to open (and reopen) a connection.
#[derive(Clone)]
pub struct ConnectOptions {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) db: Option<String>,
    pub(crate) auth_key: String,
    pub(crate) handshake_timeout: Duration,
    pub(crate) channel_capacity: usize,
    pub(crate) max_payload_size: u32,
    pub(crate) auto_reconnect: bool,
}

impl ConnectOptions {
    /// Options with every default.
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            db: None,
            auth_key: String::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            auto_reconnect: false,
        }
    }

    /// Set the server host.
    ///
    /// Default: `localhost`
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    ///
    /// Default: 28015
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the default database for queries that do not name one.
    pub fn db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    /// Set the authorization key sent in the handshake.
    ///
    /// Default: empty
    pub fn auth_key(mut self, key: impl Into<String>) -> Self {
        self.auth_key = key.into();
        self
    }

    /// Set the per-byte read timeout for the handshake reply.
    ///
    /// Default: 20 seconds
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the largest response payload accepted from the server.
    ///
    /// Default: 64 MiB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Reopen a dead connection on the next query instead of failing.
    ///
    /// Default: false
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Open a connection with these options.
    pub async fn connect(self) -> Result<Connection> {
        Connection::open(self).await
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("auth_key", &"<redacted>")
            .field("handshake_timeout", &self.handshake_timeout)
            .field("channel_capacity", &self.channel_capacity)
            .field("max_payload_size", &self.max_payload_size)
            .field("auto_reconnect", &self.auto_reconnect)
            .finish()
    }
}
