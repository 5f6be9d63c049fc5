//! # reql-client
//!
//! Async client engine for the ReQL wire protocol (V0_3, JSON payloads).
//!
//! One TCP connection carries any number of concurrent queries. Every query
//! gets a token; a background listener task reads responses and hands each
//! one to the caller that owns its token, whatever order they arrive in.
//!
//! ## Architecture
//!
//! - **Writer task**: the single writer on the socket, fed by a bounded channel
//! - **Response listener**: the single reader, routing frames into the token table
//! - **Token table**: lock-protected rendezvous of options, waiters and unclaimed responses
//! - **Cursor**: single-pass iteration over partial batches, prefetching the next one
//! - **Generations**: every reconnect starts a new generation and invalidates the old one
//!
//! ## Example
//!
//! ```ignore
//! use reql_client::{Connection, QueryOptions, Term};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> reql_client::Result<()> {
//!     let conn = Connection::builder()
//!         .host("localhost")
//!         .db("blog")
//!         .connect()
//!         .await?;
//!
//!     let value = conn
//!         .run(Term::datum(json!(42)), QueryOptions::new())
//!         .await?
//!         .into_datum();
//!     println!("{value:?}");
//!
//!     conn.close(true).await
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod query;
pub mod response;
pub mod transport;

mod config;
mod connection;
mod cursor;
mod listener;
mod session;
mod token_table;
mod writer;

pub use config::{ConnectOptions, DEFAULT_HOST, DEFAULT_PORT};
pub use connection::{BoxFuture, Connection, QueryResult, Ticket};
pub use cursor::{Cursor, CursorIter};
pub use error::{ReqlError, Result};
pub use query::{Datum, Format, OptArg, Query, QueryOptions, Term};
pub use response::{Response, ResponseType};
pub use tokio_util::sync::CancellationToken;
