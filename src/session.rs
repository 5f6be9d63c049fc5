//! One generation of a connection: socket, listener task, writer task and token table.
//!
//! A session is built by [`Session::open`] (connect, handshake, spawn tasks)
//! and torn down by [`Session::stop`]. It is never reused: a reconnect builds
//! a fresh session with the next generation number.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::JsonCodec;
use crate::config::ConnectOptions;
use crate::error::Result;
use crate::handshake;
use crate::listener::ResponseListener;
use crate::query::{Query, QueryOptions};
use crate::response::Response;
use crate::token_table::TokenTable;
use crate::transport;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

struct Tasks {
    listener: JoinHandle<()>,
    writer: JoinHandle<Result<()>>,
}

pub(crate) struct Session {
    table: Arc<TokenTable>,
    writer: WriterHandle,
    shutdown: CancellationToken,
    tasks: Mutex<Option<Tasks>>,
}

impl Session {
    /// Connect, run the handshake and start the listener and writer tasks.
    pub async fn open(options: &ConnectOptions, generation: u64) -> Result<Self> {
        let socket = transport::connect(&options.host, options.port).await?;
        let (mut reader, mut write_half) = socket.into_split();
        handshake::perform(
            &mut reader,
            &mut write_half,
            &options.auth_key,
            options.handshake_timeout,
        )
        .await?;

        let table = Arc::new(TokenTable::new(generation));
        let shutdown = CancellationToken::new();
        let listener = ResponseListener::new(
            reader,
            table.clone(),
            options.max_payload_size,
            shutdown.clone(),
        )
        .spawn();
        let (writer, writer_task) =
            spawn_writer_task(write_half, options.channel_capacity, table.clone());

        tracing::debug!(
            "Session for generation {} open on {}:{}",
            generation,
            options.host,
            options.port
        );

        Ok(Self {
            table,
            writer,
            shutdown,
            tasks: Mutex::new(Some(Tasks {
                listener,
                writer: writer_task,
            })),
        })
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.table.generation()
    }

    /// True while the listener runs and the writer accepts frames.
    pub fn is_alive(&self) -> bool {
        self.table.is_alive() && !self.writer.is_closed()
    }

    /// Encode `query` and hand it to the writer task.
    pub async fn dispatch(&self, token: i64, query: &Query) -> Result<()> {
        self.table.ensure_alive()?;
        let payload = JsonCodec::encode_query(query)?;
        tracing::debug!(
            "Dispatching {:?} for token {} ({} bytes)",
            query.query_type(),
            token,
            payload.len()
        );
        self.writer
            .send(OutboundFrame::new(token, Bytes::from(payload))?)
            .await
    }

    /// Store `options` for `token`, then dispatch.
    ///
    /// The options must be in the table before the frame is written so the
    /// listener can decode the response with them.
    pub async fn send(&self, token: i64, query: &Query, options: QueryOptions) -> Result<()> {
        self.table.set_options(token, options);
        if let Err(e) = self.dispatch(token, query).await {
            self.table.forget(token);
            return Err(e);
        }
        Ok(())
    }

    /// Wait for the next response to `token`.
    pub async fn wait(&self, token: i64) -> Result<Response> {
        self.table.wait(token).await
    }

    /// Drop everything known about `token`.
    pub fn forget(&self, token: i64) {
        self.table.forget(token);
    }

    /// Stop the listener and the writer, then reset the table.
    ///
    /// Once this returns, no response of this generation can be delivered.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            if let Err(e) = tasks.listener.await {
                tracing::warn!("Response listener task ended abnormally: {}", e);
            }
            tasks.writer.abort();
            let _ = tasks.writer.await;
        }
        self.table.reset();
        tracing::debug!("Session for generation {} stopped", self.generation());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(tasks) = self.tasks.get_mut().take() {
            tasks.writer.abort();
        }
        self.table.reset();
    }
}
