//! Connection handle and lifecycle.
//!
//! A [`Connection`] multiplexes any number of concurrent queries over one
//! socket. Each query gets a fresh token; the response listener routes every
//! reply back to the caller that owns the token, regardless of arrival order.
//!
//! The connection is rebuilt in place by [`Connection::reconnect`]: the old
//! listener is stopped and joined, the token table is reset and the generation
//! counter is bumped, so nothing issued before the reconnect can ever resolve
//! with data from after it.
//!
//! # Example
//!
//! ```ignore
//! use reql_client::{Connection, QueryOptions, QueryResult, Term};
//! use serde_json::json;
//!
//! let conn = Connection::builder().db("blog").connect().await?;
//!
//! match conn.run(Term::datum(json!(42)), QueryOptions::new()).await? {
//!     QueryResult::Datum(value) => println!("{value}"),
//!     QueryResult::Cursor(mut cursor) => {
//!         let mut items = cursor.iterate()?;
//!         while let Some(item) = items.next().await {
//!             println!("{}", item?);
//!         }
//!     }
//!     _ => {}
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectOptions;
use crate::cursor::Cursor;
use crate::error::{ReqlError, Result};
use crate::query::{Datum, Query, QueryOptions, Term};
use crate::response::{Response, ResponseType};
use crate::session::Session;

/// Boxed future returned by [`Connection::run_with`] callbacks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of [`Connection::run`].
#[derive(Debug)]
pub enum QueryResult {
    /// The query was sent with `noreply`; nothing was awaited.
    Noreply,
    /// A single value.
    Datum(Datum),
    /// A stream of values.
    Cursor(Cursor),
    /// The server attached profiling data to the result.
    Profiled {
        /// Profile as reported by the server.
        profile: Datum,
        /// The result itself.
        value: Box<QueryResult>,
    },
}

impl QueryResult {
    /// The cursor inside this result, if any.
    pub fn cursor_mut(&mut self) -> Option<&mut Cursor> {
        match self {
            QueryResult::Cursor(cursor) => Some(cursor),
            QueryResult::Profiled { value, .. } => value.cursor_mut(),
            _ => None,
        }
    }

    /// The value, if this is a single value.
    pub fn into_datum(self) -> Option<Datum> {
        match self {
            QueryResult::Datum(value) => Some(value),
            QueryResult::Profiled { value, .. } => value.into_datum(),
            _ => None,
        }
    }

    /// The cursor, if this is a stream.
    pub fn into_cursor(self) -> Option<Cursor> {
        match self {
            QueryResult::Cursor(cursor) => Some(cursor),
            QueryResult::Profiled { value, .. } => value.into_cursor(),
            _ => None,
        }
    }

    /// Profiling data, if the server sent any.
    pub fn profile(&self) -> Option<&Datum> {
        match self {
            QueryResult::Profiled { profile, .. } => Some(profile),
            _ => None,
        }
    }
}

/// A dispatched query: its token and the generation it was sent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    token: i64,
    generation: u64,
}

impl Ticket {
    /// Token the query was sent with.
    pub fn token(&self) -> i64 {
        self.token
    }

    /// Generation the query was sent on.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Shared state behind every [`Connection`] clone.
pub(crate) struct Inner {
    options: ConnectOptions,
    defaults: Mutex<QueryOptions>,
    next_token: AtomicI64,
    generation: AtomicU64,
    session: Mutex<Option<Arc<Session>>>,
    /// Serializes open, reconnect and close.
    lifecycle: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl Inner {
    fn new(options: ConnectOptions) -> Self {
        let mut defaults = QueryOptions::new();
        defaults.db = options.db.clone();
        Self {
            options,
            defaults: Mutex::new(defaults),
            next_token: AtomicI64::new(1),
            generation: AtomicU64::new(0),
            session: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn allocate_token(&self) -> i64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Allocated token {}", token);
        token
    }

    fn closed_error() -> ReqlError {
        ReqlError::ConnectionClosed("Connection is closed.".to_string())
    }

    /// The installed session, dead or alive.
    fn current(&self) -> Result<Arc<Session>> {
        self.session.lock().clone().ok_or_else(Self::closed_error)
    }

    fn live_session(&self) -> Option<Arc<Session>> {
        self.session.lock().clone().filter(|s| s.is_alive())
    }

    /// The session for `generation`; anything older is gone for good.
    pub(crate) fn session_for(&self, generation: u64) -> Result<Arc<Session>> {
        let session = self.current()?;
        if session.generation() != generation {
            return Err(ReqlError::ConnectionClosed(
                "Connection was reset.".to_string(),
            ));
        }
        Ok(session)
    }

    /// Session used to start a new query, reopening a dead one when allowed.
    async fn session_for_query(&self) -> Result<Arc<Session>> {
        if let Some(session) = self.live_session() {
            return Ok(session);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(Self::closed_error());
        }
        if self.options.auto_reconnect {
            let _guard = self.lifecycle.lock().await;
            // Another caller may have reopened it while we waited for the lock.
            if self.live_session().is_none() {
                tracing::warn!("Connection is down, reconnecting before query");
                self.restart_locked(false).await?;
            }
        }
        self.current()
    }

    async fn restart(&self, drain: bool) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.restart_locked(drain).await
    }

    /// Tear down the current session and open the next generation.
    async fn restart_locked(&self, drain: bool) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Self::closed_error());
        }
        if drain {
            if let Some(session) = self.live_session() {
                self.noreply_wait_on(&session).await?;
            }
        }

        let old = self.session.lock().take();
        if let Some(old) = old {
            old.stop().await;
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let session = Session::open(&self.options, generation).await?;
        *self.session.lock() = Some(Arc::new(session));
        tracing::debug!("Connection now at generation {}", generation);
        Ok(())
    }

    async fn shutdown(&self, drain: bool) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let drained = match (drain, self.live_session()) {
            (true, Some(session)) => self.noreply_wait_on(&session).await,
            _ => Ok(()),
        };

        self.closed.store(true, Ordering::Release);
        let old = self.session.lock().take();
        if let Some(old) = old {
            old.stop().await;
        }
        tracing::debug!("Connection closed at generation {}", self.generation());
        drained
    }

    async fn noreply_wait_on(&self, session: &Session) -> Result<()> {
        let token = self.allocate_token();
        session
            .send(token, &Query::NoreplyWait, QueryOptions::new())
            .await?;
        let response = session.wait(token).await?.into_result()?;
        if response.kind != ResponseType::WaitComplete {
            return Err(ReqlError::MalformedResponse(format!(
                "Unexpected response to noreply_wait: {:?}",
                response.kind
            )));
        }
        Ok(())
    }

    /// Wait for `token`; on cancellation reconnect, then report the interruption.
    ///
    /// A session that is no longer current is left alone: the reconnect
    /// already happened and the newer generation is not torn down.
    pub(crate) async fn wait_on(
        &self,
        session: &Session,
        token: i64,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response> {
        let Some(cancel) = cancel else {
            return session.wait(token).await;
        };
        tokio::select! {
            response = session.wait(token) => response,
            _ = cancel.cancelled() => {
                if session.generation() == self.generation() {
                    tracing::warn!("Wait for token {} interrupted, reconnecting", token);
                    self.restart(false).await?;
                } else {
                    tracing::debug!("Wait for token {} interrupted on a stale session", token);
                }
                Err(ReqlError::Interrupted)
            }
        }
    }

    async fn run(
        self: &Arc<Self>,
        term: Term,
        options: QueryOptions,
        cancel: Option<CancellationToken>,
    ) -> Result<QueryResult> {
        options.validate()?;
        let options = {
            let defaults = self.defaults.lock();
            options.merged_over(&defaults)
        };
        let session = self.session_for_query().await?;
        let token = self.allocate_token();
        let noreply = options.is_noreply();

        let query = Query::Start {
            term,
            options: options.clone(),
        };
        session.send(token, &query, options.clone()).await?;
        if noreply {
            session.forget(token);
            return Ok(QueryResult::Noreply);
        }

        let response = self
            .wait_on(&session, token, cancel.as_ref())
            .await?
            .into_result()?;
        self.classify(&session, token, options, response, cancel)
            .await
    }

    async fn classify(
        self: &Arc<Self>,
        session: &Session,
        token: i64,
        options: QueryOptions,
        response: Response,
        cancel: Option<CancellationToken>,
    ) -> Result<QueryResult> {
        let Response {
            kind,
            results,
            profile,
            ..
        } = response;

        let value = if kind.has_more() {
            let cursor = Cursor::new(
                Arc::downgrade(self),
                session.generation(),
                token,
                options,
                results,
                true,
                cancel,
            );
            cursor.request_more(session).await?;
            QueryResult::Cursor(cursor)
        } else if kind == ResponseType::SuccessSequence {
            QueryResult::Cursor(Cursor::new(
                Arc::downgrade(self),
                session.generation(),
                token,
                options,
                results,
                false,
                cancel,
            ))
        } else {
            QueryResult::Datum(results.into_iter().next().unwrap_or(Datum::Null))
        };

        Ok(match profile {
            Some(profile) => QueryResult::Profiled {
                profile,
                value: Box::new(value),
            },
            None => value,
        })
    }
}

/// Handle to a connection. Cheap to clone; every clone shares one socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Start building connection options.
    pub fn builder() -> ConnectOptions {
        ConnectOptions::new()
    }

    /// Connect, perform the handshake and start the response listener.
    pub async fn open(options: ConnectOptions) -> Result<Self> {
        let inner = Arc::new(Inner::new(options));
        inner.restart(false).await?;
        Ok(Self { inner })
    }

    /// Run `term` and classify the response.
    ///
    /// `options` are merged over the connection defaults; values given here win.
    pub async fn run(&self, term: Term, options: QueryOptions) -> Result<QueryResult> {
        self.inner.run(term, options, None).await
    }

    /// Like [`run`](Self::run), but cancelling `cancel` abandons the wait.
    ///
    /// Cancellation reconnects the connection (invalidating every other
    /// outstanding query) and then fails with [`ReqlError::Interrupted`].
    /// A returned cursor keeps observing `cancel` while it fetches.
    pub async fn run_cancellable(
        &self,
        term: Term,
        options: QueryOptions,
        cancel: CancellationToken,
    ) -> Result<QueryResult> {
        self.inner.run(term, options, Some(cancel)).await
    }

    /// Run `term` and hand the result to `f`.
    ///
    /// A cursor in the result is closed once `f` finishes, whether it
    /// succeeded or not. An error from `f` takes precedence over an error
    /// from closing the cursor.
    ///
    /// ```ignore
    /// let first = conn
    ///     .run_with(term, QueryOptions::new(), |result| {
    ///         Box::pin(async move {
    ///             let cursor = result.cursor_mut().expect("a stream");
    ///             let mut items = cursor.iterate()?;
    ///             items.next().await.transpose()
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn run_with<T, F>(&self, term: Term, options: QueryOptions, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut QueryResult) -> BoxFuture<'a, Result<T>>,
    {
        let mut result = self.run(term, options).await?;
        let outcome = f(&mut result).await;

        let closed = match result.cursor_mut() {
            Some(cursor) => cursor.close().await.map(|_| ()),
            None => Ok(()),
        };
        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                tracing::warn!("Failed to close cursor after callback error: {}", close_err);
                Err(e)
            }
        }
    }

    /// Store `options` for a new token and send `query` with it.
    ///
    /// Pair with [`wait`](Self::wait) to read the response.
    pub async fn dispatch(&self, query: Query, options: QueryOptions) -> Result<Ticket> {
        let session = self.inner.current()?;
        let token = self.inner.allocate_token();
        session.send(token, &query, options).await?;
        Ok(Ticket {
            token,
            generation: session.generation(),
        })
    }

    /// Wait for the next response to a dispatched query.
    ///
    /// A ticket from an earlier generation fails with `ConnectionClosed`.
    /// There is no timeout: the wait ends when the response arrives or the
    /// connection dies.
    pub async fn wait(&self, ticket: &Ticket) -> Result<Response> {
        let session = self.inner.session_for(ticket.generation)?;
        self.inner.wait_on(&session, ticket.token, None).await
    }

    /// Like [`wait`](Self::wait), but cancelling `cancel` reconnects and fails
    /// with [`ReqlError::Interrupted`].
    pub async fn wait_cancellable(
        &self,
        ticket: &Ticket,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let session = self.inner.session_for(ticket.generation)?;
        self.inner
            .wait_on(&session, ticket.token, Some(cancel))
            .await
    }

    /// Block until the server has finished all outstanding `noreply` work.
    pub async fn noreply_wait(&self) -> Result<()> {
        let session = self.inner.current()?;
        self.inner.noreply_wait_on(&session).await
    }

    /// Rebuild the connection in place.
    ///
    /// With `noreply_wait` the server is first asked to finish outstanding
    /// `noreply` work (skipped when the connection is already dead). Every
    /// pending wait and cursor from the current generation becomes invalid.
    pub async fn reconnect(&self, noreply_wait: bool) -> Result<()> {
        self.inner.restart(noreply_wait).await
    }

    /// Close the connection for good.
    ///
    /// The socket is closed even when the optional drain fails; the drain
    /// error is returned afterwards. Closing twice is a no-op.
    pub async fn close(&self, noreply_wait: bool) -> Result<()> {
        self.inner.shutdown(noreply_wait).await
    }

    /// Change the default database used by later queries.
    pub fn use_db(&self, db: impl Into<String>) {
        self.inner.defaults.lock().db = Some(db.into());
    }

    /// Current default database.
    pub fn default_db(&self) -> Option<String> {
        self.inner.defaults.lock().db.clone()
    }

    /// True while the socket is open and the listener runs.
    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire) && self.inner.live_session().is_some()
    }

    /// Generation counter; starts at 1 and grows by one on every reconnect.
    pub fn generation(&self) -> u64 {
        self.inner.generation()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.inner.options.host)
            .field("port", &self.inner.options.port)
            .field("generation", &self.generation())
            .field("open", &self.is_open())
            .finish()
    }
}
