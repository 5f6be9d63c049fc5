//! Single-pass cursor over a server-paginated result stream.
//!
//! A cursor starts with the batch that came back with the query. While the
//! server holds more, exactly one CONTINUE is in flight: it is sent as soon as
//! a batch is consumed from the wire, so the next batch is usually already
//! buffered when iteration reaches it.
//!
//! The cursor keeps only a weak reference to its connection plus the
//! generation it was created under. After a reconnect it is stale and
//! [`Cursor::iterate`] fails with [`ReqlError::StaleCursor`].
//!
//! Dropping a cursor whose stream is still open sends STOP from a background
//! task. Call [`Cursor::close`] to observe the acknowledgement.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;

use crate::connection::Inner;
use crate::error::{ReqlError, Result};
use crate::query::{Datum, Query, QueryOptions};
use crate::session::Session;

/// Cursor over the results of one query.
#[derive(Debug)]
pub struct Cursor {
    conn: Weak<Inner>,
    generation: u64,
    token: i64,
    options: QueryOptions,
    buffer: VecDeque<Datum>,
    /// A CONTINUE is in flight.
    more: bool,
    consumed: bool,
    cancel: Option<CancellationToken>,
}

impl Cursor {
    pub(crate) fn new(
        conn: Weak<Inner>,
        generation: u64,
        token: i64,
        options: QueryOptions,
        first_batch: Vec<Datum>,
        more: bool,
        cancel: Option<CancellationToken>,
    ) -> Self {
        Self {
            conn,
            generation,
            token,
            options,
            buffer: first_batch.into(),
            more,
            consumed: false,
            cancel,
        }
    }

    /// Token this cursor reads from.
    pub fn token(&self) -> i64 {
        self.token
    }

    /// Items fetched but not yet yielded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// True while the server may send further batches.
    pub fn has_more(&self) -> bool {
        self.more
    }

    /// True once the owning connection reconnected, closed or was dropped.
    pub fn is_stale(&self) -> bool {
        !matches!(self.conn.upgrade(), Some(inner) if inner.generation() == self.generation)
    }

    /// Start the one and only iteration.
    ///
    /// # Errors
    ///
    /// [`ReqlError::AlreadyIterated`] on a second call, [`ReqlError::StaleCursor`]
    /// if the connection reconnected since the cursor was created.
    pub fn iterate(&mut self) -> Result<CursorIter<'_>> {
        if self.consumed {
            return Err(ReqlError::AlreadyIterated);
        }
        self.consumed = true;
        if self.is_stale() {
            return Err(ReqlError::StaleCursor);
        }
        Ok(CursorIter { cursor: self })
    }

    /// Iterate to the end and collect every item.
    pub async fn collect(&mut self) -> Result<Vec<Datum>> {
        let mut items = Vec::with_capacity(self.buffer.len());
        let mut iter = self.iterate()?;
        while let Some(item) = iter.next().await {
            items.push(item?);
        }
        Ok(items)
    }

    /// Abandon the stream.
    ///
    /// Returns `Ok(false)` when there was nothing to stop: the stream was
    /// already exhausted or closed, or the connection has since been reset.
    /// Otherwise sends STOP and returns `Ok(true)` once the server
    /// acknowledges it with an empty SUCCESS_SEQUENCE; any other
    /// acknowledgement is a [`ReqlError::MalformedResponse`].
    pub async fn close(&mut self) -> Result<bool> {
        if !self.more {
            return Ok(false);
        }
        self.more = false;

        let Some(inner) = self.conn.upgrade() else {
            return Ok(false);
        };
        let Ok(session) = inner.session_for(self.generation) else {
            return Ok(false);
        };

        stop_stream(
            &inner,
            &session,
            self.token,
            self.options.clone(),
            self.cancel.as_ref(),
        )
        .await?;
        Ok(true)
    }

    /// Send the CONTINUE for the next batch.
    pub(crate) async fn request_more(&self, session: &Session) -> Result<()> {
        session
            .send(self.token, &Query::Continue, self.options.clone())
            .await
    }

    fn connection(&self) -> Result<(Arc<Inner>, Arc<Session>)> {
        let inner = self
            .conn
            .upgrade()
            .ok_or_else(|| ReqlError::ConnectionClosed("Connection was dropped.".to_string()))?;
        let session = inner.session_for(self.generation)?;
        Ok((inner, session))
    }

    /// Wait for the in-flight batch and queue the next CONTINUE if needed.
    async fn fetch_next(&mut self) -> Result<()> {
        let (inner, session) = self.connection()?;
        let response = inner
            .wait_on(&session, self.token, self.cancel.as_ref())
            .await?
            .into_result()?;

        let more = response.kind.has_more();
        tracing::debug!(
            "Token {} delivered a batch of {} ({:?})",
            self.token,
            response.results.len(),
            response.kind
        );
        self.buffer.extend(response.results);
        if more {
            self.request_more(&session).await?;
        } else {
            self.more = false;
        }
        Ok(())
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if !self.more {
            return;
        }
        let Some(inner) = self.conn.upgrade() else {
            return;
        };
        let Ok(session) = inner.session_for(self.generation) else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("Cursor for token {} dropped outside a runtime, stream left open", self.token);
            return;
        };

        let token = self.token;
        let options = std::mem::take(&mut self.options);
        runtime.spawn(async move {
            if let Err(e) = stop_stream(&inner, &session, token, options, None).await {
                tracing::warn!("Failed to stop stream for dropped cursor {}: {}", token, e);
            }
        });
    }
}

/// Send STOP for `token` and check the acknowledgement.
async fn stop_stream(
    inner: &Inner,
    session: &Session,
    token: i64,
    options: QueryOptions,
    cancel: Option<&CancellationToken>,
) -> Result<()> {
    session.send(token, &Query::Stop, options).await?;

    // The CONTINUE that was in flight is answered before the STOP.
    let late = inner.wait_on(session, token, cancel).await?;
    tracing::debug!("Discarding {:?} batch for closed token {}", late.kind, token);

    let ack = inner.wait_on(session, token, cancel).await?.into_result()?;
    if !ack.is_empty_sequence() {
        return Err(ReqlError::MalformedResponse(format!(
            "Server sent malformed STOP response {:?} {:?}",
            ack.kind, ack.results
        )));
    }
    Ok(())
}

/// Borrowing iterator returned by [`Cursor::iterate`].
#[derive(Debug)]
pub struct CursorIter<'a> {
    cursor: &'a mut Cursor,
}

impl CursorIter<'_> {
    /// Next item, fetching the next batch when the buffer runs dry.
    ///
    /// Returns `None` once the stream is exhausted. After an error the
    /// stream is over and later calls drain only what was buffered.
    pub async fn next(&mut self) -> Option<Result<Datum>> {
        loop {
            if let Some(item) = self.cursor.buffer.pop_front() {
                return Some(Ok(item));
            }
            if !self.cursor.more {
                return None;
            }
            if let Err(e) = self.cursor.fetch_next().await {
                self.cursor.more = false;
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detached(items: Vec<Datum>, more: bool) -> Cursor {
        Cursor::new(Weak::new(), 1, 7, QueryOptions::new(), items, more, None)
    }

    #[test]
    fn test_iterate_after_connection_dropped_is_stale() {
        let mut cursor = detached(vec![json!(1), json!(2), json!(3)], false);
        assert_eq!(cursor.buffered(), 3);
        assert!(!cursor.has_more());
        assert!(matches!(cursor.iterate(), Err(ReqlError::StaleCursor)));
    }

    #[test]
    fn test_second_iterate_is_rejected() {
        let mut cursor = detached(vec![json!(1)], false);
        let _ = cursor.iterate();
        assert!(matches!(cursor.iterate(), Err(ReqlError::AlreadyIterated)));
    }

    #[tokio::test]
    async fn test_close_exhausted_is_noop() {
        let mut cursor = detached(vec![json!(1)], false);
        assert!(!cursor.close().await.unwrap());
        assert!(!cursor.close().await.unwrap());
    }

    #[tokio::test]
    async fn test_close_without_connection_reports_nothing_to_stop() {
        let mut cursor = detached(vec![], true);
        assert!(!cursor.close().await.unwrap());
        assert!(!cursor.has_more());
    }

    #[test]
    fn test_detached_cursor_is_stale() {
        let cursor = detached(vec![], false);
        assert!(cursor.is_stale());
        assert_eq!(cursor.token(), 7);
    }
}
