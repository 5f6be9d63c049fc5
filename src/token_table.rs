//! Token-keyed rendezvous between callers and the response listener.
//!
//! Each entry holds the options a query was sent with (needed to decode its
//! response), the number of requests still awaiting a reply, the waiter of a
//! caller blocked on it, and the responses that arrived before anyone waited,
//! in arrival order. A reply for a token with nothing outstanding is dropped.
//! One lock guards the whole table and is never held across an `.await`.
//!
//! A table belongs to one connection generation. Once it is failed or reset it
//! stays dead: every pending waiter is woken with a closed-connection failure
//! and later waits fail immediately.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{ReqlError, Result};
use crate::query::QueryOptions;
use crate::response::Response;

/// Failure synthesized for a waiter instead of a decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The listener died or the table was reset.
    Closed(String),
    /// The payload for this token could not be decoded.
    Malformed(String),
}

impl From<Failure> for ReqlError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Closed(reason) => ReqlError::ConnectionClosed(reason),
            Failure::Malformed(reason) => ReqlError::MalformedResponse(reason),
        }
    }
}

/// What the listener hands to a waiter.
pub type Delivery = std::result::Result<Response, Failure>;

/// Result of starting a wait.
pub enum WaitStart {
    /// The response had already arrived.
    Ready(Delivery),
    /// Await the receiver.
    Pending(oneshot::Receiver<Delivery>),
}

#[derive(Default)]
struct Entry {
    options: Option<QueryOptions>,
    /// Requests sent for this token and not yet answered.
    outstanding: usize,
    waiter: Option<oneshot::Sender<Delivery>>,
    data: VecDeque<Delivery>,
}

impl Entry {
    fn is_empty(&self) -> bool {
        self.outstanding == 0
            && self.options.is_none()
            && self.waiter.is_none()
            && self.data.is_empty()
    }

    /// Account for one answered request.
    fn answered(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.outstanding == 0 {
            self.options = None;
        }
    }
}

struct TableState {
    entries: HashMap<i64, Entry>,
    /// Set once the table is failed or reset.
    death: Option<String>,
}

/// Lock-protected token table for one connection generation.
pub struct TokenTable {
    generation: u64,
    state: Mutex<TableState>,
}

impl TokenTable {
    /// Create an empty, live table.
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            state: Mutex::new(TableState {
                entries: HashMap::new(),
                death: None,
            }),
        }
    }

    /// Generation this table belongs to.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// False once the listener died or the table was reset.
    pub fn is_alive(&self) -> bool {
        self.state.lock().death.is_none()
    }

    /// Fail with `ConnectionClosed` if the table is dead.
    pub fn ensure_alive(&self) -> Result<()> {
        match &self.state.lock().death {
            Some(reason) => Err(ReqlError::ConnectionClosed(reason.clone())),
            None => Ok(()),
        }
    }

    /// Store the options used to decode the response for `token` and count
    /// one more request awaiting a reply.
    pub fn set_options(&self, token: i64, options: QueryOptions) {
        let mut state = self.state.lock();
        if state.death.is_none() {
            let entry = state.entries.entry(token).or_default();
            entry.options = Some(options);
            entry.outstanding += 1;
        }
    }

    /// Options stored for `token`, if any.
    pub fn options_for(&self, token: i64) -> Option<QueryOptions> {
        self.state
            .lock()
            .entries
            .get(&token)
            .and_then(|e| e.options.clone())
    }

    /// Drop everything known about `token`.
    pub fn forget(&self, token: i64) {
        self.state.lock().entries.remove(&token);
    }

    /// Number of tokens with any state.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// True when no token has any state.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Route a delivery to `token`: wake its waiter, or queue it for a later wait.
    ///
    /// A waiter whose receiver was dropped does not lose the delivery; it is
    /// queued for the next wait instead. Deliveries for a token with no
    /// request outstanding are dropped.
    pub fn note_data(&self, token: i64, delivery: Delivery) {
        let mut state = self.state.lock();
        if state.death.is_some() {
            return;
        }
        let Some(entry) = state
            .entries
            .get_mut(&token)
            .filter(|entry| entry.outstanding > 0)
        else {
            tracing::warn!("Unsolicited response for token {}", token);
            return;
        };
        entry.answered();
        let delivery = match entry.waiter.take() {
            Some(waiter) => match waiter.send(delivery) {
                Ok(()) => None,
                Err(returned) => {
                    tracing::debug!("Waiter for token {} went away, keeping response", token);
                    Some(returned)
                }
            },
            None => Some(delivery),
        };
        match delivery {
            Some(delivery) => entry.data.push_back(delivery),
            None if entry.is_empty() => {
                state.entries.remove(&token);
            }
            None => {}
        }
    }

    /// Deliver `response` to every currently registered waiter.
    pub fn broadcast(&self, response: &Response) {
        let mut state = self.state.lock();
        let mut woken = 0;
        state.entries.retain(|_, entry| {
            if let Some(waiter) = entry.waiter.take() {
                entry.answered();
                let _ = waiter.send(Ok(response.clone()));
                woken += 1;
            }
            !entry.is_empty()
        });
        tracing::debug!("Broadcast response delivered to {} waiters", woken);
    }

    /// Start waiting for `token`.
    ///
    /// Consumes the oldest already-arrived response, otherwise registers a waiter.
    /// Fails immediately when the table is dead.
    pub fn begin_wait(&self, token: i64) -> Result<WaitStart> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.death {
            return Err(ReqlError::ConnectionClosed(reason.clone()));
        }
        let entry = state.entries.entry(token).or_default();
        if let Some(delivery) = entry.data.pop_front() {
            if entry.is_empty() {
                state.entries.remove(&token);
            }
            return Ok(WaitStart::Ready(delivery));
        }
        let (tx, rx) = oneshot::channel();
        entry.waiter = Some(tx);
        Ok(WaitStart::Pending(rx))
    }

    /// Wait for the response to `token`.
    pub async fn wait(&self, token: i64) -> Result<Response> {
        match self.begin_wait(token)? {
            WaitStart::Ready(delivery) => Ok(delivery?),
            WaitStart::Pending(rx) => match rx.await {
                Ok(delivery) => Ok(delivery?),
                Err(_) => Err(ReqlError::ConnectionClosed(self.death_reason())),
            },
        }
    }

    fn death_reason(&self) -> String {
        self.state
            .lock()
            .death
            .clone()
            .unwrap_or_else(|| "Connection closed.".to_string())
    }

    /// Mark the table dead and wake every waiter with a failure.
    ///
    /// `culprit` receives its own failure (e.g. the token whose payload could
    /// not be decoded); every other waiter gets `Closed(reason)`.
    pub fn fail_all(&self, reason: &str, culprit: Option<(i64, Failure)>) {
        let entries = {
            let mut state = self.state.lock();
            if state.death.is_some() {
                return;
            }
            state.death = Some(reason.to_string());
            std::mem::take(&mut state.entries)
        };

        let mut culprit = culprit;
        let mut woken = 0;
        for (token, entry) in entries {
            if let Some(waiter) = entry.waiter {
                let failure = match culprit.take() {
                    Some((t, failure)) if t == token => failure,
                    other => {
                        culprit = other;
                        Failure::Closed(reason.to_string())
                    }
                };
                let _ = waiter.send(Err(failure));
                woken += 1;
            }
        }
        tracing::debug!(
            "Token table for generation {} failed ({}), woke {} waiters",
            self.generation,
            reason,
            woken
        );
    }

    /// Discard all options, waiters and queued data; the table stays dead.
    pub fn reset(&self) {
        self.fail_all("Connection was reset.", None);
    }
}
