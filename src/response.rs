//! Decoded server responses.

use serde_json::Value;

use crate::error::ReqlError;
use crate::query::Datum;

/// Response type tag (`t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// A single value.
    SuccessAtom,
    /// The final (or only) batch of a sequence.
    SuccessSequence,
    /// A batch with more to come.
    SuccessPartial,
    /// Acknowledgement of NOREPLY_WAIT.
    WaitComplete,
    /// A changefeed batch, more to come.
    SuccessFeed,
    /// The client sent something the server could not understand.
    ClientError,
    /// The query failed to compile.
    CompileError,
    /// The query failed while running.
    RuntimeError,
}

impl ResponseType {
    /// Wire code.
    pub fn code(&self) -> i64 {
        match self {
            ResponseType::SuccessAtom => 1,
            ResponseType::SuccessSequence => 2,
            ResponseType::SuccessPartial => 3,
            ResponseType::WaitComplete => 4,
            ResponseType::SuccessFeed => 5,
            ResponseType::ClientError => 16,
            ResponseType::CompileError => 17,
            ResponseType::RuntimeError => 18,
        }
    }

    /// True for the three error kinds.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ResponseType::ClientError | ResponseType::CompileError | ResponseType::RuntimeError
        )
    }

    /// True when the server holds more batches for this token.
    #[inline]
    pub fn has_more(&self) -> bool {
        matches!(self, ResponseType::SuccessPartial | ResponseType::SuccessFeed)
    }
}

impl TryFrom<i64> for ResponseType {
    type Error = ReqlError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => ResponseType::SuccessAtom,
            2 => ResponseType::SuccessSequence,
            3 => ResponseType::SuccessPartial,
            4 => ResponseType::WaitComplete,
            5 => ResponseType::SuccessFeed,
            16 => ResponseType::ClientError,
            17 => ResponseType::CompileError,
            18 => ResponseType::RuntimeError,
            other => {
                return Err(ReqlError::MalformedResponse(format!(
                    "unknown response type {other}"
                )))
            }
        })
    }
}

/// A decoded response message.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Response type.
    pub kind: ResponseType,
    /// Result items (`r`).
    pub results: Vec<Datum>,
    /// Profiling data (`p`).
    pub profile: Option<Datum>,
    /// Backtrace frames (`b`), present on errors.
    pub backtrace: Vec<Datum>,
}

impl Response {
    /// Response with no profile or backtrace.
    pub fn new(kind: ResponseType, results: Vec<Datum>) -> Self {
        Self {
            kind,
            results,
            profile: None,
            backtrace: Vec::new(),
        }
    }

    /// True for an empty SUCCESS_SEQUENCE, the only valid STOP acknowledgement.
    pub fn is_empty_sequence(&self) -> bool {
        self.kind == ResponseType::SuccessSequence && self.results.is_empty()
    }

    /// Convert an error response into [`ReqlError::Server`].
    ///
    /// Returns `Ok(self)` for success kinds.
    pub fn into_result(self) -> Result<Self, ReqlError> {
        if !self.kind.is_error() {
            return Ok(self);
        }
        let message = match self.results.first() {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::from("(no message)"),
        };
        Err(ReqlError::Server {
            kind: self.kind,
            message,
            backtrace: self.backtrace,
        })
    }
}
