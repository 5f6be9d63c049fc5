//! JSON codec for query and response payloads.
//!
//! Responses are objects of the form `{"t": type, "r": [...], "p": profile, "b": backtrace}`.
//! Decoding honors the options that were active when the query was sent:
//! with `native` formats the `$reql_type$` pseudo-types are converted to plain
//! values, with `raw` they are passed through untouched.
//!
//! # Example
//!
//! ```
//! use reql_client::codec::JsonCodec;
//! use reql_client::response::ResponseType;
//!
//! let resp = JsonCodec::decode_response(br#"{"t":1,"r":[42]}"#, None).unwrap();
//! assert_eq!(resp.kind, ResponseType::SuccessAtom);
//! assert_eq!(resp.results[0], 42);
//! ```

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{ReqlError, Result};
use crate::query::{Format, Query, QueryOptions};
use crate::response::{Response, ResponseType};

const PSEUDO_TYPE_KEY: &str = "$reql_type$";

#[derive(Deserialize)]
struct RawResponse {
    t: i64,
    #[serde(default)]
    r: Value,
    #[serde(default)]
    p: Option<Value>,
    #[serde(default)]
    b: Option<Vec<Value>>,
}

/// JSON codec for the query/response payload.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a query message.
    #[inline]
    pub fn encode_query(query: &Query) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&query.to_json())?)
    }

    /// Decode a response payload.
    ///
    /// `options` are the ones stored for the token at send time; `None`
    /// decodes with default (native) formats.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` for invalid JSON, an unknown type tag or a
    /// result that is not an array.
    pub fn decode_response(payload: &[u8], options: Option<&QueryOptions>) -> Result<Response> {
        let raw: RawResponse = serde_json::from_slice(payload).map_err(|e| {
            ReqlError::MalformedResponse(format!(
                "{e}: {}",
                String::from_utf8_lossy(payload)
            ))
        })?;

        let kind = ResponseType::try_from(raw.t)?;
        let results = match raw.r {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(ReqlError::MalformedResponse(format!(
                    "result must be an array (got `{other}`)"
                )))
            }
        };

        let (time, group) = match options {
            Some(opts) => (opts.effective_time_format(), opts.effective_group_format()),
            None => (Format::Native, Format::Native),
        };
        let convert = |v: Value| convert_pseudotypes(v, time, group);

        Ok(Response {
            kind,
            results: results.into_iter().map(convert).collect(),
            profile: raw.p.map(convert),
            backtrace: raw.b.unwrap_or_default(),
        })
    }
}

fn convert_pseudotypes(value: Value, time: Format, group: Format) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| convert_pseudotypes(v, time, group))
                .collect(),
        ),
        Value::Object(fields) => {
            let fields: Map<String, Value> = fields
                .into_iter()
                .map(|(k, v)| (k, convert_pseudotypes(v, time, group)))
                .collect();
            match fields.get(PSEUDO_TYPE_KEY).and_then(Value::as_str) {
                Some("TIME") if time == Format::Native => native_time(fields),
                Some("GROUPED_DATA") if group == Format::Native => native_groups(fields),
                _ => Value::Object(fields),
            }
        }
        scalar => scalar,
    }
}

/// TIME becomes its epoch seconds.
fn native_time(fields: Map<String, Value>) -> Value {
    match fields.get("epoch_time") {
        Some(epoch @ Value::Number(_)) => epoch.clone(),
        _ => Value::Object(fields),
    }
}

/// GROUPED_DATA becomes an array of `{group, reduction}` objects.
fn native_groups(mut fields: Map<String, Value>) -> Value {
    let pairs = match fields.remove("data") {
        Some(Value::Array(pairs)) => pairs,
        Some(other) => {
            fields.insert("data".into(), other);
            return Value::Object(fields);
        }
        None => return Value::Object(fields),
    };
    pairs
        .into_iter()
        .map(|pair| match pair {
            Value::Array(mut kv) if kv.len() == 2 => {
                let reduction = kv.pop().unwrap_or(Value::Null);
                let group = kv.pop().unwrap_or(Value::Null);
                json!({"group": group, "reduction": reduction})
            }
            other => other,
        })
        .collect()
}
