//! Outgoing query messages and per-query options.
//!
//! A [`Query`] is what the dispatcher frames and writes. `START` carries a
//! compiled [`Term`] plus the global optargs derived from [`QueryOptions`];
//! `CONTINUE`, `STOP` and `NOREPLY_WAIT` carry nothing but their type (the
//! token travels in the frame header).
//!
//! # Example
//!
//! ```
//! use reql_client::query::{Format, QueryOptions};
//!
//! let opts = QueryOptions::new().db("blog").time_format(Format::Raw);
//! let merged = opts.merged_over(&QueryOptions::new().db("test").profile(true));
//! assert_eq!(merged.db.as_deref(), Some("blog"));
//! assert_eq!(merged.profile, Some(true));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{json, Map, Value};

use crate::error::{ReqlError, Result};

/// A decoded JSON value.
pub type Datum = Value;

/// Term type for a literal array.
const MAKE_ARRAY: u32 = 2;

/// Term type for a database reference.
const DB: u32 = 14;

/// Option keys with a typed field on [`QueryOptions`].
const RESERVED_KEYS: [&str; 5] = ["db", "time_format", "group_format", "noreply", "profile"];

/// Query type tag, first element of every query message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueryType {
    /// Start a new query.
    Start = 1,
    /// Ask for the next batch of a cursor.
    Continue = 2,
    /// Stop a cursor early.
    Stop = 3,
    /// Wait for every outstanding noreply query to finish.
    NoreplyWait = 4,
}

/// A wire-ready term, as produced by the query compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct Term(Value);

impl Term {
    /// Wrap JSON that is already in term form.
    pub fn new(compiled: Value) -> Self {
        Self(compiled)
    }

    /// Express a raw value as a term.
    ///
    /// Arrays are wrapped in `MAKE_ARRAY` so the server does not read them as
    /// term tuples; object values are converted recursively.
    pub fn datum(value: Datum) -> Self {
        Self(datum_to_term(value))
    }

    /// Reference to a database by name.
    pub fn db(name: &str) -> Self {
        Self(json!([DB, [name]]))
    }

    /// Borrow the JSON form.
    pub fn as_json(&self) -> &Value {
        &self.0
    }

    /// Take the JSON form.
    pub fn into_json(self) -> Value {
        self.0
    }
}

fn datum_to_term(value: Datum) -> Value {
    match value {
        Value::Array(items) => {
            let items: Vec<Value> = items.into_iter().map(datum_to_term).collect();
            json!([MAKE_ARRAY, items])
        }
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, datum_to_term(v)))
                .collect(),
        ),
        scalar => scalar,
    }
}

/// Value of an optional argument: either already a term, or a raw value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptArg {
    /// Compiled term, sent as is.
    Term(Term),
    /// Raw value, converted with [`Term::datum`].
    Datum(Datum),
}

impl OptArg {
    fn to_term(&self) -> Term {
        match self {
            OptArg::Term(term) => term.clone(),
            OptArg::Datum(value) => Term::datum(value.clone()),
        }
    }
}

/// How pseudo-types (times, grouped data) come back from the codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    /// Convert to plain values.
    #[default]
    Native,
    /// Leave the `$reql_type$` objects untouched.
    Raw,
}

impl Format {
    /// Parse the value of the option named `option`.
    pub fn parse(option: &str, value: &str) -> Result<Self> {
        match value {
            "native" => Ok(Format::Native),
            "raw" => Ok(Format::Raw),
            other => Err(ReqlError::ProtocolArgument(format!(
                "`{option}` must be 'raw' or 'native' (got `{other}`)"
            ))),
        }
    }

    /// Wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Native => "native",
            Format::Raw => "raw",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-query options; unset fields fall back to the connection defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Database used when the query does not name one.
    pub db: Option<String>,
    /// Representation of TIME values.
    pub time_format: Option<Format>,
    /// Representation of GROUPED_DATA values.
    pub group_format: Option<Format>,
    /// Do not wait for a response.
    pub noreply: Option<bool>,
    /// Ask the server for profiling data.
    pub profile: Option<bool>,
    /// Any other global optarg, forwarded to the server.
    pub extra: BTreeMap<String, OptArg>,
}

impl QueryOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default database.
    pub fn db(mut self, name: impl Into<String>) -> Self {
        self.db = Some(name.into());
        self
    }

    /// Set the time format.
    pub fn time_format(mut self, format: Format) -> Self {
        self.time_format = Some(format);
        self
    }

    /// Set the group format.
    pub fn group_format(mut self, format: Format) -> Self {
        self.group_format = Some(format);
        self
    }

    /// Fire and forget.
    pub fn noreply(mut self, noreply: bool) -> Self {
        self.noreply = Some(noreply);
        self
    }

    /// Request profiling data.
    pub fn profile(mut self, profile: bool) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Set an arbitrary optarg. Recognized keys are routed to their typed field.
    pub fn optarg(mut self, key: &str, value: OptArg) -> Result<Self> {
        match value {
            OptArg::Datum(datum) => self.set(key, datum)?,
            term => {
                if RESERVED_KEYS.contains(&key) {
                    return Err(ReqlError::ProtocolArgument(format!(
                        "`{key}` cannot be given as a term"
                    )));
                }
                self.extra.insert(key.to_string(), term);
            }
        }
        Ok(self)
    }

    /// Build options from a JSON object such as `{"db": "test", "noreply": true}`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let fields = value.as_object().ok_or_else(|| {
            ReqlError::ProtocolArgument(format!("options must be an object (got `{value}`)"))
        })?;
        let mut opts = Self::new();
        for (key, datum) in fields {
            opts.set(key, datum.clone())?;
        }
        Ok(opts)
    }

    fn set(&mut self, key: &str, value: Datum) -> Result<()> {
        match key {
            "db" => {
                self.db = Some(expect_str(key, &value)?.to_string());
            }
            "time_format" => {
                self.time_format = Some(Format::parse(key, expect_str(key, &value)?)?);
            }
            "group_format" => {
                self.group_format = Some(Format::parse(key, expect_str(key, &value)?)?);
            }
            "noreply" => {
                // Any non-null, non-false value means "true".
                self.noreply = Some(!matches!(value, Value::Null | Value::Bool(false)));
            }
            "profile" => {
                self.profile = Some(expect_bool(key, &value)?);
            }
            "" => {
                return Err(ReqlError::ProtocolArgument(
                    "option names cannot be empty".to_string(),
                ))
            }
            _ => {
                self.extra.insert(key.to_string(), OptArg::Datum(value));
            }
        }
        Ok(())
    }

    /// Reject extra optargs that shadow a typed field.
    pub fn validate(&self) -> Result<()> {
        if let Some(key) = self
            .extra
            .keys()
            .find(|k| k.is_empty() || RESERVED_KEYS.contains(&k.as_str()))
        {
            return Err(ReqlError::ProtocolArgument(format!(
                "option `{key}` must be set through its typed field"
            )));
        }
        Ok(())
    }

    /// Combine with `defaults`; values set here win.
    pub fn merged_over(&self, defaults: &QueryOptions) -> QueryOptions {
        let mut extra = defaults.extra.clone();
        extra.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        QueryOptions {
            db: self.db.clone().or_else(|| defaults.db.clone()),
            time_format: self.time_format.or(defaults.time_format),
            group_format: self.group_format.or(defaults.group_format),
            noreply: self.noreply.or(defaults.noreply),
            profile: self.profile.or(defaults.profile),
            extra,
        }
    }

    /// True when the caller does not want a response.
    pub fn is_noreply(&self) -> bool {
        self.noreply.unwrap_or(false)
    }

    /// Effective time format.
    pub fn effective_time_format(&self) -> Format {
        self.time_format.unwrap_or_default()
    }

    /// Effective group format.
    pub fn effective_group_format(&self) -> Format {
        self.group_format.unwrap_or_default()
    }

    /// Every option as a term, keyed by optarg name.
    pub fn global_optargs(&self) -> Map<String, Value> {
        let mut out = Map::new();
        if let Some(db) = &self.db {
            out.insert("db".into(), Term::db(db).into_json());
        }
        if let Some(format) = self.time_format {
            out.insert("time_format".into(), Value::from(format.as_str()));
        }
        if let Some(format) = self.group_format {
            out.insert("group_format".into(), Value::from(format.as_str()));
        }
        if let Some(noreply) = self.noreply {
            out.insert("noreply".into(), Value::Bool(noreply));
        }
        if let Some(profile) = self.profile {
            out.insert("profile".into(), Value::Bool(profile));
        }
        for (key, arg) in &self.extra {
            out.insert(key.clone(), arg.to_term().into_json());
        }
        out
    }
}

fn expect_str<'a>(key: &str, value: &'a Value) -> Result<&'a str> {
    value.as_str().ok_or_else(|| {
        ReqlError::ProtocolArgument(format!("`{key}` must be a string (got `{value}`)"))
    })
}

fn expect_bool(key: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        ReqlError::ProtocolArgument(format!("`{key}` must be a boolean (got `{value}`)"))
    })
}

/// A query message. The token is carried by the frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Run `term` with `options`.
    Start {
        /// Compiled query.
        term: Term,
        /// Merged options, sent as global optargs.
        options: QueryOptions,
    },
    /// Fetch the next batch.
    Continue,
    /// Abandon the stream.
    Stop,
    /// Drain outstanding noreply work.
    NoreplyWait,
}

impl Query {
    /// Type tag of this message.
    pub fn query_type(&self) -> QueryType {
        match self {
            Query::Start { .. } => QueryType::Start,
            Query::Continue => QueryType::Continue,
            Query::Stop => QueryType::Stop,
            Query::NoreplyWait => QueryType::NoreplyWait,
        }
    }

    /// JSON array form sent on the wire.
    pub fn to_json(&self) -> Value {
        let kind = self.query_type() as u8;
        match self {
            Query::Start { term, options } => {
                json!([kind, term.as_json(), Value::Object(options.global_optargs())])
            }
            _ => json!([kind]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse_rejects_unknown() {
        assert_eq!(Format::parse("time_format", "raw").unwrap(), Format::Raw);
        let err = Format::parse("time_format", "iso").unwrap_err();
        assert!(matches!(err, ReqlError::ProtocolArgument(_)));
        assert!(err.to_string().contains("`time_format` must be 'raw' or 'native'"));
    }

    #[test]
    fn test_from_json_validates_known_keys() {
        let opts = QueryOptions::from_json(&json!({
            "db": "blog",
            "group_format": "raw",
            "noreply": 1,
            "durability": "soft"
        }))
        .unwrap();
        assert_eq!(opts.db.as_deref(), Some("blog"));
        assert_eq!(opts.group_format, Some(Format::Raw));
        assert_eq!(opts.noreply, Some(true));
        assert_eq!(
            opts.extra.get("durability"),
            Some(&OptArg::Datum(json!("soft")))
        );

        let bad = QueryOptions::from_json(&json!({"group_format": "pretty"}));
        assert!(matches!(bad, Err(ReqlError::ProtocolArgument(_))));
        assert!(QueryOptions::from_json(&json!([1])).is_err());
    }

    #[test]
    fn test_validate_rejects_shadowing_extra() {
        let mut opts = QueryOptions::new();
        opts.extra
            .insert("db".into(), OptArg::Term(Term::db("other")));
        assert!(matches!(opts.validate(), Err(ReqlError::ProtocolArgument(_))));
        assert!(QueryOptions::new().optarg("db", OptArg::Term(Term::db("x"))).is_err());
    }

    #[test]
    fn test_merge_per_call_wins() {
        let defaults = QueryOptions::new()
            .db("test")
            .noreply(true)
            .optarg("durability", OptArg::Datum(json!("hard")))
            .unwrap();
        let call = QueryOptions::new()
            .noreply(false)
            .optarg("durability", OptArg::Datum(json!("soft")))
            .unwrap();

        let merged = call.merged_over(&defaults);
        assert_eq!(merged.db.as_deref(), Some("test"));
        assert_eq!(merged.noreply, Some(false));
        assert_eq!(
            merged.extra.get("durability"),
            Some(&OptArg::Datum(json!("soft")))
        );
    }

    #[test]
    fn test_start_message_encoding() {
        let options = QueryOptions::new()
            .db("blog")
            .profile(true)
            .optarg("tags", OptArg::Datum(json!(["a", "b"])))
            .unwrap();
        let query = Query::Start {
            term: Term::new(json!([39, [[15, ["posts"]]]])),
            options,
        };

        assert_eq!(
            query.to_json(),
            json!([
                1,
                [39, [[15, ["posts"]]]],
                {"db": [14, ["blog"]], "profile": true, "tags": [2, ["a", "b"]]}
            ])
        );
        assert_eq!(Query::Continue.to_json(), json!([2]));
        assert_eq!(Query::Stop.to_json(), json!([3]));
        assert_eq!(Query::NoreplyWait.to_json(), json!([4]));
    }

    #[test]
    fn test_datum_term_nests_arrays() {
        let term = Term::datum(json!({"a": [1, [2]], "b": "x"}));
        assert_eq!(
            term.into_json(),
            json!({"a": [2, [1, [2, [2]]]], "b": "x"})
        );
    }
}
