//! Codec module - serialization/deserialization for payloads.
//!
//! - [`JsonCodec`] - query encoding and options-aware response decoding
//!
//! Codecs are marker structs with static methods.

mod json;

pub use json::JsonCodec;
