//! Transport module - TCP socket handling.
//!
//! Provides:
//! - [`connect`] to open a socket to the server
//! - [`BoundedReader`], the read side with a first-class bounded read

mod reader;
mod tcp;

pub use reader::BoundedReader;
pub use tcp::{connect, Socket};
