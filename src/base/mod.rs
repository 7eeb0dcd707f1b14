//! Core definitions shared by the client and server halves.

pub mod error;

pub use error::{Error, ParseErrorKind, Result};
