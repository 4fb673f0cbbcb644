//! Core types for the mariadb-wire driver.
//!
//! This crate provides the pieces shared by every layer of the driver:
//!
//! - `Value` for parameters and decoded column values
//! - `Error` with the driver's error taxonomy
//! - `Outcome` and `Cx` re-exported from asupersync for the async surface

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod error;
pub mod value;

pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, LocalInfileError,
    LocalInfileErrorKind, PacketTooLargeError, ProtocolError, QueryError, QueryErrorKind, Result,
    TypeError,
};
pub use value::{DateTime, Time, Value};
