//! MariaDB client wire protocol.
//!
//! This crate implements the client side of the MariaDB/MySQL protocol on
//! top of asupersync's TCP primitives. It provides:
//!
//! - Packet framing with sequence numbers and split large packets
//! - Authentication through pluggable plugins (mysql_native_password,
//!   caching_sha2_password, sha256_password, mysql_clear_password)
//! - Text queries with client-side `?` parameter substitution
//! - Streaming result sets with lazy per-row field access
//! - LOCAL INFILE transfers from files or caller-supplied readers
//! - Blocking and async connections over one protocol state machine
//!
//! # Protocol Overview
//!
//! Every exchange is a sequence of packets with:
//! - 3-byte payload length + 1-byte sequence number header
//! - Payloads of 16MB - 1 bytes continued in the next packet
//! - Sequence numbers restarting at zero for each command
//!
//! # Example
//!
//! ```rust,ignore
//! use mariadb_wire::{MariaDbConfig, MariaDbConnection, RowAccess};
//!
//! let config = MariaDbConfig::new()
//!     .host("localhost")
//!     .port(3306)
//!     .user("root")
//!     .database("mydb");
//!
//! let mut conn = MariaDbConnection::connect(config)?;
//! let mut rs = conn.query("SELECT id, name FROM users WHERE id > ?", &[10.into()])?;
//! while rs.next()? {
//!     let name: Option<String> = rs.get_by_label("name")?;
//! }
//! ```

pub mod async_connection;
pub mod auth;
pub mod client;
pub mod column;
pub mod command;
pub mod config;
pub mod connection;
pub mod context;
pub mod decoder;
pub mod handshake;
mod hex;
pub mod lexer;
pub mod message;
pub mod protocol;
pub mod result;
pub mod row;
pub mod stream;

#[cfg(test)]
mod testing;

pub use async_connection::{MariaDbAsyncConnection, SharedConnection};
pub use client::{Client, Completion};
pub use column::{ColumnDefinition, FieldType};
pub use command::SqlCommand;
pub use config::MariaDbConfig;
pub use connection::{ConnectionState, MariaDbConnection, RowStream};
pub use message::{ClientMessage, LocalInfileStream};
pub use result::{ResultReader, ResultSet, RowAccess};
pub use row::{FromColumn, Row};
pub use stream::{AsyncStream, BlockingStream, PacketStream};

pub use mariadb_wire_core::{Error, Value};
