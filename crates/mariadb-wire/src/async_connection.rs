//! Async MariaDB connection implementation.
//!
//! The same state machine as the blocking connection, driven over
//! asupersync's TCP stream. Operations take a [`Cx`] and report an
//! [`Outcome`]; cancellation is observed before each command is written,
//! never halfway through a response.

use std::io;
use std::sync::Arc;

use asupersync::net::TcpStream;
use asupersync::sync::Mutex;
use asupersync::{Cx, Outcome};
use mariadb_wire_core::error::{ConnectionError, ConnectionErrorKind};
use mariadb_wire_core::{Error, Value};
use tracing::debug;

use crate::client::{Client, Completion};
use crate::command::SqlCommand;
use crate::config::MariaDbConfig;
use crate::connection::ConnectionState;
use crate::message::{LocalInfileStream, PingPacket};
use crate::result::{ResultReader, ResultSet};
use crate::stream::{AsyncStream, PacketStream};

/// Async connection to a MariaDB or MySQL server.
pub struct MariaDbAsyncConnection<S: PacketStream = AsyncStream> {
    client: Client<S>,
    config: MariaDbConfig,
}

impl<S: PacketStream> std::fmt::Debug for MariaDbAsyncConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MariaDbAsyncConnection")
            .field("state", &self.state())
            .field("connection_id", &self.connection_id())
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .finish_non_exhaustive()
    }
}

impl MariaDbAsyncConnection {
    /// Establish a new async connection to the server.
    pub async fn connect(cx: &Cx, config: MariaDbConfig) -> Outcome<Self, Error> {
        let addr = config.socket_addr();
        let socket_addr = match config.resolve() {
            Ok(a) => a,
            Err(e) => return Outcome::Err(e),
        };
        let stream = match TcpStream::connect_timeout(socket_addr, config.connect_timeout).await {
            Ok(s) => s,
            Err(e) => {
                let kind = if e.kind() == io::ErrorKind::ConnectionRefused {
                    ConnectionErrorKind::Refused
                } else {
                    ConnectionErrorKind::Connect
                };
                return Outcome::Err(Error::Connection(ConnectionError {
                    kind,
                    message: format!("Failed to connect to {}: {}", addr, e),
                    source: Some(Box::new(e)),
                }));
            }
        };

        stream.set_nodelay(true).ok();

        Self::from_stream(cx, AsyncStream::new(stream), config).await
    }
}

impl<S: PacketStream> MariaDbAsyncConnection<S> {
    /// Authenticate over an already open stream.
    pub async fn from_stream(cx: &Cx, stream: S, config: MariaDbConfig) -> Outcome<Self, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        match Client::connect(stream, &config).await {
            Ok(client) => Outcome::Ok(Self { client, config }),
            Err(e) => Outcome::Err(e),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::of(&self.client)
    }

    /// Check if the connection is ready for commands.
    pub fn is_ready(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Ready | ConnectionState::InTransaction
        )
    }

    /// Get the connection ID.
    pub fn connection_id(&self) -> u32 {
        self.client.context().thread_id()
    }

    /// Get the server version.
    pub fn server_version(&self) -> &str {
        self.client.context().server_version().as_str()
    }

    /// Status flags from the server's last OK or EOF packet.
    pub fn server_status(&self) -> u16 {
        self.client.context().server_status()
    }

    /// Get the number of affected rows from the last statement.
    pub fn affected_rows(&self) -> u64 {
        self.client.affected_rows()
    }

    /// Get the last insert ID.
    pub fn last_insert_id(&self) -> u64 {
        self.client.last_insert_id()
    }

    pub fn warnings(&self) -> u16 {
        self.client.context().warnings()
    }

    /// The underlying state machine.
    pub fn client(&mut self) -> &mut Client<S> {
        &mut self.client
    }

    /// Run a query and read its whole result into memory.
    pub async fn query_async(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<ResultSet, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let mut cmd = SqlCommand::with_params(sql, params);
        let buffered = match cmd.execute(Some(&mut self.client)).await {
            Ok(Completion::ResultSet(reader)) => reader.buffer().await,
            Ok(Completion::Ok(_)) => Ok(ResultSet::from_rows(Arc::from([]), Vec::new(), false)),
            Err(e) => Err(e),
        };
        into_outcome(buffered)
    }

    /// Run a command that returns no rows; gives the affected row count.
    pub async fn execute_async(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<u64, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let mut cmd = SqlCommand::with_params(sql, params);
        into_outcome(cmd.execute_non_query(Some(&mut self.client)).await)
    }

    /// Run a query and hand back the reader positioned before its first
    /// row. `None` when the command produced no result set.
    pub async fn stream_async(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Option<ResultReader<'_, S>>, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let mut cmd = SqlCommand::with_params(sql, params);
        match cmd.execute(Some(&mut self.client)).await {
            Ok(Completion::ResultSet(reader)) => Outcome::Ok(Some(reader)),
            Ok(Completion::Ok(_)) => Outcome::Ok(None),
            Err(e) => Outcome::Err(e),
        }
    }

    /// Run a `LOAD DATA LOCAL INFILE` command with caller-supplied content.
    ///
    /// `content` is read with blocking calls on the current task; pass an
    /// in-memory reader when file latency matters.
    pub async fn load_local_infile_async(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
        content: LocalInfileStream,
    ) -> Outcome<u64, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let mut cmd = SqlCommand::with_params(sql, params);
        cmd.set_local_infile(content);
        into_outcome(cmd.execute_non_query(Some(&mut self.client)).await)
    }

    /// Discard the rest of an abandoned result now.
    pub async fn drain_pending_async(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        into_outcome(self.client.drain_pending().await)
    }

    /// Ping the server asynchronously.
    pub async fn ping_async(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let pinged = match self.client.execute(&mut PingPacket).await {
            Ok(completion) => completion.into_ok().await.map(|_| ()),
            Err(e) => Err(e),
        };
        into_outcome(pinged)
    }

    /// Close the connection asynchronously.
    pub async fn close_async(mut self, _cx: &Cx) -> Result<(), Error> {
        debug!(connection_id = self.connection_id(), "closing connection");
        self.client.close().await
    }
}

fn into_outcome<T>(result: Result<T, Error>) -> Outcome<T, Error> {
    match result {
        Ok(v) => Outcome::Ok(v),
        Err(e) => Outcome::Err(e),
    }
}

fn connection_error(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Connect,
        message: msg.into(),
        source: None,
    })
}

/// A connection shared between tasks.
///
/// Every operation holds the connection's lock from the moment its
/// command is written until its response, rows included, has been read,
/// so responses of concurrent callers never interleave. Streaming reads
/// happen inside [`SharedConnection::for_each_row`] while the lock is
/// held.
///
/// # Example
///
/// ```rust,ignore
/// let conn = MariaDbAsyncConnection::connect(&cx, config).await?;
/// let shared = SharedConnection::new(conn);
/// let worker = shared.clone();
/// let rows = worker.query(&cx, "SELECT * FROM users", &[]).await?;
/// ```
pub struct SharedConnection<S: PacketStream = AsyncStream> {
    inner: Arc<Mutex<MariaDbAsyncConnection<S>>>,
}

impl SharedConnection {
    /// Create a new shared connection by connecting to the server.
    pub async fn connect(cx: &Cx, config: MariaDbConfig) -> Outcome<Self, Error> {
        match MariaDbAsyncConnection::connect(cx, config).await {
            Outcome::Ok(conn) => Outcome::Ok(Self::new(conn)),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(c) => Outcome::Cancelled(c),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

impl<S: PacketStream> SharedConnection<S> {
    /// Create a new shared connection from a raw connection.
    pub fn new(conn: MariaDbAsyncConnection<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
        }
    }

    /// Get the inner Arc for cloning.
    pub fn inner(&self) -> &Arc<Mutex<MariaDbAsyncConnection<S>>> {
        &self.inner
    }

    pub async fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<ResultSet, Error> {
        let mut guard = match self.inner.lock(cx).await {
            Ok(g) => g,
            Err(_) => return Outcome::Err(connection_error("Failed to acquire connection lock")),
        };
        guard.query_async(cx, sql, params).await
    }

    pub async fn execute(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<u64, Error> {
        let mut guard = match self.inner.lock(cx).await {
            Ok(g) => g,
            Err(_) => return Outcome::Err(connection_error("Failed to acquire connection lock")),
        };
        guard.execute_async(cx, sql, params).await
    }

    /// Stream a query's rows through `f` while holding the connection.
    ///
    /// The result is drained before the lock is released, also when `f`
    /// fails. Returns the number of rows visited.
    pub async fn for_each_row<F>(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
        mut f: F,
    ) -> Outcome<u64, Error>
    where
        F: FnMut(&mut ResultReader<'_, S>) -> Result<(), Error>,
    {
        let mut guard = match self.inner.lock(cx).await {
            Ok(g) => g,
            Err(_) => return Outcome::Err(connection_error("Failed to acquire connection lock")),
        };
        let mut reader = match guard.stream_async(cx, sql, params).await {
            Outcome::Ok(Some(reader)) => reader,
            Outcome::Ok(None) => return Outcome::Ok(0),
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut visited = 0u64;
        loop {
            match reader.next().await {
                Ok(true) => {}
                Ok(false) => return Outcome::Ok(visited),
                Err(e) => return Outcome::Err(e),
            }
            visited += 1;
            if let Err(e) = f(&mut reader) {
                if let Err(drain) = reader.close().await {
                    debug!(error = %drain, "failed to drain result after callback error");
                }
                return Outcome::Err(e);
            }
        }
    }

    pub async fn ping(&self, cx: &Cx) -> Outcome<(), Error> {
        let mut guard = match self.inner.lock(cx).await {
            Ok(g) => g,
            Err(_) => return Outcome::Err(connection_error("Failed to acquire connection lock")),
        };
        guard.ping_async(cx).await
    }

    /// Wait for the connection and drain any result left behind.
    pub async fn close_result(&self, cx: &Cx) -> Outcome<(), Error> {
        let mut guard = match self.inner.lock(cx).await {
            Ok(g) => g,
            Err(_) => return Outcome::Err(connection_error("Failed to acquire connection lock")),
        };
        guard.drain_pending_async(cx).await
    }

    /// Send QUIT once every earlier holder has released the connection.
    pub async fn close(&self, cx: &Cx) -> Result<(), Error> {
        let mut guard = self
            .inner
            .lock(cx)
            .await
            .map_err(|_| connection_error("Failed to acquire connection lock"))?;
        debug!(connection_id = guard.connection_id(), "closing shared connection");
        guard.client.close().await
    }
}

impl<S: PacketStream> Clone for SharedConnection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: PacketStream> std::fmt::Debug for SharedConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConnection")
            .field("inner", &"Arc<Mutex<MariaDbAsyncConnection>>")
            .finish()
    }
}
