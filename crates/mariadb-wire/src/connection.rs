//! Blocking MariaDB connection.
//!
//! Drives the shared protocol state machine on the calling thread over a
//! [`BlockingStream`]. Every call completes before returning; a streamed
//! result borrows the connection until it is closed or dropped.

use std::net::TcpStream;
use std::sync::Arc;

use mariadb_wire_core::error::{ConnectionError, ConnectionErrorKind};
use mariadb_wire_core::{Error, Value};
use tracing::debug;

use crate::client::{Client, Completion};
use crate::column::ColumnDefinition;
use crate::command::SqlCommand;
use crate::config::MariaDbConfig;
use crate::message::{LocalInfileStream, PingPacket};
use crate::result::{ResultReader, ResultSet, RowAccess};
use crate::row::Row;
use crate::stream::{BlockingStream, PacketStream, block_on};

/// Where a connection is in its command cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Ready for a command
    Ready,
    /// Rows of an abandoned result are still on the wire
    PendingResult,
    /// Ready, with a transaction open on the server
    InTransaction,
    /// QUIT sent; no further commands
    Closed,
}

impl ConnectionState {
    pub(crate) fn of<S: PacketStream>(client: &Client<S>) -> Self {
        if client.is_closed() {
            ConnectionState::Closed
        } else if client.has_pending_result() {
            ConnectionState::PendingResult
        } else if client.context().in_transaction() {
            ConnectionState::InTransaction
        } else {
            ConnectionState::Ready
        }
    }
}

/// Blocking connection to a MariaDB or MySQL server.
pub struct MariaDbConnection<S: PacketStream = BlockingStream<TcpStream>> {
    client: Client<S>,
    config: MariaDbConfig,
}

impl<S: PacketStream> std::fmt::Debug for MariaDbConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MariaDbConnection")
            .field("state", &self.state())
            .field("connection_id", &self.connection_id())
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

impl MariaDbConnection {
    /// Open a TCP connection and authenticate.
    #[allow(clippy::result_large_err)]
    pub fn connect(config: MariaDbConfig) -> Result<Self, Error> {
        let addr = config.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout).map_err(|e| {
            let kind = if e.kind() == std::io::ErrorKind::ConnectionRefused {
                ConnectionErrorKind::Refused
            } else {
                ConnectionErrorKind::Connect
            };
            Error::Connection(ConnectionError {
                kind,
                message: format!("Failed to connect to {}: {}", config.socket_addr(), e),
                source: Some(Box::new(e)),
            })
        })?;

        stream.set_nodelay(true).ok();
        stream.set_read_timeout(Some(config.connect_timeout)).ok();
        stream.set_write_timeout(Some(config.connect_timeout)).ok();

        Self::from_stream(BlockingStream::new(stream), config)
    }
}

impl<S: PacketStream> MariaDbConnection<S> {
    /// Authenticate over an already open stream.
    #[allow(clippy::result_large_err)]
    pub fn from_stream(stream: S, config: MariaDbConfig) -> Result<Self, Error> {
        let client = block_on(Client::connect(stream, &config))?;
        Ok(Self { client, config })
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

    /// Server thread id of this session.
    pub fn connection_id(&self) -> u32 {
        self.client.context().thread_id()
    }

    pub fn server_version(&self) -> &str {
        self.client.context().server_version().as_str()
    }

    pub fn is_mariadb(&self) -> bool {
        self.client.context().server_version().is_mariadb()
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

    /// Warnings raised by the last command.
    pub fn warnings(&self) -> u16 {
        self.client.context().warnings()
    }

    pub fn config(&self) -> &MariaDbConfig {
        &self.config
    }

    /// The underlying state machine.
    pub fn client(&mut self) -> &mut Client<S> {
        &mut self.client
    }

    /// Run a query and read its whole result into memory.
    ///
    /// Commands that return no rows give an empty result.
    #[allow(clippy::result_large_err)]
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, Error> {
        let mut cmd = SqlCommand::with_params(sql, params);
        block_on(async {
            match cmd.execute(Some(&mut self.client)).await? {
                Completion::ResultSet(reader) => reader.buffer().await,
                Completion::Ok(_) => Ok(ResultSet::from_rows(Arc::from([]), Vec::new(), false)),
            }
        })
    }

    /// Run a query and return its first row, draining the rest.
    #[allow(clippy::result_large_err)]
    pub fn query_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<ResultSet>, Error> {
        let mut cmd = SqlCommand::with_params(sql, params);
        block_on(async {
            let Completion::ResultSet(mut reader) = cmd.execute(Some(&mut self.client)).await?
            else {
                return Ok(None);
            };
            if !reader.next().await? {
                return Ok(None);
            }
            let columns = reader.column_definitions();
            let first = reader.take_row().map(Row::into_data);
            reader.close().await?;
            Ok(first.map(|data| ResultSet::from_row(columns, data, false)))
        })
    }

    /// Run a command that returns no rows; gives the affected row count.
    #[allow(clippy::result_large_err)]
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, Error> {
        let mut cmd = SqlCommand::with_params(sql, params);
        block_on(cmd.execute_non_query(Some(&mut self.client)))
    }

    /// Run an INSERT and return the generated id.
    #[allow(clippy::result_large_err)]
    pub fn insert(&mut self, sql: &str, params: &[Value]) -> Result<u64, Error> {
        self.execute(sql, params)?;
        Ok(self.client.last_insert_id())
    }

    /// Run a query and read its rows one at a time.
    ///
    /// Returns `None` when the command produced no result set.
    #[allow(clippy::result_large_err)]
    pub fn stream(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<RowStream<'_, S>>, Error> {
        let mut cmd = SqlCommand::with_params(sql, params);
        match block_on(cmd.execute(Some(&mut self.client)))? {
            Completion::ResultSet(reader) => Ok(Some(RowStream { reader })),
            Completion::Ok(_) => Ok(None),
        }
    }

    /// Run a `LOAD DATA LOCAL INFILE` command with caller-supplied content.
    #[allow(clippy::result_large_err)]
    pub fn load_local_infile(
        &mut self,
        sql: &str,
        params: &[Value],
        content: LocalInfileStream,
    ) -> Result<u64, Error> {
        let mut cmd = SqlCommand::with_params(sql, params);
        cmd.set_local_infile(content);
        block_on(cmd.execute_non_query(Some(&mut self.client)))
    }

    /// Ping the server.
    #[allow(clippy::result_large_err)]
    pub fn ping(&mut self) -> Result<(), Error> {
        block_on(async {
            self.client.execute(&mut PingPacket).await?.into_ok().await?;
            Ok(())
        })
    }

    /// Close the connection.
    #[allow(clippy::result_large_err)]
    pub fn close(mut self) -> Result<(), Error> {
        debug!(connection_id = self.connection_id(), "closing connection");
        block_on(self.client.close())
    }
}

/// Rows of one result read on demand from a blocking connection.
pub struct RowStream<'c, S: PacketStream> {
    reader: ResultReader<'c, S>,
}

impl<S: PacketStream> std::fmt::Debug for RowStream<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("reader", &self.reader)
            .finish()
    }
}

impl<S: PacketStream> RowStream<'_, S> {
    /// Advance to the next row; `false` once the result is exhausted.
    #[allow(clippy::should_implement_trait, clippy::result_large_err)]
    pub fn next(&mut self) -> Result<bool, Error> {
        block_on(self.reader.next())
    }

    pub fn column_definitions(&self) -> Arc<[ColumnDefinition]> {
        self.reader.column_definitions()
    }

    pub fn warnings(&self) -> u16 {
        self.reader.warnings()
    }

    /// Drain unread rows and release the connection.
    #[allow(clippy::result_large_err)]
    pub fn close(self) -> Result<(), Error> {
        block_on(self.reader.close())
    }
}

impl<S: PacketStream> RowAccess for RowStream<'_, S> {
    fn columns(&self) -> &[ColumnDefinition] {
        self.reader.columns()
    }

    fn current_row(&mut self) -> Result<&mut Row, Error> {
        self.reader.current_row()
    }
}
