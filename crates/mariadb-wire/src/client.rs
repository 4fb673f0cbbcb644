//! The protocol state machine.
//!
//! [`Client`] owns the framer and the negotiated [`Context`] of one
//! connection. It is generic over the byte stream so the blocking and the
//! async connection types drive the same code; they only differ in how the
//! stream's futures complete.

use std::fs::File;
use std::io::Read;
use std::sync::Arc;

use mariadb_wire_core::error::{LocalInfileError, LocalInfileErrorKind, QueryError, QueryErrorKind};
use mariadb_wire_core::Error;
use tracing::debug;

use crate::auth::{self, AuthStep, AuthenticationPlugin, NativePasswordPlugin};
use crate::column::ColumnDefinition;
use crate::config::MariaDbConfig;
use crate::context::Context;
use crate::handshake::{HandshakeResponse, InitialHandshake};
use crate::message::{ClientMessage, LocalInfileStream, QuitPacket};
use crate::protocol::{
    MAX_PACKET_SIZE, OkPacket, PacketFramer, PacketReader, PacketWriter, protocol_error, truncated,
};
use crate::result::{ResultReader, streaming_error};
use crate::stream::PacketStream;

/// Chunk size for LOCAL INFILE content.
const LOCAL_INFILE_CHUNK: usize = 8192;

/// What a command produced.
#[derive(Debug)]
pub enum Completion<'a, S: PacketStream> {
    /// OK packet; default-valued for commands the server does not answer.
    Ok(OkPacket),
    /// A result set whose rows are still on the wire.
    ResultSet(ResultReader<'a, S>),
}

impl<S: PacketStream> Completion<'_, S> {
    pub fn is_result_set(&self) -> bool {
        matches!(self, Completion::ResultSet(_))
    }

    /// The OK summary, closing (draining) a result set instead.
    pub async fn into_ok(self) -> Result<Option<OkPacket>, Error> {
        match self {
            Completion::Ok(ok) => Ok(Some(ok)),
            Completion::ResultSet(reader) => {
                reader.close().await?;
                Ok(None)
            }
        }
    }
}

/// One authenticated connection speaking the text protocol.
pub struct Client<S> {
    framer: PacketFramer<S>,
    ctx: Context,
    pending_result: bool,
    closed: bool,
    local_infile: bool,
    query_timeout_secs: Option<u32>,
    affected_rows: u64,
    last_insert_id: u64,
}

impl<S> std::fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("thread_id", &self.ctx.thread_id())
            .field("server_version", &self.ctx.server_version().as_str())
            .field("pending_result", &self.pending_result)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<S: PacketStream> Client<S> {
    /// Run the handshake and authentication over an open stream.
    pub async fn connect(stream: S, config: &MariaDbConfig) -> Result<Self, Error> {
        // the bound applies to commands, not to the authentication exchange
        let mut framer = PacketFramer::new(stream, config.max_query_size_to_log, None);

        let greeting = framer.read_packet().await?;
        let handshake = InitialHandshake::parse(&greeting)?;
        framer.set_server_thread_id(handshake.connection_id);
        let ctx = Context::new(&handshake, config.capability_flags(), config.charset);
        debug!(
            thread_id = handshake.connection_id,
            server_version = %handshake.server_version,
            mariadb = handshake.server_version.is_mariadb(),
            "received server handshake"
        );

        let mut client = Self {
            framer,
            ctx,
            pending_result: false,
            closed: false,
            local_infile: config.local_infile,
            query_timeout_secs: config.query_timeout_secs(),
            affected_rows: 0,
            last_insert_id: 0,
        };

        let secure = client.framer.stream().is_secure();
        let password = config.password.as_deref();
        // unknown greeting plugins get a native answer; the server switches
        let mut plugin: Box<dyn AuthenticationPlugin> = auth::plugin_for(&handshake.auth_plugin)
            .unwrap_or_else(|| Box::new(NativePasswordPlugin::default()) as Box<dyn AuthenticationPlugin>);
        plugin.initialize(password, &handshake.seed);
        debug!(plugin = plugin.name(), "authenticating");
        let auth_response = plugin.initial_response(secure)?;

        let response = HandshakeResponse {
            capabilities: client.ctx.client_capabilities(),
            charset: config.charset,
            user: &config.user,
            auth_response: &auth_response,
            database: config.database.as_deref(),
            auth_plugin: plugin.name(),
            server_host: &config.host,
            connection_attributes: config.connection_attributes.as_deref(),
        };
        client.write_hidden(response.encode()).await?;
        client.authenticate(plugin, password, secure).await?;
        client.framer.set_max_allowed_packet(config.max_allowed_packet);
        debug!(thread_id = client.ctx.thread_id(), "connection established");
        Ok(client)
    }

    async fn authenticate(
        &mut self,
        mut plugin: Box<dyn AuthenticationPlugin>,
        password: Option<&str>,
        secure: bool,
    ) -> Result<(), Error> {
        loop {
            let packet = self.framer.read_packet().await?;
            match packet.first() {
                Some(0x00) => {
                    let ok = PacketReader::new(&packet)
                        .parse_ok_packet(self.ctx.session_track())
                        .ok_or_else(|| truncated("OK packet", &packet))?;
                    self.ctx.set_server_status(ok.status_flags);
                    self.ctx.set_warnings(ok.warnings);
                    return Ok(());
                }
                Some(0xFF) => {
                    let err = PacketReader::new(&packet)
                        .parse_err_packet()
                        .ok_or_else(|| truncated("error packet", &packet))?;
                    return Err(auth::auth_error(format!(
                        "Authentication failed: ({}) {}",
                        err.error_code, err.error_message
                    )));
                }
                Some(0xFE) => {
                    let mut r = PacketReader::new(&packet);
                    r.skip(1);
                    let name = r
                        .read_null_string()
                        .ok_or_else(|| truncated("plugin name", &packet))?;
                    let mut seed = r.read_rest();
                    if let [rest @ .., 0] = seed {
                        seed = rest;
                    }
                    plugin = auth::require_plugin(&name)?;
                    debug!(plugin = plugin.name(), "server requested authentication switch");
                    plugin.initialize(password, seed);
                    let data = plugin.initial_response(secure)?;
                    self.write_auth_data(&data).await?;
                }
                Some(0x01) => match plugin.continue_auth(&packet[1..], secure)? {
                    AuthStep::Send(data) => self.write_auth_data(&data).await?,
                    AuthStep::Wait => {}
                },
                Some(other) => {
                    return Err(protocol_error(format!(
                        "Unexpected authentication packet header 0x{:02X}",
                        other
                    )));
                }
                None => return Err(protocol_error("Empty authentication packet")),
            }
        }
    }

    async fn write_auth_data(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut w = PacketWriter::packet();
        w.write_bytes(data);
        self.write_hidden(w).await
    }

    /// Write a frame whose content must not appear in traces.
    async fn write_hidden(&mut self, mut w: PacketWriter) -> Result<(), Error> {
        self.framer.permit_trace(false);
        let written = self.framer.write_packet(&mut w).await;
        self.framer.permit_trace(true);
        written?;
        self.framer.flush().await
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn stream(&self) -> &S {
        self.framer.stream()
    }

    pub(crate) fn framer_mut(&mut self) -> &mut PacketFramer<S> {
        &mut self.framer
    }

    /// Statement timeout configured for text commands, in seconds.
    pub fn query_timeout_secs(&self) -> Option<u32> {
        self.query_timeout_secs
    }

    /// Affected rows reported by the last OK packet.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// Last insert id reported by the last OK packet.
    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// A result reader was dropped before its terminal packet.
    pub fn has_pending_result(&self) -> bool {
        self.pending_result
    }

    pub(crate) fn set_pending_result(&mut self) {
        self.pending_result = true;
    }

    /// Read and discard the rest of a result whose reader was dropped early.
    pub async fn drain_pending(&mut self) -> Result<(), Error> {
        if !self.pending_result {
            return Ok(());
        }
        debug!("draining abandoned result");
        self.pending_result = false;
        self.skip_rows("pending result").await.map_err(streaming_error)
    }

    /// Send one command and read its response.
    ///
    /// Rows of a result set stay on the wire until the returned reader
    /// consumes or closes them.
    pub async fn execute(
        &mut self,
        msg: &mut dyn ClientMessage,
    ) -> Result<Completion<'_, S>, Error> {
        if self.closed {
            return Err(Error::Usage(
                "Cannot do an operation on closed connection".to_string(),
            ));
        }
        self.drain_pending().await?;

        let mut payload = msg.build_payload(&self.ctx)?;
        let description = msg.description();
        debug!(command = %description, "sending command");

        self.framer.init_sequence();
        self.framer.permit_trace(msg.permit_trace());
        let written = self.framer.write_packet(&mut payload).await;
        self.framer.permit_trace(true);
        written?;
        self.framer.flush().await?;

        if !msg.expects_response() {
            return Ok(Completion::Ok(OkPacket::default()));
        }
        self.read_response(msg, description).await
    }

    async fn read_response(
        &mut self,
        msg: &mut dyn ClientMessage,
        description: String,
    ) -> Result<Completion<'_, S>, Error> {
        // LOCAL INFILE errors are raised once the server's answer is read
        let mut deferred: Option<Error> = None;
        loop {
            let packet = self.framer.read_packet().await?;
            match packet.first() {
                Some(0x00) => {
                    let ok = PacketReader::new(&packet)
                        .parse_ok_packet(self.ctx.session_track())
                        .ok_or_else(|| truncated("OK packet", &packet))?;
                    self.ctx.set_server_status(ok.status_flags);
                    self.ctx.set_warnings(ok.warnings);
                    self.affected_rows = ok.affected_rows;
                    self.last_insert_id = ok.last_insert_id;
                    if let Some(e) = deferred {
                        return Err(e);
                    }
                    return Ok(Completion::Ok(ok));
                }
                Some(0xFF) => {
                    if msg.is_commit() {
                        self.ctx.mark_in_transaction();
                    }
                    if let Some(e) = deferred {
                        return Err(e);
                    }
                    return Err(server_error(&packet, &description));
                }
                Some(0xFB) => {
                    let file_name = String::from_utf8_lossy(&packet[1..]).into_owned();
                    if let Err(e) = self.send_local_infile(msg, &file_name, &description).await {
                        if e.is_connection_error() {
                            return Err(e);
                        }
                        deferred = Some(e);
                    }
                }
                Some(_) => {
                    if let Some(e) = deferred {
                        self.read_columns(&packet, msg).await?;
                        self.skip_rows(&description).await?;
                        return Err(e);
                    }
                    let columns = self.read_columns(&packet, msg).await?;
                    return Ok(Completion::ResultSet(ResultReader::new(
                        self,
                        columns,
                        msg.binary_protocol(),
                        description,
                    )));
                }
                None => return Err(protocol_error("Empty response packet")),
            }
        }
    }

    /// Answer a LOCAL INFILE request. The empty terminating frame is always
    /// written; the returned error is raised after the server's answer.
    async fn send_local_infile(
        &mut self,
        msg: &mut dyn ClientMessage,
        file_name: &str,
        description: &str,
    ) -> Result<(), Error> {
        let source: Result<LocalInfileStream, Error> = match msg.take_local_infile() {
            Some(stream) => Ok(stream),
            None if !self.local_infile => Err(local_infile_error(
                LocalInfileErrorKind::Rejected,
                "LOCAL INFILE is disabled for this connection".to_string(),
                description,
                None,
            )),
            None if !msg.validate_local_file_name(file_name, &self.ctx) => {
                Err(local_infile_error(
                    LocalInfileErrorKind::Rejected,
                    format!(
                        "LOAD DATA LOCAL INFILE asked for file '{}' that doesn't correspond to initial query {}. Possible malicious proxy changing server answer ! Command interrupted",
                        file_name, description
                    ),
                    description,
                    None,
                ))
            }
            None => File::open(file_name)
                .map(|f| Box::new(f) as LocalInfileStream)
                .map_err(|e| {
                    local_infile_error(
                        LocalInfileErrorKind::Io,
                        format!("Could not send file : {}", e),
                        description,
                        Some(e),
                    )
                }),
        };

        let outcome = match source {
            Ok(mut stream) => {
                debug!(file = file_name, "sending LOCAL INFILE content");
                self.stream_local_infile(&mut stream, description).await
            }
            Err(e) => {
                debug!(file = file_name, error = %e, "LOCAL INFILE request refused");
                Err(e)
            }
        };
        self.framer.write_empty_packet().await?;
        self.framer.flush().await?;
        outcome
    }

    /// Copy `stream` to the server in chunks.
    ///
    /// Reads from the source are synchronous `Read` calls, so on the async
    /// path a slow disk or reader stalls the task that drives this client.
    async fn stream_local_infile(
        &mut self,
        stream: &mut LocalInfileStream,
        description: &str,
    ) -> Result<(), Error> {
        let mut buf = vec![0u8; LOCAL_INFILE_CHUNK];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(local_infile_error(
                        LocalInfileErrorKind::Io,
                        format!("Could not send file : {}", e),
                        description,
                        Some(e),
                    ));
                }
            };
            let mut w = PacketWriter::with_capacity(n + 4);
            w.write_bytes(&buf[..n]);
            self.framer.write_packet(&mut w).await?;
        }
    }

    async fn read_columns(
        &mut self,
        header: &[u8],
        msg: &dyn ClientMessage,
    ) -> Result<Arc<[ColumnDefinition]>, Error> {
        let mut r = PacketReader::new(header);
        let count = r
            .read_lenenc_int()
            .ok_or_else(|| truncated("column count", header))?;
        let count = usize::try_from(count)
            .map_err(|_| protocol_error(format!("Invalid column count {}", count)))?;

        if self.ctx.can_skip_meta() && msg.can_skip_meta() && r.read_u8() == Some(0) {
            return msg
                .cached_columns()
                .ok_or_else(|| protocol_error("Server skipped metadata that was never cached"));
        }

        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            let raw = self.framer.read_packet().await?;
            columns.push(ColumnDefinition::parse(raw, self.ctx.extended_info())?);
        }
        if !self.ctx.eof_deprecated() {
            self.framer.skip_packet().await?;
        }
        Ok(columns.into())
    }

    /// Whether `packet` ends a result set.
    pub(crate) fn is_terminal(&self, packet: &[u8]) -> bool {
        packet.first() == Some(&0xFE)
            && if self.ctx.eof_deprecated() {
                packet.len() < MAX_PACKET_SIZE
            } else {
                packet.len() < 8
            }
    }

    /// Apply the status of a terminal packet; returns the status flags.
    pub(crate) fn apply_terminal(&mut self, packet: &[u8]) -> Result<u16, Error> {
        let mut r = PacketReader::new(packet);
        let (status, warnings) = if self.ctx.eof_deprecated() {
            let ok = r
                .parse_ok_packet(self.ctx.session_track())
                .ok_or_else(|| truncated("terminal OK packet", packet))?;
            (ok.status_flags, ok.warnings)
        } else {
            let eof = r
                .parse_eof_packet()
                .ok_or_else(|| truncated("EOF packet", packet))?;
            (eof.status_flags, eof.warnings)
        };
        self.ctx.set_server_status(status);
        self.ctx.set_warnings(warnings);
        Ok(status)
    }

    /// Discard row frames up to and including the terminal packet.
    pub(crate) async fn skip_rows(&mut self, description: &str) -> Result<(), Error> {
        loop {
            let eof_deprecated = self.ctx.eof_deprecated();
            let packet = self.framer.read_reusable().await?;
            match packet.first() {
                Some(0xFF) => return Err(server_error(packet, description)),
                Some(0xFE)
                    if (eof_deprecated && packet.len() < MAX_PACKET_SIZE)
                        || (!eof_deprecated && packet.len() < 8) =>
                {
                    let packet = packet.to_vec();
                    self.apply_terminal(&packet)?;
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    /// Send QUIT; the connection cannot be used afterwards.
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        let sent = self.execute(&mut QuitPacket).await.map(|_| ());
        self.closed = true;
        debug!(thread_id = self.ctx.thread_id(), "connection closed");
        sent
    }
}

/// Turn an ERR packet into the error raised for `description`.
pub(crate) fn server_error(packet: &[u8], description: &str) -> Error {
    match PacketReader::new(packet).parse_err_packet() {
        Some(err) => Error::Query(QueryError {
            kind: QueryErrorKind::classify(&err.sql_state, err.error_code),
            sql: Some(description.to_string()),
            sqlstate: Some(err.sql_state),
            code: Some(err.error_code),
            message: err.error_message,
            source: None,
        }),
        None => truncated("error packet", packet),
    }
}

fn local_infile_error(
    kind: LocalInfileErrorKind,
    message: String,
    description: &str,
    source: Option<std::io::Error>,
) -> Error {
    Error::LocalInfile(LocalInfileError {
        kind,
        message,
        sql: Some(description.to_string()),
        source: source.map(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
    })
}
