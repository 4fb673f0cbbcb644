//! Commands sent by the client after authentication.
//!
//! A [`ClientMessage`] knows how to render its payload and how to answer the
//! questions the response reader asks about it (is this LOCAL INFILE file
//! name legitimate, may metadata be skipped, ...).

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use mariadb_wire_core::Error;
use mariadb_wire_core::value::{Value, format_uuid};
use regex::RegexBuilder;

use crate::column::ColumnDefinition;
use crate::context::Context;
use crate::lexer::ParsedQuery;
use crate::protocol::{Command, PacketWriter};

/// Stream of LOCAL INFILE content supplied by the caller.
pub type LocalInfileStream = Box<dyn Read + Send>;

const LOAD_LOCAL_PREFIX: &str = r"^(\s*/\*([^*]|\*[^/])*\*/)*\s*LOAD\s+(DATA|XML)\s+((LOW_PRIORITY|CONCURRENT)\s+)?LOCAL\s+INFILE\s+";

/// A command the client writes as one packet.
pub trait ClientMessage: Send {
    /// Human-readable form, attached to server errors (usually the SQL).
    fn description(&self) -> String;

    /// Render the command payload (command byte included).
    fn build_payload(&mut self, ctx: &Context) -> Result<PacketWriter, Error>;

    /// Rows come back in the binary layout.
    fn binary_protocol(&self) -> bool {
        false
    }

    /// The command may receive a result without column definitions.
    fn can_skip_meta(&self) -> bool {
        false
    }

    /// Column definitions to reuse when the server skips metadata.
    fn cached_columns(&self) -> Option<Arc<[ColumnDefinition]>> {
        None
    }

    /// Whether the server answers this command at all.
    fn expects_response(&self) -> bool {
        true
    }

    /// The command is a bare `COMMIT`; a failure leaves the transaction open.
    fn is_commit(&self) -> bool {
        false
    }

    /// Whether frames of this command may be dumped in wire traces.
    fn permit_trace(&self) -> bool {
        true
    }

    /// Whether the file the server asks for was named by this command.
    fn validate_local_file_name(&self, file_name: &str, ctx: &Context) -> bool {
        let _ = (file_name, ctx);
        false
    }

    /// Caller-supplied content for a LOCAL INFILE request.
    fn take_local_infile(&mut self) -> Option<LocalInfileStream> {
        None
    }
}

/// Check that `sql` loads exactly `file_name`, either literally or through a
/// first placeholder bound to that name.
pub fn validate_local_file_name(sql: &str, first_param: Option<&Value>, file_name: &str) -> bool {
    let literal = format!("{}'{}'", LOAD_LOCAL_PREFIX, regex::escape(file_name));
    if let Ok(re) = RegexBuilder::new(&literal).case_insensitive(true).build() {
        if re.is_match(sql) {
            return true;
        }
    }

    let Some(param) = first_param else {
        return false;
    };
    let placeholder = format!(r"{}\?", LOAD_LOCAL_PREFIX);
    let Ok(re) = RegexBuilder::new(&placeholder).case_insensitive(true).build() else {
        return false;
    };
    if !re.is_match(sql) {
        return false;
    }
    match param {
        Value::Text(name) => name.to_lowercase() == file_name.to_lowercase(),
        _ => false,
    }
}

fn write_timeout_prefix(w: &mut PacketWriter, timeout_secs: Option<u32>) {
    if let Some(secs) = timeout_secs.filter(|s| *s > 0) {
        w.write_str("SET STATEMENT max_statement_time=");
        w.write_str(&secs.to_string());
        w.write_str(" FOR ");
    }
}

/// COM_QUERY with the SQL sent as is.
pub struct QueryPacket {
    sql: String,
    timeout_secs: Option<u32>,
    local_infile: Option<LocalInfileStream>,
}

impl QueryPacket {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            timeout_secs: None,
            local_infile: None,
        }
    }

    /// Bound the statement's run time, in whole seconds.
    pub fn with_timeout(mut self, timeout_secs: Option<u32>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Stream this content if the server asks for a LOCAL INFILE.
    pub fn with_local_infile(mut self, stream: LocalInfileStream) -> Self {
        self.local_infile = Some(stream);
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl fmt::Debug for QueryPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPacket")
            .field("sql", &self.sql)
            .field("timeout_secs", &self.timeout_secs)
            .field("local_infile", &self.local_infile.is_some())
            .finish()
    }
}

impl ClientMessage for QueryPacket {
    fn description(&self) -> String {
        self.sql.clone()
    }

    fn build_payload(&mut self, _ctx: &Context) -> Result<PacketWriter, Error> {
        let mut w = PacketWriter::packet();
        w.write_u8(Command::Query as u8);
        write_timeout_prefix(&mut w, self.timeout_secs);
        w.write_str(&self.sql);
        Ok(w)
    }

    fn is_commit(&self) -> bool {
        self.sql.eq_ignore_ascii_case("COMMIT")
    }

    fn validate_local_file_name(&self, file_name: &str, _ctx: &Context) -> bool {
        validate_local_file_name(&self.sql, None, file_name)
    }

    fn take_local_infile(&mut self) -> Option<LocalInfileStream> {
        self.local_infile.take()
    }
}

/// COM_QUERY with `?` placeholders replaced by escaped literals.
pub struct QueryWithParametersPacket {
    parsed: Arc<ParsedQuery>,
    params: Vec<Option<Value>>,
    timeout_secs: Option<u32>,
    local_infile: Option<LocalInfileStream>,
}

impl QueryWithParametersPacket {
    /// `params[i]` binds placeholder `i`; `None` means never bound.
    pub fn new(parsed: Arc<ParsedQuery>, params: Vec<Option<Value>>) -> Self {
        Self {
            parsed,
            params,
            timeout_secs: None,
            local_infile: None,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: Option<u32>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_local_infile(mut self, stream: LocalInfileStream) -> Self {
        self.local_infile = Some(stream);
        self
    }
}

impl fmt::Debug for QueryWithParametersPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryWithParametersPacket")
            .field("sql", &self.parsed.sql())
            .field("params", &self.params)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl ClientMessage for QueryWithParametersPacket {
    fn description(&self) -> String {
        self.parsed.sql().to_string()
    }

    fn build_payload(&mut self, ctx: &Context) -> Result<PacketWriter, Error> {
        let no_backslash_escapes = ctx.no_backslash_escapes();
        let mut w = PacketWriter::packet();
        w.write_u8(Command::Query as u8);
        write_timeout_prefix(&mut w, self.timeout_secs);

        let mut parts = self.parsed.parts();
        for i in 0..self.parsed.param_count() {
            if let Some(part) = parts.next() {
                w.write_bytes(part);
            }
            let Some(Some(value)) = self.params.get(i) else {
                return Err(Error::Usage(format!(
                    "Parameter at position {} is not set",
                    i + 1
                )));
            };
            write_literal(&mut w, value, no_backslash_escapes)?;
        }
        if let Some(rest) = parts.next() {
            w.write_bytes(rest);
        }
        Ok(w)
    }

    fn is_commit(&self) -> bool {
        self.parsed.sql().eq_ignore_ascii_case("COMMIT")
    }

    fn validate_local_file_name(&self, file_name: &str, _ctx: &Context) -> bool {
        let first = self.params.first().and_then(Option::as_ref);
        validate_local_file_name(self.parsed.sql(), first, file_name)
    }

    fn take_local_infile(&mut self) -> Option<LocalInfileStream> {
        self.local_infile.take()
    }
}

/// COM_STMT_CLOSE; the server sends no answer.
#[derive(Debug, Clone, Copy)]
pub struct ClosePreparePacket(pub u32);

impl ClientMessage for ClosePreparePacket {
    fn description(&self) -> String {
        format!("Closing PREPARE {}", self.0)
    }

    fn build_payload(&mut self, _ctx: &Context) -> Result<PacketWriter, Error> {
        let mut w = PacketWriter::packet();
        w.write_u8(Command::StmtClose as u8);
        w.write_u32_le(self.0);
        Ok(w)
    }

    fn expects_response(&self) -> bool {
        false
    }
}

/// COM_QUIT; the server closes the socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuitPacket;

impl ClientMessage for QuitPacket {
    fn description(&self) -> String {
        "QUIT".to_string()
    }

    fn build_payload(&mut self, _ctx: &Context) -> Result<PacketWriter, Error> {
        let mut w = PacketWriter::packet();
        w.write_u8(Command::Quit as u8);
        Ok(w)
    }

    fn expects_response(&self) -> bool {
        false
    }
}

/// COM_PING, answered by OK.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingPacket;

impl ClientMessage for PingPacket {
    fn description(&self) -> String {
        "PING".to_string()
    }

    fn build_payload(&mut self, _ctx: &Context) -> Result<PacketWriter, Error> {
        let mut w = PacketWriter::packet();
        w.write_u8(Command::Ping as u8);
        Ok(w)
    }
}

/// Render `value` as a text-protocol SQL literal.
pub fn write_literal(
    w: &mut PacketWriter,
    value: &Value,
    no_backslash_escapes: bool,
) -> Result<(), Error> {
    match value {
        Value::Null => w.write_str("null"),
        Value::Bool(b) => w.write_str(if *b { "1" } else { "0" }),
        Value::TinyInt(v) => w.write_str(&v.to_string()),
        Value::SmallInt(v) => w.write_str(&v.to_string()),
        Value::Int(v) => w.write_str(&v.to_string()),
        Value::BigInt(v) => w.write_str(&v.to_string()),
        Value::UnsignedBigInt(v) => w.write_str(&v.to_string()),
        Value::Float(v) => {
            check_finite(f64::from(*v))?;
            w.write_str(&v.to_string());
        }
        Value::Double(v) => {
            check_finite(*v)?;
            w.write_str(&v.to_string());
        }
        Value::Decimal(s) => {
            if !is_decimal_literal(s) {
                return Err(Error::Usage(format!("Invalid decimal parameter '{}'", s)));
            }
            w.write_str(s);
        }
        Value::Text(s) => {
            w.write_u8(b'\'');
            w.write_str_escaped(s, no_backslash_escapes);
            w.write_u8(b'\'');
        }
        Value::Bytes(b) => {
            w.write_str("_binary '");
            w.write_bytes_escaped(b, no_backslash_escapes);
            w.write_u8(b'\'');
        }
        Value::DateTime(dt) => {
            w.write_u8(b'\'');
            w.write_str(&format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                dt.year, dt.month, dt.day, dt.hour, dt.minute, dt.second
            ));
            let micros = dt.microsecond;
            if micros > 0 {
                if micros % 1000 == 0 {
                    w.write_str(&format!(".{:03}", micros / 1000));
                } else {
                    w.write_str(&format!(".{:06}", micros));
                }
            }
            w.write_u8(b'\'');
        }
        Value::Time(t) => {
            w.write_u8(b'\'');
            w.write_str(&t.to_string());
            w.write_u8(b'\'');
        }
        Value::Uuid(bytes) => {
            w.write_u8(b'\'');
            w.write_str(&format_uuid(bytes));
            w.write_u8(b'\'');
        }
        Value::Json(json) => {
            w.write_u8(b'\'');
            w.write_str_escaped(&json.to_string(), no_backslash_escapes);
            w.write_u8(b'\'');
        }
    }
    Ok(())
}

fn check_finite(v: f64) -> Result<(), Error> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(Error::Usage(format!(
            "Cannot send non-finite floating-point parameter {}",
            v
        )))
    }
}

/// Decimal text is written unquoted, so it must not carry anything else.
fn is_decimal_literal(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    let mut parts = digits.splitn(2, '.');
    let int = parts.next().unwrap_or("");
    let frac = parts.next().unwrap_or("");
    (!int.is_empty() || !frac.is_empty())
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::InitialHandshake;
    use crate::protocol::capabilities::DEFAULT_CLIENT_FLAGS;
    use crate::protocol::{charset, server_status};
    use crate::testing;
    use mariadb_wire_core::value::{DateTime, Time};

    fn context() -> Context {
        let raw = testing::handshake_packet(DEFAULT_CLIENT_FLAGS, "mysql_native_password", &[1; 20]);
        let hs = InitialHandshake::parse(&raw).unwrap();
        Context::new(&hs, DEFAULT_CLIENT_FLAGS, charset::DEFAULT_CHARSET)
    }

    fn payload(msg: &mut dyn ClientMessage, ctx: &Context) -> Vec<u8> {
        msg.build_payload(ctx).unwrap().into_bytes()
    }

    fn render(sql: &str, params: Vec<Option<Value>>) -> String {
        let parsed = Arc::new(ParsedQuery::parse(sql, false));
        let mut msg = QueryWithParametersPacket::new(parsed, params);
        let bytes = payload(&mut msg, &context());
        assert_eq!(bytes[0], 0x03);
        String::from_utf8_lossy(&bytes[1..]).into_owned()
    }

    fn literal(value: Value) -> String {
        render("?", vec![Some(value)])
    }

    #[test]
    fn test_query_packet_payload() {
        let ctx = context();
        let mut q = QueryPacket::new("select 1");
        assert_eq!(payload(&mut q, &ctx), b"\x03select 1");

        let mut q = QueryPacket::new("select 1").with_timeout(Some(5));
        assert_eq!(
            payload(&mut q, &ctx),
            b"\x03SET STATEMENT max_statement_time=5 FOR select 1"
        );
        assert_eq!(q.description(), "select 1");
        assert!(QueryPacket::new("commit").is_commit());
        assert!(!QueryPacket::new("commit work").is_commit());
    }

    #[test]
    fn test_literals() {
        assert_eq!(literal(Value::Null), "null");
        assert_eq!(literal(Value::Bool(true)), "1");
        assert_eq!(literal(Value::Bool(false)), "0");
        assert_eq!(literal(Value::BigInt(-42)), "-42");
        assert_eq!(literal(Value::UnsignedBigInt(u64::MAX)), "18446744073709551615");
        assert_eq!(literal(Value::Double(0.1)), "0.1");
        assert_eq!(literal(Value::Float(1.5)), "1.5");
        assert_eq!(literal(Value::Decimal("-12.50".into())), "-12.50");
        assert_eq!(literal(Value::Text("it's".into())), "'it\\'s'");
        assert_eq!(literal(Value::Bytes(vec![b'a', 0, b'\''])), "_binary 'a\\\0\\''");
        assert_eq!(
            literal(Value::Uuid([0x12; 16])),
            "'12121212-1212-1212-1212-121212121212'"
        );
        assert_eq!(
            literal(Value::Json(serde_json::json!({"k": "v"}))),
            "'{\\\"k\\\":\\\"v\\\"}'"
        );
    }

    #[test]
    fn test_temporal_literals() {
        let dt = DateTime::date(2024, 2, 29).and_time(13, 5, 9);
        assert_eq!(literal(Value::DateTime(dt)), "'2024-02-29 13:05:09'");
        assert_eq!(
            literal(Value::DateTime(dt.and_micros(120_000))),
            "'2024-02-29 13:05:09.120'"
        );
        assert_eq!(
            literal(Value::DateTime(dt.and_micros(123_456))),
            "'2024-02-29 13:05:09.123456'"
        );
        let t = Time {
            negative: true,
            hours: 100,
            minutes: 2,
            seconds: 3,
            microseconds: 0,
        };
        assert_eq!(literal(Value::Time(t)), "'-100:02:03'");
    }

    #[test]
    fn test_rejected_parameters() {
        let parsed = Arc::new(ParsedQuery::parse("?", false));
        let ctx = context();
        for bad in [
            Value::Double(f64::NAN),
            Value::Float(f32::INFINITY),
            Value::Decimal("1; DROP TABLE t".into()),
        ] {
            let mut msg = QueryWithParametersPacket::new(parsed.clone(), vec![Some(bad)]);
            assert!(matches!(msg.build_payload(&ctx), Err(Error::Usage(_))));
        }
    }

    #[test]
    fn test_substitution_skips_quoted_placeholders() {
        assert_eq!(
            render(
                "SELECT '?', ? FROM t WHERE a = ? -- ?",
                vec![Some(Value::Int(1)), Some(Value::Text("x".into()))]
            ),
            "SELECT '?', 1 FROM t WHERE a = 'x' -- ?"
        );
    }

    #[test]
    fn test_missing_parameter() {
        let parsed = Arc::new(ParsedQuery::parse("SELECT ?, ?", false));
        let mut msg = QueryWithParametersPacket::new(parsed, vec![Some(Value::Int(1)), None]);
        let err = msg.build_payload(&context()).unwrap_err();
        assert_eq!(err.to_string(), "Parameter at position 2 is not set");

        let parsed = Arc::new(ParsedQuery::parse("SELECT ?", false));
        let mut msg = QueryWithParametersPacket::new(parsed, Vec::new());
        assert!(msg.build_payload(&context()).is_err());
    }

    #[test]
    fn test_no_backslash_escapes_mode() {
        let mut ctx = context();
        ctx.set_server_status(server_status::SERVER_STATUS_NO_BACKSLASH_ESCAPES);
        let parsed = Arc::new(ParsedQuery::parse("SELECT ?", true));
        let mut msg =
            QueryWithParametersPacket::new(parsed, vec![Some(Value::Text("a'b\\c".into()))]);
        assert_eq!(payload(&mut msg, &ctx), b"\x03SELECT 'a''b\\c'");
    }

    #[test]
    fn test_close_quit_ping() {
        let ctx = context();
        let mut close = ClosePreparePacket(7);
        assert_eq!(payload(&mut close, &ctx), &[0x19, 7, 0, 0, 0]);
        assert_eq!(close.description(), "Closing PREPARE 7");
        assert!(!close.expects_response());

        let mut quit = QuitPacket;
        assert_eq!(payload(&mut quit, &ctx), &[0x01]);
        assert!(!quit.expects_response());

        let mut ping = PingPacket;
        assert_eq!(payload(&mut ping, &ctx), &[0x0E]);
        assert!(ping.expects_response());
    }

    #[test]
    fn test_local_file_name_literal() {
        let sql = "LOAD DATA LOCAL INFILE '/tmp/a.csv' INTO TABLE t";
        assert!(validate_local_file_name(sql, None, "/tmp/a.csv"));
        assert!(!validate_local_file_name(sql, None, "/etc/passwd"));
        assert!(validate_local_file_name(
            "/* c */ load data concurrent local infile '/tmp/a.csv' into table t",
            None,
            "/tmp/a.csv"
        ));
        // regex metacharacters in the name are literal
        assert!(!validate_local_file_name(
            "LOAD DATA LOCAL INFILE '/tmp/aXcsv' INTO TABLE t",
            None,
            "/tmp/a.csv"
        ));
        assert!(!validate_local_file_name(
            "SELECT 1; LOAD DATA LOCAL INFILE '/tmp/a.csv' INTO TABLE t",
            None,
            "/tmp/a.csv"
        ));
    }

    #[test]
    fn test_local_file_name_placeholder() {
        let sql = "LOAD DATA LOCAL INFILE ? INTO TABLE t";
        let name = Value::Text("/Tmp/A.csv".into());
        assert!(validate_local_file_name(sql, Some(&name), "/tmp/a.csv"));
        assert!(!validate_local_file_name(sql, Some(&name), "/tmp/b.csv"));
        assert!(!validate_local_file_name(sql, None, "/tmp/a.csv"));
        assert!(!validate_local_file_name(sql, Some(&Value::Int(1)), "1"));

        let parsed = Arc::new(ParsedQuery::parse(sql, false));
        let msg = QueryWithParametersPacket::new(parsed, vec![Some(name)]);
        assert!(msg.validate_local_file_name("/tmp/a.csv", &context()));
    }

    #[test]
    fn test_local_infile_stream_is_taken_once() {
        let mut q = QueryPacket::new("LOAD DATA LOCAL INFILE 'x' INTO TABLE t")
            .with_local_infile(Box::new(std::io::Cursor::new(b"1\n".to_vec())));
        assert!(q.take_local_infile().is_some());
        assert!(q.take_local_infile().is_none());
    }
}
