//! Reusable text command with bound parameters.
//!
//! A [`SqlCommand`] keeps its SQL, its parameters and the lexer output for
//! that SQL, so executing the same text again does not rescan it.

use std::sync::Arc;

use mariadb_wire_core::error::{QueryError, QueryErrorKind};
use mariadb_wire_core::{Error, Value};

use crate::client::{Client, Completion};
use crate::lexer::ParsedQuery;
use crate::message::{ClientMessage, LocalInfileStream, QueryPacket, QueryWithParametersPacket};
use crate::stream::PacketStream;

#[derive(Default)]
pub struct SqlCommand {
    text: Option<String>,
    params: Vec<Option<Value>>,
    parsed: Option<Arc<ParsedQuery>>,
    parsed_no_backslash_escapes: bool,
    timeout_secs: Option<u32>,
    local_infile: Option<LocalInfileStream>,
    closed: bool,
}

impl std::fmt::Debug for SqlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlCommand")
            .field("text", &self.text)
            .field("params", &self.params)
            .field("timeout_secs", &self.timeout_secs)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl SqlCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Replace the SQL; the cached lexer output is dropped.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
        self.parsed = None;
    }

    /// A command with its placeholders bound in order.
    pub fn with_params(text: impl Into<String>, params: &[Value]) -> Self {
        Self {
            text: Some(text.into()),
            params: params.iter().cloned().map(Some).collect(),
            ..Self::default()
        }
    }

    /// Bind the placeholder at `index` (0-based).
    pub fn bind(&mut self, index: usize, value: impl Into<Value>) -> &mut Self {
        if self.params.len() <= index {
            self.params.resize(index + 1, None);
        }
        self.params[index] = Some(value.into());
        self
    }

    pub fn clear_parameters(&mut self) {
        self.params.clear();
    }

    /// Server-side time limit for each execution, in whole seconds.
    /// Without one the connection's configured limit applies.
    pub fn set_timeout(&mut self, timeout_secs: Option<u32>) {
        self.timeout_secs = timeout_secs;
    }

    /// Content to stream if the server asks for a LOCAL INFILE during the
    /// next execution.
    pub fn set_local_infile(&mut self, stream: LocalInfileStream) {
        self.local_infile = Some(stream);
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_usable<S: PacketStream>(&self, client: Option<&Client<S>>) -> Result<(), Error> {
        if self.closed {
            return Err(usage("Cannot do an operation on a closed statement"));
        }
        let Some(client) = client else {
            return Err(usage("Cannot do an operation without connection set"));
        };
        if client.is_closed() {
            return Err(usage("Cannot do an operation on closed connection"));
        }
        if self.text.as_deref().is_none_or(str::is_empty) {
            return Err(usage("CommandText need to be set to be execute"));
        }
        Ok(())
    }

    /// Lexer output for the current text, rescanned only when the text or
    /// the server's escaping mode changed.
    fn parsed(&mut self, no_backslash_escapes: bool) -> Arc<ParsedQuery> {
        match &self.parsed {
            Some(parsed) if self.parsed_no_backslash_escapes == no_backslash_escapes => {
                Arc::clone(parsed)
            }
            _ => {
                let parsed = Arc::new(ParsedQuery::parse(
                    self.text.as_deref().unwrap_or_default(),
                    no_backslash_escapes,
                ));
                self.parsed = Some(Arc::clone(&parsed));
                self.parsed_no_backslash_escapes = no_backslash_escapes;
                parsed
            }
        }
    }

    fn message(
        &mut self,
        no_backslash_escapes: bool,
        timeout_secs: Option<u32>,
    ) -> Box<dyn ClientMessage> {
        let parsed = self.parsed(no_backslash_escapes);
        let local_infile = self.local_infile.take();
        if parsed.param_count() == 0 {
            let mut packet = QueryPacket::new(parsed.sql()).with_timeout(timeout_secs);
            if let Some(stream) = local_infile {
                packet = packet.with_local_infile(stream);
            }
            Box::new(packet)
        } else {
            let mut packet = QueryWithParametersPacket::new(parsed, self.params.clone())
                .with_timeout(timeout_secs);
            if let Some(stream) = local_infile {
                packet = packet.with_local_infile(stream);
            }
            Box::new(packet)
        }
    }

    /// Run the command on `client`.
    pub async fn execute<'c, S: PacketStream>(
        &mut self,
        client: Option<&'c mut Client<S>>,
    ) -> Result<Completion<'c, S>, Error> {
        self.check_usable(client.as_deref())?;
        let Some(client) = client else {
            return Err(usage("Cannot do an operation without connection set"));
        };
        let timeout_secs = self.timeout_secs.or(client.query_timeout_secs());
        let mut msg = self.message(client.context().no_backslash_escapes(), timeout_secs);
        client.execute(msg.as_mut()).await
    }

    /// Run a command that must not produce rows; returns the affected row
    /// count. A result set is drained before the error is raised.
    pub async fn execute_non_query<S: PacketStream>(
        &mut self,
        client: Option<&mut Client<S>>,
    ) -> Result<u64, Error> {
        match self.execute(client).await?.into_ok().await? {
            Some(ok) => Ok(ok.affected_rows),
            None => Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: self.text.clone(),
                sqlstate: Some("HY000".to_string()),
                code: None,
                message: "the given SQL statement produces an unexpected ResultSet object"
                    .to_string(),
                source: None,
            })),
        }
    }
}

fn usage(msg: &str) -> Error {
    Error::Usage(msg.to_string())
}
