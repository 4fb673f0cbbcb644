//! Result sets: the streaming reader bound to a connection and the
//! in-memory set built from rows already read.
//!
//! Column positions in this API are 1-based.

use std::collections::VecDeque;
use std::sync::Arc;

use mariadb_wire_core::error::{QueryError, QueryErrorKind};
use mariadb_wire_core::{Error, Value};
use tracing::debug;

use crate::client::{Client, server_error};
use crate::column::ColumnDefinition;
use crate::protocol::server_status;
use crate::row::{FromColumn, Row, find_column};
use crate::stream::PacketStream;

/// Positional and label access to the current row of a result.
pub trait RowAccess {
    fn columns(&self) -> &[ColumnDefinition];

    /// The row the cursor is on.
    fn current_row(&mut self) -> Result<&mut Row, Error>;

    fn column_count(&self) -> usize {
        self.columns().len()
    }

    /// 1-based position of the column with this label.
    fn find_column(&self, label: &str) -> Result<usize, Error> {
        find_column(self.columns(), label)
            .map(|i| i + 1)
            .ok_or_else(|| unknown_label(self.columns(), label))
    }

    fn is_null(&mut self, index: usize) -> Result<bool, Error> {
        let i = position(index, self.column_count())?;
        self.current_row()?.is_null(i)
    }

    /// The field as the column's natural value.
    fn get_value(&mut self, index: usize) -> Result<Value, Error> {
        let i = position(index, self.column_count())?;
        self.current_row()?.get_value(i)
    }

    /// Typed access; `Ok(None)` for SQL NULL.
    fn get<T: FromColumn>(&mut self, index: usize) -> Result<Option<T>, Error> {
        let i = position(index, self.column_count())?;
        self.current_row()?.get(i)
    }

    fn get_by_label<T: FromColumn>(&mut self, label: &str) -> Result<Option<T>, Error> {
        let index = self.find_column(label)?;
        self.get(index)
    }
}

fn position(index: usize, count: usize) -> Result<usize, Error> {
    if index == 0 || index > count {
        return Err(Error::Usage(format!(
            "Wrong index position. Is {} but must be in 1-{} range",
            index, count
        )));
    }
    Ok(index - 1)
}

fn wrong_row_position() -> Error {
    Error::Usage("wrong row position".to_string())
}

fn unknown_label(columns: &[ColumnDefinition], label: &str) -> Error {
    let names: Vec<String> = columns.iter().map(ColumnDefinition::column_alias).collect();
    Error::Usage(format!(
        "Unknown label '{}'. Possible value {}",
        label,
        names.join(",")
    ))
}

/// Error raised when the remaining frames of a result cannot be drained.
pub(crate) fn streaming_error(source: Error) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Connection,
        sql: None,
        sqlstate: Some("08000".to_string()),
        code: None,
        message: "Error while streaming resultSet data".to_string(),
        source: Some(Box::new(source)),
    })
}

/// Forward-only reader over the rows of one command's result.
///
/// Holds the connection for its whole lifetime. Dropping a reader before
/// the terminal packet leaves the remaining rows on the wire; the
/// connection drains them before its next command.
pub struct ResultReader<'a, S: PacketStream> {
    client: &'a mut Client<S>,
    columns: Arc<[ColumnDefinition]>,
    binary: bool,
    description: String,
    row: Option<Row>,
    loaded: bool,
    out_params: bool,
    rows_read: u64,
}

impl<S: PacketStream> std::fmt::Debug for ResultReader<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultReader")
            .field("columns", &self.columns.len())
            .field("binary", &self.binary)
            .field("loaded", &self.loaded)
            .field("rows_read", &self.rows_read)
            .finish_non_exhaustive()
    }
}

impl<'a, S: PacketStream> ResultReader<'a, S> {
    pub(crate) fn new(
        client: &'a mut Client<S>,
        columns: Arc<[ColumnDefinition]>,
        binary: bool,
        description: String,
    ) -> Self {
        Self {
            client,
            columns,
            binary,
            description,
            row: None,
            loaded: false,
            out_params: false,
            rows_read: 0,
        }
    }

    /// Shared column definitions, reusable for later results of the same
    /// command shape.
    pub fn column_definitions(&self) -> Arc<[ColumnDefinition]> {
        Arc::clone(&self.columns)
    }

    /// All rows read and the final status applied to the connection.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// The final status announced output parameters.
    pub fn has_out_params(&self) -> bool {
        self.out_params
    }

    /// Warning count; final once the reader is loaded.
    pub fn warnings(&self) -> u16 {
        self.client.context().warnings()
    }

    /// Advance to the next row. Returns `false` once the terminal packet
    /// has been read.
    pub async fn next(&mut self) -> Result<bool, Error> {
        if self.loaded {
            self.row = None;
            return Ok(false);
        }
        let packet = match self.client.framer_mut().read_packet().await {
            Ok(packet) => packet,
            Err(e) => {
                // the stream is unusable, nothing left to drain
                self.loaded = true;
                self.row = None;
                return Err(e);
            }
        };

        if packet.first() == Some(&0xFF) {
            self.loaded = true;
            self.row = None;
            return Err(server_error(&packet, &self.description));
        }
        if self.client.is_terminal(&packet) {
            let status = self.client.apply_terminal(&packet)?;
            self.loaded = true;
            self.out_params = status & server_status::SERVER_PS_OUT_PARAMS != 0;
            self.row = None;
            return Ok(false);
        }

        match self.row.as_mut() {
            Some(row) => row.reset(packet)?,
            None => self.row = Some(Row::new(Arc::clone(&self.columns), packet, self.binary)?),
        }
        self.rows_read += 1;
        Ok(true)
    }

    /// Move the current row out; the cursor is left before the next row.
    pub fn take_row(&mut self) -> Option<Row> {
        self.row.take()
    }

    /// Read every remaining row into an in-memory [`ResultSet`].
    pub async fn buffer(mut self) -> Result<ResultSet, Error> {
        let mut rows = VecDeque::new();
        while self.next().await? {
            if let Some(row) = self.row.take() {
                rows.push_back(row.into_data());
            }
        }
        Ok(ResultSet {
            columns: Arc::clone(&self.columns),
            binary: self.binary,
            rows,
            current: None,
        })
    }

    /// Finish the result, draining unread rows so the connection can take
    /// the next command.
    pub async fn close(mut self) -> Result<(), Error> {
        self.row = None;
        if self.loaded {
            return Ok(());
        }
        debug!(rows_read = self.rows_read, "draining unread result rows");
        let drained = self.client.skip_rows(&self.description).await;
        self.loaded = true;
        drained.map_err(streaming_error)
    }
}

impl<S: PacketStream> RowAccess for ResultReader<'_, S> {
    fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    fn current_row(&mut self) -> Result<&mut Row, Error> {
        self.row.as_mut().ok_or_else(wrong_row_position)
    }
}

impl<S: PacketStream> Drop for ResultReader<'_, S> {
    fn drop(&mut self) {
        if !self.loaded {
            self.client.set_pending_result();
        }
    }
}

/// A fully read result held in memory; moving through it does no I/O.
#[derive(Debug, Clone)]
pub struct ResultSet {
    columns: Arc<[ColumnDefinition]>,
    binary: bool,
    rows: VecDeque<Vec<u8>>,
    current: Option<Row>,
}

impl ResultSet {
    /// A result holding exactly one row that was read elsewhere.
    pub fn from_row(columns: Arc<[ColumnDefinition]>, data: Vec<u8>, binary: bool) -> Self {
        Self::from_rows(columns, vec![data], binary)
    }

    pub fn from_rows(columns: Arc<[ColumnDefinition]>, rows: Vec<Vec<u8>>, binary: bool) -> Self {
        Self {
            columns,
            binary,
            rows: rows.into(),
            current: None,
        }
    }

    /// Rows not yet visited.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    pub fn next(&mut self) -> Result<bool, Error> {
        let Some(data) = self.rows.pop_front() else {
            self.current = None;
            return Ok(false);
        };
        match self.current.as_mut() {
            Some(row) => row.reset(data)?,
            None => self.current = Some(Row::new(Arc::clone(&self.columns), data, self.binary)?),
        }
        Ok(true)
    }
}

impl RowAccess for ResultSet {
    fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    fn current_row(&mut self) -> Result<&mut Row, Error> {
        self.current.as_mut().ok_or_else(wrong_row_position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::FieldType;
    use crate::testing::{self, ColumnSpec};

    fn columns() -> Arc<[ColumnDefinition]> {
        [
            ColumnSpec::new("id", FieldType::LongLong).table("t", "a"),
            ColumnSpec::new("label", FieldType::VarString).table("t", "a"),
        ]
        .iter()
        .map(|c| ColumnDefinition::parse(c.encode(false), false).unwrap())
        .collect()
    }

    #[test]
    fn test_from_row_needs_next() {
        let mut rs = ResultSet::from_row(columns(), testing::str_row(&[Some("5"), Some("x")]), false);
        let err = rs.get::<i64>(1).unwrap_err();
        assert_eq!(err.to_string(), "wrong row position");

        assert!(rs.next().unwrap());
        assert_eq!(rs.get::<i64>(1).unwrap(), Some(5));
        assert_eq!(rs.get_by_label::<String>("a.label").unwrap().as_deref(), Some("x"));
        assert!(!rs.next().unwrap());
        assert!(rs.get::<i64>(1).is_err());
    }

    #[test]
    fn test_index_and_label_errors() {
        let mut rs = ResultSet::from_rows(
            columns(),
            vec![
                testing::str_row(&[Some("1"), None]),
                testing::str_row(&[Some("2"), Some("b")]),
            ],
            false,
        );
        assert_eq!(rs.remaining(), 2);
        assert!(rs.next().unwrap());
        assert!(rs.is_null(2).unwrap());

        let err = rs.get_value(0).unwrap_err();
        assert_eq!(err.to_string(), "Wrong index position. Is 0 but must be in 1-2 range");
        let err = rs.get_value(3).unwrap_err();
        assert_eq!(err.to_string(), "Wrong index position. Is 3 but must be in 1-2 range");

        let err = rs.find_column("nope").unwrap_err();
        assert_eq!(err.to_string(), "Unknown label 'nope'. Possible value id,label");
        assert_eq!(rs.find_column("LABEL").unwrap(), 2);

        assert!(rs.next().unwrap());
        assert_eq!(rs.get_value(1).unwrap(), Value::BigInt(2));
        assert_eq!(rs.remaining(), 0);
    }

    #[test]
    fn test_streaming_error_state() {
        let err = streaming_error(Error::Timeout);
        assert_eq!(err.sqlstate(), Some("08000"));
        assert!(err.to_string().contains("Error while streaming resultSet data"));
    }
}
