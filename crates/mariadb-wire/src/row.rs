//! Field access within one result row.
//!
//! Fields are located lazily: the first access walks from the start of the
//! row up to the requested field and caches every offset it passes, so
//! later accesses in any order are direct.

use std::sync::Arc;

use mariadb_wire_core::{DateTime, Error, Time, Value};

use crate::column::ColumnDefinition;
use crate::decoder::TargetKind;
use crate::protocol::reader::NULL_LENGTH;
use crate::protocol::{PacketReader, protocol_error, truncated};

/// Rust types a column can be read into.
pub trait FromColumn: Sized {
    /// Decoder target used for this type.
    const TARGET: TargetKind;

    fn from_value(value: Value) -> Result<Self, Error>;
}

macro_rules! from_column {
    ($($ty:ty => $target:ident),* $(,)?) => {
        $(
            impl FromColumn for $ty {
                const TARGET: TargetKind = TargetKind::$target;

                fn from_value(value: Value) -> Result<Self, Error> {
                    <$ty>::try_from(value)
                }
            }
        )*
    };
}

from_column! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => String,
    Vec<u8> => Bytes,
    DateTime => DateTime,
    Time => Time,
    serde_json::Value => Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Null,
    Field { start: usize, len: usize },
}

/// One row of a result set, text or binary layout.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[ColumnDefinition]>,
    data: Vec<u8>,
    binary: bool,
    slots: Vec<Slot>,
    pos: usize,
}

impl Row {
    /// Wrap a row packet. Binary rows start with `0x00` and a null bitmap.
    pub fn new(columns: Arc<[ColumnDefinition]>, data: Vec<u8>, binary: bool) -> Result<Self, Error> {
        let mut row = Self {
            columns,
            data: Vec::new(),
            binary,
            slots: Vec::new(),
            pos: 0,
        };
        row.reset(data)?;
        Ok(row)
    }

    /// Replace the row bytes, forgetting every cached field offset.
    pub(crate) fn reset(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.slots.clear();
        self.pos = if self.binary {
            let start = 1 + null_bitmap_len(self.columns.len());
            if data.first() != Some(&0x00) || data.len() < start {
                return Err(truncated("binary row header", &data));
            }
            start
        } else {
            0
        };
        self.data = data;
        Ok(())
    }

    /// The raw row packet.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Position of the column with this label, see [`find_column`].
    pub fn column_index(&self, label: &str) -> Option<usize> {
        find_column(&self.columns, label)
    }

    fn check_index(&self, index: usize) -> Result<(), Error> {
        if index < self.columns.len() {
            Ok(())
        } else {
            Err(Error::Usage(format!(
                "Column index {} out of range ({} columns)",
                index,
                self.columns.len()
            )))
        }
    }

    fn slot(&mut self, index: usize) -> Result<Slot, Error> {
        self.check_index(index)?;
        while self.slots.len() <= index {
            let i = self.slots.len();
            let slot = if self.binary {
                self.next_binary_slot(i)?
            } else {
                self.next_text_slot()?
            };
            self.slots.push(slot);
        }
        Ok(self.slots[index])
    }

    fn next_text_slot(&mut self) -> Result<Slot, Error> {
        let mut r = PacketReader::new(&self.data);
        r.set_pos(self.pos);
        let len = r
            .read_length()
            .ok_or_else(|| truncated("field length", &self.data))?;
        if len == NULL_LENGTH {
            self.pos = r.pos();
            return Ok(Slot::Null);
        }
        self.field_at(r.pos(), len)
    }

    fn next_binary_slot(&mut self, index: usize) -> Result<Slot, Error> {
        let bit = index + 2;
        if self.data[1 + bit / 8] & (1 << (bit % 8)) != 0 {
            return Ok(Slot::Null);
        }

        let field_type = self.columns[index].field_type();
        if let Some(width) = field_type.binary_width() {
            return self.field_at(self.pos, width as i64);
        }
        let mut r = PacketReader::new(&self.data);
        r.set_pos(self.pos);
        let len = if field_type.is_temporal() {
            r.read_u8().map(i64::from)
        } else {
            r.read_length()
        }
        .ok_or_else(|| truncated("field length", &self.data))?;
        if len < 0 {
            return Err(protocol_error("NULL length marker in binary row"));
        }
        self.field_at(r.pos(), len)
    }

    fn field_at(&mut self, start: usize, len: i64) -> Result<Slot, Error> {
        let len = usize::try_from(len).map_err(|_| truncated("field", &self.data))?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| truncated("field", &self.data))?;
        self.pos = end;
        Ok(Slot::Field { start, len })
    }

    /// Raw bytes of a field, `None` for SQL NULL.
    pub fn raw(&mut self, index: usize) -> Result<Option<&[u8]>, Error> {
        match self.slot(index)? {
            Slot::Null => Ok(None),
            Slot::Field { start, len } => Ok(Some(&self.data[start..start + len])),
        }
    }

    pub fn is_null(&mut self, index: usize) -> Result<bool, Error> {
        Ok(self.slot(index)? == Slot::Null)
    }

    /// The field as the column's natural value.
    pub fn get_value(&mut self, index: usize) -> Result<Value, Error> {
        self.check_index(index)?;
        let binary = self.binary;
        let columns = Arc::clone(&self.columns);
        let col = &columns[index];
        match self.raw(index)? {
            None => Ok(Value::Null),
            Some(data) => col.decoder().decode_default(col, data, binary),
        }
    }

    /// The field converted to `target`; NULL stays [`Value::Null`].
    pub fn get_as(&mut self, index: usize, target: TargetKind) -> Result<Value, Error> {
        self.check_index(index)?;
        let binary = self.binary;
        let columns = Arc::clone(&self.columns);
        let col = &columns[index];
        match self.raw(index)? {
            None => Ok(Value::Null),
            Some(data) => col.decoder().decode_as(col, target, data, binary),
        }
    }

    /// Typed access; `Ok(None)` for SQL NULL.
    pub fn get<T: FromColumn>(&mut self, index: usize) -> Result<Option<T>, Error> {
        match self.get_as(index, T::TARGET)? {
            Value::Null => Ok(None),
            value => T::from_value(value).map(Some),
        }
    }

    /// Every field as its natural value.
    pub fn values(&mut self) -> Result<Vec<Value>, Error> {
        (0..self.columns.len()).map(|i| self.get_value(i)).collect()
    }
}

/// Bytes of the binary row null bitmap (two reserved bits first).
pub fn null_bitmap_len(columns: usize) -> usize {
    (columns + 9) / 8
}

/// Case-insensitive label lookup over `alias` and `table.alias`, where the
/// table part is the table alias or, if empty, the table name. The first
/// match wins.
pub fn find_column(columns: &[ColumnDefinition], label: &str) -> Option<usize> {
    columns
        .iter()
        .position(|c| c.column_alias().eq_ignore_ascii_case(label))
        .or_else(|| {
            columns.iter().position(|c| {
                let alias = c.table_alias();
                let table = if alias.is_empty() { c.table() } else { alias };
                !table.is_empty()
                    && format!("{}.{}", table, c.column_alias()).eq_ignore_ascii_case(label)
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::FieldType;
    use crate::protocol::PacketWriter;
    use crate::testing::{self, ColumnSpec};

    fn columns(specs: &[ColumnSpec]) -> Arc<[ColumnDefinition]> {
        specs
            .iter()
            .map(|s| ColumnDefinition::parse(s.encode(false), false).unwrap())
            .collect()
    }

    fn text_columns() -> Arc<[ColumnDefinition]> {
        columns(&[
            ColumnSpec::new("id", FieldType::Long).table("users", "u"),
            ColumnSpec::new("name", FieldType::VarString).table("users", "u"),
            ColumnSpec::new("score", FieldType::Double).table("users", ""),
        ])
    }

    #[test]
    fn test_text_row_access() {
        let data = testing::str_row(&[Some("7"), None, Some("1.5")]);
        let mut row = Row::new(text_columns(), data, false).unwrap();

        // out of order first
        assert_eq!(row.get::<f64>(2).unwrap(), Some(1.5));
        assert_eq!(row.get::<i64>(0).unwrap(), Some(7));
        assert!(row.is_null(1).unwrap());
        assert_eq!(row.get::<String>(1).unwrap(), None);
        assert_eq!(row.get_value(1).unwrap(), Value::Null);
        assert_eq!(row.raw(0).unwrap(), Some(&b"7"[..]));
        assert_eq!(
            row.values().unwrap(),
            vec![Value::Int(7), Value::Null, Value::Double(1.5)]
        );
        assert!(matches!(row.get_value(3), Err(Error::Usage(_))));
    }

    #[test]
    fn test_null_short_circuits_every_getter() {
        let cols = text_columns();
        let data = testing::str_row(&[None, None, None]);
        let mut row = Row::new(cols, data, false).unwrap();
        for i in 0..3 {
            assert_eq!(row.get::<bool>(i).unwrap(), None);
            assert_eq!(row.get::<i8>(i).unwrap(), None);
            assert_eq!(row.get::<DateTime>(i).unwrap(), None);
            assert_eq!(row.get::<Vec<u8>>(i).unwrap(), None);
            assert_eq!(row.get_as(i, TargetKind::Uuid).unwrap(), Value::Null);
        }
    }

    #[test]
    fn test_reset_forgets_offsets() {
        let mut row = Row::new(text_columns(), testing::str_row(&[Some("1"), Some("a"), None]), false).unwrap();
        assert_eq!(row.get::<String>(1).unwrap().as_deref(), Some("a"));
        row.reset(testing::str_row(&[Some("22"), Some("bcd"), Some("0")])).unwrap();
        assert_eq!(row.get::<String>(1).unwrap().as_deref(), Some("bcd"));
        assert_eq!(row.get::<i32>(0).unwrap(), Some(22));
    }

    #[test]
    fn test_truncated_text_row() {
        let mut data = testing::str_row(&[Some("7"), Some("abcdef")]);
        data.truncate(data.len() - 2);
        let mut row = Row::new(text_columns(), data, false).unwrap();
        assert_eq!(row.get::<i32>(0).unwrap(), Some(7));
        assert!(matches!(row.get_value(1), Err(Error::Protocol(_))));
        assert!(matches!(row.get_value(2), Err(Error::Protocol(_))));
    }

    fn binary_columns() -> Arc<[ColumnDefinition]> {
        columns(&[
            ColumnSpec::new("a", FieldType::Tiny),
            ColumnSpec::new("b", FieldType::VarString),
            ColumnSpec::new("c", FieldType::LongLong),
            ColumnSpec::new("d", FieldType::DateTime),
            ColumnSpec::new("e", FieldType::Long),
            ColumnSpec::new("f", FieldType::Double),
            ColumnSpec::new("g", FieldType::Short),
        ])
    }

    #[test]
    fn test_binary_row_layout() {
        assert_eq!(null_bitmap_len(1), 1);
        assert_eq!(null_bitmap_len(6), 1);
        assert_eq!(null_bitmap_len(7), 2);

        let mut w = PacketWriter::new();
        w.write_u8(0x00);
        // column e (index 4) is NULL: bit 6 of the first byte
        w.write_u8(1 << 6);
        w.write_u8(0);
        w.write_u8(0xFF); // a = -1
        w.write_lenenc_string("hi");
        w.write_u64_le(1 << 40);
        w.write_u8(7);
        w.write_u16_le(2024);
        w.write_u8(5);
        w.write_u8(6);
        w.write_u8(7);
        w.write_u8(8);
        w.write_u8(9);
        w.write_bytes(&2.5f64.to_le_bytes());
        w.write_u16_le(300);
        let mut row = Row::new(binary_columns(), w.into_bytes(), true).unwrap();

        assert_eq!(row.get::<i16>(6).unwrap(), Some(300));
        assert_eq!(row.get::<i8>(0).unwrap(), Some(-1));
        assert_eq!(row.get::<String>(1).unwrap().as_deref(), Some("hi"));
        assert_eq!(row.get::<i64>(2).unwrap(), Some(1 << 40));
        assert_eq!(
            row.get::<DateTime>(3).unwrap(),
            Some(DateTime::date(2024, 5, 6).and_time(7, 8, 9))
        );
        assert_eq!(row.get::<i32>(4).unwrap(), None);
        assert_eq!(row.get::<f64>(5).unwrap(), Some(2.5));
    }

    #[test]
    fn test_binary_row_header_checked() {
        assert!(Row::new(binary_columns(), vec![0x00, 0x00], true).is_err());
        assert!(Row::new(binary_columns(), vec![0x01, 0x00, 0x00], true).is_err());
    }

    #[test]
    fn test_find_column() {
        let cols = text_columns();
        assert_eq!(find_column(&cols, "NAME"), Some(1));
        assert_eq!(find_column(&cols, "u.id"), Some(0));
        assert_eq!(find_column(&cols, "users.score"), Some(2));
        // the alias hides the table name
        assert_eq!(find_column(&cols, "users.id"), None);
        assert_eq!(find_column(&cols, "missing"), None);
    }
}
