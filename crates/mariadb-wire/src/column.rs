//! Column metadata.
//!
//! A [`ColumnDefinition`] keeps the raw metadata packet and the offsets of
//! its name fields; names are decoded only when asked for.

#![allow(clippy::cast_possible_truncation)]

use mariadb_wire_core::Error;

use crate::decoder::ColumnDecoder;
use crate::protocol::{PacketReader, charset, truncated};

/// Server field type codes (`MYSQL_TYPE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    /// DECIMAL (MYSQL_TYPE_DECIMAL)
    Decimal = 0x00,
    /// TINYINT (MYSQL_TYPE_TINY)
    Tiny = 0x01,
    /// SMALLINT (MYSQL_TYPE_SHORT)
    Short = 0x02,
    /// INT (MYSQL_TYPE_LONG)
    Long = 0x03,
    /// FLOAT (MYSQL_TYPE_FLOAT)
    Float = 0x04,
    /// DOUBLE (MYSQL_TYPE_DOUBLE)
    Double = 0x05,
    /// NULL (MYSQL_TYPE_NULL)
    Null = 0x06,
    /// TIMESTAMP (MYSQL_TYPE_TIMESTAMP)
    Timestamp = 0x07,
    /// BIGINT (MYSQL_TYPE_LONGLONG)
    LongLong = 0x08,
    /// MEDIUMINT (MYSQL_TYPE_INT24)
    Int24 = 0x09,
    /// DATE (MYSQL_TYPE_DATE)
    Date = 0x0A,
    /// TIME (MYSQL_TYPE_TIME)
    Time = 0x0B,
    /// DATETIME (MYSQL_TYPE_DATETIME)
    DateTime = 0x0C,
    /// YEAR (MYSQL_TYPE_YEAR)
    Year = 0x0D,
    /// NEWDATE (MYSQL_TYPE_NEWDATE) - internal use
    NewDate = 0x0E,
    /// VARCHAR (MYSQL_TYPE_VARCHAR)
    VarChar = 0x0F,
    /// BIT (MYSQL_TYPE_BIT)
    Bit = 0x10,
    /// JSON (MYSQL_TYPE_JSON)
    Json = 0xF5,
    /// NEWDECIMAL (MYSQL_TYPE_NEWDECIMAL)
    NewDecimal = 0xF6,
    /// ENUM (MYSQL_TYPE_ENUM)
    Enum = 0xF7,
    /// SET (MYSQL_TYPE_SET)
    Set = 0xF8,
    /// TINYBLOB (MYSQL_TYPE_TINY_BLOB)
    TinyBlob = 0xF9,
    /// MEDIUMBLOB (MYSQL_TYPE_MEDIUM_BLOB)
    MediumBlob = 0xFA,
    /// LONGBLOB (MYSQL_TYPE_LONG_BLOB)
    LongBlob = 0xFB,
    /// BLOB (MYSQL_TYPE_BLOB)
    Blob = 0xFC,
    /// VARCHAR (MYSQL_TYPE_VAR_STRING)
    VarString = 0xFD,
    /// CHAR (MYSQL_TYPE_STRING)
    String = 0xFE,
    /// GEOMETRY (MYSQL_TYPE_GEOMETRY)
    Geometry = 0xFF,
}

impl FieldType {
    /// Parse a field type from a byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 | 0x11 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B | 0x13 => FieldType::Time,
            0x0C | 0x12 => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFF => FieldType::Geometry,
            _ => FieldType::String, // Unknown types treated as string
        }
    }

    /// Character-like types whose length counts bytes of the column charset.
    #[must_use]
    pub const fn is_char_sized(self) -> bool {
        matches!(
            self,
            FieldType::VarChar
                | FieldType::Json
                | FieldType::Enum
                | FieldType::Set
                | FieldType::VarString
                | FieldType::String
                | FieldType::Blob
                | FieldType::TinyBlob
                | FieldType::MediumBlob
                | FieldType::LongBlob
        )
    }

    /// Width of the value in the binary row encoding, if fixed.
    #[must_use]
    pub const fn binary_width(self) -> Option<usize> {
        match self {
            FieldType::Tiny => Some(1),
            FieldType::Short | FieldType::Year => Some(2),
            FieldType::Long | FieldType::Int24 | FieldType::Float => Some(4),
            FieldType::LongLong | FieldType::Double => Some(8),
            FieldType::Null => Some(0),
            _ => None,
        }
    }

    /// Temporal types carry a one-byte length prefix in binary rows.
    #[must_use]
    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            FieldType::Date
                | FieldType::Time
                | FieldType::DateTime
                | FieldType::Timestamp
                | FieldType::NewDate
        )
    }

    /// Get the type name as a string.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Decimal | FieldType::NewDecimal => "DECIMAL",
            FieldType::Tiny => "TINYINT",
            FieldType::Short => "SMALLINT",
            FieldType::Long => "INT",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Null => "NULL",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::LongLong => "BIGINT",
            FieldType::Int24 => "MEDIUMINT",
            FieldType::Date | FieldType::NewDate => "DATE",
            FieldType::Time => "TIME",
            FieldType::DateTime => "DATETIME",
            FieldType::Year => "YEAR",
            FieldType::VarChar | FieldType::VarString => "VARCHAR",
            FieldType::Bit => "BIT",
            FieldType::Json => "JSON",
            FieldType::Enum => "ENUM",
            FieldType::Set => "SET",
            FieldType::TinyBlob => "TINYBLOB",
            FieldType::MediumBlob => "MEDIUMBLOB",
            FieldType::LongBlob => "LONGBLOB",
            FieldType::Blob => "BLOB",
            FieldType::String => "CHAR",
            FieldType::Geometry => "GEOMETRY",
        }
    }
}

/// Column flags in result set metadata.
#[allow(dead_code)]
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const MULTIPLE_KEY: u16 = 8;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const AUTO_INCREMENT: u16 = 512;
    pub const TIMESTAMP: u16 = 1024;
    pub const SET: u16 = 2048;
    pub const NO_DEFAULT_VALUE: u16 = 4096;
    pub const ON_UPDATE_NOW: u16 = 8192;
    pub const NUM: u16 = 32768;
}

const SCHEMA: usize = 0;
const TABLE: usize = 1;
const TABLE_ALIAS: usize = 2;
const NAME: usize = 3;
const NAME_ALIAS: usize = 4;

/// One column of a result set.
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    raw: Vec<u8>,
    string_pos: [usize; 5],
    charset: u16,
    length: u32,
    field_type: FieldType,
    flags: u16,
    decimals: u8,
    ext_type_name: Option<String>,
    ext_type_format: Option<String>,
    decoder: ColumnDecoder,
}

impl ColumnDefinition {
    /// Parse a column definition packet.
    ///
    /// `extended_type_info` is set when MariaDB's extended type info
    /// capability was negotiated; the packet then carries a type name/format
    /// block after the original column name.
    pub fn parse(raw: Vec<u8>, extended_type_info: bool) -> Result<Self, Error> {
        let mut r = PacketReader::new(&raw);
        let mut string_pos = [0usize; 5];

        // catalog ("def")
        if !r.skip_lenenc_bytes() {
            return Err(truncated("column catalog", &raw));
        }
        // wire order: schema, table alias, table, column alias, column
        for slot in [SCHEMA, TABLE_ALIAS, TABLE, NAME_ALIAS, NAME] {
            string_pos[slot] = r.pos();
            if !r.skip_lenenc_bytes() {
                return Err(truncated("column names", &raw));
            }
        }

        let mut ext_type_name = None;
        let mut ext_type_format = None;
        if extended_type_info {
            let block = r
                .read_lenenc_bytes()
                .ok_or_else(|| truncated("extended type info", &raw))?;
            let mut ext = PacketReader::new(block);
            while !ext.is_empty() {
                let kind = ext.read_u8();
                let value = ext.read_lenenc_string();
                match (kind, value) {
                    (Some(0), Some(v)) => ext_type_name = Some(v),
                    (Some(1), Some(v)) => ext_type_format = Some(v),
                    (Some(_), Some(_)) => {}
                    _ => return Err(truncated("extended type info", &raw)),
                }
            }
        }

        // length of fixed fields (0x0C)
        r.read_lenenc_int()
            .ok_or_else(|| truncated("column fixed fields", &raw))?;
        let charset = r.read_u16_le().ok_or_else(|| truncated("charset", &raw))?;
        let length = r.read_u32_le().ok_or_else(|| truncated("column length", &raw))?;
        let type_byte = r.read_u8().ok_or_else(|| truncated("column type", &raw))?;
        let flags = r.read_u16_le().ok_or_else(|| truncated("column flags", &raw))?;
        let decimals = r.read_u8().ok_or_else(|| truncated("decimals", &raw))?;

        let field_type = FieldType::from_u8(type_byte);
        let decoder = ColumnDecoder::select(field_type, charset, ext_type_name.as_deref());

        Ok(Self {
            raw,
            string_pos,
            charset,
            length,
            field_type,
            flags,
            decimals,
            ext_type_name,
            ext_type_format,
            decoder,
        })
    }

    fn string_at(&self, slot: usize) -> String {
        let mut r = PacketReader::new(&self.raw);
        r.set_pos(self.string_pos[slot]);
        r.read_lenenc_string().unwrap_or_default()
    }

    /// Schema (database) name.
    pub fn schema(&self) -> String {
        self.string_at(SCHEMA)
    }

    /// Original table name.
    pub fn table(&self) -> String {
        self.string_at(TABLE)
    }

    /// Table alias as written in the query.
    pub fn table_alias(&self) -> String {
        self.string_at(TABLE_ALIAS)
    }

    /// Original column name.
    pub fn column_name(&self) -> String {
        self.string_at(NAME)
    }

    /// Column alias (the label used for lookup).
    pub fn column_alias(&self) -> String {
        self.string_at(NAME_ALIAS)
    }

    /// Declared column length.
    pub fn column_length(&self) -> u32 {
        self.length
    }

    /// Server field type.
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Collation id.
    pub fn charset(&self) -> u16 {
        self.charset
    }

    /// Number of decimals.
    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Raw flag bits (see [`column_flags`]).
    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// MariaDB extended type name (e.g. `uuid`, `inet6`), if sent.
    pub fn ext_type_name(&self) -> Option<&str> {
        self.ext_type_name.as_deref()
    }

    /// MariaDB extended type format (e.g. `json`), if sent.
    pub fn ext_type_format(&self) -> Option<&str> {
        self.ext_type_format.as_deref()
    }

    /// Decoder family selected for this column.
    pub fn decoder(&self) -> ColumnDecoder {
        self.decoder
    }

    pub fn is_signed(&self) -> bool {
        self.flags & column_flags::UNSIGNED == 0
    }

    pub fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    pub fn is_auto_increment(&self) -> bool {
        self.flags & column_flags::AUTO_INCREMENT != 0
    }

    pub fn has_default(&self) -> bool {
        self.flags & column_flags::NO_DEFAULT_VALUE == 0
    }

    /// Binary collation. The BINARY flag is not used: `CHAR BINARY`
    /// carries it but is still a string.
    pub fn is_binary(&self) -> bool {
        self.charset == u16::from(charset::BINARY)
    }

    /// Length in characters for character types, bytes otherwise.
    pub fn display_size(&self) -> u32 {
        if !self.is_binary() && self.field_type.is_char_sized() {
            return self.length / charset::max_char_len(self.charset);
        }
        self.length
    }

    /// Type name including the length for character and blob types.
    pub fn data_type_name(&self) -> String {
        if self.field_type.is_char_sized() {
            return format!("{}({})", self.field_type.name(), self.display_size());
        }
        self.field_type.name().to_string()
    }

    /// Numeric precision. For DECIMAL the sign and the dot are excluded.
    pub fn precision(&self) -> u32 {
        match self.field_type {
            FieldType::Decimal | FieldType::NewDecimal => {
                let reserved = match (self.is_signed(), self.decimals > 0) {
                    (true, true) => 2,
                    (true, false) | (false, true) => 1,
                    (false, false) => 0,
                };
                self.length.saturating_sub(reserved)
            }
            _ => self.length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ColumnSpec;

    #[test]
    fn test_field_type_from_u8() {
        assert_eq!(FieldType::from_u8(0x01), FieldType::Tiny);
        assert_eq!(FieldType::from_u8(0x12), FieldType::DateTime);
        assert_eq!(FieldType::from_u8(0xF6), FieldType::NewDecimal);
        assert_eq!(FieldType::from_u8(0x42), FieldType::String);
    }

    #[test]
    fn test_parse_names_lazily() {
        let raw = ColumnSpec::new("alias", FieldType::Long)
            .schema("db")
            .table("t_real", "t")
            .org_name("id")
            .encode(false);
        let col = ColumnDefinition::parse(raw, false).unwrap();
        assert_eq!(col.schema(), "db");
        assert_eq!(col.table(), "t_real");
        assert_eq!(col.table_alias(), "t");
        assert_eq!(col.column_name(), "id");
        assert_eq!(col.column_alias(), "alias");
        assert_eq!(col.field_type(), FieldType::Long);
        assert!(col.is_signed());
    }

    #[test]
    fn test_parse_extended_type_info() {
        let raw = ColumnSpec::new("u", FieldType::String)
            .ext_type(Some("uuid"), None)
            .encode(true);
        let col = ColumnDefinition::parse(raw, true).unwrap();
        assert_eq!(col.ext_type_name(), Some("uuid"));
        assert_eq!(col.ext_type_format(), None);
        assert_eq!(col.decoder(), ColumnDecoder::Uuid);
    }

    #[test]
    fn test_truncated_packet() {
        let mut raw = ColumnSpec::new("x", FieldType::Long).encode(false);
        raw.truncate(raw.len() - 3);
        assert!(ColumnDefinition::parse(raw, false).is_err());
    }

    #[test]
    fn test_flags() {
        let raw = ColumnSpec::new("id", FieldType::LongLong)
            .flags(column_flags::PRIMARY_KEY | column_flags::AUTO_INCREMENT | column_flags::UNSIGNED)
            .encode(false);
        let col = ColumnDefinition::parse(raw, false).unwrap();
        assert!(col.is_primary_key());
        assert!(col.is_auto_increment());
        assert!(!col.is_signed());
        assert!(col.has_default());

        let raw = ColumnSpec::new("v", FieldType::Long)
            .flags(column_flags::NO_DEFAULT_VALUE)
            .encode(false);
        assert!(!ColumnDefinition::parse(raw, false).unwrap().has_default());
    }

    #[test]
    fn test_display_size_and_type_name() {
        let raw = ColumnSpec::new("s", FieldType::VarString)
            .charset(45)
            .length(40)
            .encode(false);
        let col = ColumnDefinition::parse(raw, false).unwrap();
        assert_eq!(col.display_size(), 10);
        assert_eq!(col.data_type_name(), "VARCHAR(10)");

        let raw = ColumnSpec::new("b", FieldType::Blob)
            .charset(63)
            .length(65535)
            .encode(false);
        let col = ColumnDefinition::parse(raw, false).unwrap();
        assert!(col.is_binary());
        assert_eq!(col.display_size(), 65535);
        assert_eq!(col.data_type_name(), "BLOB(65535)");
    }

    #[test]
    fn test_decimal_precision() {
        let signed = ColumnSpec::new("d", FieldType::NewDecimal)
            .length(12)
            .decimals(2)
            .encode(false);
        assert_eq!(ColumnDefinition::parse(signed, false).unwrap().precision(), 10);

        let unsigned = ColumnSpec::new("d", FieldType::NewDecimal)
            .length(12)
            .decimals(0)
            .flags(column_flags::UNSIGNED)
            .encode(false);
        assert_eq!(ColumnDefinition::parse(unsigned, false).unwrap().precision(), 12);

        let int = ColumnSpec::new("i", FieldType::Long).length(11).encode(false);
        assert_eq!(ColumnDefinition::parse(int, false).unwrap().precision(), 11);
    }
}
