//! Column value decoding.
//!
//! Every column gets one [`ColumnDecoder`] picked from its server type. A
//! decoder turns the raw field bytes into the column's natural [`Value`]
//! (`decode_default`) or into an explicitly requested [`TargetKind`]
//! (`decode_as`). Text rows carry every value as its SQL text; binary rows
//! carry numerics and temporals in fixed-width little-endian form.

#![allow(clippy::cast_possible_truncation)]

use mariadb_wire_core::error::TypeError;
use mariadb_wire_core::value::{format_uuid, parse_uuid};
use mariadb_wire_core::{DateTime, Error, Time, Value};

use crate::column::{ColumnDefinition, FieldType};
use crate::protocol::{PacketReader, charset};

/// Host type a caller asks a column to be decoded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U64,
    F32,
    F64,
    Decimal,
    String,
    Bytes,
    DateTime,
    Time,
    Uuid,
    Json,
}

impl TargetKind {
    /// Name used in type errors.
    pub const fn name(self) -> &'static str {
        match self {
            TargetKind::Bool => "bool",
            TargetKind::I8 => "i8",
            TargetKind::I16 => "i16",
            TargetKind::I32 => "i32",
            TargetKind::I64 => "i64",
            TargetKind::U64 => "u64",
            TargetKind::F32 => "f32",
            TargetKind::F64 => "f64",
            TargetKind::Decimal => "decimal",
            TargetKind::String => "String",
            TargetKind::Bytes => "bytes",
            TargetKind::DateTime => "DateTime",
            TargetKind::Time => "Time",
            TargetKind::Uuid => "UUID",
            TargetKind::Json => "JSON",
        }
    }

    fn integer_range(self) -> Option<(i128, i128)> {
        match self {
            TargetKind::I8 => Some((i128::from(i8::MIN), i128::from(i8::MAX))),
            TargetKind::I16 => Some((i128::from(i16::MIN), i128::from(i16::MAX))),
            TargetKind::I32 => Some((i128::from(i32::MIN), i128::from(i32::MAX))),
            TargetKind::I64 => Some((i128::from(i64::MIN), i128::from(i64::MAX))),
            TargetKind::U64 => Some((0, i128::from(u64::MAX))),
            _ => None,
        }
    }
}

/// Decoder family for one server type category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDecoder {
    /// TINYINT, SMALLINT, MEDIUMINT, INT, BIGINT, YEAR
    Integer,
    /// FLOAT
    Float,
    /// DOUBLE
    Double,
    /// DECIMAL, kept as its exact text
    Decimal,
    /// DATE, DATETIME, TIMESTAMP
    DateTime,
    /// TIME
    Time,
    /// Character types
    String,
    /// Blobs, geometry and binary-collation strings
    Binary,
    /// Strings tagged with the `uuid` extended type
    Uuid,
    /// JSON
    Json,
    /// BIT(n)
    Bit,
}

impl ColumnDecoder {
    /// Pick the decoder for a column.
    pub fn select(field_type: FieldType, charset_id: u16, ext_type_name: Option<&str>) -> Self {
        let binary = charset_id == u16::from(charset::BINARY);
        match field_type {
            FieldType::Tiny
            | FieldType::Short
            | FieldType::Long
            | FieldType::LongLong
            | FieldType::Int24
            | FieldType::Year => ColumnDecoder::Integer,
            FieldType::Float => ColumnDecoder::Float,
            FieldType::Double => ColumnDecoder::Double,
            FieldType::Decimal | FieldType::NewDecimal => ColumnDecoder::Decimal,
            FieldType::Date | FieldType::NewDate | FieldType::DateTime | FieldType::Timestamp => {
                ColumnDecoder::DateTime
            }
            FieldType::Time => ColumnDecoder::Time,
            FieldType::Bit => ColumnDecoder::Bit,
            FieldType::Json => ColumnDecoder::Json,
            FieldType::TinyBlob
            | FieldType::MediumBlob
            | FieldType::LongBlob
            | FieldType::Blob
            | FieldType::Geometry => {
                if binary {
                    ColumnDecoder::Binary
                } else {
                    ColumnDecoder::String
                }
            }
            FieldType::VarChar
            | FieldType::VarString
            | FieldType::String
            | FieldType::Enum
            | FieldType::Set => {
                if ext_type_name.is_some_and(|n| n.eq_ignore_ascii_case("uuid")) {
                    ColumnDecoder::Uuid
                } else if binary {
                    ColumnDecoder::Binary
                } else {
                    ColumnDecoder::String
                }
            }
            FieldType::Null => ColumnDecoder::String,
        }
    }

    /// Decode a non-NULL field into the column's natural value.
    ///
    /// `data` holds only the field's bytes (no length prefix).
    pub fn decode_default(
        self,
        col: &ColumnDefinition,
        data: &[u8],
        binary: bool,
    ) -> Result<Value, Error> {
        match self {
            ColumnDecoder::Integer => decode_integer(col, data, binary),
            ColumnDecoder::Float => {
                if binary {
                    PacketReader::new(data)
                        .read_f32_le()
                        .map(Value::Float)
                        .ok_or_else(|| short_field(col))
                } else {
                    let s = ascii(col, data)?;
                    s.trim()
                        .parse::<f32>()
                        .map(Value::Float)
                        .map_err(|_| invalid(col, TargetKind::F32, "FLOAT", s))
                }
            }
            ColumnDecoder::Double => {
                if binary {
                    PacketReader::new(data)
                        .read_f64_le()
                        .map(Value::Double)
                        .ok_or_else(|| short_field(col))
                } else {
                    let s = ascii(col, data)?;
                    s.trim()
                        .parse::<f64>()
                        .map(Value::Double)
                        .map_err(|_| invalid(col, TargetKind::F64, "DOUBLE", s))
                }
            }
            ColumnDecoder::Decimal => {
                let s = ascii(col, data)?;
                if parse_decimal(s).is_none() {
                    return Err(invalid(col, TargetKind::Decimal, "DECIMAL", s));
                }
                Ok(Value::Decimal(s.to_string()))
            }
            ColumnDecoder::DateTime => {
                if binary {
                    binary_datetime(col, data).map(Value::DateTime)
                } else {
                    let s = ascii(col, data)?;
                    DateTime::parse(s)
                        .map(Value::DateTime)
                        .ok_or_else(|| invalid(col, TargetKind::DateTime, col.field_type().name(), s))
                }
            }
            ColumnDecoder::Time => {
                if binary {
                    binary_time(col, data).map(Value::Time)
                } else {
                    let s = ascii(col, data)?;
                    Time::parse(s)
                        .map(Value::Time)
                        .ok_or_else(|| invalid(col, TargetKind::Time, "TIME", s))
                }
            }
            ColumnDecoder::String => Ok(Value::Text(String::from_utf8_lossy(data).into_owned())),
            ColumnDecoder::Binary | ColumnDecoder::Bit => Ok(Value::Bytes(data.to_vec())),
            ColumnDecoder::Uuid => {
                let s = ascii(col, data)?;
                parse_uuid(s)
                    .map(Value::Uuid)
                    .ok_or_else(|| invalid(col, TargetKind::Uuid, "UUID", s))
            }
            ColumnDecoder::Json => serde_json::from_slice(data)
                .map(Value::Json)
                .map_err(|_| invalid(col, TargetKind::Json, "JSON", &String::from_utf8_lossy(data))),
        }
    }

    /// Decode a non-NULL field into the requested host type.
    ///
    /// Conversions that would lose information or reinterpret bytes fail
    /// with a type error.
    pub fn decode_as(
        self,
        col: &ColumnDefinition,
        target: TargetKind,
        data: &[u8],
        binary: bool,
    ) -> Result<Value, Error> {
        // text rows already hold the exact server rendering
        if target == TargetKind::String
            && !binary
            && !matches!(self, ColumnDecoder::Binary | ColumnDecoder::Bit)
        {
            return Ok(Value::Text(String::from_utf8_lossy(data).into_owned()));
        }
        if matches!(self, ColumnDecoder::Decimal)
            && matches!(
                target,
                TargetKind::DateTime | TargetKind::Time | TargetKind::Uuid | TargetKind::Bytes
            )
        {
            return Err(mismatch(col, target));
        }
        let native = self.decode_default(col, data, binary)?;
        convert(self, col, native, target)
    }
}

fn convert(
    decoder: ColumnDecoder,
    col: &ColumnDefinition,
    native: Value,
    target: TargetKind,
) -> Result<Value, Error> {
    match target {
        TargetKind::Bool => {
            let b = match &native {
                Value::Float(f) => *f != 0.0,
                Value::Double(d) => *d != 0.0,
                Value::Decimal(s) => !is_decimal_zero(s),
                Value::Text(s) => match s.trim() {
                    "" | "0" => false,
                    t if t.eq_ignore_ascii_case("false") => false,
                    t if t.eq_ignore_ascii_case("true") => true,
                    t => match parse_decimal(t) {
                        Some(_) => !is_decimal_zero(t),
                        None => return Err(invalid(col, target, "VARCHAR", s)),
                    },
                },
                Value::Bytes(b) if decoder == ColumnDecoder::Bit => b.iter().any(|&x| x != 0),
                other => match integer_of(other) {
                    Some(n) => n != 0,
                    None => return Err(mismatch(col, target)),
                },
            };
            Ok(Value::Bool(b))
        }
        TargetKind::I8 | TargetKind::I16 | TargetKind::I32 | TargetKind::I64 | TargetKind::U64 => {
            let n = match &native {
                Value::Float(f) => float_to_integer(col, target, f64::from(*f))?,
                Value::Double(d) => float_to_integer(col, target, *d)?,
                Value::Decimal(s) => parse_decimal(s)
                    .ok_or_else(|| invalid(col, target, "DECIMAL", s))?,
                Value::Text(s) => parse_decimal(s.trim())
                    .ok_or_else(|| invalid(col, target, "VARCHAR", s))?,
                Value::Bytes(b) if decoder == ColumnDecoder::Bit => {
                    if b.len() > 8 {
                        return Err(mismatch(col, target));
                    }
                    i128::from(b.iter().fold(0u64, |acc, &x| (acc << 8) | u64::from(x)))
                }
                other => integer_of(other).ok_or_else(|| mismatch(col, target))?,
            };
            integer_value(col, target, n)
        }
        TargetKind::F32 | TargetKind::F64 => {
            let v = match &native {
                Value::Float(f) => f64::from(*f),
                Value::Double(d) => *d,
                Value::Decimal(s) | Value::Text(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| invalid(col, target, col.field_type().name(), s))?,
                other => match integer_of(other) {
                    Some(n) => n as f64,
                    None => return Err(mismatch(col, target)),
                },
            };
            if target == TargetKind::F32 {
                Ok(Value::Float(v as f32))
            } else {
                Ok(Value::Double(v))
            }
        }
        TargetKind::Decimal => match native {
            Value::Decimal(s) => Ok(Value::Decimal(s)),
            Value::Text(s) => {
                let t = s.trim();
                if parse_decimal(t).is_some() || t.parse::<f64>().is_ok_and(f64::is_finite) {
                    Ok(Value::Decimal(t.to_string()))
                } else {
                    Err(invalid(col, target, "VARCHAR", &s))
                }
            }
            Value::Float(f) if f.is_finite() => Ok(Value::Decimal(f.to_string())),
            Value::Double(d) if d.is_finite() => Ok(Value::Decimal(d.to_string())),
            other => integer_of(&other)
                .map(|n| Value::Decimal(n.to_string()))
                .ok_or_else(|| mismatch(col, target)),
        },
        TargetKind::String => Ok(Value::Text(match native {
            Value::Text(s) | Value::Decimal(s) => s,
            Value::DateTime(dt) if col.field_type() == FieldType::Date => {
                format!("{:04}-{:02}-{:02}", dt.year, dt.month, dt.day)
            }
            Value::DateTime(dt) => dt.to_string(),
            Value::Time(t) => t.to_string(),
            Value::Uuid(u) => format_uuid(&u),
            Value::Json(j) => j.to_string(),
            Value::Bytes(b) if decoder == ColumnDecoder::Bit => {
                if b.len() > 8 {
                    return Err(mismatch(col, target));
                }
                b.iter().fold(0u64, |acc, &x| (acc << 8) | u64::from(x)).to_string()
            }
            Value::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
            Value::Float(f) => f.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Bool(b) => if b { "1" } else { "0" }.to_string(),
            other => match integer_of(&other) {
                Some(n) => n.to_string(),
                None => return Err(mismatch(col, target)),
            },
        })),
        TargetKind::Bytes => match native {
            Value::Bytes(b) => Ok(Value::Bytes(b)),
            Value::Text(s) => Ok(Value::Bytes(s.into_bytes())),
            Value::Json(j) => Ok(Value::Bytes(j.to_string().into_bytes())),
            Value::Uuid(u) => Ok(Value::Bytes(u.to_vec())),
            _ => Err(mismatch(col, target)),
        },
        TargetKind::DateTime => match native {
            Value::DateTime(dt) => Ok(Value::DateTime(dt)),
            Value::Text(s) => DateTime::parse(&s)
                .map(Value::DateTime)
                .ok_or_else(|| invalid(col, target, "VARCHAR", &s)),
            _ => Err(mismatch(col, target)),
        },
        TargetKind::Time => match native {
            Value::Time(t) => Ok(Value::Time(t)),
            Value::DateTime(dt) if col.field_type() != FieldType::Date => Ok(Value::Time(Time {
                negative: false,
                hours: u32::from(dt.hour),
                minutes: dt.minute,
                seconds: dt.second,
                microseconds: dt.microsecond,
            })),
            Value::Text(s) => Time::parse(&s)
                .map(Value::Time)
                .ok_or_else(|| invalid(col, target, "VARCHAR", &s)),
            _ => Err(mismatch(col, target)),
        },
        TargetKind::Uuid => match native {
            Value::Uuid(u) => Ok(Value::Uuid(u)),
            Value::Text(s) => parse_uuid(&s)
                .map(Value::Uuid)
                .ok_or_else(|| invalid(col, target, "VARCHAR", &s)),
            Value::Bytes(b) if decoder == ColumnDecoder::Binary => <[u8; 16]>::try_from(b.as_slice())
                .map(Value::Uuid)
                .map_err(|_| mismatch(col, target)),
            _ => Err(mismatch(col, target)),
        },
        TargetKind::Json => match native {
            Value::Json(j) => Ok(Value::Json(j)),
            Value::Text(s) => serde_json::from_str(&s)
                .map(Value::Json)
                .map_err(|_| invalid(col, target, "VARCHAR", &s)),
            _ => Err(mismatch(col, target)),
        },
    }
}

fn decode_integer(col: &ColumnDefinition, data: &[u8], binary: bool) -> Result<Value, Error> {
    let signed = col.is_signed();
    let field_type = col.field_type();
    if binary {
        let mut r = PacketReader::new(data);
        let value = match (field_type, signed) {
            (FieldType::Tiny, true) => r.read_i8().map(Value::TinyInt),
            (FieldType::Tiny, false) => r.read_u8().map(|v| Value::SmallInt(i16::from(v))),
            (FieldType::Short, true) => r.read_i16_le().map(Value::SmallInt),
            (FieldType::Year, _) => {
                let year = r.read_u16_le().ok_or_else(|| short_field(col))?;
                return i16::try_from(year)
                    .map(Value::SmallInt)
                    .map_err(|_| invalid(col, TargetKind::I16, "YEAR", &year.to_string()));
            }
            (FieldType::Short, false) => r.read_u16_le().map(|v| Value::Int(i32::from(v))),
            // INT24 travels in four bytes and always fits i32
            (FieldType::Int24, _) | (FieldType::Long, true) => r.read_i32_le().map(Value::Int),
            (FieldType::Long, false) => r.read_u32_le().map(|v| Value::BigInt(i64::from(v))),
            (_, true) => r.read_i64_le().map(Value::BigInt),
            (_, false) => r.read_u64_le().map(Value::UnsignedBigInt),
        };
        return value.ok_or_else(|| short_field(col));
    }

    let s = ascii(col, data)?;
    let n: i128 = s
        .trim()
        .parse()
        .map_err(|_| invalid(col, TargetKind::I64, field_type.name(), s))?;
    let value = match (field_type, signed) {
        (FieldType::Tiny, true) => i8::try_from(n).ok().map(Value::TinyInt),
        (FieldType::Tiny | FieldType::Year, _) | (FieldType::Short, true) => {
            i16::try_from(n).ok().map(Value::SmallInt)
        }
        (FieldType::Short, false) | (FieldType::Int24, _) | (FieldType::Long, true) => {
            i32::try_from(n).ok().map(Value::Int)
        }
        (FieldType::Long, false) | (_, true) => i64::try_from(n).ok().map(Value::BigInt),
        (_, false) => u64::try_from(n).ok().map(Value::UnsignedBigInt),
    };
    value.ok_or_else(|| invalid(col, TargetKind::I64, field_type.name(), s))
}

fn binary_datetime(col: &ColumnDefinition, data: &[u8]) -> Result<DateTime, Error> {
    let mut r = PacketReader::new(data);
    let mut dt = DateTime::default();
    if data.is_empty() {
        return Ok(dt);
    }
    let short = || short_field(col);
    dt.year = r.read_u16_le().ok_or_else(short)?;
    dt.month = r.read_u8().ok_or_else(short)?;
    dt.day = r.read_u8().ok_or_else(short)?;
    if data.len() >= 7 {
        dt.hour = r.read_u8().ok_or_else(short)?;
        dt.minute = r.read_u8().ok_or_else(short)?;
        dt.second = r.read_u8().ok_or_else(short)?;
    }
    if data.len() >= 11 {
        dt.microsecond = r.read_u32_le().ok_or_else(short)?;
    }
    Ok(dt)
}

fn binary_time(col: &ColumnDefinition, data: &[u8]) -> Result<Time, Error> {
    let mut r = PacketReader::new(data);
    let mut t = Time::default();
    if data.is_empty() {
        return Ok(t);
    }
    let short = || short_field(col);
    t.negative = r.read_u8().ok_or_else(short)? == 1;
    let days = r.read_u32_le().ok_or_else(short)?;
    let hours = r.read_u8().ok_or_else(short)?;
    t.hours = days
        .checked_mul(24)
        .and_then(|h| h.checked_add(u32::from(hours)))
        .ok_or_else(|| {
            crate::protocol::protocol_error(format!(
                "TIME value of column '{}' has {} days, more hours than fit in u32",
                col.column_alias(),
                days
            ))
        })?;
    t.minutes = r.read_u8().ok_or_else(short)?;
    t.seconds = r.read_u8().ok_or_else(short)?;
    if data.len() >= 12 {
        t.microseconds = r.read_u32_le().ok_or_else(short)?;
    }
    Ok(t)
}

fn integer_of(value: &Value) -> Option<i128> {
    match value {
        Value::Bool(b) => Some(i128::from(*b)),
        Value::TinyInt(v) => Some(i128::from(*v)),
        Value::SmallInt(v) => Some(i128::from(*v)),
        Value::Int(v) => Some(i128::from(*v)),
        Value::BigInt(v) => Some(i128::from(*v)),
        Value::UnsignedBigInt(v) => Some(i128::from(*v)),
        _ => None,
    }
}

fn integer_value(col: &ColumnDefinition, target: TargetKind, n: i128) -> Result<Value, Error> {
    let Some((min, max)) = target.integer_range() else {
        return Err(mismatch(col, target));
    };
    if n < min || n > max {
        return Err(type_error(col, target, format!("out of range value {}", n)));
    }
    Ok(match target {
        TargetKind::I8 => Value::TinyInt(n as i8),
        TargetKind::I16 => Value::SmallInt(n as i16),
        TargetKind::I32 => Value::Int(n as i32),
        TargetKind::U64 => Value::UnsignedBigInt(n as u64),
        _ => Value::BigInt(n as i64),
    })
}

fn float_to_integer(col: &ColumnDefinition, target: TargetKind, v: f64) -> Result<i128, Error> {
    if !v.is_finite() || v.fract() != 0.0 || v.abs() >= 1.0e38 {
        return Err(type_error(col, target, format!("value {} with fractional part or out of range", v)));
    }
    Ok(v as i128)
}

/// Parse an exact decimal literal, truncating its fraction toward zero.
fn parse_decimal(s: &str) -> Option<i128> {
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let n = if int_part.is_empty() {
        0
    } else {
        int_part.parse::<i128>().ok()?
    };
    Some(if negative { -n } else { n })
}

fn is_decimal_zero(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0' | b'.' | b'-' | b'+'))
}

fn ascii<'a>(col: &ColumnDefinition, data: &'a [u8]) -> Result<&'a str, Error> {
    std::str::from_utf8(data)
        .map_err(|_| type_error(col, TargetKind::String, "non UTF-8 data".to_string()))
}

fn type_error(col: &ColumnDefinition, target: TargetKind, actual: String) -> Error {
    Error::Type(TypeError {
        expected: target.name(),
        actual,
        column: Some(col.column_alias()),
    })
}

fn mismatch(col: &ColumnDefinition, target: TargetKind) -> Error {
    type_error(col, target, format!("data type {}", col.data_type_name()))
}

fn invalid(col: &ColumnDefinition, target: TargetKind, kind: &str, text: &str) -> Error {
    type_error(col, target, format!("{} value '{}'", kind, text))
}

fn short_field(col: &ColumnDefinition) -> Error {
    crate::protocol::protocol_error(format!(
        "field of column '{}' is shorter than its {} encoding",
        col.column_alias(),
        col.field_type().name()
    ))
}
