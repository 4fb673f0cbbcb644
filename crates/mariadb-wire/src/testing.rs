//! In-memory server double for unit tests.

#![allow(clippy::cast_possible_truncation)]

use std::io;

use crate::column::FieldType;
use crate::protocol::{PacketHeader, PacketWriter, charset};
use crate::stream::PacketStream;

/// Scripted stream: serves `input` and records everything written.
#[derive(Debug, Default)]
pub struct MockStream {
    input: Vec<u8>,
    pos: usize,
    chunk: usize,
    output: Vec<u8>,
    secure: bool,
}

impl MockStream {
    pub fn new(input: Vec<u8>) -> Self {
        Self {
            input,
            pos: 0,
            chunk: usize::MAX,
            output: Vec::new(),
            secure: false,
        }
    }

    /// Hand out at most `n` bytes per read.
    pub fn with_chunk(mut self, n: usize) -> Self {
        self.chunk = n.max(1);
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn written(&self) -> &[u8] {
        &self.output
    }

    /// Bytes of the script not consumed yet.
    pub fn unread(&self) -> usize {
        self.input.len() - self.pos
    }
}

impl PacketStream for MockStream {
    fn read_some(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> {
        let n = buf.len().min(self.chunk).min(self.input.len() - self.pos);
        buf[..n].copy_from_slice(&self.input[self.pos..self.pos + n]);
        self.pos += n;
        std::future::ready(Ok(n))
    }

    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<()>> {
        self.output.extend_from_slice(buf);
        std::future::ready(Ok(()))
    }

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> {
        std::future::ready(Ok(()))
    }

    fn is_secure(&self) -> bool {
        self.secure
    }
}

/// Frame a payload with the given sequence number.
pub fn frame(seq: u8, payload: &[u8]) -> Vec<u8> {
    let header = PacketHeader {
        payload_length: payload.len() as u32,
        sequence_id: seq,
    };
    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}

/// Split captured client output back into `(sequence, payload)` frames.
pub fn frames(mut data: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    while data.len() >= 4 {
        let mut header = [0u8; 4];
        header.copy_from_slice(&data[..4]);
        let header = PacketHeader::from_bytes(&header);
        let len = header.payload_length as usize;
        out.push((header.sequence_id, data[4..4 + len].to_vec()));
        data = &data[4 + len..];
    }
    out
}

/// Server response stream builder; numbers frames from 1 per command.
#[derive(Debug, Default)]
pub struct Script {
    bytes: Vec<u8>,
    seq: u8,
}

impl Script {
    pub fn new() -> Self {
        Self { bytes: Vec::new(), seq: 1 }
    }

    /// Continue numbering from `seq`.
    pub fn at(mut self, seq: u8) -> Self {
        self.seq = seq;
        self
    }

    pub fn packet(mut self, payload: &[u8]) -> Self {
        self.bytes.extend(frame(self.seq, payload));
        self.seq = self.seq.wrapping_add(1);
        self
    }

    /// Full result set: count, columns, optional EOF, rows, terminator.
    pub fn result_set(mut self, columns: &[Vec<u8>], rows: &[Vec<u8>], deprecate_eof: bool) -> Self {
        let mut count = PacketWriter::new();
        count.write_lenenc_int(columns.len() as u64);
        self = self.packet(count.as_bytes());
        for col in columns {
            self = self.packet(col);
        }
        if !deprecate_eof {
            self = self.packet(&eof_packet(0, 0x0002));
        }
        for row in rows {
            self = self.packet(row);
        }
        if deprecate_eof {
            self.packet(&ok_eof_packet(0, 0x0002))
        } else {
            self.packet(&eof_packet(0, 0x0002))
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

pub fn ok_packet(affected_rows: u64, last_insert_id: u64, status: u16, warnings: u16) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x00);
    w.write_lenenc_int(affected_rows);
    w.write_lenenc_int(last_insert_id);
    w.write_u16_le(status);
    w.write_u16_le(warnings);
    w.into_bytes()
}

/// OK packet with the 0xFE header that ends a result under deprecated EOF.
pub fn ok_eof_packet(warnings: u16, status: u16) -> Vec<u8> {
    let mut p = ok_packet(0, 0, status, warnings);
    p[0] = 0xFE;
    p
}

pub fn eof_packet(warnings: u16, status: u16) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0xFE);
    w.write_u16_le(warnings);
    w.write_u16_le(status);
    w.into_bytes()
}

pub fn err_packet(code: u16, sql_state: &str, message: &str) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0xFF);
    w.write_u16_le(code);
    w.write_u8(b'#');
    w.write_str(sql_state);
    w.write_str(message);
    w.into_bytes()
}

/// Text protocol row; `None` is SQL NULL.
pub fn text_row(values: &[Option<&[u8]>]) -> Vec<u8> {
    let mut w = PacketWriter::new();
    for v in values {
        match v {
            Some(v) => w.write_lenenc_bytes(v),
            None => w.write_u8(0xFB),
        }
    }
    w.into_bytes()
}

/// Text row from string fields.
pub fn str_row(values: &[Option<&str>]) -> Vec<u8> {
    let bytes: Vec<Option<&[u8]>> = values.iter().map(|v| v.map(str::as_bytes)).collect();
    text_row(&bytes)
}

/// Column definition packet builder.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    name: String,
    org_name: Option<String>,
    schema: String,
    table: String,
    table_alias: String,
    ext_name: Option<String>,
    ext_format: Option<String>,
    charset: u16,
    length: u32,
    field_type: FieldType,
    flags: u16,
    decimals: u8,
}

impl ColumnSpec {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            org_name: None,
            schema: String::new(),
            table: String::new(),
            table_alias: String::new(),
            ext_name: None,
            ext_format: None,
            charset: u16::from(charset::DEFAULT_CHARSET),
            length: 11,
            field_type,
            flags: 0,
            decimals: 0,
        }
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    pub fn table(mut self, table: &str, alias: &str) -> Self {
        self.table = table.to_string();
        self.table_alias = alias.to_string();
        self
    }

    pub fn org_name(mut self, name: &str) -> Self {
        self.org_name = Some(name.to_string());
        self
    }

    pub fn ext_type(mut self, name: Option<&str>, format: Option<&str>) -> Self {
        self.ext_name = name.map(str::to_string);
        self.ext_format = format.map(str::to_string);
        self
    }

    pub fn charset(mut self, charset: u16) -> Self {
        self.charset = charset;
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn decimals(mut self, decimals: u8) -> Self {
        self.decimals = decimals;
        self
    }

    /// Encode the packet; `extended_type_info` adds the MariaDB type block.
    pub fn encode(&self, extended_type_info: bool) -> Vec<u8> {
        let mut w = PacketWriter::new();
        w.write_lenenc_string("def");
        w.write_lenenc_string(&self.schema);
        w.write_lenenc_string(&self.table_alias);
        w.write_lenenc_string(&self.table);
        w.write_lenenc_string(&self.name);
        w.write_lenenc_string(self.org_name.as_deref().unwrap_or(&self.name));
        if extended_type_info {
            let mut ext = PacketWriter::new();
            if let Some(name) = &self.ext_name {
                ext.write_u8(0);
                ext.write_lenenc_string(name);
            }
            if let Some(format) = &self.ext_format {
                ext.write_u8(1);
                ext.write_lenenc_string(format);
            }
            w.write_lenenc_bytes(ext.as_bytes());
        }
        w.write_lenenc_int(0x0C);
        w.write_u16_le(self.charset);
        w.write_u32_le(self.length);
        w.write_u8(self.field_type as u8);
        w.write_u16_le(self.flags);
        w.write_u8(self.decimals);
        w.write_zeros(2);
        w.into_bytes()
    }
}

/// Initial handshake (protocol 10) from a MariaDB server.
pub fn handshake_packet(server_caps: u64, plugin: &str, seed: &[u8; 20]) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(10);
    w.write_null_string("5.5.5-10.11.6-MariaDB");
    w.write_u32_le(42); // connection id
    w.write_bytes(&seed[..8]);
    w.write_u8(0);
    w.write_u16_le((server_caps & 0xFFFF) as u16);
    w.write_u8(charset::DEFAULT_CHARSET);
    w.write_u16_le(0x0002);
    w.write_u16_le(((server_caps >> 16) & 0xFFFF) as u16);
    w.write_u8(21);
    w.write_zeros(6);
    w.write_u32_le((server_caps >> 32) as u32);
    w.write_bytes(&seed[8..]);
    w.write_u8(0);
    w.write_null_string(plugin);
    w.into_bytes()
}
