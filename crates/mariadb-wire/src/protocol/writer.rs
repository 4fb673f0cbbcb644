//! Packet writing utilities.
//!
//! This module provides utilities for writing protocol data types
//! including length-encoded integers, strings and escaped SQL literals.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::PacketHeader;

/// A writer for protocol data.
///
/// Writers created with [`PacketWriter::packet`] reserve the 4 header bytes
/// up front so the framer can fill them in place and send the frame without
/// copying the payload.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buffer: Vec<u8>,
    header: bool,
}

impl PacketWriter {
    /// Create a plain writer with default capacity (no reserved header).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a plain writer with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            header: false,
        }
    }

    /// Create a writer for one outgoing packet, header space reserved.
    pub fn packet() -> Self {
        let mut buffer = Vec::with_capacity(256);
        buffer.extend_from_slice(&[0u8; PacketHeader::SIZE]);
        Self {
            buffer,
            header: true,
        }
    }

    fn payload_start(&self) -> usize {
        if self.header { PacketHeader::SIZE } else { 0 }
    }

    /// Payload length (excluding any reserved header).
    pub fn len(&self) -> usize {
        self.buffer.len() - self.payload_start()
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear the payload, keeping the reserved header.
    pub fn clear(&mut self) {
        let start = self.payload_start();
        self.buffer.truncate(start);
    }

    /// The payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[self.payload_start()..]
    }

    /// Whether the 4 header bytes were reserved.
    pub(crate) fn has_header(&self) -> bool {
        self.header
    }

    /// Header plus payload, when the header was reserved.
    pub(crate) fn frame_mut(&mut self) -> Option<&mut [u8]> {
        if self.header {
            Some(&mut self.buffer)
        } else {
            None
        }
    }

    /// Consume the writer and return the payload.
    pub fn into_bytes(mut self) -> Vec<u8> {
        let start = self.payload_start();
        self.buffer.drain(..start);
        self.buffer
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Write a u16 (little-endian).
    pub fn write_u16_le(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a u24 (little-endian, 3 bytes).
    pub fn write_u24_le(&mut self, value: u32) {
        self.buffer.push((value & 0xFF) as u8);
        self.buffer.push(((value >> 8) & 0xFF) as u8);
        self.buffer.push(((value >> 16) & 0xFF) as u8);
    }

    /// Write a u32 (little-endian).
    pub fn write_u32_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a u64 (little-endian).
    pub fn write_u64_le(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a length-encoded integer.
    ///
    /// - 0x00-0xFA: 1-byte value
    /// - 0xFC + 2 bytes: values up to 2^16
    /// - 0xFD + 3 bytes: values up to 2^24
    /// - 0xFE + 8 bytes: values up to 2^64
    pub fn write_lenenc_int(&mut self, value: u64) {
        if value < 251 {
            self.write_u8(value as u8);
        } else if value < 0x10000 {
            self.write_u8(0xFC);
            self.write_u16_le(value as u16);
        } else if value < 0x0100_0000 {
            self.write_u8(0xFD);
            self.write_u24_le(value as u32);
        } else {
            self.write_u8(0xFE);
            self.write_u64_le(value);
        }
    }

    /// Write a length-encoded string.
    pub fn write_lenenc_string(&mut self, s: &str) {
        self.write_lenenc_bytes(s.as_bytes());
    }

    /// Write a length-encoded byte slice.
    pub fn write_lenenc_bytes(&mut self, data: &[u8]) {
        self.write_lenenc_int(data.len() as u64);
        self.buffer.extend_from_slice(data);
    }

    /// Write a null-terminated string.
    pub fn write_null_string(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
        self.buffer.push(0);
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Write an ASCII/UTF-8 string without any terminator.
    pub fn write_str(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
    }

    /// Write zeros (padding).
    pub fn write_zeros(&mut self, count: usize) {
        self.buffer.resize(self.buffer.len() + count, 0);
    }

    /// Write a string as the body of a quoted SQL literal.
    pub fn write_str_escaped(&mut self, s: &str, no_backslash_escapes: bool) {
        self.write_bytes_escaped(s.as_bytes(), no_backslash_escapes);
    }

    /// Write bytes as the body of a quoted SQL literal.
    ///
    /// With backslash escapes enabled, `'`, `"`, `\` and NUL get a `\`
    /// prefix. Under NO_BACKSLASH_ESCAPES only `'` is doubled.
    pub fn write_bytes_escaped(&mut self, data: &[u8], no_backslash_escapes: bool) {
        self.buffer.reserve(data.len() + data.len() / 8);
        if no_backslash_escapes {
            for &b in data {
                if b == b'\'' {
                    self.buffer.push(b'\'');
                }
                self.buffer.push(b);
            }
        } else {
            for &b in data {
                if matches!(b, b'\'' | b'\\' | b'"' | 0) {
                    self.buffer.push(b'\\');
                }
                self.buffer.push(b);
            }
        }
    }
}
