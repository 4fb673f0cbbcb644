//! Packet framing over a [`PacketStream`].
//!
//! Owns the sequence counter shared by reads and writes. Every read sets the
//! counter to the sequence byte received; every write uses counter + 1.

#![allow(clippy::cast_possible_truncation)]

use mariadb_wire_core::Error;
use mariadb_wire_core::error::{ConnectionError, ConnectionErrorKind, PacketTooLargeError};
use tracing::{Level, trace};

use crate::hex;
use crate::protocol::{MAX_PACKET_SIZE, PacketHeader, PacketWriter, protocol_error};
use crate::stream::PacketStream;

const READ_CHUNK: usize = 16 * 1024;

/// Length-prefixed, sequenced frames over a byte stream.
#[derive(Debug)]
pub struct PacketFramer<S> {
    stream: S,
    sequence: u8,
    inbuf: Vec<u8>,
    start: usize,
    end: usize,
    scratch: Vec<u8>,
    max_allowed_packet: Option<u32>,
    max_query_size_to_log: usize,
    permit_trace: bool,
    thread_log: String,
}

impl<S: PacketStream> PacketFramer<S> {
    /// Create a framer. `max_allowed_packet` bounds outgoing payloads.
    pub fn new(stream: S, max_query_size_to_log: usize, max_allowed_packet: Option<u32>) -> Self {
        Self {
            stream,
            sequence: 0,
            inbuf: vec![0u8; READ_CHUNK],
            start: 0,
            end: 0,
            scratch: Vec::new(),
            max_allowed_packet,
            max_query_size_to_log,
            permit_trace: true,
            thread_log: String::new(),
        }
    }

    /// The underlying stream.
    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Reset the sequence counter for a new command.
    pub fn init_sequence(&mut self) {
        self.sequence = 0xFF;
    }

    /// Current sequence number (last read or written).
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Force the sequence counter, e.g. to continue a LOCAL INFILE exchange.
    pub fn set_sequence(&mut self, sequence: u8) {
        self.sequence = sequence;
    }

    /// Allow or hide payload dumps for the frames written next.
    pub fn permit_trace(&mut self, permit: bool) {
        self.permit_trace = permit;
    }

    /// Bound outgoing payloads from now on.
    pub fn set_max_allowed_packet(&mut self, max: Option<u32>) {
        self.max_allowed_packet = max;
    }

    /// Tag trace lines with the server's connection id.
    pub fn set_server_thread_id(&mut self, id: u32) {
        self.thread_log = format!("conn={}", id);
    }

    fn next_sequence(&mut self) -> u8 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Make sure `n` bytes are buffered, reading from the stream as needed.
    async fn fill(&mut self, n: usize) -> Result<(), Error> {
        if self.end - self.start >= n {
            return Ok(());
        }
        if self.start > 0 {
            self.inbuf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if self.inbuf.len() < n {
            self.inbuf.resize(n, 0);
        }
        while self.end < n {
            let read = self
                .stream
                .read_some(&mut self.inbuf[self.end..])
                .await
                .map_err(|e| io_error("Failed to read packet", e))?;
            if read == 0 {
                return Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Disconnected,
                    message: format!(
                        "unexpected end of stream, read {} bytes from {} (socket was closed by server)",
                        self.end, n
                    ),
                    source: None,
                }));
            }
            self.end += read;
        }
        Ok(())
    }

    /// Give back memory grown for a large packet once it has been consumed.
    fn release_buffers(&mut self) {
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
            if self.inbuf.len() > READ_CHUNK {
                self.inbuf.truncate(READ_CHUNK);
                self.inbuf.shrink_to_fit();
            }
        }
        if self.scratch.capacity() > READ_CHUNK {
            self.scratch = Vec::new();
        }
    }

    async fn read_header(&mut self) -> Result<PacketHeader, Error> {
        self.fill(PacketHeader::SIZE).await?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.inbuf[self.start..self.start + PacketHeader::SIZE]);
        self.start += PacketHeader::SIZE;
        let header = PacketHeader::from_bytes(&bytes);
        self.sequence = header.sequence_id;
        Ok(header)
    }

    /// Consume `len` buffered bytes, returning their start offset.
    async fn take(&mut self, len: usize) -> Result<usize, Error> {
        self.fill(len).await?;
        let at = self.start;
        self.start += len;
        Ok(at)
    }

    fn trace_read(&self, header: PacketHeader, payload: &[u8]) {
        if tracing::enabled!(Level::TRACE) {
            trace!(
                "read: {}\n{}",
                self.thread_log,
                hex::dump_frame(&header.to_bytes(), payload, self.max_query_size_to_log)
            );
        }
    }

    /// Read one logical packet into a scratch buffer owned by the framer.
    ///
    /// The slice is only valid until the next read. Single frames are
    /// returned straight from the input buffer; continued packets are
    /// reassembled in the scratch buffer.
    pub async fn read_reusable(&mut self) -> Result<&[u8], Error> {
        self.release_buffers();
        let header = self.read_header().await?;
        let len = header.payload_length as usize;
        let at = self.take(len).await?;
        self.trace_read(header, &self.inbuf[at..at + len]);
        if len < MAX_PACKET_SIZE {
            return Ok(&self.inbuf[at..at + len]);
        }

        self.scratch.clear();
        self.scratch.extend_from_slice(&self.inbuf[at..at + len]);
        self.read_continuation().await?;
        Ok(&self.scratch)
    }

    /// Read one logical packet into an independent allocation.
    pub async fn read_packet(&mut self) -> Result<Vec<u8>, Error> {
        self.release_buffers();
        let header = self.read_header().await?;
        let len = header.payload_length as usize;
        let at = self.take(len).await?;
        self.trace_read(header, &self.inbuf[at..at + len]);
        if len < MAX_PACKET_SIZE {
            return Ok(self.inbuf[at..at + len].to_vec());
        }

        self.scratch.clear();
        self.scratch.extend_from_slice(&self.inbuf[at..at + len]);
        self.read_continuation().await?;
        Ok(std::mem::take(&mut self.scratch))
    }

    /// Append continuation frames to the scratch buffer until a short frame.
    async fn read_continuation(&mut self) -> Result<(), Error> {
        loop {
            let header = self.read_header().await?;
            let len = header.payload_length as usize;
            let at = self.take(len).await?;
            self.trace_read(header, &self.inbuf[at..at + len]);
            self.scratch.extend_from_slice(&self.inbuf[at..at + len]);
            if len < MAX_PACKET_SIZE {
                return Ok(());
            }
        }
    }

    /// Read and discard one logical packet.
    pub async fn skip_packet(&mut self) -> Result<(), Error> {
        self.read_reusable().await.map(|_| ())
    }

    /// Frame and send the payload staged in `writer`.
    ///
    /// Fails before writing anything when the payload exceeds the
    /// configured `max_allowed_packet`.
    pub async fn write_packet(&mut self, writer: &mut PacketWriter) -> Result<(), Error> {
        let payload_len = writer.len();
        if let Some(max) = self.max_allowed_packet {
            if payload_len as u64 > u64::from(max) {
                return Err(Error::PacketTooLarge(PacketTooLargeError {
                    size: payload_len,
                    max: max as usize,
                }));
            }
        }

        let mut staged = None;
        let target = if writer.has_header() {
            writer
        } else {
            let mut copy = PacketWriter::packet();
            copy.write_bytes(writer.as_bytes());
            staged.insert(copy)
        };
        let Some(frame) = target.frame_mut() else {
            return Err(protocol_error("packet writer has no header space"));
        };

        let first_len = payload_len.min(MAX_PACKET_SIZE);
        self.sequence = self.sequence.wrapping_add(1);
        let header = PacketHeader {
            payload_length: first_len as u32,
            sequence_id: self.sequence,
        };
        frame[..PacketHeader::SIZE].copy_from_slice(&header.to_bytes());
        let first_end = PacketHeader::SIZE + first_len;
        self.stream
            .write_all(&frame[..first_end])
            .await
            .map_err(|e| io_error("Failed to write packet", e))?;
        self.trace_write(&header.to_bytes(), &frame[PacketHeader::SIZE..first_end]);

        if first_len == MAX_PACKET_SIZE {
            let mut offset = first_end;
            loop {
                let chunk = (frame.len() - offset).min(MAX_PACKET_SIZE);
                let header = PacketHeader {
                    payload_length: chunk as u32,
                    sequence_id: self.next_sequence(),
                };
                self.stream
                    .write_all(&header.to_bytes())
                    .await
                    .map_err(|e| io_error("Failed to write packet", e))?;
                self.stream
                    .write_all(&frame[offset..offset + chunk])
                    .await
                    .map_err(|e| io_error("Failed to write packet", e))?;
                self.trace_write(&header.to_bytes(), &frame[offset..offset + chunk]);
                offset += chunk;
                if chunk < MAX_PACKET_SIZE {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Send a zero-length frame with the next sequence number.
    pub async fn write_empty_packet(&mut self) -> Result<(), Error> {
        let header = PacketHeader {
            payload_length: 0,
            sequence_id: self.next_sequence(),
        }
        .to_bytes();
        self.stream
            .write_all(&header)
            .await
            .map_err(|e| io_error("Failed to write packet", e))?;
        self.trace_write(&header, &[]);
        Ok(())
    }

    fn trace_write(&self, header: &[u8; 4], payload: &[u8]) {
        if tracing::enabled!(Level::TRACE) {
            if self.permit_trace {
                trace!(
                    "send: {}\n{}",
                    self.thread_log,
                    hex::dump_frame(header, payload, self.max_query_size_to_log)
                );
            } else {
                trace!(
                    "send: content length={} {} com=<hidden>",
                    payload.len(),
                    self.thread_log
                );
            }
        }
    }

    /// Flush the stream.
    pub async fn flush(&mut self) -> Result<(), Error> {
        self.stream
            .flush()
            .await
            .map_err(|e| io_error("Failed to flush stream", e))
    }
}

fn io_error(context: &str, e: std::io::Error) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message: format!("{}: {}", context, e),
        source: Some(Box::new(e)),
    })
}
