//! Framed duplex channel
//!
//! Two unidirectional byte streams carrying fixed-size words and byte blobs.
//! Sends deliver every byte or mark the channel broken. Receives retry partial
//! reads until the destination is full; when the stream ends early the rest of
//! the destination is filled with a poison byte and the channel is marked
//! broken. A poisoned read is never a reliable error signal on its own, so
//! callers check [`DuplexChannel::is_broken`] after each exchange.

use byteorder::{ByteOrder, LittleEndian};
use std::io::{self, Read, Write};

/// Poison byte used by the bridge side.
pub const HOST_POISON: u8 = 0xFF;

/// Poison byte used by the worker side. An EOF on the command stream reads as
/// command 0 (exit).
pub const WORKER_POISON: u8 = 0x00;

pub struct DuplexChannel<R, W> {
    reader: R,
    writer: W,
    poison: u8,
    broken: bool,
}

impl<R: Read, W: Write> DuplexChannel<R, W> {
    pub fn new(reader: R, writer: W, poison: u8) -> Self {
        Self {
            reader,
            writer,
            poison,
            broken: false,
        }
    }

    pub fn host(reader: R, writer: W) -> Self {
        Self::new(reader, writer, HOST_POISON)
    }

    pub fn worker(reader: R, writer: W) -> Self {
        Self::new(reader, writer, WORKER_POISON)
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Marks the channel dead without touching the streams.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Returns `false` if the bytes could not all be delivered.
    pub fn send_bytes(&mut self, data: &[u8]) -> bool {
        if self.broken {
            return false;
        }
        if data.is_empty() {
            return true;
        }

        let delivered = self
            .writer
            .write_all(data)
            .and_then(|()| self.writer.flush());

        if let Err(e) = delivered {
            tracing::debug!("channel write failed: {}", e);
            self.broken = true;
        }
        !self.broken
    }

    pub fn send_u32(&mut self, value: u32) -> bool {
        let mut word = [0u8; 4];
        LittleEndian::write_u32(&mut word, value);
        self.send_bytes(&word)
    }

    /// Fills `buf` completely. Returns `false` if any of it is poison.
    pub fn receive_into(&mut self, buf: &mut [u8]) -> bool {
        if self.broken {
            buf.fill(self.poison);
            return false;
        }

        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.broken = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("channel read failed: {}", e);
                    self.broken = true;
                    break;
                }
            }
        }

        if filled < buf.len() {
            buf[filled..].fill(self.poison);
            return false;
        }
        true
    }

    pub fn receive_u32(&mut self) -> u32 {
        let mut word = [0u8; 4];
        self.receive_into(&mut word);
        LittleEndian::read_u32(&word)
    }

    pub fn receive_vec(&mut self, len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        self.receive_into(&mut data);
        data
    }

    /// Reads `len` bytes as a string. The wire carries no terminator.
    pub fn receive_string(&mut self, len: usize) -> String {
        String::from_utf8_lossy(&self.receive_vec(len)).into_owned()
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}
