//! MIDI mailbox between the driver's message thread and the render thread.
//!
//! A fixed-capacity lock-free ring. Producers never block: a full mailbox
//! answers [`MailboxFull`] and leaves its contents untouched. The render
//! thread drains it one entry at a time right before each render.

use crate::protocol::clamp_port;
use crossbeam::queue::ArrayQueue;
use thiserror::Error;

/// Slots allocated by default.
pub const DEFAULT_CAPACITY: usize = 1024;

/// The mailbox had no free slot; the caller decides whether to drop or retry.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("MIDI mailbox is full")]
pub struct MailboxFull;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxEntry {
    /// Packed short message (low 24 bits) for a port.
    Short { port: u32, message: u32 },
    /// System-exclusive payload, copied from the caller.
    SysEx { port: u32, data: Box<[u8]> },
}

impl MailboxEntry {
    pub fn port(&self) -> u32 {
        match self {
            MailboxEntry::Short { port, .. } | MailboxEntry::SysEx { port, .. } => *port,
        }
    }
}

pub struct Mailbox {
    queue: ArrayQueue<MailboxEntry>,
    capacity: usize,
}

impl Mailbox {
    /// A mailbox with `capacity` slots, one of which always stays free.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            queue: ArrayQueue::new(capacity - 1),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn put(&self, entry: MailboxEntry) -> Result<(), MailboxFull> {
        self.queue.push(entry).map_err(|_| MailboxFull)
    }

    pub fn put_message(&self, port: u32, message: u32) -> Result<(), MailboxFull> {
        self.put(MailboxEntry::Short {
            port: clamp_port(port),
            message: message & 0x00FF_FFFF,
        })
    }

    pub fn put_sysex(&self, port: u32, data: &[u8]) -> Result<(), MailboxFull> {
        if self.queue.is_full() {
            return Err(MailboxFull);
        }
        self.put(MailboxEntry::SysEx {
            port: clamp_port(port),
            data: data.into(),
        })
    }

    /// Oldest entry, or `None` when empty.
    pub fn get(&self) -> Option<MailboxEntry> {
        self.queue.pop()
    }

    pub fn peek_count(&self) -> usize {
        self.queue.len()
    }

    /// Drops everything queued and returns how many entries were discarded.
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.queue.pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
