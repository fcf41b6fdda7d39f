//! MIDI events staged between render commands.
//!
//! Appends keep arrival order. The render step drains the whole queue once per
//! render command; the worker is single-threaded so nothing appends during a
//! drain.

use smallvec::SmallVec;
use vstmidi_bridge::protocol::{clamp_port, unpack_short_message};

/// Inline capacity before the queue spills to the heap.
const INLINE_EVENTS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedEvent {
    Midi { port: u32, data: [u8; 3] },
    SysEx { port: u32, data: Box<[u8]> },
}

impl StagedEvent {
    pub fn port(&self) -> u32 {
        match self {
            StagedEvent::Midi { port, .. } | StagedEvent::SysEx { port, .. } => *port,
        }
    }
}

pub type StagedEvents = SmallVec<[StagedEvent; INLINE_EVENTS]>;

#[derive(Debug, Default)]
pub struct EventQueue {
    events: StagedEvents,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a packed short message as received from the bridge.
    pub fn push_packed(&mut self, word: u32) {
        let (port, data) = unpack_short_message(word);
        self.events.push(StagedEvent::Midi { port, data });
    }

    pub fn push_sysex(&mut self, port: u32, data: impl Into<Box<[u8]>>) {
        self.events.push(StagedEvent::SysEx {
            port: clamp_port(port),
            data: data.into(),
        });
    }

    /// Hands every staged event to the caller and leaves the queue empty.
    pub fn drain(&mut self) -> StagedEvents {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
