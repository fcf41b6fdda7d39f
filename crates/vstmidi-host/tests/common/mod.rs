//! Test fixtures for full-stack bridge tests
//!
//! The bridge facade talks to a real command server running on a thread of
//! the test process. The two are connected by an in-memory pipe so nothing
//! here needs a plugin binary or a child process.
//!
//! - [`pipe`]: one-directional byte pipe on crossbeam-channel; dropping the
//!   writer reads as end of stream on the other side.
//! - [`StubSynth`]: deterministic instrument. Output depends only on how many
//!   frames it has rendered and the last note-on velocity.
//! - [`ThreadLauncher`]: a `WorkerLauncher` that starts the server thread.

#![allow(dead_code)]

use crossbeam_channel::{Receiver, Sender};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use vstmidi_bridge::{BridgeConfig, PluginInfo, WorkerLauncher, WorkerSession};
use vstmidi_host::{serve, Instrument, ProcessBuffers, StagedEvent};

/// Unique id of [`StubSynth`].
pub const STUB_ID: u32 = 0x5374_7562;

/// Note number that makes [`StubSynth`] panic, taking its worker down.
pub const CRASH_NOTE: u8 = 0x7F;

/// Period of the stub's sawtooth, in frames.
pub const SAW_PERIOD: u64 = 64;

pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            pending: Vec::new(),
            pos: 0,
        },
    )
}

/// What the stub instances saw, shared with the test.
#[derive(Debug, Default)]
pub struct Observed {
    pub instances: usize,
    pub events: Vec<StagedEvent>,
    pub chunks_applied: Vec<Vec<u8>>,
    pub sample_rate: f32,
}

pub type SharedObserved = Arc<Mutex<Observed>>;

pub struct StubSynth {
    observed: SharedObserved,
    outputs: usize,
    chunk: Vec<u8>,
    level: f32,
    position: u64,
}

impl StubSynth {
    /// Stereo stub. Left carries the sawtooth, right its inverse.
    pub fn new(observed: SharedObserved) -> Self {
        Self::with_outputs(observed, 2)
    }

    /// Stub with `outputs` channels; channels past the second stay silent.
    pub fn with_outputs(observed: SharedObserved, outputs: usize) -> Self {
        observed.lock().unwrap().instances += 1;
        Self {
            observed,
            outputs,
            chunk: Vec::new(),
            level: 0.0,
            position: 0,
        }
    }

    /// Left-channel sample at an absolute frame position.
    pub fn sample_at(level: f32, position: u64) -> f32 {
        level * ((position % SAW_PERIOD) as f32 / SAW_PERIOD as f32 - 0.5)
    }
}

impl Instrument for StubSynth {
    fn info(&mut self) -> PluginInfo {
        PluginInfo::new("Stub Synth")
            .vendor("vstmidi tests")
            .product("Stub")
            .vendor_version(100)
            .unique_id(STUB_ID)
            .outputs(self.outputs as u32)
    }

    fn unique_id(&self) -> u32 {
        STUB_ID
    }

    fn input_count(&self) -> usize {
        0
    }

    fn output_count(&self) -> usize {
        self.outputs
    }

    fn has_editor(&self) -> bool {
        false
    }

    fn program_chunks(&self) -> bool {
        true
    }

    fn parameter_count(&self) -> usize {
        0
    }

    fn get_parameter(&mut self, _index: usize) -> f32 {
        0.0
    }

    fn set_parameter(&mut self, _index: usize, _value: f32) {}

    fn get_chunk(&mut self) -> Vec<u8> {
        self.chunk.clone()
    }

    fn set_chunk(&mut self, data: &[u8]) {
        self.chunk = data.to_vec();
        self.observed.lock().unwrap().chunks_applied.push(data.to_vec());
    }

    fn set_sample_rate(&mut self, rate: f32) {
        self.observed.lock().unwrap().sample_rate = rate;
    }

    fn set_block_size(&mut self, _frames: usize) {}

    fn start_processing(&mut self) {}

    fn stop_processing(&mut self) {}

    fn process_events(&mut self, events: &[StagedEvent]) {
        for event in events {
            if let StagedEvent::Midi { data, .. } = event {
                if data[0] & 0xF0 == 0x90 {
                    assert_ne!(data[1], CRASH_NOTE, "stub synth crashed on purpose");
                    self.level = f32::from(data[2]) / 127.0;
                }
            }
        }
        self.observed.lock().unwrap().events.extend_from_slice(events);
    }

    fn process(&mut self, buffers: &mut ProcessBuffers, frames: usize) {
        let channels = self.outputs.min(2).min(buffers.outputs.len());
        for frame in 0..frames {
            let sample = Self::sample_at(self.level, self.position);
            for (channel, output) in buffers.outputs[..channels].iter_mut().enumerate() {
                output[frame] = if channel == 0 { sample } else { -sample };
            }
            self.position += 1;
        }
    }
}

/// Launches the command server with a [`StubSynth`] on a thread.
pub struct ThreadLauncher {
    pub observed: SharedObserved,
    outputs: usize,
    workers: Mutex<Vec<JoinHandle<u32>>>,
}

impl ThreadLauncher {
    pub fn new() -> Arc<Self> {
        Self::with_outputs(2)
    }

    /// Launcher whose stubs report `outputs` channels.
    pub fn with_outputs(outputs: usize) -> Arc<Self> {
        Arc::new(Self {
            observed: SharedObserved::default(),
            outputs,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Exit codes of the workers that have finished so far.
    pub fn finished_codes(&self) -> Vec<u32> {
        let mut workers = self.workers.lock().unwrap();
        let (done, running): (Vec<_>, Vec<_>) =
            workers.drain(..).partition(|handle| handle.is_finished());
        *workers = running;
        done.into_iter()
            .filter_map(|handle| handle.join().ok())
            .collect()
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(&self, _plugin_path: &Path, config: &BridgeConfig) -> vstmidi_bridge::Result<WorkerSession> {
        let (to_worker, worker_input) = pipe();
        let (worker_output, from_worker) = pipe();
        let observed = Arc::clone(&self.observed);
        let outputs = self.outputs;

        let handle = thread::Builder::new()
            .name("stub-worker".into())
            .spawn(move || {
                let loader = move || -> vstmidi_host::Result<Box<dyn Instrument>> {
                    Ok(Box::new(StubSynth::with_outputs(Arc::clone(&observed), outputs)))
                };
                serve(worker_input, worker_output, Box::new(loader))
            })
            .map_err(vstmidi_bridge::BridgeError::Spawn)?;
        self.workers.lock().unwrap().push(handle);

        WorkerSession::connect(Box::new(from_worker), Box::new(to_worker), config)
    }
}

/// Launcher handle usable by a bridge while the test keeps its own reference.
pub struct SharedLauncher(pub Arc<ThreadLauncher>);

impl WorkerLauncher for SharedLauncher {
    fn launch(&self, plugin_path: &Path, config: &BridgeConfig) -> vstmidi_bridge::Result<WorkerSession> {
        self.0.launch(plugin_path, config)
    }
}
