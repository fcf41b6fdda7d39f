//! Plugin lifecycle inside the worker.
//!
//! ```text
//! Opened -> (sample rate, chunk)* -> Processing -> [render]* -> Opened -> Closed
//! ```
//!
//! Processing starts lazily on the first render. Reset closes the instance and
//! instantiates a fresh one from the loader, then reapplies the last known
//! state blob.

use crate::chunk::{restore_encoded, StateBlob};
use crate::editor::{self, EditorWindow};
use crate::error::{HostError, Result};
use crate::events::EventQueue;
use crate::instrument::{Instrument, InstrumentLoader, ProcessBuffers};
use vstmidi_bridge::protocol::{MAX_BLOCK_FRAMES, MAX_OUTPUT_CHANNELS};
use vstmidi_bridge::{PluginInfo, WorkerStatus};

/// Silent frames rendered before the first real render of a plugin that asked
/// for idle calls.
pub const PRE_ROLL_FRAMES: usize = MAX_BLOCK_FRAMES * 200;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Output scratch channels per streamed channel.
const OUTPUT_HEADROOM: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePhase {
    /// The plugin never asked for idle calls.
    Dormant,
    /// Idle was requested; the next render pre-rolls first.
    PreRoll,
    /// Pre-roll done; every render is bracketed by idle calls.
    Pumping,
}

pub struct PluginRuntime {
    loader: Box<dyn InstrumentLoader>,
    instrument: Option<Box<dyn Instrument>>,
    info: PluginInfo,
    /// Channels streamed back per frame.
    outputs: usize,
    sample_rate: u32,
    processing: bool,
    idle: IdlePhase,
    events: EventQueue,
    buffers: Option<ProcessBuffers>,
    interleaved: Vec<f32>,
    /// Last blob read from or written to the instance.
    last_chunk: Vec<u8>,
    editor_window: Box<dyn EditorWindow>,
}

impl PluginRuntime {
    pub fn new(mut loader: Box<dyn InstrumentLoader>) -> Result<Self> {
        let mut instrument = loader.instantiate()?;
        let mut info = instrument.info();
        info.outputs = info.outputs.min(MAX_OUTPUT_CHANNELS);
        tracing::info!(
            "loaded '{}' by '{}': {} inputs, {} outputs, editor: {}",
            info.name,
            info.vendor,
            instrument.input_count(),
            instrument.output_count(),
            instrument.has_editor()
        );

        Ok(Self {
            loader,
            instrument: Some(instrument),
            outputs: info.outputs as usize,
            info,
            sample_rate: DEFAULT_SAMPLE_RATE,
            processing: false,
            idle: IdlePhase::Dormant,
            events: EventQueue::new(),
            buffers: None,
            interleaved: Vec::new(),
            last_chunk: Vec::new(),
            editor_window: editor::native_window(),
        })
    }

    /// Replaces the platform window used by [`PluginRuntime::display_editor`].
    pub fn with_editor_window(mut self, window: impl EditorWindow + 'static) -> Self {
        self.editor_window = Box::new(window);
        self
    }

    /// Identity announced in the handshake, outputs already clamped.
    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    pub fn output_channels(&self) -> usize {
        self.outputs
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn idle_phase(&self) -> IdlePhase {
        self.idle
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    fn live(&mut self) -> Result<&mut dyn Instrument> {
        match self.instrument.as_deref_mut() {
            Some(instrument) => Ok(instrument),
            None => Err(HostError::new(
                WorkerStatus::RESET_FAILED,
                "no live plugin instance",
            )),
        }
    }

    pub fn has_editor(&self) -> bool {
        self.instrument.as_ref().is_some_and(|i| i.has_editor())
    }

    /// Shows the plugin's editor and returns once the user closes it. Without
    /// an editor or a window system this returns at once.
    pub fn display_editor(&mut self) -> Result<()> {
        let Some(instrument) = self.instrument.as_deref_mut() else {
            return Err(HostError::new(
                WorkerStatus::RESET_FAILED,
                "no live plugin instance",
            ));
        };
        if !instrument.has_editor() {
            tracing::debug!("'{}' has no editor", self.info.name);
            return Ok(());
        }
        editor::run_modal(instrument, self.editor_window.as_mut(), &self.info.name);
        Ok(())
    }

    pub fn get_chunk(&mut self) -> Result<Vec<u8>> {
        let blob = StateBlob::capture(self.live()?).encode();
        self.last_chunk.clone_from(&blob);
        Ok(blob)
    }

    pub fn set_chunk(&mut self, data: Vec<u8>) -> Result<()> {
        restore_encoded(self.live()?, &data);
        self.last_chunk = data;
        Ok(())
    }

    /// Takes effect when processing next starts. A running instance is
    /// stopped, retuned and restarted.
    pub fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        self.sample_rate = rate;
        if self.processing {
            let instrument = self.live()?;
            instrument.stop_processing();
            instrument.set_sample_rate(rate as f32);
            instrument.start_processing();
        }
        tracing::debug!("sample rate {}", rate);
        Ok(())
    }

    pub fn queue_midi(&mut self, word: u32) {
        self.events.push_packed(word);
    }

    pub fn queue_sysex(&mut self, port: u32, data: Vec<u8>) {
        self.events.push_sysex(port, data);
    }

    /// Replaces the instance with a fresh one carrying the last known state.
    pub fn reset(&mut self) -> Result<()> {
        self.close();
        self.events.clear();
        self.idle = IdlePhase::Dormant;

        let mut instrument = self.loader.instantiate().map_err(|e| {
            HostError::new(WorkerStatus::RESET_FAILED, format!("reinstantiation: {e}"))
        })?;
        restore_encoded(instrument.as_mut(), &self.last_chunk);
        self.instrument = Some(instrument);

        tracing::info!("plugin '{}' reset", self.info.name);
        Ok(())
    }

    fn start_processing(&mut self) -> Result<()> {
        if self.processing {
            return Ok(());
        }
        let rate = self.sample_rate as f32;
        let channels = self.outputs;
        let instrument = self.live()?;
        instrument.set_sample_rate(rate);
        instrument.set_block_size(MAX_BLOCK_FRAMES);
        instrument.start_processing();

        let inputs = instrument.input_count();
        let outputs = instrument.output_count().max(OUTPUT_HEADROOM * channels);
        self.buffers = Some(ProcessBuffers::new(inputs, outputs));
        self.interleaved = vec![0.0; MAX_BLOCK_FRAMES * channels];
        self.processing = true;
        Ok(())
    }

    /// Everything a render does before its status word: start processing,
    /// pre-roll when needed, and hand the staged batch to the plugin.
    pub fn begin_render(&mut self) -> Result<()> {
        self.start_processing()?;

        let mut events = self.events.drain();
        events.retain(|event| event.port() == 0);

        let Some(instrument) = self.instrument.as_deref_mut() else {
            return Err(HostError::new(WorkerStatus::CannotRender, "no live plugin instance"));
        };
        let Some(buffers) = self.buffers.as_mut() else {
            return Err(HostError::new(WorkerStatus::CannotRender, "buffers missing"));
        };

        if self.idle == IdlePhase::Dormant && instrument.wants_idle() {
            self.idle = IdlePhase::PreRoll;
        }

        match self.idle {
            IdlePhase::Dormant => {
                if !events.is_empty() {
                    instrument.process_events(&events);
                }
            }
            IdlePhase::PreRoll => {
                tracing::debug!("pre-rolling {} frames", PRE_ROLL_FRAMES);
                instrument.idle();
                let mut remaining = PRE_ROLL_FRAMES;
                while remaining > 0 {
                    let frames = remaining.min(MAX_BLOCK_FRAMES);
                    instrument.process(buffers, frames);
                    instrument.idle();
                    remaining -= frames;
                }
                instrument.idle();
                if !events.is_empty() {
                    instrument.process_events(&events);
                }
                self.idle = IdlePhase::Pumping;
            }
            IdlePhase::Pumping => {
                instrument.idle();
                if !events.is_empty() {
                    instrument.process_events(&events);
                }
                instrument.idle();
            }
        }
        Ok(())
    }

    /// Renders `frames` in blocks of at most [`MAX_BLOCK_FRAMES`], handing each
    /// interleaved block to `sink`. Stops early when `sink` returns false.
    pub fn render<F>(&mut self, frames: usize, mut sink: F) -> bool
    where
        F: FnMut(&[f32]) -> bool,
    {
        let channels = self.outputs;
        let (Some(instrument), Some(buffers)) =
            (self.instrument.as_deref_mut(), self.buffers.as_mut())
        else {
            return false;
        };

        let mut remaining = frames;
        while remaining > 0 {
            let block = remaining.min(MAX_BLOCK_FRAMES);
            instrument.process(buffers, block);

            let out = &mut self.interleaved[..block * channels];
            for (channel, source) in buffers.outputs.iter().take(channels).enumerate() {
                for (frame, sample) in source[..block].iter().enumerate() {
                    out[frame * channels + channel] = *sample;
                }
            }

            if !sink(out) {
                return false;
            }
            remaining -= block;
        }
        true
    }

    /// Stops processing and closes the instance.
    pub fn close(&mut self) {
        if let Some(mut instrument) = self.instrument.take() {
            if self.processing {
                instrument.stop_processing();
            }
            drop(instrument);
        }
        self.processing = false;
        self.buffers = None;
    }
}

impl Drop for PluginRuntime {
    fn drop(&mut self) {
        self.close();
    }
}
