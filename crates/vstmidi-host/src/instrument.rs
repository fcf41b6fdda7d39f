//! Instrument abstraction driven by the runtime.
//!
//! The VST2 loader is one implementation; tests drive the same runtime with
//! in-process instruments.

use crate::error::Result;
use crate::events::StagedEvent;
use std::ffi::c_void;
use vstmidi_bridge::protocol::MAX_BLOCK_FRAMES;
use vstmidi_bridge::PluginInfo;

/// One live plugin instance. Dropping it closes the instance.
pub trait Instrument {
    /// Identity strings and the native output channel count.
    fn info(&mut self) -> PluginInfo;

    fn unique_id(&self) -> u32;

    fn input_count(&self) -> usize;

    fn output_count(&self) -> usize;

    fn has_editor(&self) -> bool;

    /// Opens the editor inside `parent`. Returns `None` when no editor was
    /// opened, otherwise the size it asks for (zero when it did not say).
    ///
    /// # Safety
    /// `parent` must be a valid native window handle that outlives the
    /// editor, i.e. until [`Instrument::close_editor`] returns.
    unsafe fn open_editor(&mut self, _parent: *mut c_void) -> Option<(u32, u32)> {
        None
    }

    /// Lets an open editor redraw. Called periodically while it is shown.
    fn editor_idle(&mut self) {}

    fn close_editor(&mut self) {}

    /// True when state is persisted as one opaque chunk instead of
    /// individual parameters.
    fn program_chunks(&self) -> bool;

    fn parameter_count(&self) -> usize;

    fn get_parameter(&mut self, index: usize) -> f32;

    fn set_parameter(&mut self, index: usize, value: f32);

    fn get_chunk(&mut self) -> Vec<u8>;

    fn set_chunk(&mut self, data: &[u8]);

    fn set_sample_rate(&mut self, rate: f32);

    fn set_block_size(&mut self, frames: usize);

    /// Switches the instance on and starts processing.
    fn start_processing(&mut self);

    /// Stops processing and switches the instance off.
    fn stop_processing(&mut self);

    /// Whether the plugin asked the host for idle calls.
    fn wants_idle(&self) -> bool {
        false
    }

    fn idle(&mut self) {}

    /// Delivers one batch of events ahead of the next `process` call.
    fn process_events(&mut self, events: &[StagedEvent]);

    /// Renders `frames` (at most [`MAX_BLOCK_FRAMES`]) into `buffers.outputs`.
    fn process(&mut self, buffers: &mut ProcessBuffers, frames: usize);
}

/// Creates instances of one plugin. Called once at startup and again on every
/// reset.
pub trait InstrumentLoader {
    fn instantiate(&mut self) -> Result<Box<dyn Instrument>>;
}

impl<F> InstrumentLoader for F
where
    F: FnMut() -> Result<Box<dyn Instrument>>,
{
    fn instantiate(&mut self) -> Result<Box<dyn Instrument>> {
        self()
    }
}

/// Per-channel scratch buffers of [`MAX_BLOCK_FRAMES`] samples each. Inputs
/// stay silent.
pub struct ProcessBuffers {
    pub inputs: Vec<Vec<f32>>,
    pub outputs: Vec<Vec<f32>>,
}

impl ProcessBuffers {
    pub fn new(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs: vec![vec![0.0; MAX_BLOCK_FRAMES]; inputs],
            outputs: vec![vec![0.0; MAX_BLOCK_FRAMES]; outputs],
        }
    }

    pub fn output(&self, channel: usize) -> &[f32] {
        &self.outputs[channel]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_sized_to_block() {
        let buffers = ProcessBuffers::new(1, 6);
        assert_eq!(buffers.inputs.len(), 1);
        assert_eq!(buffers.outputs.len(), 6);
        assert!(buffers.outputs.iter().all(|b| b.len() == MAX_BLOCK_FRAMES));
        assert!(buffers.inputs[0].iter().all(|&s| s == 0.0));
    }
}
