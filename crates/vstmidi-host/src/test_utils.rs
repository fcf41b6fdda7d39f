//! Shared in-process instrument for unit tests.

use crate::editor::EditorWindow;
use crate::error::Result;
use crate::events::StagedEvent;
use crate::instrument::{Instrument, ProcessBuffers};
use std::ffi::c_void;
use std::sync::{Arc, Mutex};
use vstmidi_bridge::PluginInfo;

/// Editor calls seen by a [`Constant`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EditorLog {
    pub opened: usize,
    pub idles: usize,
    pub closed: usize,
}

/// Stereo instrument writing a constant per channel and storing its chunk
/// verbatim.
pub struct Constant {
    pub left: f32,
    pub right: f32,
    pub chunk: Vec<u8>,
    pub events_seen: usize,
    /// Size reported on open; `None` means no editor.
    pub editor_size: Option<(u32, u32)>,
    pub editor: Arc<Mutex<EditorLog>>,
}

impl Constant {
    pub fn new(left: f32) -> Self {
        Constant {
            left,
            right: -left,
            chunk: Vec::new(),
            events_seen: 0,
            editor_size: None,
            editor: Arc::default(),
        }
    }

    pub fn with_editor(mut self) -> Self {
        self.editor_size = Some((320, 200));
        self
    }

    pub fn editor_log(&self) -> EditorLog {
        *self.editor.lock().unwrap()
    }

    pub fn loader() -> impl FnMut() -> Result<Box<dyn Instrument>> {
        Self::loader_logging(Arc::default())
    }

    /// Instances with an editor, all recording into `log`.
    pub fn loader_logging(log: Arc<Mutex<EditorLog>>) -> impl FnMut() -> Result<Box<dyn Instrument>> {
        move || -> Result<Box<dyn Instrument>> {
            let mut instrument = Constant::new(0.25).with_editor();
            instrument.editor = Arc::clone(&log);
            Ok(Box::new(instrument))
        }
    }
}

impl Instrument for Constant {
    fn info(&mut self) -> PluginInfo {
        PluginInfo::new("Constant")
            .vendor("Tests")
            .product("Constant Synth")
            .vendor_version(3)
            .unique_id(0x436F_6E73)
    }

    fn unique_id(&self) -> u32 {
        0x436F_6E73
    }

    fn input_count(&self) -> usize {
        0
    }

    fn output_count(&self) -> usize {
        2
    }

    fn has_editor(&self) -> bool {
        self.editor_size.is_some()
    }

    unsafe fn open_editor(&mut self, _parent: *mut c_void) -> Option<(u32, u32)> {
        let size = self.editor_size?;
        self.editor.lock().unwrap().opened += 1;
        Some(size)
    }

    fn editor_idle(&mut self) {
        self.editor.lock().unwrap().idles += 1;
    }

    fn close_editor(&mut self) {
        self.editor.lock().unwrap().closed += 1;
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
    }

    fn set_sample_rate(&mut self, _rate: f32) {}

    fn set_block_size(&mut self, _frames: usize) {}

    fn start_processing(&mut self) {}

    fn stop_processing(&mut self) {}

    fn process_events(&mut self, events: &[StagedEvent]) {
        self.events_seen += events.len();
    }

    fn process(&mut self, buffers: &mut ProcessBuffers, frames: usize) {
        buffers.outputs[0][..frames].fill(self.left);
        buffers.outputs[1][..frames].fill(self.right);
    }
}

/// Editor window that stays up for a fixed number of pumps.
pub struct ScriptedWindow {
    pub pumps_left: usize,
    pub resized: Option<(u32, u32)>,
    pub destroyed: bool,
}

impl ScriptedWindow {
    pub fn new(pumps: usize) -> Self {
        Self {
            pumps_left: pumps,
            resized: None,
            destroyed: false,
        }
    }
}

impl EditorWindow for ScriptedWindow {
    fn create(&mut self, _title: &str) -> Option<*mut c_void> {
        Some(std::ptr::NonNull::<u8>::dangling().as_ptr().cast())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.resized = Some((width, height));
    }

    fn show(&mut self) {}

    fn pump(&mut self) -> bool {
        let open = self.pumps_left > 0;
        self.pumps_left = self.pumps_left.saturating_sub(1);
        open
    }

    fn destroy(&mut self) {
        self.destroyed = true;
    }
}
