//! VST2 instrument loader.
//!
//! The module is loaded once per worker; every instantiation (startup and each
//! reset) calls the same entry point again. Instances keep the library alive
//! through a shared handle so it is unloaded only after the last `effClose`.

use crate::error::{HostError, Result};
use crate::events::StagedEvent;
use crate::instrument::{Instrument, InstrumentLoader, ProcessBuffers};
use crate::vst2_abi::{
    effect_opcodes as eff, flags, host_opcodes as host, AEffect, DispatcherProc, ERect,
    PluginMain, VstEvents, VstMidiEvent, VstMidiSysexEvent, EFFECT_MAGIC, ENTRY_POINTS,
    EVENT_TYPE_MIDI, EVENT_TYPE_SYSEX, HOST_VST_VERSION, LANGUAGE_ENGLISH, MAX_PRODUCT_STR_LEN,
    MAX_VENDOR_STR_LEN, PLUG_CATEGORY_SYNTH,
};
use libloading::Library;
use std::ffi::{c_char, c_void, CStr, CString};
use std::mem::{offset_of, size_of};
use std::path::Path;
use std::ptr;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use vstmidi_bridge::protocol::MAX_BLOCK_FRAMES;
use vstmidi_bridge::{PluginInfo, WorkerStatus};

const HOST_VENDOR: &str = "vstmidi";
const HOST_PRODUCT: &str = "vsthost";
const HOST_VENDOR_VERSION: isize = 1010;

/// Host capabilities answered with "yes".
const HOST_CAN_DO: [&str; 4] = [
    "sendVstEvents",
    "sendVstMidiEvent",
    "supplyIdle",
    "startStopProcess",
];

/// Scratch size for plugin-written name strings. Larger than the SDK limits
/// because plugins overrun them.
const NAME_BUFFER_LEN: usize = 256;

/// Idle requests made before an instance has a host context attached, i.e.
/// from inside the entry point.
static PENDING_IDLE: AtomicBool = AtomicBool::new(false);

/// State the host callback reads through `AEffect::user`.
struct HostContext {
    sample_rate: AtomicU32,
    block_size: AtomicI32,
    need_idle: AtomicBool,
    directory: CString,
}

impl HostContext {
    fn new(directory: CString) -> Self {
        Self {
            sample_rate: AtomicU32::new(44_100f32.to_bits()),
            block_size: AtomicI32::new(MAX_BLOCK_FRAMES as i32),
            need_idle: AtomicBool::new(PENDING_IDLE.swap(false, Ordering::SeqCst)),
            directory,
        }
    }
}

/// Decoded host callback.
enum HostRequest<'a> {
    Version,
    CurrentId,
    Idle,
    NeedIdle,
    SampleRate,
    BlockSize,
    VendorString(*mut c_char),
    ProductString(*mut c_char),
    VendorVersion,
    CanDo(&'a CStr),
    Language,
    Directory,
    Other(i32),
}

impl HostRequest<'_> {
    /// # Safety
    /// `ptr` must be what the plugin passed for `opcode`.
    unsafe fn decode(opcode: i32, ptr: *mut c_void) -> Self {
        match opcode {
            host::VERSION => HostRequest::Version,
            host::CURRENT_ID => HostRequest::CurrentId,
            host::IDLE => HostRequest::Idle,
            host::NEED_IDLE => HostRequest::NeedIdle,
            host::GET_SAMPLE_RATE => HostRequest::SampleRate,
            host::GET_BLOCK_SIZE => HostRequest::BlockSize,
            host::GET_VENDOR_STRING => HostRequest::VendorString(ptr.cast()),
            host::GET_PRODUCT_STRING => HostRequest::ProductString(ptr.cast()),
            host::GET_VENDOR_VERSION => HostRequest::VendorVersion,
            host::CAN_DO if !ptr.is_null() => {
                HostRequest::CanDo(CStr::from_ptr(ptr.cast::<c_char>()))
            }
            host::GET_LANGUAGE => HostRequest::Language,
            host::GET_DIRECTORY => HostRequest::Directory,
            other => HostRequest::Other(other),
        }
    }

    fn answer(self, context: Option<&HostContext>) -> isize {
        match self {
            HostRequest::Version => HOST_VST_VERSION,
            // No shell plugins: never a sub-plugin id.
            HostRequest::CurrentId => 0,
            HostRequest::Idle => 0,
            HostRequest::NeedIdle => {
                match context {
                    Some(context) => context.need_idle.store(true, Ordering::SeqCst),
                    None => PENDING_IDLE.store(true, Ordering::SeqCst),
                }
                tracing::debug!("plugin requested idle calls");
                1
            }
            HostRequest::SampleRate => context.map_or(0, |c| {
                f32::from_bits(c.sample_rate.load(Ordering::Relaxed)) as isize
            }),
            HostRequest::BlockSize => {
                context.map_or(0, |c| c.block_size.load(Ordering::Relaxed) as isize)
            }
            HostRequest::VendorString(dest) => {
                // SAFETY: plugins pass a buffer of at least the SDK vendor length.
                unsafe { copy_c_string(dest, HOST_VENDOR, MAX_VENDOR_STR_LEN) };
                1
            }
            HostRequest::ProductString(dest) => {
                // SAFETY: as above, product length.
                unsafe { copy_c_string(dest, HOST_PRODUCT, MAX_PRODUCT_STR_LEN) };
                1
            }
            HostRequest::VendorVersion => HOST_VENDOR_VERSION,
            HostRequest::CanDo(what) => {
                let what = what.to_string_lossy();
                isize::from(HOST_CAN_DO.iter().any(|c| *c == what))
            }
            HostRequest::Language => LANGUAGE_ENGLISH,
            HostRequest::Directory => context.map_or(0, |c| c.directory.as_ptr() as isize),
            HostRequest::Other(opcode) => {
                tracing::trace!("unhandled host opcode {}", opcode);
                0
            }
        }
    }
}

extern "C" fn host_callback(
    effect: *mut AEffect,
    opcode: i32,
    _index: i32,
    _value: isize,
    ptr: *mut c_void,
    _opt: f32,
) -> isize {
    // SAFETY: `user` is either null or the HostContext attached at
    // instantiation, which outlives the effect.
    let context = unsafe {
        effect
            .as_ref()
            .and_then(|effect| effect.user.cast::<HostContext>().cast_const().as_ref())
    };
    // SAFETY: `ptr` comes straight from the plugin for this opcode.
    let request = unsafe { HostRequest::decode(opcode, ptr) };
    request.answer(context)
}

/// # Safety
/// `dest` must be null or valid for `capacity` bytes.
unsafe fn copy_c_string(dest: *mut c_char, text: &str, capacity: usize) {
    if dest.is_null() || capacity == 0 {
        return;
    }
    let len = text.len().min(capacity - 1);
    ptr::copy_nonoverlapping(text.as_ptr().cast::<c_char>(), dest, len);
    *dest.add(len) = 0;
}

/// Loaded plugin module.
pub struct Vst2Loader {
    library: Rc<Library>,
    main: PluginMain,
    directory: CString,
}

impl Vst2Loader {
    pub fn open(path: &Path) -> Result<Self> {
        // SAFETY: loading runs the module's initializers; the worker exists
        // to contain whatever they do.
        let library = unsafe { Library::new(path) }.map_err(|e| {
            HostError::new(WorkerStatus::CannotLoadPlugin, format!("{}: {}", path.display(), e))
        })?;

        let main = ENTRY_POINTS
            .iter()
            .find_map(|symbol| {
                // SAFETY: every VST2 entry point has the `PluginMain` signature.
                unsafe { library.get::<PluginMain>(symbol).ok().map(|s| *s) }
            })
            .ok_or_else(|| {
                HostError::new(WorkerStatus::MissingEntryPoint, path.display().to_string())
            })?;

        let directory = path
            .parent()
            .and_then(|dir| CString::new(dir.to_string_lossy().into_owned()).ok())
            .unwrap_or_default();

        tracing::info!("loaded module {}", path.display());
        Ok(Self {
            library: Rc::new(library),
            main,
            directory,
        })
    }
}

impl InstrumentLoader for Vst2Loader {
    fn instantiate(&mut self) -> Result<Box<dyn Instrument>> {
        // SAFETY: `main` was resolved from the library this loader keeps alive.
        let effect = unsafe { (self.main)(host_callback) };

        // SAFETY: checked for null first; the magic is the first field.
        if effect.is_null() || unsafe { (*effect).magic } != EFFECT_MAGIC {
            return Err(HostError::new(WorkerStatus::NotAPlugin, "bad effect magic"));
        }
        // SAFETY: validated above.
        let Some(dispatcher) = (unsafe { (*effect).dispatcher }) else {
            return Err(HostError::new(WorkerStatus::NotAPlugin, "no dispatcher"));
        };

        let context = Box::new(HostContext::new(self.directory.clone()));
        // SAFETY: the context box lives as long as the instrument that closes
        // the effect.
        unsafe { (*effect).user = ptr::from_ref::<HostContext>(&context).cast_mut().cast() };

        let instrument = Vst2Instrument {
            effect,
            dispatcher,
            context,
            input_ptrs: Vec::new(),
            output_ptrs: Vec::new(),
            midi_events: Vec::new(),
            sysex_events: Vec::new(),
            sysex_data: Vec::new(),
            event_order: Vec::new(),
            event_list: Vec::new(),
            editor_open: false,
            _library: Rc::clone(&self.library),
        };
        instrument.dispatch(eff::OPEN, 0, 0, ptr::null_mut(), 0.0);

        let category = instrument.dispatch(eff::GET_PLUG_CATEGORY, 0, 0, ptr::null_mut(), 0.0);
        if category != PLUG_CATEGORY_SYNTH || instrument.can_do("receiveVstMidiEvent") < 1 {
            return Err(HostError::new(
                WorkerStatus::NotAnInstrument,
                format!("category {category}"),
            ));
        }
        if instrument.raw().process_replacing.is_none() {
            return Err(HostError::new(WorkerStatus::NotAPlugin, "no processReplacing"));
        }

        Ok(Box::new(instrument))
    }
}

#[derive(Clone, Copy)]
enum EventSlot {
    Midi(usize),
    SysEx(usize),
}

pub struct Vst2Instrument {
    effect: *mut AEffect,
    dispatcher: DispatcherProc,
    context: Box<HostContext>,
    input_ptrs: Vec<*mut f32>,
    output_ptrs: Vec<*mut f32>,
    /// Event storage handed to the plugin; valid until the next batch.
    midi_events: Vec<VstMidiEvent>,
    sysex_events: Vec<VstMidiSysexEvent>,
    sysex_data: Vec<Box<[u8]>>,
    event_order: Vec<EventSlot>,
    /// `VstEvents` header plus pointer array; u64 for pointer alignment.
    event_list: Vec<u64>,
    editor_open: bool,
    _library: Rc<Library>,
}

impl Vst2Instrument {
    fn raw(&self) -> &AEffect {
        // SAFETY: the effect stays valid until `effClose` in Drop.
        unsafe { &*self.effect }
    }

    fn dispatch(&self, opcode: i32, index: i32, value: isize, ptr: *mut c_void, opt: f32) -> isize {
        // SAFETY: the effect stays valid until `effClose` in Drop.
        unsafe { (self.dispatcher)(self.effect, opcode, index, value, ptr, opt) }
    }

    fn can_do(&self, what: &str) -> isize {
        let Ok(what) = CString::new(what) else {
            return 0;
        };
        self.dispatch(eff::CAN_DO, 0, 0, what.as_ptr().cast_mut().cast(), 0.0)
    }

    fn editor_rect(&self) -> Option<(u32, u32)> {
        let mut rect: *mut ERect = ptr::null_mut();
        self.dispatch(
            eff::EDIT_GET_RECT,
            0,
            0,
            ptr::from_mut(&mut rect).cast(),
            0.0,
        );
        if rect.is_null() {
            return None;
        }
        // SAFETY: the plugin keeps the rect alive while its editor exists.
        unsafe { (*rect).size() }
    }

    fn query_string(&self, opcode: i32) -> String {
        let mut buffer = [0 as c_char; NAME_BUFFER_LEN];
        self.dispatch(opcode, 0, 0, buffer.as_mut_ptr().cast(), 0.0);
        buffer[NAME_BUFFER_LEN - 1] = 0;
        // SAFETY: the buffer is nul-terminated above.
        unsafe { CStr::from_ptr(buffer.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

impl Instrument for Vst2Instrument {
    fn info(&mut self) -> PluginInfo {
        let vendor_version = self.dispatch(eff::GET_VENDOR_VERSION, 0, 0, ptr::null_mut(), 0.0);
        PluginInfo::new(self.query_string(eff::GET_EFFECT_NAME))
            .vendor(self.query_string(eff::GET_VENDOR_STRING))
            .product(self.query_string(eff::GET_PRODUCT_STRING))
            .vendor_version(vendor_version as u32)
            .unique_id(self.unique_id())
            .outputs(self.output_count() as u32)
    }

    fn unique_id(&self) -> u32 {
        self.raw().unique_id as u32
    }

    fn input_count(&self) -> usize {
        self.raw().num_inputs.max(0) as usize
    }

    fn output_count(&self) -> usize {
        self.raw().num_outputs.max(0) as usize
    }

    fn has_editor(&self) -> bool {
        self.raw().flags & flags::HAS_EDITOR != 0
    }

    unsafe fn open_editor(&mut self, parent: *mut c_void) -> Option<(u32, u32)> {
        if !self.has_editor() || self.editor_open {
            return None;
        }
        // Some plugins only know their size once asked before opening.
        let before = self.editor_rect();
        self.dispatch(eff::EDIT_OPEN, 0, 0, parent, 0.0);
        self.editor_open = true;
        Some(self.editor_rect().or(before).unwrap_or((0, 0)))
    }

    fn editor_idle(&mut self) {
        if self.editor_open {
            self.dispatch(eff::EDIT_IDLE, 0, 0, ptr::null_mut(), 0.0);
        }
    }

    fn close_editor(&mut self) {
        if std::mem::take(&mut self.editor_open) {
            self.dispatch(eff::EDIT_CLOSE, 0, 0, ptr::null_mut(), 0.0);
        }
    }

    fn program_chunks(&self) -> bool {
        self.raw().flags & flags::PROGRAM_CHUNKS != 0
    }

    fn parameter_count(&self) -> usize {
        self.raw().num_params.max(0) as usize
    }

    fn get_parameter(&mut self, index: usize) -> f32 {
        match self.raw().get_parameter {
            Some(get) => get(self.effect, index as i32),
            None => 0.0,
        }
    }

    fn set_parameter(&mut self, index: usize, value: f32) {
        if let Some(set) = self.raw().set_parameter {
            set(self.effect, index as i32, value);
        }
    }

    fn get_chunk(&mut self) -> Vec<u8> {
        let mut data: *mut c_void = ptr::null_mut();
        let size = self.dispatch(
            eff::GET_CHUNK,
            0,
            0,
            ptr::from_mut(&mut data).cast(),
            0.0,
        );
        if data.is_null() || size <= 0 {
            return Vec::new();
        }
        // SAFETY: the plugin owns `size` bytes at `data` until its next call.
        unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size as usize) }.to_vec()
    }

    fn set_chunk(&mut self, data: &[u8]) {
        self.dispatch(
            eff::SET_CHUNK,
            0,
            data.len() as isize,
            data.as_ptr().cast_mut().cast(),
            0.0,
        );
    }

    fn set_sample_rate(&mut self, rate: f32) {
        self.context.sample_rate.store(rate.to_bits(), Ordering::Relaxed);
        self.dispatch(eff::SET_SAMPLE_RATE, 0, 0, ptr::null_mut(), rate);
    }

    fn set_block_size(&mut self, frames: usize) {
        self.context.block_size.store(frames as i32, Ordering::Relaxed);
        self.dispatch(eff::SET_BLOCK_SIZE, 0, frames as isize, ptr::null_mut(), 0.0);
    }

    fn start_processing(&mut self) {
        self.dispatch(eff::MAINS_CHANGED, 0, 1, ptr::null_mut(), 0.0);
        self.dispatch(eff::START_PROCESS, 0, 0, ptr::null_mut(), 0.0);
    }

    fn stop_processing(&mut self) {
        self.dispatch(eff::STOP_PROCESS, 0, 0, ptr::null_mut(), 0.0);
        self.dispatch(eff::MAINS_CHANGED, 0, 0, ptr::null_mut(), 0.0);
    }

    fn wants_idle(&self) -> bool {
        self.context.need_idle.load(Ordering::SeqCst)
    }

    fn idle(&mut self) {
        self.dispatch(eff::IDLE, 0, 0, ptr::null_mut(), 0.0);
    }

    fn process_events(&mut self, events: &[StagedEvent]) {
        self.midi_events.clear();
        self.sysex_events.clear();
        self.sysex_data.clear();
        self.event_order.clear();

        for event in events {
            match event {
                StagedEvent::Midi { data, .. } => {
                    self.event_order.push(EventSlot::Midi(self.midi_events.len()));
                    self.midi_events.push(VstMidiEvent {
                        event_type: EVENT_TYPE_MIDI,
                        byte_size: size_of::<VstMidiEvent>() as i32,
                        midi_data: [data[0], data[1], data[2], 0],
                        ..VstMidiEvent::default()
                    });
                }
                StagedEvent::SysEx { data, .. } => {
                    self.event_order.push(EventSlot::SysEx(self.sysex_data.len()));
                    self.sysex_data.push(data.clone());
                }
            }
        }

        // Storage is complete; pointers taken from here on stay valid.
        for payload in &mut self.sysex_data {
            self.sysex_events.push(VstMidiSysexEvent {
                event_type: EVENT_TYPE_SYSEX,
                byte_size: size_of::<VstMidiSysexEvent>() as i32,
                delta_frames: 0,
                flags: 0,
                dump_bytes: payload.len() as i32,
                resvd1: 0,
                sysex_dump: payload.as_mut_ptr().cast(),
                resvd2: 0,
            });
        }

        let count = self.event_order.len();
        if count == 0 {
            return;
        }

        // VstEvents declares a two-element trailing array; longer lists are
        // laid out past the struct using the real field offset.
        let events_offset = offset_of!(VstEvents, events);
        let needed = events_offset + count * size_of::<*mut c_void>();
        let alloc_size = needed.max(size_of::<VstEvents>());
        self.event_list.clear();
        self.event_list.resize(alloc_size.div_ceil(8), 0);

        // SAFETY: the buffer is large enough and 8-byte aligned; the event
        // structs it points at live in `self` until the next batch.
        unsafe {
            let base = self.event_list.as_mut_ptr().cast::<u8>();
            let header = base.cast::<VstEvents>();
            (*header).num_events = count as i32;
            (*header).reserved = 0;
            let slots = base.add(events_offset).cast::<*mut c_void>();
            for (i, slot) in self.event_order.iter().enumerate() {
                let event: *mut c_void = match *slot {
                    EventSlot::Midi(n) => ptr::from_mut(&mut self.midi_events[n]).cast(),
                    EventSlot::SysEx(n) => ptr::from_mut(&mut self.sysex_events[n]).cast(),
                };
                *slots.add(i) = event;
            }
            (self.dispatcher)(self.effect, eff::PROCESS_EVENTS, 0, 0, header.cast(), 0.0);
        }
    }

    fn process(&mut self, buffers: &mut ProcessBuffers, frames: usize) {
        let Some(process) = self.raw().process_replacing else {
            return;
        };
        let frames = frames.min(MAX_BLOCK_FRAMES);

        self.input_ptrs.clear();
        self.input_ptrs
            .extend(buffers.inputs.iter_mut().map(|b| b.as_mut_ptr()));
        self.output_ptrs.clear();
        self.output_ptrs
            .extend(buffers.outputs.iter_mut().map(|b| b.as_mut_ptr()));

        process(
            self.effect,
            self.input_ptrs.as_mut_ptr(),
            self.output_ptrs.as_mut_ptr(),
            frames as i32,
        );
    }
}

impl Drop for Vst2Instrument {
    fn drop(&mut self) {
        self.close_editor();
        self.dispatch(eff::CLOSE, 0, 0, ptr::null_mut(), 0.0);
        tracing::debug!("effect closed");
    }
}
