//! VST 2.4 binary interface: the structs and opcodes the worker touches.
//!
//! Layouts follow the C SDK exactly; every struct is `repr(C)` and every
//! function pointer uses the C calling convention. Struct fields mirror the
//! SDK whether or not the worker reads them, hence the `dead_code` allows.

use std::ffi::{c_char, c_void};

/// `'VstP'`
pub const EFFECT_MAGIC: i32 = 0x5673_7450;

/// Host VST version reported to plugins (2.4).
pub const HOST_VST_VERSION: isize = 2400;

pub const MAX_VENDOR_STR_LEN: usize = 64;
pub const MAX_PRODUCT_STR_LEN: usize = 64;

pub type HostCallback = extern "C" fn(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize;

pub type DispatcherProc = extern "C" fn(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize;

pub type ProcessProc =
    extern "C" fn(effect: *mut AEffect, inputs: *mut *mut f32, outputs: *mut *mut f32, frames: i32);

pub type ProcessDoubleProc =
    extern "C" fn(effect: *mut AEffect, inputs: *mut *mut f64, outputs: *mut *mut f64, frames: i32);

pub type SetParameterProc = extern "C" fn(effect: *mut AEffect, index: i32, value: f32);

pub type GetParameterProc = extern "C" fn(effect: *mut AEffect, index: i32) -> f32;

/// Plugin entry point.
pub type PluginMain = unsafe extern "C" fn(host: HostCallback) -> *mut AEffect;

/// Entry-point symbols, tried in order.
pub const ENTRY_POINTS: [&[u8]; 3] = [b"VSTPluginMain\0", b"main\0", b"MAIN\0"];

#[repr(C)]
#[allow(dead_code)]
pub struct AEffect {
    pub magic: i32,
    pub dispatcher: Option<DispatcherProc>,
    /// Deprecated accumulating process.
    pub process: Option<ProcessProc>,
    pub set_parameter: Option<SetParameterProc>,
    pub get_parameter: Option<GetParameterProc>,
    pub num_programs: i32,
    pub num_params: i32,
    pub num_inputs: i32,
    pub num_outputs: i32,
    pub flags: i32,
    pub reserved1: isize,
    pub reserved2: isize,
    pub initial_delay: i32,
    pub real_qualities: i32,
    pub off_qualities: i32,
    pub io_ratio: f32,
    pub object: *mut c_void,
    /// Host-owned pointer; carries the worker's host context.
    pub user: *mut c_void,
    pub unique_id: i32,
    pub version: i32,
    pub process_replacing: Option<ProcessProc>,
    pub process_double_replacing: Option<ProcessDoubleProc>,
    pub future: [c_char; 56],
}

pub mod flags {
    pub const HAS_EDITOR: i32 = 1 << 0;
    pub const PROGRAM_CHUNKS: i32 = 1 << 5;
}

/// Plugin dispatcher opcodes.
pub mod effect_opcodes {
    pub const OPEN: i32 = 0;
    pub const CLOSE: i32 = 1;
    pub const SET_SAMPLE_RATE: i32 = 10;
    pub const SET_BLOCK_SIZE: i32 = 11;
    pub const MAINS_CHANGED: i32 = 12;
    pub const EDIT_GET_RECT: i32 = 13;
    pub const EDIT_OPEN: i32 = 14;
    pub const EDIT_CLOSE: i32 = 15;
    pub const EDIT_IDLE: i32 = 19;
    pub const GET_CHUNK: i32 = 23;
    pub const SET_CHUNK: i32 = 24;
    pub const PROCESS_EVENTS: i32 = 25;
    pub const GET_PLUG_CATEGORY: i32 = 35;
    pub const GET_EFFECT_NAME: i32 = 45;
    pub const GET_VENDOR_STRING: i32 = 47;
    pub const GET_PRODUCT_STRING: i32 = 48;
    pub const GET_VENDOR_VERSION: i32 = 49;
    pub const CAN_DO: i32 = 51;
    /// Deprecated in 2.4, still honored by older instruments.
    pub const IDLE: i32 = 53;
    pub const START_PROCESS: i32 = 71;
    pub const STOP_PROCESS: i32 = 72;
}

/// Host callback opcodes.
pub mod host_opcodes {
    pub const VERSION: i32 = 1;
    pub const CURRENT_ID: i32 = 2;
    pub const IDLE: i32 = 3;
    /// Deprecated: the plugin asks for periodic idle calls.
    pub const NEED_IDLE: i32 = 14;
    pub const GET_SAMPLE_RATE: i32 = 16;
    pub const GET_BLOCK_SIZE: i32 = 17;
    pub const GET_VENDOR_STRING: i32 = 32;
    pub const GET_PRODUCT_STRING: i32 = 33;
    pub const GET_VENDOR_VERSION: i32 = 34;
    pub const CAN_DO: i32 = 37;
    pub const GET_LANGUAGE: i32 = 38;
    pub const GET_DIRECTORY: i32 = 41;
}

pub const PLUG_CATEGORY_SYNTH: isize = 2;
pub const LANGUAGE_ENGLISH: isize = 1;

pub const EVENT_TYPE_MIDI: i32 = 1;
pub const EVENT_TYPE_SYSEX: i32 = 6;

#[repr(C)]
#[derive(Clone, Copy, Default)]
#[allow(dead_code)]
pub struct VstMidiEvent {
    pub event_type: i32,
    pub byte_size: i32,
    pub delta_frames: i32,
    pub flags: i32,
    pub note_length: i32,
    pub note_offset: i32,
    pub midi_data: [u8; 4],
    pub detune: i8,
    pub note_off_velocity: u8,
    pub reserved1: u8,
    pub reserved2: u8,
}

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
pub struct VstMidiSysexEvent {
    pub event_type: i32,
    pub byte_size: i32,
    pub delta_frames: i32,
    pub flags: i32,
    pub dump_bytes: i32,
    pub resvd1: isize,
    pub sysex_dump: *mut c_char,
    pub resvd2: isize,
}

/// Header of the event list handed to `effProcessEvents`. The SDK declares a
/// two-element trailing array; longer lists are allocated past the struct.
#[repr(C)]
#[allow(dead_code)]
pub struct VstEvents {
    pub num_events: i32,
    pub reserved: isize,
    pub events: [*mut c_void; 2],
}

/// Editor bounds reported by `effEditGetRect`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ERect {
    pub top: i16,
    pub left: i16,
    pub bottom: i16,
    pub right: i16,
}

impl ERect {
    /// Width and height, or `None` for an empty or inverted rectangle.
    pub fn size(&self) -> Option<(u32, u32)> {
        let width = i32::from(self.right) - i32::from(self.left);
        let height = i32::from(self.bottom) - i32::from(self.top);
        (width > 0 && height > 0).then_some((width as u32, height as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_event_sizes_match_sdk() {
        assert_eq!(size_of::<VstMidiEvent>(), 32);
        assert_eq!(
            size_of::<VstMidiSysexEvent>(),
            if size_of::<usize>() == 8 { 48 } else { 32 }
        );
    }

    #[test]
    fn test_magic_spells_vstp() {
        assert_eq!(&EFFECT_MAGIC.to_be_bytes(), b"VstP");
    }

    #[test]
    fn test_erect_size() {
        assert_eq!(size_of::<ERect>(), 8);
        let rect = ERect {
            top: 10,
            left: 20,
            bottom: 310,
            right: 420,
        };
        assert_eq!(rect.size(), Some((400, 300)));
        assert_eq!(ERect::default().size(), None, "empty rect has no size");
    }
}
