//! Wire protocol shared by the bridge and the worker.
//!
//! Every value on the wire is a little-endian `u32` word or a byte string whose
//! length was sent just before it. There is no framing beyond the command word:
//! both sides must agree on the shape of the next bytes, so commands are issued
//! strictly one at a time and every request is answered before the next one.

use std::fmt;

use crate::channel::DuplexChannel;
use crate::metadata::PluginInfo;
use std::io::{Read, Write};

/// Status word for a successful command.
pub const STATUS_OK: u32 = 0;

/// Largest block handed to the plugin in one processing call.
pub const MAX_BLOCK_FRAMES: usize = 4096;

/// Highest logical MIDI port that survives the clamp.
pub const MAX_PORT: u32 = 2;

/// Output channels the worker reports at most.
pub const MAX_OUTPUT_CHANNELS: u32 = 2;

/// Weight of the invocation checksum.
pub const CHECKSUM_WEIGHT: u32 = 820_109;

/// Upper bound on handshake strings; longer values mean a corrupt stream.
pub const MAX_NAME_LEN: u32 = 4096;

/// Longest sysex payload the 24-bit length field of the header can carry.
pub const MAX_SYSEX_LEN: usize = 0x00FF_FFFF;

/// Upper bound on a persisted-state blob moved over the wire.
pub const MAX_CHUNK_LEN: u32 = 256 * 1024 * 1024;

/// Command words sent from the bridge to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    Exit = 0,
    GetChunkData = 1,
    SetChunkData = 2,
    HasEditor = 3,
    DisplayEditorModal = 4,
    SetSampleRate = 5,
    Reset = 6,
    SendMidiEvent = 7,
    SendMidiSysexEvent = 8,
    RenderAudioSamples = 9,
}

impl Command {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Command::Exit,
            1 => Command::GetChunkData,
            2 => Command::SetChunkData,
            3 => Command::HasEditor,
            4 => Command::DisplayEditorModal,
            5 => Command::SetSampleRate,
            6 => Command::Reset,
            7 => Command::SendMidiEvent,
            8 => Command::SendMidiSysexEvent,
            9 => Command::RenderAudioSamples,
            _ => return None,
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Exit => "exit",
            Command::GetChunkData => "get chunk",
            Command::SetChunkData => "set chunk",
            Command::HasEditor => "has editor",
            Command::DisplayEditorModal => "display editor",
            Command::SetSampleRate => "set sample rate",
            Command::Reset => "reset",
            Command::SendMidiEvent => "midi event",
            Command::SendMidiSysexEvent => "sysex event",
            Command::RenderAudioSamples => "render",
        };
        f.write_str(name)
    }
}

/// Failure codes reported by the worker, either in the handshake status word,
/// as the final word before it exits, or as its process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerStatus {
    InvalidArguments,
    MalformedChecksum,
    ChecksumMismatch,
    UiInitFailed,
    ComInitFailed,
    CannotLoadPlugin,
    MissingEntryPoint,
    /// Bad magic on the instance. Reset failures report this code too.
    NotAPlugin,
    NotAnInstrument,
    CannotSetSampleRate,
    CannotRender,
    UnknownCommand,
    Unknown(u32),
}

impl WorkerStatus {
    /// Code sent when re-instantiation during reset fails.
    pub const RESET_FAILED: WorkerStatus = WorkerStatus::NotAPlugin;

    pub fn code(self) -> u32 {
        match self {
            WorkerStatus::InvalidArguments => 1,
            WorkerStatus::MalformedChecksum => 2,
            WorkerStatus::ChecksumMismatch => 3,
            WorkerStatus::UiInitFailed => 4,
            WorkerStatus::ComInitFailed => 5,
            WorkerStatus::CannotLoadPlugin => 6,
            WorkerStatus::MissingEntryPoint => 7,
            WorkerStatus::NotAPlugin => 8,
            WorkerStatus::NotAnInstrument => 9,
            WorkerStatus::CannotSetSampleRate => 10,
            WorkerStatus::CannotRender => 11,
            WorkerStatus::UnknownCommand => 12,
            WorkerStatus::Unknown(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            1 => WorkerStatus::InvalidArguments,
            2 => WorkerStatus::MalformedChecksum,
            3 => WorkerStatus::ChecksumMismatch,
            4 => WorkerStatus::UiInitFailed,
            5 => WorkerStatus::ComInitFailed,
            6 => WorkerStatus::CannotLoadPlugin,
            7 => WorkerStatus::MissingEntryPoint,
            8 => WorkerStatus::NotAPlugin,
            9 => WorkerStatus::NotAnInstrument,
            10 => WorkerStatus::CannotSetSampleRate,
            11 => WorkerStatus::CannotRender,
            12 => WorkerStatus::UnknownCommand,
            other => WorkerStatus::Unknown(other),
        }
    }

    /// Failures caused by the plugin file itself rather than the runtime.
    pub fn is_plugin_fault(self) -> bool {
        matches!(
            self,
            WorkerStatus::CannotLoadPlugin
                | WorkerStatus::MissingEntryPoint
                | WorkerStatus::NotAPlugin
                | WorkerStatus::NotAnInstrument
        )
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::InvalidArguments => write!(f, "invalid command line arguments"),
            WorkerStatus::MalformedChecksum => write!(f, "malformed checksum"),
            WorkerStatus::ChecksumMismatch => write!(f, "checksum mismatch"),
            WorkerStatus::UiInitFailed => write!(f, "UI subsystem initialization failed"),
            WorkerStatus::ComInitFailed => write!(f, "COM initialization failed"),
            WorkerStatus::CannotLoadPlugin => write!(f, "cannot load plugin"),
            WorkerStatus::MissingEntryPoint => write!(f, "plugin entry point not found"),
            WorkerStatus::NotAPlugin => write!(f, "not a VST plugin"),
            WorkerStatus::NotAnInstrument => write!(f, "plugin is not a MIDI instrument"),
            WorkerStatus::CannotSetSampleRate => write!(f, "cannot set sample rate"),
            WorkerStatus::CannotRender => write!(f, "cannot render audio"),
            WorkerStatus::UnknownCommand => write!(f, "unknown command"),
            WorkerStatus::Unknown(code) => write!(f, "unknown status {code}"),
        }
    }
}

/// Caps a logical port at [`MAX_PORT`].
#[inline]
pub fn clamp_port(port: u32) -> u32 {
    port.min(MAX_PORT)
}

/// Packs up to three MIDI bytes with the clamped port in the top byte.
#[inline]
pub fn pack_short_message(port: u32, message: u32) -> u32 {
    (message & 0x00FF_FFFF) | (clamp_port(port) << 24)
}

/// Splits a packed short message into its clamped port and MIDI bytes.
#[inline]
pub fn unpack_short_message(word: u32) -> (u32, [u8; 3]) {
    let bytes = word.to_le_bytes();
    (clamp_port(word >> 24), [bytes[0], bytes[1], bytes[2]])
}

/// Header word preceding a sysex payload: port in the top byte, length below.
#[inline]
pub fn pack_sysex_header(port: u32, len: usize) -> u32 {
    (clamp_port(port) << 24) | (len.min(MAX_SYSEX_LEN) as u32)
}

#[inline]
pub fn unpack_sysex_header(word: u32) -> (u32, usize) {
    (clamp_port(word >> 24), (word & 0x00FF_FFFF) as usize)
}

/// Invocation checksum over a plugin path.
///
/// An order-dependent weighted sum of the UTF-16 code units, wrapping at 32
/// bits. It only guards against a worker being started with arguments that
/// were not produced by the bridge. It is not a cryptographic integrity check
/// and both sides must keep computing exactly this formula.
///
/// Each term is kept at full 32-bit width. Workers that narrow every product
/// to a 16-bit code unit before summing compute different values for almost
/// every path, so this bridge and such workers cannot start each other.
pub fn plugin_checksum(path: &str) -> u32 {
    path.encode_utf16().fold(0u32, |sum, unit| {
        sum.wrapping_add(u32::from(unit).wrapping_mul(CHECKSUM_WEIGHT))
    })
}

/// Eight uppercase hex digits, as passed on the worker command line.
pub fn format_checksum(checksum: u32) -> String {
    format!("{checksum:08X}")
}

/// Parses a command-line checksum. Accepts 1 to 8 hex digits and nothing else.
pub fn parse_checksum(text: &str) -> Option<u32> {
    if text.is_empty() || text.len() > 8 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(text, 16).ok()
}

/// Outcome of the startup exchange, as read by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Accepted(PluginInfo),
    Rejected(u32),
    /// The stream broke or carried nonsense before the exchange completed.
    Broken,
}

impl Handshake {
    /// Worker side: announce a loaded plugin.
    pub fn write_accepted<R: Read, W: Write>(
        channel: &mut DuplexChannel<R, W>,
        info: &PluginInfo,
    ) -> bool {
        let name = info.name.as_bytes();
        let vendor = info.vendor.as_bytes();
        let product = info.product.as_bytes();

        channel.send_u32(STATUS_OK)
            && channel.send_u32(name.len() as u32)
            && channel.send_u32(vendor.len() as u32)
            && channel.send_u32(product.len() as u32)
            && channel.send_u32(info.vendor_version)
            && channel.send_u32(info.unique_id)
            && channel.send_u32(info.outputs.min(MAX_OUTPUT_CHANNELS))
            && channel.send_bytes(name)
            && channel.send_bytes(vendor)
            && channel.send_bytes(product)
    }

    /// Bridge side: read the whole exchange.
    pub fn read<R: Read, W: Write>(channel: &mut DuplexChannel<R, W>) -> Self {
        let status = channel.receive_u32();
        if channel.is_broken() {
            return Handshake::Broken;
        }
        if status != STATUS_OK {
            return Handshake::Rejected(status);
        }

        let name_len = channel.receive_u32();
        let vendor_len = channel.receive_u32();
        let product_len = channel.receive_u32();
        let vendor_version = channel.receive_u32();
        let unique_id = channel.receive_u32();
        let outputs = channel.receive_u32();

        if channel.is_broken()
            || name_len > MAX_NAME_LEN
            || vendor_len > MAX_NAME_LEN
            || product_len > MAX_NAME_LEN
        {
            return Handshake::Broken;
        }

        let name = channel.receive_string(name_len as usize);
        let vendor = channel.receive_string(vendor_len as usize);
        let product = channel.receive_string(product_len as usize);
        if channel.is_broken() {
            return Handshake::Broken;
        }

        Handshake::Accepted(
            PluginInfo::new(name)
                .vendor(vendor)
                .product(product)
                .vendor_version(vendor_version)
                .unique_id(unique_id)
                .outputs(outputs.min(MAX_OUTPUT_CHANNELS)),
        )
    }
}
