//! Host side of the VSTi MIDI bridge
//!
//! A VST instrument runs in an isolated worker process (`vsthost`, from the
//! `vstmidi-host` crate). This crate owns everything on the other end: the
//! MIDI mailbox fed by the driver's message thread, the supervisor that
//! spawns and tears down the worker, the command channel, and the
//! [`SynthBridge`] facade the audio callback renders through.
//!
//! ## Usage
//!
//! ```ignore
//! use vstmidi_bridge::{BridgeConfig, SynthBridge, FileSettingsStore};
//!
//! let config = BridgeConfig::default().with_plugin("C:/VSTPlugins/Synth1 VST.dll");
//! let bridge = SynthBridge::new(config)?
//!     .with_settings(FileSettingsStore::new("C:/ProgramData/vstmidi"));
//!
//! let info = bridge.open()?;
//! bridge.put_midi_message(0, 0x007F_3C90).ok(); // note on, C4
//!
//! // From the audio callback:
//! let mut block = vec![0i16; 512 * 2];
//! bridge.render(&mut block)?;
//! ```

pub mod error;
pub use error::{BridgeError, Result, UserMessage};

mod arch;
pub use arch::{inspect_plugin, resolve_worker, PluginArch};

mod bridge;
pub use bridge::{float_to_i16, ProcessLauncher, SampleFormat, SynthBridge, WorkerLauncher, OUTPUT_CHANNELS};

pub mod channel;
pub use channel::DuplexChannel;

mod config;
pub use config::BridgeConfig;

pub mod driver;

mod mailbox;
pub use mailbox::{Mailbox, MailboxEntry, MailboxFull};

mod metadata;
pub use metadata::PluginInfo;

pub mod protocol;
pub use protocol::{Command, WorkerStatus};

mod session;

mod settings;
pub use settings::{settings_key, FileSettingsStore, MemorySettingsStore, SettingsStore};

mod supervisor;
pub use supervisor::{WorkerReader, WorkerSession, WorkerWriter};
