//! # vstmidi - MIDI synthesizer bridge
//!
//! Plays MIDI through a VST2 instrument hosted in a separate worker process.
//!
//! ## Architecture
//!
//! vstmidi is an umbrella crate over:
//! - **vstmidi-bridge** - host side (mailbox, worker supervision, wire
//!   protocol, render facade, settings, driver-ABI mapping)
//! - **vstmidi-host** - the `vsthost` worker binary that loads the plugin
//!
//! ## Quick Start
//!
//! ```ignore
//! use vstmidi::prelude::*;
//!
//! let config = BridgeConfig::default().with_plugin("C:/VST/Synth1 VST.dll");
//! let bridge = SynthBridge::new(config)?;
//! bridge.open()?;
//!
//! bridge.put_midi_message(0, 0x007F_3C90).ok();
//! let mut pcm = vec![0i16; 512 * 2];
//! bridge.render(&mut pcm)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `output` - real-time playback through cpal ([`output::AudioOutput`])
//! - `vst2` - VST2 loading in the re-exported worker library ([`host`])

pub use vstmidi_bridge as bridge;
pub use vstmidi_host as host;

pub use vstmidi_bridge::{
    float_to_i16, inspect_plugin, BridgeConfig, BridgeError, FileSettingsStore, MailboxFull,
    MemorySettingsStore, PluginArch, PluginInfo, SampleFormat, SettingsStore, SynthBridge,
    WorkerStatus,
};

pub mod error;
pub use error::{Error, Result};

#[cfg(feature = "output")]
pub mod output;

pub mod prelude {
    pub use crate::{BridgeConfig, Error, PluginInfo, Result, SampleFormat, SynthBridge};

    #[cfg(feature = "output")]
    pub use crate::output::AudioOutput;
}
