//! Worker process for the VSTi MIDI bridge
//!
//! The `vsthost` binary built from this crate hosts exactly one VST2
//! instrument and answers the bridge's command set over stdin/stdout. Plugin
//! code runs here so a crashing or hanging plugin only takes this process
//! down.
//!
//! The command loop ([`server`]) drives a [`PluginRuntime`] which owns the
//! plugin lifecycle, the staged MIDI batch and the render buffers. Plugins are
//! reached through the [`Instrument`] trait; the VST2 loader is one
//! implementation.

pub mod args;
pub mod chunk;
pub mod editor;
pub mod error;
pub mod events;
pub mod instrument;
pub mod runtime;
pub mod server;

#[cfg(feature = "vst2")]
mod vst2_abi;

#[cfg(feature = "vst2")]
pub mod vst2_loader;

#[cfg(test)]
mod test_utils;

pub use args::Invocation;
pub use editor::{EditorWindow, Headless};
pub use error::{HostError, Result};
pub use events::{EventQueue, StagedEvent};
pub use instrument::{Instrument, InstrumentLoader, ProcessBuffers};
pub use runtime::{IdlePhase, PluginRuntime, PRE_ROLL_FRAMES};
pub use server::{serve, HostServer};

use std::path::Path;

/// Loads the plugin module at `path`.
#[cfg(feature = "vst2")]
pub fn open_plugin(path: &Path) -> Result<Box<dyn InstrumentLoader>> {
    Ok(Box::new(vst2_loader::Vst2Loader::open(path)?))
}

#[cfg(not(feature = "vst2"))]
pub fn open_plugin(path: &Path) -> Result<Box<dyn InstrumentLoader>> {
    Err(HostError::new(
        vstmidi_bridge::WorkerStatus::CannotLoadPlugin,
        format!(
            "{}: VST2 support not compiled (enable 'vst2' feature)",
            path.display()
        ),
    ))
}
