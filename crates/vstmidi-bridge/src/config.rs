//! Bridge configuration.

use crate::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for one synth bridge.
///
/// Every field has a default, so a config file only needs the values it
/// changes:
///
/// ```toml
/// plugin_path = "C:/VSTPlugins/Synth1 VST.dll"
/// sample_rate = 48000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Instrument opened by [`SynthBridge::open`](crate::SynthBridge::open).
    pub plugin_path: Option<PathBuf>,

    /// Directory holding the `vsthost*` worker binaries. Defaults to the
    /// directory of the running executable.
    pub worker_dir: Option<PathBuf>,

    /// Directory for per-plugin persisted state.
    pub settings_dir: Option<PathBuf>,

    pub sample_rate: u32,

    /// Bound on the startup handshake.
    pub connect_timeout_ms: u64,

    /// Bound on waiting for a killed worker to exit.
    pub terminate_timeout_ms: u64,

    /// Mailbox slots. One slot is kept free, so `capacity - 1` messages fit.
    pub mailbox_capacity: usize,

    /// Linear gain applied to rendered samples.
    pub volume: f32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            plugin_path: None,
            worker_dir: None,
            settings_dir: None,
            sample_rate: 44100,
            connect_timeout_ms: 10_000,
            terminate_timeout_ms: 5_000,
            mailbox_capacity: 1024,
            volume: 1.0,
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|e| match e {
            BridgeError::Config(reason) => {
                BridgeError::Config(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| BridgeError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(8000..=384_000).contains(&self.sample_rate) {
            return Err(BridgeError::Config(format!(
                "sample_rate {} out of range (8000-384000 Hz)",
                self.sample_rate
            )));
        }
        if self.mailbox_capacity < 2 {
            return Err(BridgeError::Config(format!(
                "mailbox_capacity {} must be at least 2",
                self.mailbox_capacity
            )));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(BridgeError::Config(format!(
                "volume {} must be a finite non-negative gain",
                self.volume
            )));
        }
        Ok(())
    }

    pub fn with_plugin(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugin_path = Some(path.into());
        self
    }

    pub fn with_worker_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.worker_dir = Some(dir.into());
        self
    }

    pub fn with_settings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings_dir = Some(dir.into());
        self
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    /// Directory searched for worker binaries.
    pub fn resolve_worker_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.worker_dir {
            return Ok(dir.clone());
        }
        let mut exe = std::env::current_exe()?;
        exe.pop();
        Ok(exe)
    }
}
