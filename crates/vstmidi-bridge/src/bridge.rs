//! Synth bridge facade used by the driver message handler and the audio callback.
//!
//! Two threads meet here. The driver's message thread calls
//! [`SynthBridge::put_midi_message`] and [`SynthBridge::put_sysex`], which only
//! touch the lock-free mailbox. The audio thread calls one of the render
//! methods, which drains the mailbox one entry at a time under the synth
//! mutex, forwarding each to the worker, then renders under the same mutex.
//! Open, close and reset take the synth mutex too, so they never interleave
//! with a drain step or a render.

use crate::config::BridgeConfig;
use crate::mailbox::{Mailbox, MailboxEntry, MailboxFull};
use crate::metadata::PluginInfo;
use crate::settings::{settings_key, SettingsStore};
use crate::supervisor::WorkerSession;
use crate::{BridgeError, Result};
use atomic_float::AtomicF32;
use byteorder::{ByteOrder, NativeEndian};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

/// Frames per integer render sub-call.
const INT_RENDER_FRAMES: usize = 512;

/// Channels of every buffer handed to the render methods.
pub const OUTPUT_CHANNELS: usize = 2;

/// Sample layout of a byte buffer passed to [`SynthBridge::fill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// Interleaved stereo signed 16-bit, native endian.
    #[default]
    Int16,
    /// Interleaved stereo 32-bit float, native endian.
    Float32,
}

impl SampleFormat {
    pub fn bytes_per_frame(self) -> usize {
        match self {
            SampleFormat::Int16 => 2 * OUTPUT_CHANNELS,
            SampleFormat::Float32 => 4 * OUTPUT_CHANNELS,
        }
    }
}

/// Starts a worker for a plugin.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, plugin_path: &Path, config: &BridgeConfig) -> Result<WorkerSession>;
}

/// Spawns the `vsthost` executable matching the plugin.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, plugin_path: &Path, config: &BridgeConfig) -> Result<WorkerSession> {
        WorkerSession::spawn(config, plugin_path)
    }
}

/// State guarded by the synth mutex.
struct SynthState {
    session: Option<WorkerSession>,
    plugin_path: Option<PathBuf>,
    /// Plugin-layout float scratch.
    scratch: Vec<f32>,
    /// Stereo float scratch for integer rendering.
    stereo: Vec<f32>,
}

pub struct SynthBridge {
    config: BridgeConfig,
    launcher: Box<dyn WorkerLauncher>,
    settings: Option<Box<dyn SettingsStore>>,
    mailbox: Mailbox,
    synth: Mutex<SynthState>,
    volume: AtomicF32,
    fill_scratch: Mutex<Vec<i16>>,
    fill_float_scratch: Mutex<Vec<f32>>,
}

impl SynthBridge {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            mailbox: Mailbox::new(config.mailbox_capacity),
            volume: AtomicF32::new(config.volume),
            launcher: Box::new(ProcessLauncher),
            settings: None,
            synth: Mutex::new(SynthState {
                session: None,
                plugin_path: None,
                scratch: Vec::new(),
                stereo: Vec::new(),
            }),
            fill_scratch: Mutex::new(Vec::new()),
            fill_float_scratch: Mutex::new(Vec::new()),
            config,
        })
    }

    pub fn with_launcher(mut self, launcher: impl WorkerLauncher + 'static) -> Self {
        self.launcher = Box::new(launcher);
        self
    }

    pub fn with_settings(mut self, store: impl SettingsStore + 'static) -> Self {
        self.settings = Some(Box::new(store));
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Opens the plugin named in the configuration.
    pub fn open(&self) -> Result<PluginInfo> {
        let path = self
            .config
            .plugin_path
            .clone()
            .ok_or(BridgeError::NoPluginConfigured)?;
        self.open_plugin(path)
    }

    /// Closes any open session, then starts a worker for `path`, sets the
    /// sample rate and restores the plugin's persisted state.
    pub fn open_plugin(&self, path: impl AsRef<Path>) -> Result<PluginInfo> {
        let path = path.as_ref();
        let mut state = self.synth.lock();
        self.shutdown(&mut state);

        let mut session = self.launcher.launch(path, &self.config)?;
        session.set_sample_rate(self.config.sample_rate)?;

        if let Some(stored) = self.load_settings(path) {
            session.set_chunk(&stored)?;
        }

        let info = session.info().clone();
        tracing::info!("opened {} ({})", info.name, path.display());
        state.session = Some(session);
        state.plugin_path = Some(path.to_path_buf());
        Ok(info)
    }

    /// Saves the plugin's state, stops the worker and drops queued messages.
    pub fn close(&self) {
        let mut state = self.synth.lock();
        self.shutdown(&mut state);
    }

    /// Saves state and asks the worker to re-instantiate the plugin. Queued
    /// messages are discarded.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.synth.lock();
        self.save_settings(&mut state);

        let result = match state.session.as_mut() {
            Some(session) => session.reset(),
            None => Err(BridgeError::NotOpen),
        };
        self.mailbox.clear();
        self.reap_dead_session(&mut state);
        result
    }

    pub fn is_open(&self) -> bool {
        self.synth
            .lock()
            .session
            .as_ref()
            .is_some_and(|session| !session.is_terminated())
    }

    pub fn plugin_info(&self) -> Option<PluginInfo> {
        self.synth
            .lock()
            .session
            .as_ref()
            .map(|session| session.info().clone())
    }

    pub fn has_editor(&self) -> Result<bool> {
        self.with_session(|session| session.has_editor())
    }

    pub fn display_editor(&self) -> Result<()> {
        self.with_session(|session| session.display_editor())
    }

    pub fn set_sample_rate(&self, rate: u32) -> Result<()> {
        self.with_session(|session| session.set_sample_rate(rate))
    }

    pub fn volume(&self) -> f32 {
        self.volume.load(Ordering::Relaxed)
    }

    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_finite() { volume.max(0.0) } else { 1.0 };
        self.volume.store(volume, Ordering::Relaxed);
    }

    /// Queues a short MIDI message. Never blocks.
    pub fn put_midi_message(&self, port: u32, message: u32) -> std::result::Result<(), MailboxFull> {
        self.mailbox.put_message(port, message)
    }

    /// Queues a copy of a sysex message. Never blocks.
    pub fn put_sysex(&self, port: u32, data: &[u8]) -> std::result::Result<(), MailboxFull> {
        self.mailbox.put_sysex(port, data)
    }

    pub fn pending_messages(&self) -> usize {
        self.mailbox.peek_count()
    }

    /// Renders `out.len() / 2` interleaved stereo frames as 16-bit PCM.
    ///
    /// The buffer is always fully written; it is silent when no session is
    /// open or the session was just lost.
    pub fn render(&self, out: &mut [i16]) -> Result<()> {
        self.forward_pending();

        let mut state = self.synth.lock();
        let mut stereo = std::mem::take(&mut state.stereo);
        stereo.resize(INT_RENDER_FRAMES * OUTPUT_CHANNELS, 0.0);

        let mut result = Ok(());
        for block in out.chunks_mut(INT_RENDER_FRAMES * OUTPUT_CHANNELS) {
            let floats = &mut stereo[..block.len()];
            if let Err(e) = self.render_locked(&mut state, floats) {
                block.fill(0);
                if result.is_ok() {
                    result = Err(e);
                }
                continue;
            }
            for (dst, &src) in block.iter_mut().zip(floats.iter()) {
                *dst = float_to_i16(src);
            }
        }

        state.stereo = stereo;
        result
    }

    /// Renders `out.len() / 2` interleaved stereo float frames.
    pub fn render_float(&self, out: &mut [f32]) -> Result<()> {
        self.forward_pending();
        let mut state = self.synth.lock();
        self.render_locked(&mut state, out)
    }

    /// Pull callback for an audio sink: fills `bytes` with whole frames in
    /// `format` and returns how many bytes were produced.
    pub fn fill(&self, format: SampleFormat, bytes: &mut [u8]) -> usize {
        let frames = bytes.len() / format.bytes_per_frame();
        let produced = frames * format.bytes_per_frame();
        let samples = frames * OUTPUT_CHANNELS;

        match format {
            SampleFormat::Int16 => {
                let mut scratch = self.fill_scratch.lock();
                scratch.resize(samples, 0);
                let _ = self.render(&mut scratch[..samples]);
                NativeEndian::write_i16_into(&scratch[..samples], &mut bytes[..produced]);
            }
            SampleFormat::Float32 => {
                let mut scratch = self.fill_float_scratch.lock();
                scratch.resize(samples, 0.0);
                let _ = self.render_float(&mut scratch[..samples]);
                NativeEndian::write_f32_into(&scratch[..samples], &mut bytes[..produced]);
            }
        }
        produced
    }

    /// Forwards queued messages to the worker, taking the synth mutex once
    /// per entry so a control thread can get in between.
    fn forward_pending(&self) {
        while self.mailbox.peek_count() > 0 {
            let mut state = self.synth.lock();
            let Some(entry) = self.mailbox.get() else {
                break;
            };
            let Some(session) = state.session.as_mut() else {
                continue;
            };

            let forwarded = match entry {
                MailboxEntry::Short { port, message } if message != 0 => {
                    session.send_midi(port, message)
                }
                MailboxEntry::SysEx { port, data } if !data.is_empty() => {
                    session.send_sysex(port, &data)
                }
                _ => Ok(()),
            };

            if let Err(e) = forwarded {
                if e.is_session_fatal() {
                    tracing::warn!("dropping worker session: {}", e);
                } else {
                    tracing::warn!("message not forwarded: {}", e);
                }
                self.reap_dead_session(&mut state);
            }
        }
    }

    /// Renders stereo into `out` while holding the synth mutex.
    fn render_locked(&self, state: &mut SynthState, out: &mut [f32]) -> Result<()> {
        let SynthState {
            session, scratch, ..
        } = state;

        let Some(live) = session.as_mut().filter(|s| !s.is_terminated()) else {
            out.fill(0.0);
            return Err(BridgeError::NotOpen);
        };

        let frames = out.len() / OUTPUT_CHANNELS;
        out[frames * OUTPUT_CHANNELS..].fill(0.0);
        let result = match live.output_channels() {
            2 => live.render_float(&mut out[..frames * OUTPUT_CHANNELS]),
            1 => {
                scratch.resize(frames, 0.0);
                let result = live.render_float(&mut scratch[..frames]);
                for (frame, &sample) in out.chunks_exact_mut(OUTPUT_CHANNELS).zip(scratch.iter()) {
                    frame.fill(sample);
                }
                result
            }
            // No audible layout, but the worker still has to run the block
            // so queued events reach the plugin.
            channels => {
                let len = frames * channels.max(1);
                scratch.resize(len, 0.0);
                let result = live.render_float(&mut scratch[..len]);
                out.fill(0.0);
                result
            }
        };

        if let Err(e) = result {
            tracing::warn!("render failed, session torn down: {}", e);
            *session = None;
            out.fill(0.0);
            return Err(e);
        }

        let volume = self.volume();
        if volume != 1.0 {
            out.iter_mut().for_each(|sample| *sample *= volume);
        }
        Ok(())
    }

    fn with_session<T>(&self, f: impl FnOnce(&mut WorkerSession) -> Result<T>) -> Result<T> {
        let mut state = self.synth.lock();
        let result = match state.session.as_mut() {
            Some(session) if !session.is_terminated() => f(session),
            _ => Err(BridgeError::NotOpen),
        };
        self.reap_dead_session(&mut state);
        result
    }

    fn reap_dead_session(&self, state: &mut SynthState) {
        if state.session.as_ref().is_some_and(|s| s.is_terminated()) {
            state.session = None;
        }
    }

    fn shutdown(&self, state: &mut SynthState) {
        self.save_settings(state);
        if let Some(mut session) = state.session.take() {
            session.terminate();
        }
        state.plugin_path = None;
        let dropped = self.mailbox.clear();
        if dropped > 0 {
            tracing::debug!("discarded {} queued MIDI messages", dropped);
        }
    }

    fn load_settings(&self, plugin: &Path) -> Option<Vec<u8>> {
        let store = self.settings.as_ref()?;
        match store.load_bytes(&settings_key(plugin)) {
            Ok(bytes) => bytes.filter(|b| !b.is_empty()),
            Err(e) => {
                tracing::warn!("could not load settings for {}: {}", plugin.display(), e);
                None
            }
        }
    }

    fn save_settings(&self, state: &mut SynthState) {
        let (Some(store), Some(path)) = (self.settings.as_ref(), state.plugin_path.as_ref()) else {
            return;
        };
        let Some(session) = state.session.as_mut().filter(|s| !s.is_terminated()) else {
            return;
        };

        match session.get_chunk() {
            Ok(chunk) => {
                if let Err(e) = store.save_bytes(&settings_key(path), &chunk) {
                    tracing::warn!("could not save settings for {}: {}", path.display(), e);
                }
            }
            Err(e) => tracing::warn!("could not fetch plugin state: {}", e),
        }
    }
}

impl Drop for SynthBridge {
    fn drop(&mut self) {
        let mut state = self.synth.lock();
        self.shutdown(&mut state);
    }
}

/// Scales to 16-bit and saturates.
#[inline]
pub fn float_to_i16(sample: f32) -> i16 {
    let scaled = (sample * 32768.0) as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettingsStore;

    struct FailingLauncher;

    impl WorkerLauncher for FailingLauncher {
        fn launch(&self, _plugin_path: &Path, _config: &BridgeConfig) -> Result<WorkerSession> {
            Err(BridgeError::Startup(crate::WorkerStatus::CannotLoadPlugin))
        }
    }

    #[test]
    fn test_float_to_i16_saturates() {
        assert_eq!(float_to_i16(0.0), 0);
        assert_eq!(float_to_i16(0.5), 16384);
        assert_eq!(float_to_i16(-1.0), -32768);
        assert_eq!(float_to_i16(1.0), 32767, "full scale positive saturates");
        assert_eq!(float_to_i16(4.0), 32767);
        assert_eq!(float_to_i16(-4.0), -32768);
        assert_eq!(float_to_i16(f32::NAN), 0);
    }

    #[test]
    fn test_closed_bridge_renders_silence() {
        let bridge = SynthBridge::new(BridgeConfig::default()).unwrap();
        let mut out = [7i16; 64];
        assert!(matches!(bridge.render(&mut out), Err(BridgeError::NotOpen)));
        assert!(out.iter().all(|&s| s == 0));

        let mut out = [7.0f32; 64];
        assert!(bridge.render_float(&mut out).is_err());
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_put_never_blocks_and_reports_full() {
        let bridge = SynthBridge::new(BridgeConfig::default().with_mailbox_capacity(4)).unwrap();
        assert!(bridge.put_midi_message(0, 0x90).is_ok());
        assert!(bridge.put_midi_message(0, 0x90).is_ok());
        assert!(bridge.put_sysex(0, &[0xF0, 0xF7]).is_ok());
        assert_eq!(bridge.put_midi_message(0, 0x90), Err(MailboxFull));
        assert_eq!(bridge.pending_messages(), 3);
    }

    #[test]
    fn test_render_without_session_drains_mailbox() {
        let bridge = SynthBridge::new(BridgeConfig::default()).unwrap();
        bridge.put_midi_message(0, 0x007F_3C90).unwrap();
        let mut out = [0i16; 8];
        let _ = bridge.render(&mut out);
        assert_eq!(bridge.pending_messages(), 0);
    }

    #[test]
    fn test_open_without_plugin_configured() {
        let bridge = SynthBridge::new(BridgeConfig::default()).unwrap();
        assert!(matches!(bridge.open(), Err(BridgeError::NoPluginConfigured)));
    }

    #[test]
    fn test_failed_open_leaves_bridge_closed() {
        let bridge = SynthBridge::new(BridgeConfig::default())
            .unwrap()
            .with_launcher(FailingLauncher)
            .with_settings(MemorySettingsStore::new());
        let err = bridge.open_plugin("/nowhere/synth.dll").unwrap_err();
        assert!(matches!(err, BridgeError::Startup(_)));
        assert!(!bridge.is_open());
        assert!(bridge.plugin_info().is_none());
        assert!(matches!(bridge.reset(), Err(BridgeError::NotOpen)));
    }

    #[test]
    fn test_nonexistent_plugin_spawns_nothing() {
        let bridge = SynthBridge::new(BridgeConfig::default()).unwrap();
        let err = bridge.open_plugin("/definitely/not/here/synth.dll").unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Startup(crate::WorkerStatus::CannotLoadPlugin)
        ));
        assert!(!bridge.is_open());
    }

    #[test]
    fn test_volume_clamped() {
        let bridge = SynthBridge::new(BridgeConfig::default()).unwrap();
        bridge.set_volume(0.25);
        assert_eq!(bridge.volume(), 0.25);
        bridge.set_volume(-3.0);
        assert_eq!(bridge.volume(), 0.0);
        bridge.set_volume(f32::INFINITY);
        assert_eq!(bridge.volume(), 1.0);
    }

    #[test]
    fn test_fill_reports_whole_frames() {
        let bridge = SynthBridge::new(BridgeConfig::default()).unwrap();
        let mut bytes = [0xAAu8; 18];
        assert_eq!(bridge.fill(SampleFormat::Int16, &mut bytes), 16);
        assert!(bytes[..16].iter().all(|&b| b == 0));

        let mut bytes = [0xAAu8; 20];
        assert_eq!(bridge.fill(SampleFormat::Float32, &mut bytes), 16);
    }

    #[test]
    fn test_fill_float_reuses_scratch() {
        let bridge = SynthBridge::new(BridgeConfig::default()).unwrap();
        let mut bytes = vec![0xAAu8; 256 * SampleFormat::Float32.bytes_per_frame()];
        assert_eq!(bridge.fill(SampleFormat::Float32, &mut bytes), bytes.len());
        assert!(bytes.iter().all(|&b| b == 0), "closed bridge fills silence");

        let first = bridge.fill_float_scratch.lock().as_ptr();
        let mut shorter = vec![0xAAu8; 128 * SampleFormat::Float32.bytes_per_frame()];
        bridge.fill(SampleFormat::Float32, &mut shorter);
        assert_eq!(
            bridge.fill_float_scratch.lock().as_ptr(),
            first,
            "float fills should not reallocate once the scratch is large enough"
        );
        assert!(shorter.iter().all(|&b| b == 0));
    }
}
