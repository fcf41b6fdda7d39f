//! CPAL audio output pulling from a [`SynthBridge`].

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;
use thiserror::Error;
use vstmidi_bridge::{SynthBridge, OUTPUT_CHANNELS};

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio device not available")]
    DeviceNotAvailable(#[from] cpal::DefaultStreamConfigError),

    #[error("Failed to build audio stream")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Failed to play audio stream")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Failed to enumerate devices")]
    Devices(#[from] cpal::DevicesError),

    #[error("Failed to get device name")]
    DeviceName(#[from] cpal::DeviceNameError),
}

pub type Result<T> = std::result::Result<T, OutputError>;

/// Holds a `cpal::Stream` in a `Send` context.
///
/// # Safety
/// `cpal::Stream` is `!Send` due to platform internals. The handle is only
/// created, kept and dropped by the owning [`AudioOutput`], never touched
/// from the audio callback.
struct StreamHandle(#[allow(dead_code)] cpal::Stream);

unsafe impl Send for StreamHandle {}

/// Plays a bridge through an output device. The device callback renders
/// straight from [`SynthBridge::render_float`].
pub struct AudioOutput {
    sample_rate: u32,
    channels: usize,
    device_index: Option<usize>,
    stream: Option<StreamHandle>,
}

impl AudioOutput {
    /// Opens the default device, or the `index`-th output device.
    pub fn new(device_index: Option<usize>) -> Result<Self> {
        let device = get_device(device_index)?;
        let config = device.default_output_config()?;

        Ok(Self {
            sample_rate: config.sample_rate().0,
            channels: config.channels() as usize,
            device_index,
            stream: None,
        })
    }

    /// Device rate; configure the bridge with it before opening.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    pub fn device_name(&self) -> Result<String> {
        Ok(get_device(self.device_index)?.name()?)
    }

    pub fn list_devices() -> Result<Vec<String>> {
        cpal::default_host()
            .output_devices()?
            .enumerate()
            .map(|(i, d)| Ok(format!("{i}: {}", d.name()?)))
            .collect()
    }

    pub fn start(&mut self, bridge: Arc<SynthBridge>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = get_device(self.device_index)?;
        let config = device.default_output_config()?;

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config.into(), bridge)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config.into(), bridge)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config.into(), bridge)?,
            format => return Err(OutputError::UnsupportedFormat(format!("{format:?}"))),
        };

        stream.play()?;
        self.stream = Some(StreamHandle(stream));
        tracing::info!(
            "audio output started ({} Hz, {} channels)",
            self.sample_rate,
            self.channels
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!("audio output stopped");
        }
    }
}

fn get_device(index: Option<usize>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    match index {
        Some(i) => {
            let devices: Vec<_> = host.output_devices()?.collect();
            let count = devices.len();
            devices.into_iter().nth(i).ok_or_else(|| {
                OutputError::InvalidDevice(format!("Device index {i} out of range ({count} available)"))
            })
        }
        None => host
            .default_output_device()
            .ok_or_else(|| OutputError::InvalidDevice("No output device available".into())),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    bridge: Arc<SynthBridge>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;

    // Grows on the first callback, then stable.
    let mut stereo = Vec::<f32>::new();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let frames = data.len() / channels;
                let needed = frames * OUTPUT_CHANNELS;
                stereo.resize(needed, 0.0);

                // Errors leave the buffer silent; the bridge logs them.
                let _ = bridge.render_float(&mut stereo[..needed]);
                write_output(data, channels, &stereo[..needed]);
            }));

            if result.is_err() {
                output_silence(data);
            }
        },
        |err| tracing::warn!("audio stream error: {}", err),
        None,
    )?;

    Ok(stream)
}

/// Spreads interleaved stereo over the device's channel layout. Channels
/// past the second stay silent; a mono device gets the left channel.
#[inline]
fn write_output<T: cpal::SizedSample + cpal::FromSample<f32>>(
    data: &mut [T],
    channels: usize,
    stereo: &[f32],
) {
    for (i, sample) in data.iter_mut().enumerate() {
        let frame = i / channels;
        let ch = i % channels;
        let value = if ch < OUTPUT_CHANNELS {
            stereo.get(frame * OUTPUT_CHANNELS + ch).copied().unwrap_or(0.0)
        } else {
            0.0
        };
        *sample = T::from_sample(value);
    }
}

/// Output silence (panic recovery).
#[inline]
fn output_silence<T: cpal::SizedSample + cpal::FromSample<f32>>(data: &mut [T]) {
    for sample in data.iter_mut() {
        *sample = T::from_sample(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::FromSample;

    #[test]
    fn test_write_output_surround_layout() {
        let stereo = [0.5, -0.5, 0.25, -0.25];
        let mut data = [1.0f32; 8];
        write_output(&mut data, 4, &stereo);
        assert_eq!(data, [0.5, -0.5, 0.0, 0.0, 0.25, -0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_write_output_mono_device_takes_left() {
        let stereo = [0.5, -0.5, 0.25, -0.25];
        let mut data = [0.0f32; 2];
        write_output(&mut data, 1, &stereo);
        assert_eq!(data, [0.5, 0.25], "mono device gets the left channel");
    }

    #[test]
    fn test_write_output_converts_to_i16() {
        let stereo = [0.5, -0.5];
        let mut data = [0i16; 2];
        write_output(&mut data, 2, &stereo);
        assert_eq!(data, [16384, -16384]);
    }

    #[test]
    fn test_output_silence() {
        let mut data = [7u16; 4];
        output_silence(&mut data);
        assert!(data.iter().all(|&s| s == u16::from_sample(0.0f32)));
    }
}
