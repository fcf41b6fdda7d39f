//! Plays a short scale through a VST2 instrument on the default audio device.
//!
//! ```bash
//! cargo run --features output --bin vstmidi-play -- "C:/VST/Synth1 VST.dll"
//! cargo run --features output --bin vstmidi-play -- --config vstmidi.toml
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vstmidi::output::AudioOutput;
use vstmidi::{BridgeConfig, FileSettingsStore, SynthBridge};

const C_MAJOR: [u8; 8] = [60, 62, 64, 65, 67, 69, 71, 72];

#[derive(Parser, Debug)]
#[command(name = "vstmidi-play", about = "Play a scale through a bridged VST2 instrument")]
struct Args {
    /// Plugin module; overrides the one named in the config file
    plugin: Option<PathBuf>,

    /// TOML bridge configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output device index (see --list-devices)
    #[arg(short, long)]
    device: Option<usize>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Note length in milliseconds
    #[arg(long, default_value_t = 300)]
    note_ms: u64,

    /// MIDI channel (1-16)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=16))]
    channel: u8,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> vstmidi::Result<()> {
    if args.list_devices {
        for device in AudioOutput::list_devices()? {
            println!("{device}");
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(plugin) = &args.plugin {
        config = config.with_plugin(plugin);
    }

    let mut output = AudioOutput::new(args.device)?;
    config = config.with_sample_rate(output.sample_rate());

    let settings_dir = config.settings_dir.clone();
    let mut bridge = SynthBridge::new(config)?;
    if let Some(dir) = settings_dir {
        bridge = bridge.with_settings(FileSettingsStore::new(dir));
    }
    let bridge = Arc::new(bridge);

    let info = bridge.open()?;
    println!(
        "{} by {} ({} output channel{})",
        info.name,
        info.vendor,
        info.outputs,
        if info.outputs == 1 { "" } else { "s" }
    );

    output.start(Arc::clone(&bridge))?;

    let status = 0x90 | u32::from(args.channel - 1);
    let note_length = Duration::from_millis(args.note_ms);
    for note in C_MAJOR {
        let note = u32::from(note);
        if bridge.put_midi_message(0, status | (note << 8) | (100 << 16)).is_err() {
            tracing::warn!("mailbox full, skipping note {}", note);
            continue;
        }
        sleep(note_length);
        // Note-on with velocity 0 releases the note.
        let _ = bridge.put_midi_message(0, status | (note << 8));
    }
    sleep(Duration::from_millis(500));

    output.stop();
    bridge.close();
    Ok(())
}
