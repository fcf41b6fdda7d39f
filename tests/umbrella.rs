//! Umbrella crate surface: re-exports and error conversion.

use std::fs;
use tempfile::TempDir;
use vstmidi::{
    inspect_plugin, BridgeConfig, BridgeError, Error, FileSettingsStore, PluginArch, SettingsStore,
    SynthBridge, WorkerStatus,
};

#[test]
fn test_bridge_error_converts_into_umbrella_error() {
    fn open_unconfigured() -> vstmidi::Result<()> {
        let bridge = SynthBridge::new(BridgeConfig::default())?;
        bridge.open()?;
        Ok(())
    }

    let err = open_unconfigured().unwrap_err();
    assert!(
        matches!(err, Error::Bridge(BridgeError::NoPluginConfigured)),
        "unexpected error {err:?}"
    );
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = SynthBridge::new(BridgeConfig::default().with_sample_rate(0)).err();
    assert!(matches!(err, Some(BridgeError::Config(_))));
}

#[test]
fn test_missing_plugin_reports_cannot_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.dll");
    let err = inspect_plugin(&path).unwrap_err();
    assert!(matches!(err, BridgeError::Startup(WorkerStatus::CannotLoadPlugin)));

    let bridge = SynthBridge::new(BridgeConfig::default().with_plugin(&path)).unwrap();
    assert!(bridge.open().is_err(), "no worker is spawned for a missing plugin");
    assert!(!bridge.is_open());
}

#[test]
fn test_non_pe_module_is_native() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("synth.so");
    fs::write(&path, b"\x7fELF not really").unwrap();
    assert_eq!(inspect_plugin(&path).unwrap(), PluginArch::Native);
}

#[test]
fn test_file_settings_roundtrip_through_reexport() {
    let dir = TempDir::new().unwrap();
    let store = FileSettingsStore::new(dir.path().join("settings"));
    assert_eq!(store.load_bytes("Synth1 VST").unwrap(), None);

    store.save_bytes("Synth1 VST", &[1, 2, 3]).unwrap();
    assert_eq!(store.load_bytes("Synth1 VST").unwrap(), Some(vec![1, 2, 3]));
    assert!(dir.path().join("settings").join("Synth1 VST.chunk").is_file());
}

#[test]
fn test_unconfigured_render_is_silent() {
    let bridge = SynthBridge::new(BridgeConfig::default()).unwrap();
    let mut out = [123i16; 64];
    assert!(bridge.render(&mut out).is_err());
    assert!(out.iter().all(|&s| s == 0));
}
