//! Persisted per-plugin state.
//!
//! The bridge stores the plugin's chunk blob under a key derived from the
//! plugin file name, and hands it back on the next open.

use crate::{BridgeError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Byte store consulted on open and written on close and reset.
pub trait SettingsStore: Send + Sync {
    fn load_bytes(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn save_bytes(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

impl<S: SettingsStore + ?Sized> SettingsStore for Arc<S> {
    fn load_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).load_bytes(key)
    }

    fn save_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        (**self).save_bytes(key, bytes)
    }
}

/// Key under which a plugin's state is kept: its file stem.
pub fn settings_key(plugin_path: &Path) -> String {
    plugin_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// In-process store, mostly for embedding and tests.
#[derive(Default)]
pub struct MemorySettingsStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn save_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entries.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// One `<key>.chunk` file per plugin inside a directory.
pub struct FileSettingsStore {
    dir: PathBuf,
}

impl FileSettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key == "." || key == ".." {
            return Err(BridgeError::Settings(format!("invalid settings key '{key}'")));
        }
        Ok(self.dir.join(format!("{key}.chunk")))
    }
}

impl SettingsStore for FileSettingsStore {
    fn load_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BridgeError::Settings(format!("{}: {}", path.display(), e))),
        }
    }

    fn save_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir)
            .and_then(|()| std::fs::write(&path, bytes))
            .map_err(|e| BridgeError::Settings(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_key_is_file_stem() {
        assert_eq!(settings_key(Path::new("/opt/vst/Synth1 VST.dll")), "Synth1 VST");
        assert_eq!(settings_key(Path::new("synth.so")), "synth");
        assert_eq!(settings_key(Path::new("/")), "");
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemorySettingsStore::new();
        assert!(store.load_bytes("synth").unwrap().is_none());
        store.save_bytes("synth", &[1, 2, 3]).unwrap();
        assert_eq!(store.load_bytes("synth").unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_file_store_creates_directory() {
        let root = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(root.path().join("nested").join("state"));

        assert!(store.load_bytes("synth").unwrap().is_none());
        store.save_bytes("synth", b"chunk").unwrap();
        assert_eq!(store.load_bytes("synth").unwrap().as_deref(), Some(&b"chunk"[..]));
        assert!(store.dir().join("synth.chunk").exists());
    }

    #[test]
    fn test_file_store_rejects_path_keys() {
        let root = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(root.path());
        assert!(store.save_bytes("../escape", b"x").is_err());
        assert!(store.load_bytes("").is_err());
    }
}
