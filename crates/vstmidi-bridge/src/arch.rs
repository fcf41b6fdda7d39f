//! Plugin binary inspection, used to pick the matching worker executable.

use crate::protocol::WorkerStatus;
use crate::{BridgeError, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

const DOS_HEADER_LEN: usize = 0x40;
const DOS_MAGIC: u16 = 0x5A4D; // "MZ"
const PE_OFFSET_FIELD: usize = 0x3C;
/// Signature, file header and the 32-bit optional header.
const NT_HEADERS_LEN: usize = 4 + 20 + 224;
const PE_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"

const MACHINE_I386: u16 = 0x014C;
const MACHINE_AMD64: u16 = 0x8664;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginArch {
    /// 32-bit x86 PE image
    X86,
    /// x86-64 PE image
    X86_64,
    /// Not a PE image; loaded by the worker built for this platform.
    Native,
}

impl PluginArch {
    /// Worker executable name for this architecture.
    pub fn worker_name(self) -> String {
        let stem = match self {
            PluginArch::X86 => "vsthost32",
            PluginArch::X86_64 => "vsthost64",
            PluginArch::Native => "vsthost",
        };
        format!("{stem}{}", std::env::consts::EXE_SUFFIX)
    }
}

/// Reads the executable headers of `path`.
///
/// A missing or unreadable file is reported as the worker would report it,
/// so no process is spawned for a plugin that cannot load.
pub fn inspect_plugin(path: &Path) -> Result<PluginArch> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!("cannot open plugin {}: {}", path.display(), e);
            return Err(BridgeError::Startup(WorkerStatus::CannotLoadPlugin));
        }
    };
    if !file.metadata().map(|m| m.is_file()).unwrap_or(false) {
        return Err(BridgeError::Startup(WorkerStatus::CannotLoadPlugin));
    }
    read_arch(&mut file, path)
}

fn read_arch<F: Read + Seek>(file: &mut F, path: &Path) -> Result<PluginArch> {
    let mut dos = [0u8; DOS_HEADER_LEN];
    if file.read_exact(&mut dos).is_err() || LittleEndian::read_u16(&dos) != DOS_MAGIC {
        return Ok(PluginArch::Native);
    }

    let pe_offset = LittleEndian::read_u32(&dos[PE_OFFSET_FIELD..]);
    let mut nt = [0u8; NT_HEADERS_LEN];
    let read = file
        .seek(SeekFrom::Start(u64::from(pe_offset)))
        .and_then(|_| file.read_exact(&mut nt));

    if read.is_err() || LittleEndian::read_u32(&nt) != PE_SIGNATURE {
        return Err(BridgeError::UnsupportedBinary {
            path: path.to_path_buf(),
            reason: "MZ image without a PE header".into(),
        });
    }

    match LittleEndian::read_u16(&nt[4..]) {
        MACHINE_I386 => Ok(PluginArch::X86),
        MACHINE_AMD64 => Ok(PluginArch::X86_64),
        machine => Err(BridgeError::UnsupportedBinary {
            path: path.to_path_buf(),
            reason: format!("machine type {machine:#06x}"),
        }),
    }
}

/// Full path of the worker that can load `plugin`.
pub fn resolve_worker(worker_dir: &Path, plugin: &Path) -> Result<PathBuf> {
    let arch = inspect_plugin(plugin)?;
    let worker = worker_dir.join(arch.worker_name());
    if !worker.is_file() {
        return Err(BridgeError::WorkerNotFound(worker));
    }
    tracing::debug!("{} is {:?}, using {}", plugin.display(), arch, worker.display());
    Ok(worker)
}
