//! Worker command line: `vsthost "<plugin path>" <hex checksum>`.

use crate::error::{HostError, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use vstmidi_bridge::protocol::{parse_checksum, plugin_checksum};
use vstmidi_bridge::WorkerStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub plugin_path: PathBuf,
    pub checksum: u32,
}

impl Invocation {
    /// Parses the full argument vector, program name included, and verifies
    /// the checksum against the path.
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = OsString>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        if args.len() != 3 {
            return Err(HostError::new(
                WorkerStatus::InvalidArguments,
                format!("expected 2 arguments, got {}", args.len().saturating_sub(1)),
            ));
        }

        let path = args[1].to_string_lossy();
        let checksum = args[2]
            .to_str()
            .and_then(parse_checksum)
            .ok_or_else(|| {
                HostError::new(
                    WorkerStatus::MalformedChecksum,
                    format!("'{}'", args[2].to_string_lossy()),
                )
            })?;

        let expected = plugin_checksum(&path);
        if checksum != expected {
            return Err(HostError::new(
                WorkerStatus::ChecksumMismatch,
                format!("got {checksum:08X}, path hashes to {expected:08X}"),
            ));
        }

        Ok(Self {
            plugin_path: PathBuf::from(&args[1]),
            checksum,
        })
    }
}
