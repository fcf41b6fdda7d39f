//! Error types for the synth bridge

use crate::protocol::{Command, WorkerStatus};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// What the user should be told when opening a plugin fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMessage {
    BadPlugin,
    WrongBitness,
    MissingHostRuntime,
    LaunchFailed,
}

impl std::fmt::Display for UserMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserMessage::BadPlugin => write!(f, "The selected plugin could not be loaded as a VST instrument"),
            UserMessage::WrongBitness => write!(f, "The selected plugin was built for an unsupported architecture"),
            UserMessage::MissingHostRuntime => write!(f, "The plugin host executable is missing"),
            UserMessage::LaunchFailed => write!(f, "The plugin host could not be started"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("No plugin configured")]
    NoPluginConfigured,

    #[error("Unsupported plugin binary {path}: {reason}")]
    UnsupportedBinary { path: PathBuf, reason: String },

    #[error("Worker binary not found: {0}")]
    WorkerNotFound(PathBuf),

    #[error("Failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Worker handshake timed out after {}ms", .0.as_millis())]
    HandshakeTimeout(Duration),

    #[error("Worker refused to start: {0}")]
    Startup(WorkerStatus),

    #[error("Worker connection lost")]
    ConnectionLost,

    #[error("Command '{command}' failed with status {status:#x}")]
    CommandFailed { command: Command, status: u32 },

    #[error("Bridge is not open")]
    NotOpen,

    #[error("Sysex message of {0} bytes exceeds the wire limit")]
    SysExTooLong(usize),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Maps a failure to one of the messages a configuration UI can show.
    pub fn user_message(&self) -> UserMessage {
        match self {
            BridgeError::Startup(status) if status.is_plugin_fault() => UserMessage::BadPlugin,
            BridgeError::UnsupportedBinary { .. } => UserMessage::WrongBitness,
            BridgeError::WorkerNotFound(_) => UserMessage::MissingHostRuntime,
            _ => UserMessage::LaunchFailed,
        }
    }

    /// Whether the session was torn down by this error.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionLost | BridgeError::CommandFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_mapping() {
        assert_eq!(
            BridgeError::Startup(WorkerStatus::NotAnInstrument).user_message(),
            UserMessage::BadPlugin
        );
        assert_eq!(
            BridgeError::Startup(WorkerStatus::CannotLoadPlugin).user_message(),
            UserMessage::BadPlugin
        );
        assert_eq!(
            BridgeError::UnsupportedBinary {
                path: "a.dll".into(),
                reason: "ARM64".into()
            }
            .user_message(),
            UserMessage::WrongBitness
        );
        assert_eq!(
            BridgeError::WorkerNotFound("vsthost64".into()).user_message(),
            UserMessage::MissingHostRuntime
        );
        assert_eq!(
            BridgeError::Startup(WorkerStatus::ChecksumMismatch).user_message(),
            UserMessage::LaunchFailed
        );
        assert_eq!(
            BridgeError::HandshakeTimeout(Duration::from_secs(10)).user_message(),
            UserMessage::LaunchFailed
        );
    }

    #[test]
    fn test_bridge_error_display() {
        let err = BridgeError::CommandFailed {
            command: Command::RenderAudioSamples,
            status: 11,
        };
        assert!(err.to_string().contains("render"));
        assert!(err.to_string().contains("0xb"));

        let err = BridgeError::HandshakeTimeout(Duration::from_secs(10));
        assert!(err.to_string().contains("10000ms"));

        let err = BridgeError::Startup(WorkerStatus::NotAnInstrument);
        assert!(err.to_string().contains("not a MIDI instrument"));
    }

    #[test]
    fn test_session_fatal() {
        assert!(BridgeError::ConnectionLost.is_session_fatal());
        assert!(!BridgeError::NotOpen.is_session_fatal());
        assert!(
            !BridgeError::SysExTooLong(1 << 24).is_session_fatal(),
            "an oversized sysex is refused before the session is touched"
        );
    }
}
