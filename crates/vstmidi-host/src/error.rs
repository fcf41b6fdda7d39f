//! Worker-side errors.
//!
//! Every fatal worker error carries the [`WorkerStatus`] that ends up both as
//! the last word written to the bridge and as the process exit code.

use thiserror::Error;
use vstmidi_bridge::WorkerStatus;

#[derive(Debug, Error)]
#[error("{status}: {detail}")]
pub struct HostError {
    pub status: WorkerStatus,
    pub detail: String,
}

impl HostError {
    pub fn new(status: WorkerStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> u32 {
        self.status.code()
    }
}

impl From<WorkerStatus> for HostError {
    fn from(status: WorkerStatus) -> Self {
        Self {
            status,
            detail: String::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
