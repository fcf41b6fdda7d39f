//! Centralized error type for the vstmidi umbrella crate.
//!
//! Wraps subsystem errors so `?` propagates across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Bridge: {0}")]
    Bridge(#[from] vstmidi_bridge::BridgeError),

    #[cfg(feature = "output")]
    #[error("Output: {0}")]
    Output(#[from] crate::output::OutputError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
