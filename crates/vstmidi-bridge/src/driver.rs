//! Installable MIDI output driver messages mapped onto the bridge.
//!
//! The driver entry point receives numbered messages and must answer with the
//! multimedia error vocabulary. [`DriverPort`] turns each message into one
//! facade call and translates the outcome. Transport and command failures
//! have no richer code than "not enabled".

use crate::bridge::SynthBridge;
use crate::mailbox::MailboxFull;
use crate::BridgeError;

/// Logical ports exposed to the operating system.
pub const PORT_COUNT: u32 = 2;

const MIDIERR_BASE: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MmResult {
    NoError = 0,
    Error = 1,
    NotEnabled = 3,
    Allocated = 4,
    NotSupported = 8,
    InvalParam = 11,
    NotReady = MIDIERR_BASE + 3,
}

impl MmResult {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl From<&BridgeError> for MmResult {
    fn from(err: &BridgeError) -> Self {
        match err {
            BridgeError::Config(_) => MmResult::InvalParam,
            _ => MmResult::NotEnabled,
        }
    }
}

impl From<MailboxFull> for MmResult {
    fn from(_: MailboxFull) -> Self {
        MmResult::NotReady
    }
}

/// Messages the driver entry point forwards to the bridge.
#[derive(Debug, Clone, Copy)]
pub enum DriverMessage<'a> {
    Open,
    Close,
    /// Packed short message.
    Data(u32),
    /// System-exclusive buffer.
    LongData(&'a [u8]),
    /// Left/right volume packed as two 16-bit halves.
    SetVolume(u32),
    GetVolume,
    Prepare,
    Unprepare,
    GetNumDevs,
}

/// Reply to a driver message: its result code and, for queries, a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverReply {
    pub result: MmResult,
    pub value: u32,
}

impl DriverReply {
    fn result(result: MmResult) -> Self {
        Self { result, value: 0 }
    }

    fn value(value: u32) -> Self {
        Self {
            result: MmResult::NoError,
            value,
        }
    }
}

/// One opened driver port bound to a bridge.
pub struct DriverPort<'b> {
    bridge: &'b SynthBridge,
    port: u32,
}

impl<'b> DriverPort<'b> {
    pub fn new(bridge: &'b SynthBridge, port: u32) -> Self {
        Self { bridge, port }
    }

    pub fn handle(&self, message: DriverMessage<'_>) -> DriverReply {
        if self.port >= PORT_COUNT {
            return DriverReply::result(MmResult::InvalParam);
        }

        match message {
            DriverMessage::Open => {
                if self.bridge.is_open() {
                    return DriverReply::result(MmResult::NoError);
                }
                match self.bridge.open() {
                    Ok(_) => DriverReply::result(MmResult::NoError),
                    Err(e) => {
                        tracing::warn!("driver open failed: {} ({})", e, e.user_message());
                        DriverReply::result(MmResult::from(&e))
                    }
                }
            }
            DriverMessage::Close => {
                if self.bridge.is_open() {
                    let _ = self.bridge.reset();
                    self.bridge.close();
                }
                DriverReply::result(MmResult::NoError)
            }
            DriverMessage::Data(message) => {
                if !self.bridge.is_open() {
                    return DriverReply::result(MmResult::NotEnabled);
                }
                match self.bridge.put_midi_message(self.port, message) {
                    Ok(()) => DriverReply::result(MmResult::NoError),
                    Err(full) => DriverReply::result(full.into()),
                }
            }
            DriverMessage::LongData(data) => {
                if !self.bridge.is_open() {
                    return DriverReply::result(MmResult::NotEnabled);
                }
                match self.bridge.put_sysex(self.port, data) {
                    Ok(()) => DriverReply::result(MmResult::NoError),
                    Err(full) => DriverReply::result(full.into()),
                }
            }
            DriverMessage::SetVolume(packed) => {
                let left = (packed & 0xFFFF) as f32 / 65535.0;
                let right = (packed >> 16) as f32 / 65535.0;
                self.bridge.set_volume(left.max(right));
                DriverReply::result(MmResult::NoError)
            }
            DriverMessage::GetVolume => {
                let level = (self.bridge.volume().clamp(0.0, 1.0) * 65535.0) as u32;
                DriverReply::value(level | (level << 16))
            }
            DriverMessage::Prepare | DriverMessage::Unprepare => {
                DriverReply::result(MmResult::NotSupported)
            }
            DriverMessage::GetNumDevs => DriverReply::value(PORT_COUNT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;

    fn bridge() -> SynthBridge {
        SynthBridge::new(BridgeConfig::default()).unwrap()
    }

    #[test]
    fn test_result_codes() {
        assert_eq!(MmResult::NoError.code(), 0);
        assert_eq!(MmResult::NotEnabled.code(), 3);
        assert_eq!(MmResult::NotReady.code(), 67);
        assert_eq!(MmResult::from(MailboxFull), MmResult::NotReady);
        assert_eq!(MmResult::from(&BridgeError::ConnectionLost), MmResult::NotEnabled);
    }

    #[test]
    fn test_data_before_open_not_enabled() {
        let bridge = bridge();
        let port = DriverPort::new(&bridge, 0);
        assert_eq!(port.handle(DriverMessage::Data(0x90)).result, MmResult::NotEnabled);
        assert_eq!(
            port.handle(DriverMessage::LongData(&[0xF0, 0xF7])).result,
            MmResult::NotEnabled
        );
    }

    #[test]
    fn test_open_without_plugin_not_enabled() {
        let bridge = bridge();
        let port = DriverPort::new(&bridge, 0);
        assert_eq!(port.handle(DriverMessage::Open).result, MmResult::NotEnabled);
    }

    #[test]
    fn test_queries() {
        let bridge = bridge();
        let port = DriverPort::new(&bridge, 1);
        assert_eq!(port.handle(DriverMessage::GetNumDevs).value, PORT_COUNT);
        assert_eq!(port.handle(DriverMessage::Prepare).result, MmResult::NotSupported);
        assert_eq!(port.handle(DriverMessage::Close).result, MmResult::NoError);
    }

    #[test]
    fn test_volume_roundtrip() {
        let bridge = bridge();
        let port = DriverPort::new(&bridge, 0);
        port.handle(DriverMessage::SetVolume(0x0000_8000));
        let volume = bridge.volume();
        assert!((volume - 0.5).abs() < 0.001, "volume was {volume}");

        port.handle(DriverMessage::SetVolume(0xFFFF_FFFF));
        assert_eq!(port.handle(DriverMessage::GetVolume).value, 0xFFFF_FFFF);
    }

    #[test]
    fn test_bad_port_rejected() {
        let bridge = bridge();
        let port = DriverPort::new(&bridge, 7);
        assert_eq!(port.handle(DriverMessage::GetNumDevs).result, MmResult::InvalParam);
    }
}
