//! Persisted-state blob.
//!
//! Big-endian layout:
//!
//! ```text
//! unique_id: u32
//! chunked:   u8 (0 or 1)
//! chunked == 0:  count: u32, then `count` f32 parameter values
//! chunked == 1:  size: u32, then `size` bytes of opaque plugin chunk
//! ```
//!
//! The id and the representation flag tag the blob so a restore can check it
//! belongs to the running instance before touching anything.

use crate::instrument::Instrument;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

#[derive(Debug, Clone, PartialEq)]
pub enum PluginState {
    Parameters(Vec<f32>),
    Chunk(Vec<u8>),
}

impl PluginState {
    pub fn is_chunked(&self) -> bool {
        matches!(self, PluginState::Chunk(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateBlob {
    pub unique_id: u32,
    pub state: PluginState,
}

impl StateBlob {
    /// Reads the current state of `instrument` in whichever representation it
    /// advertises.
    pub fn capture(instrument: &mut dyn Instrument) -> Self {
        let state = if instrument.program_chunks() {
            PluginState::Chunk(instrument.get_chunk())
        } else {
            let count = instrument.parameter_count();
            PluginState::Parameters((0..count).map(|i| instrument.get_parameter(i)).collect())
        };

        Self {
            unique_id: instrument.unique_id(),
            state,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // Vec<u8> writes are infallible
        let _ = out.write_u32::<BigEndian>(self.unique_id);
        let _ = out.write_u8(u8::from(self.state.is_chunked()));
        match &self.state {
            PluginState::Parameters(values) => {
                let _ = out.write_u32::<BigEndian>(values.len() as u32);
                for value in values {
                    let _ = out.write_f32::<BigEndian>(*value);
                }
            }
            PluginState::Chunk(data) => {
                let _ = out.write_u32::<BigEndian>(data.len() as u32);
                out.extend_from_slice(data);
            }
        }
        out
    }

    /// Parses a blob. `None` when it is truncated or malformed.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(data);
        let unique_id = cursor.read_u32::<BigEndian>().ok()?;
        let chunked = cursor.read_u8().ok()? != 0;
        let len = cursor.read_u32::<BigEndian>().ok()? as usize;
        let remaining = data.len() - cursor.position() as usize;

        let state = if chunked {
            if len > remaining {
                return None;
            }
            let mut chunk = vec![0u8; len];
            cursor.read_exact(&mut chunk).ok()?;
            PluginState::Chunk(chunk)
        } else {
            if len.checked_mul(4)? > remaining {
                return None;
            }
            let start = cursor.position() as usize;
            let mut values = vec![0.0f32; len];
            BigEndian::read_f32_into(&data[start..start + len * 4], &mut values);
            PluginState::Parameters(values)
        };

        Some(Self { unique_id, state })
    }

    /// Applies the blob if it was captured from the same plugin in the same
    /// representation. Returns whether anything was written.
    pub fn restore(&self, instrument: &mut dyn Instrument) -> bool {
        if self.unique_id != instrument.unique_id() {
            tracing::warn!(
                "skipping state restore: blob id {:08X}, plugin id {:08X}",
                self.unique_id,
                instrument.unique_id()
            );
            return false;
        }
        if self.state.is_chunked() != instrument.program_chunks() {
            tracing::warn!("skipping state restore: representation differs");
            return false;
        }

        match &self.state {
            PluginState::Parameters(values) => {
                if values.len() != instrument.parameter_count() {
                    tracing::warn!(
                        "skipping state restore: {} saved parameters, plugin has {}",
                        values.len(),
                        instrument.parameter_count()
                    );
                    return false;
                }
                for (index, value) in values.iter().enumerate() {
                    instrument.set_parameter(index, *value);
                }
            }
            PluginState::Chunk(data) => instrument.set_chunk(data),
        }
        true
    }
}

/// Restores an encoded blob. Empty or malformed input is ignored.
pub fn restore_encoded(instrument: &mut dyn Instrument, data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }
    match StateBlob::decode(data) {
        Some(blob) => blob.restore(instrument),
        None => {
            tracing::warn!("ignoring malformed state blob ({} bytes)", data.len());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_layout() {
        let blob = StateBlob {
            unique_id: 0x5331_5643,
            state: PluginState::Parameters(vec![0.5, 1.0]),
        };
        let bytes = blob.encode();
        assert_eq!(
            bytes,
            vec![
                0x53, 0x31, 0x56, 0x43, // id
                0x00, // not chunked
                0x00, 0x00, 0x00, 0x02, // count
                0x3F, 0x00, 0x00, 0x00, // 0.5
                0x3F, 0x80, 0x00, 0x00, // 1.0
            ]
        );
        assert_eq!(StateBlob::decode(&bytes), Some(blob));
    }

    #[test]
    fn test_chunk_layout() {
        let blob = StateBlob {
            unique_id: 7,
            state: PluginState::Chunk(vec![0xAA, 0xBB]),
        };
        let bytes = blob.encode();
        assert_eq!(bytes, vec![0, 0, 0, 7, 1, 0, 0, 0, 2, 0xAA, 0xBB]);
        assert_eq!(StateBlob::decode(&bytes), Some(blob));
    }

    #[test]
    fn test_truncated_blobs_rejected() {
        assert_eq!(StateBlob::decode(&[]), None);
        assert_eq!(StateBlob::decode(&[0, 0, 0, 7, 1]), None);
        // chunk size larger than what follows
        assert_eq!(StateBlob::decode(&[0, 0, 0, 7, 1, 0, 0, 0, 9, 0xAA]), None);
        // two parameters announced, one present
        assert_eq!(
            StateBlob::decode(&[0, 0, 0, 7, 0, 0, 0, 0, 2, 0x3F, 0, 0, 0]),
            None
        );
    }
}
