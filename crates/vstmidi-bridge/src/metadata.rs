//! Plugin identity reported by the worker during the handshake.

use serde::{Deserialize, Serialize};

/// Name, vendor and channel layout of the hosted instrument.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Effect name
    pub name: String,

    /// Vendor string
    pub vendor: String,

    /// Product string
    pub product: String,

    pub vendor_version: u32,

    /// Plugin-declared unique id, also used to tag persisted state
    pub unique_id: u32,

    /// Output channels streamed back per frame (1 or 2)
    pub outputs: u32,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outputs: 2,
            ..Self::default()
        }
    }

    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.product = product.into();
        self
    }

    pub fn vendor_version(mut self, version: u32) -> Self {
        self.vendor_version = version;
        self
    }

    pub fn unique_id(mut self, id: u32) -> Self {
        self.unique_id = id;
        self
    }

    pub fn outputs(mut self, outputs: u32) -> Self {
        self.outputs = outputs;
        self
    }

    /// The four-character form most plugins use for their id, if printable.
    pub fn unique_id_fourcc(&self) -> Option<String> {
        let bytes = self.unique_id.to_be_bytes();
        bytes
            .iter()
            .all(|b| b.is_ascii_graphic())
            .then(|| bytes.iter().map(|&b| b as char).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_to_stereo() {
        let info = PluginInfo::new("Synth");
        assert_eq!(info.outputs, 2);
        assert!(info.vendor.is_empty());
    }

    #[test]
    fn test_unique_id_fourcc() {
        let info = PluginInfo::new("Synth").unique_id(u32::from_be_bytes(*b"Syn1"));
        assert_eq!(info.unique_id_fourcc().as_deref(), Some("Syn1"));

        let info = PluginInfo::new("Synth").unique_id(7);
        assert_eq!(info.unique_id_fourcc(), None);
    }

    #[test]
    fn test_info_toml_roundtrip() {
        let info = PluginInfo::new("Synth")
            .vendor("Acme")
            .product("Synth Pro")
            .vendor_version(1010)
            .unique_id(42)
            .outputs(1);

        let text = toml::to_string(&info).unwrap();
        let back: PluginInfo = toml::from_str(&text).unwrap();
        assert_eq!(back, info);
    }
}
