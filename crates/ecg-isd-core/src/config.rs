//! Device settings, stored on the card as postcard bytes

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::frontend::{FieldMask, SampleRate};

/// Settings file name at the card root.
pub const CONFIG_FILE_NAME: &str = "SETTINGS.CFG";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config {
    pub acquisition: AcquisitionConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionConfig {
    /// Fields the primary chip transmits.
    pub fields: FieldMask,
    pub sample_rate: SampleRate,
    /// Whether a second chip is fitted on the ECG bus.
    pub secondary_enabled: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            fields: FieldMask::LEADS,
            sample_rate: SampleRate::Khz2,
            secondary_enabled: true,
        }
    }
}

impl Config {
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_five_leads_at_2khz() {
        let config = Config::default();
        assert_eq!(config.acquisition.fields, FieldMask::LEADS);
        assert_eq!(config.acquisition.sample_rate, SampleRate::Khz2);
        assert!(config.acquisition.secondary_enabled);
    }

    #[test]
    fn test_config_bytes() {
        let config = Config {
            acquisition: AcquisitionConfig {
                fields: FieldMask::LEAD_I | FieldMask::CRC,
                sample_rate: SampleRate::Khz16,
                secondary_enabled: false,
            },
        };
        let bytes = config.to_bytes().unwrap();
        assert_eq!(Config::from_bytes(&bytes).unwrap(), config);
    }

    #[test]
    fn test_truncated_config_is_rejected() {
        let bytes = Config::default().to_bytes().unwrap();
        assert!(Config::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
