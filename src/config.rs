//! Runtime configuration for the registry.

use std::path::Path;
use std::{fs, io};

use tracing::error;

use crate::gap::{AdvMode, TxPowerLevel};

/// Registry configuration: the attribute-table capacity mirroring the
/// platform GATT server's limits, and the fixed advertising settings.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Maximum number of attributes across all declared services: one per
    /// service declaration, two per characteristic, one per descriptor.
    pub attr_capacity: usize,
    pub adv_mode: AdvMode,
    pub adv_tx_power: TxPowerLevel,
    /// Whether advertising payloads carry the device name in addition to the
    /// service UUID.
    pub adv_include_name: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            attr_capacity: 128,
            adv_mode: AdvMode::Balanced,
            adv_tx_power: TxPowerLevel::High,
            adv_include_name: true,
        }
    }
}

impl Config {
    /// Loads the configuration from a JSON file. Returns [`None`] if the file
    /// does not exist or cannot be parsed; the caller typically falls back to
    /// the defaults.
    #[must_use]
    pub fn load(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let s = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => return None,
            Err(e) => {
                error!("Failed to read: {} ({e})", path.display());
                return None;
            }
        };
        serde_json::from_str(&s)
            .map_err(|e| error!("Invalid file contents: {} ({e})", path.display()))
            .ok()
    }
}
