use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::{DEFAULT_SCAN_DURATION_MS, LOG_CAPACITY, MAX_PAYLOAD_LEN};
use crate::utils::ensure_directory_exists;

const CONFIG_DIR_NAME: &str = "ble-relay-bridge";
const CONFIG_FILE_NAME: &str = "config.json";

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "BLE_RELAY_CONFIG";

/// Bridge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long one scan cycle runs before giving up
    pub scan_duration_ms: u64,
    /// Number of lines the log sink retains
    pub log_capacity: usize,
    /// Advertisements weaker than this are ignored
    pub min_rssi: Option<i16>,
    /// Only advertisements whose name contains this are accepted
    pub device_name_filter: Option<String>,
    /// Hold negotiation until the stack confirms the descriptor write.
    /// When off, the write is fire-and-forget.
    pub await_descriptor_write: bool,
    /// Outbound relay payloads are trimmed to this many bytes
    pub max_payload_len: usize,
    /// Period of the relay timer tick. No timer when unset.
    pub relay_timer_interval_secs: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            scan_duration_ms: DEFAULT_SCAN_DURATION_MS,
            log_capacity: LOG_CAPACITY,
            min_rssi: None,
            device_name_filter: None,
            await_descriptor_write: true,
            max_payload_len: MAX_PAYLOAD_LEN,
            relay_timer_interval_secs: None,
        }
    }
}

/// `$BLE_RELAY_CONFIG`, else `<config dir>/ble-relay-bridge/config.json`.
pub fn default_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    let config_dir =
        dirs::config_dir().ok_or_else(|| anyhow!("No configuration directory on this platform"))?;
    Ok(config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl BridgeConfig {
    /// Loads the config from `file_path`, falling back to defaults when the
    /// file does not exist.
    pub async fn load_config(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the current config to `file_path`.
    pub async fn save_config(&self, file_path: &Path) -> Result<()> {
        if let Some(config_dir) = file_path.parent() {
            ensure_directory_exists(config_dir).await?;
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;
        info!("Config saved to {:?}", file_path);
        Ok(())
    }
}
