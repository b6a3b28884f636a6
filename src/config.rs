//! Device configuration.
//!
//! Settings come from an optional TOML file overlaid with `ROLLER__*`
//! environment variables (`ROLLER__SERIAL__PORT=/dev/ttyS1`). Every field has
//! a default, so a missing file yields the stock device.

use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::Result;

/// Path searched by [`ActuatorConfig::load_default`]
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "ROLLER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device of the LoRa modem
    pub port: String,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: BAUD_RATE,
        }
    }
}

/// Identity reported in outbound frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub device_type: u16,
    pub soft_version: u8,
    pub hard_version: u8,
    /// Wait a seed-derived random delay before sending receipts
    pub jittered_backoff: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            device_type: DEVICE_TYPE_ID,
            soft_version: SOFT_VERSION,
            hard_version: HARD_VERSION,
            jittered_backoff: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Requests sent for a missing field before giving up
    pub retry_limit: u32,
    pub retry_wait_ms: u64,
    pub self_check_interval_secs: u64,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        ProvisioningConfig {
            retry_limit: PROVISIONING_RETRY_LIMIT,
            retry_wait_ms: PROVISIONING_RETRY_WAIT.as_millis() as u64,
            self_check_interval_secs: SELF_CHECK_INTERVAL.as_secs(),
        }
    }
}

impl ProvisioningConfig {
    pub fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }

    pub fn self_check_interval(&self) -> Duration {
        Duration::from_secs(self.self_check_interval_secs)
    }
}

/// Complete actuator configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub serial: SerialConfig,
    pub device: DeviceConfig,
    pub provisioning: ProvisioningConfig,
}

impl ActuatorConfig {
    /// Load from `path` (optional) and the environment
    pub fn load(path: &str) -> Result<Self> {
        info!("Loading configuration from {}", path);
        let settings = Config::builder()
            .add_source(File::new(path, FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|config| config.try_deserialize::<ActuatorConfig>());

        match settings {
            Ok(config) => {
                info!("Loaded configuration: {:?}", config);
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(e.into())
            }
        }
    }

    pub fn load_default() -> Result<Self> {
        Self::load(DEFAULT_CONFIG_PATH)
    }

    /// Parse a TOML document, without environment overrides
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}
