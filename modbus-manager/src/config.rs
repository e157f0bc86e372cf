//! `modbus.json` configuration and definition-file discovery.
//!
//! ```text
//! <config dir>/
//! ├── modbus.json
//! └── <hardware_maker>/register.dsl
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::bus::BlockConfig;
use crate::codec::Quantity;
use crate::error::ConfigError;
use crate::registry::{DeviceDefinition, Registry};

pub const CONFIG_FILE: &str = "modbus.json";
pub const DEFINITION_FILE: &str = "register.dsl";

const DEFAULT_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub serial: Vec<SerialConfig>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
/// Connection parameters of one bus and the slaves on it.
pub struct SerialConfig {
    /// `tcp://host:port`, `host:port`, `rtu:///dev/ttyUSB0` or a serial device path.
    pub url: String,
    /// Per call timeout in milliseconds, `0` selects the default.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub speed: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// 0 none, 1 even, 2 odd.
    #[serde(default)]
    pub parity: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub slaves: Vec<SlaveConfig>,
    // https://en.wikipedia.org/wiki/Modbus#Function_codes_4_(read_input_registers)_and_3_(read_holding_registers)
    #[serde(default = "default_max_cnt_per_request")]
    pub max_cnt_per_request: Quantity,
    #[serde(default = "default_allow_register_gaps")]
    pub allow_register_gaps: bool,
    #[serde(default)]
    pub discrete_table: DiscreteTable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlaveConfig {
    #[serde(default)]
    pub address: u8,
    #[serde(default)]
    pub name: String,
    pub hardware_maker: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Modbus table the discrete access class is read from. Writes always go to coils.
pub enum DiscreteTable {
    #[default]
    DiscreteInputs,
    Coils,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_max_cnt_per_request() -> Quantity {
    123
}

fn default_allow_register_gaps() -> bool {
    true
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        match self.timeout {
            0 => Duration::from_millis(DEFAULT_TIMEOUT_MS),
            ms => Duration::from_millis(ms),
        }
    }

    pub fn block_config(&self) -> BlockConfig {
        BlockConfig {
            max_cnt_per_request: self.max_cnt_per_request,
            allow_register_gaps: self.allow_register_gaps,
        }
    }
}

impl SlaveConfig {
    /// Display name, falling back to the hardware maker.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.hardware_maker
        } else {
            &self.name
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load `modbus.json` from the configuration directory.
    pub fn from_dir(dir: &Path) -> Result<Self, ConfigError> {
        Self::load(&dir.join(CONFIG_FILE))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// The connected bus. Only the first entry is used.
    pub fn bus(&self) -> Result<&SerialConfig, ConfigError> {
        let (first, rest) = self.serial.split_first().ok_or(ConfigError::NoBus)?;
        if !rest.is_empty() {
            tracing::warn!(
                ignored = rest.len(),
                url = %first.url,
                "Only the first serial bus is used"
            );
        }
        Ok(first)
    }

    pub fn definition_path(dir: &Path, slave: &SlaveConfig) -> PathBuf {
        dir.join(&slave.hardware_maker).join(DEFINITION_FILE)
    }

    /// Read the definition source of every slave on the bus, in configuration order.
    pub fn definitions(&self, dir: &Path) -> Result<Vec<DeviceDefinition>, ConfigError> {
        self.bus()?
            .slaves
            .iter()
            .map(|slave| {
                let path = Self::definition_path(dir, slave);
                let source = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Io { path, source })?;
                Ok(DeviceDefinition {
                    name: slave.display_name().to_string(),
                    slave_address: slave.address,
                    source,
                })
            })
            .collect()
    }

    pub fn build_registry(&self, dir: &Path) -> Result<Registry, ConfigError> {
        let registry = Registry::build(self.definitions(dir)?)?;
        tracing::info!(
            devices = registry.devices().len(),
            registers = registry.len(),
            "Built register registry"
        );
        Ok(registry)
    }
}
