use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::platform;
use crate::station::StationStore;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub stations: StationsConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

/// Where the persisted station list lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationsConfig {
    #[serde(default = "default_stations_file")]
    pub file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Whether to track and publish now-playing metadata at all.
    #[serde(default = "default_show_metadata")]
    pub show: bool,
    /// Seconds between backend tag re-queries while nothing arrives by push.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for StationsConfig {
    fn default() -> Self {
        Self {
            file: default_stations_file(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            show: default_show_metadata(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_stations_file() -> PathBuf {
    StationStore::default_path()
}

fn default_show_metadata() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9895
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.metadata.show);
        assert_eq!(config.metadata.poll_interval_secs, 2);
        assert_eq!(config.control.bind_address, "127.0.0.1");
        assert!(config.stations.file.ends_with("traydio/stations.json"));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str("[metadata]\nshow = false\n").unwrap();
        assert!(!config.metadata.show);
        assert_eq!(config.metadata.poll_interval_secs, 2);
        assert_eq!(config.control.port, 9895);
    }
}
