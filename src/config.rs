//! Persisted engine defaults (spec §0.3), following the teacher's
//! `AppConfig`/`ConfigManager` pattern: a serde/toml struct saved under the
//! platform config directory (`dirs::config_dir()`), with a `ConfigManager`
//! that loads-or-creates and falls back to defaults on a parse failure.
//!
//! This is *not* the live chainsetup (`chainsetup.rs`) — it only supplies
//! the defaults a caller seeds a chainsetup with.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub buffersize: usize,
    pub sample_rate: u32,
    pub prefill_enabled: bool,
    pub double_buffering: bool,
    pub double_buffer_count: usize,
    pub looping: bool,
    pub multitrack: bool,
    pub profiling_enabled: bool,
    pub raised_priority: Option<i32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffersize: 1024,
            sample_rate: 44100,
            prefill_enabled: true,
            double_buffering: false,
            double_buffer_count: 4,
            looping: false,
            multitrack: false,
            profiling_enabled: false,
            raised_priority: None,
        }
    }
}

/// Loads, saves, and caches an `EngineConfig` under the platform config
/// directory, following the teacher's `ConfigManager`.
pub struct ConfigManager {
    config: EngineConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        let config = Self::load_or_create_config(&config_path)?;
        Ok(Self { config, config_path })
    }

    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn update_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    pub fn save_config(&self) -> Result<()> {
        let toml_string = toml::to_string_pretty(&self.config)
            .context("failed to serialize engine config")?;
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir {}", parent.display()))?;
        }
        fs::write(&self.config_path, toml_string)
            .with_context(|| format!("failed to write config file {}", self.config_path.display()))?;
        info!("saved engine config to {}", self.config_path.display());
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("could not determine platform config directory")?;
        Ok(config_dir.join("chainflow").join("config.toml"))
    }

    fn load_or_create_config(path: &PathBuf) -> Result<EngineConfig> {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(contents) => match toml::from_str::<EngineConfig>(&contents) {
                    Ok(config) => {
                        info!("loaded engine config from {}", path.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        warn!("failed to parse config at {}: {e}, falling back to defaults", path.display());
                    }
                },
                Err(e) => {
                    warn!("failed to read config at {}: {e}, falling back to defaults", path.display());
                }
            }
        }
        Ok(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_audio_settings() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert!(config.buffersize > 0);
    }

    #[test]
    fn load_or_create_falls_back_to_defaults_for_missing_file() {
        let path = PathBuf::from("/nonexistent/chainflow-test/config.toml");
        let config = ConfigManager::load_or_create_config(&path).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn roundtrips_through_toml() {
        let mut config = EngineConfig::default();
        config.buffersize = 256;
        config.profiling_enabled = true;
        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: EngineConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn load_or_create_recovers_from_corrupt_file() {
        let dir = std::env::temp_dir().join("chainflow-config-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("corrupt.toml");
        fs::write(&path, "not valid = [toml").unwrap();
        let config = ConfigManager::load_or_create_config(&path).unwrap();
        assert_eq!(config, EngineConfig::default());
        let _ = fs::remove_file(&path);
    }
}
