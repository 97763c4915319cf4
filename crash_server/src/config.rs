use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crash_core::{EngineConfig, DEFAULT_HISTORY_CAP, DEFAULT_INSTANT_CRASH_PROBABILITY};
use serde::{Deserialize, Serialize};

/// Server configuration persisted as TOML.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub bind: String,
    pub database_url: String,
    /// Public salt mixed into every round's draw.
    pub client_seed: String,
    pub tick_interval_ms: u64,
    pub engine: EngineSection,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineSection {
    pub wait_ms: u64,
    pub cooldown_ms: u64,
    pub growth_rate: f64,
    pub instant_crash_probability: f64,
    pub history_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1:8080".into(),
            database_url: "sqlite://crash.db?mode=rwc".into(),
            client_seed: "crash-public-salt".into(),
            tick_interval_ms: 16,
            engine: EngineSection::default(),
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        EngineSection {
            wait_ms: 5_000,
            cooldown_ms: 3_000,
            growth_rate: 0.05,
            instant_crash_probability: DEFAULT_INSTANT_CRASH_PROBABILITY,
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }
}

impl Config {
    /// Load configuration from `path`. If the file does not exist, create it
    /// with defaults and return those.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        let cfg = if path.exists() {
            let s = fs::read_to_string(path)
                .with_context(|| format!("reading config file '{}'", path.display()))?;
            toml::from_str(&s).with_context(|| format!("parsing TOML config '{}'", path.display()))?
        } else {
            let cfg = Config::default();
            cfg.save(path)?;
            cfg
        };
        cfg.validate()
            .with_context(|| format!("validating config '{}'", path.display()))?;
        Ok(cfg)
    }

    /// Write the config to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating config directory '{}'", parent.display()))?;
            }
        }
        let toml_text = toml::to_string_pretty(self).context("serializing config to TOML")?;
        fs::write(path, toml_text).with_context(|| format!("writing config to '{}'", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let e = &self.engine;
        if !(e.growth_rate.is_finite() && e.growth_rate > 0.0) {
            bail!("engine.growth_rate must be positive, got {}", e.growth_rate);
        }
        if !(0.0..1.0).contains(&e.instant_crash_probability) {
            bail!(
                "engine.instant_crash_probability must be in [0, 1), got {}",
                e.instant_crash_probability
            );
        }
        if e.history_cap == 0 {
            bail!("engine.history_cap must be at least 1");
        }
        if self.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be at least 1");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            wait: Duration::from_millis(self.engine.wait_ms),
            cooldown: Duration::from_millis(self.engine.cooldown_ms),
            growth_rate: self.engine.growth_rate,
            instant_crash_probability: self.engine.instant_crash_probability,
            history_cap: self.engine.history_cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("crash-server-{}-{}", std::process::id(), name))
            .join("crash.toml")
    }

    #[test]
    fn defaults_match_engine_defaults() {
        assert_eq!(Config::default().engine_config(), EngineConfig::default());
    }

    #[test]
    fn creates_missing_file_then_reads_it_back() {
        let path = temp_path("create");
        let _ = fs::remove_file(&path);
        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        let loaded = Config::load_or_create(&path).unwrap();
        assert_eq!(created, loaded);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: Config = toml::from_str("client_seed = \"abc\"\n[engine]\ngrowth_rate = 0.1\n").unwrap();
        assert_eq!(cfg.client_seed, "abc");
        assert_eq!(cfg.engine.growth_rate, 0.1);
        assert_eq!(cfg.engine.wait_ms, 5_000);
        assert_eq!(cfg.tick_interval_ms, 16);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut cfg = Config::default();
        cfg.engine.instant_crash_probability = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.engine.growth_rate = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.tick_interval_ms = 0;
        assert!(cfg.validate().is_err());
    }
}
