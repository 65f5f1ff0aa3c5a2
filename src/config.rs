//! Playground configuration.
//!
//! Layered as: built-in defaults, then an optional TOML file, then command-line
//! flags (applied by the binary).

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

const DEBOUNCE_RANGE_MS: RangeInclusive<u64> = 300..=600;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP server listens on
    pub bind: SocketAddr,

    /// Quiet period before the strict re-translation of an edit
    pub debounce_ms: u64,

    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            debounce_ms: 600,
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Reads `path` if given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Config::parse(&raw)?
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !DEBOUNCE_RANGE_MS.contains(&self.debounce_ms) {
            return Err(ConfigError::Debounce(self.debounce_ms));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Python interpreter hosting sqlglot
    pub python: String,

    /// Run `pip install` for the package before starting the worker
    pub install: bool,

    /// pip requirement, e.g. `sqlglot==23.12.2`
    pub package: String,

    /// How long one worker request may take before the worker is killed
    pub request_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            python: "python3".to_string(),
            install: true,
            package: "sqlglot".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
