//! Application configuration management.
//!
//! Settings are layered with figment, later layers winning:
//!
//! 1. Built-in defaults
//! 2. `config.toml` in the platform config directory
//! 3. `FPCACHE_*` environment variables (e.g. `FPCACHE_THRESHOLD=80`)
//! 4. Command-line flags, applied by the caller

use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cache::{ValidatorConfig, DEFAULT_CACHE_FILE, DEFAULT_GRACE_SECONDS, MAX_PATH_LEN};
use crate::similarity::DEFAULT_THRESHOLD;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "FPCACHE_";

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache file to validate.
    pub cache_file: PathBuf,
    /// Maximum differing bits for two fingerprints to be near-duplicates.
    pub threshold: u32,
    /// Accepted offset of stored ahead of live modification time.
    pub grace_seconds: i64,
    /// Longest path accepted in a cache record, in bytes.
    pub max_path_len: usize,
    /// Rewrite `\` separators in cached paths to `/`.
    pub normalize_separators: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_file: PathBuf::from(DEFAULT_CACHE_FILE),
            threshold: DEFAULT_THRESHOLD,
            grace_seconds: DEFAULT_GRACE_SECONDS,
            max_path_len: MAX_PATH_LEN,
            normalize_separators: cfg!(windows),
        }
    }
}

impl Config {
    /// Load the configuration from the default locations.
    ///
    /// Falls back to defaults if the layered configuration cannot be read.
    pub fn load() -> Self {
        match Self::from_figment(Self::figment()) {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        }
    }

    /// The default provider stack: defaults, config file, environment.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = Self::config_path() {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Extract a configuration from an arbitrary provider stack.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .context("Failed to parse configuration")
    }

    /// Validator settings derived from this configuration.
    #[must_use]
    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            grace_seconds: self.grace_seconds,
            normalize_separators: self.normalize_separators,
        }
    }

    /// Get the default platform-specific configuration path.
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "fpcache", "fpcache")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
