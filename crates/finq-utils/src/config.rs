//! Configuration management utilities
//!
//! Small helpers for reading typed values from the environment. Every crate in
//! the workspace reads API keys and tuning knobs through these so that empty
//! variables behave the same as unset ones.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while reading configuration from the environment
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Variable is set but its value cannot be parsed
    #[error("Invalid value for {key}: {value}")]
    InvalidValue {
        /// Environment variable name
        key: String,
        /// Raw value found
        value: String,
    },
}

/// Application-level settings shared by binaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name
    pub app_name: String,
    /// Environment (development, production, ...)
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "finq".to_string(),
            environment: "development".to_string(),
        }
    }
}

impl AppConfig {
    /// Build from `FINQ_ENV`, defaulting to `development`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(environment) = env_var("FINQ_ENV") {
            config.environment = environment;
        }
        config
    }

    /// Whether this is a production deployment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Read an environment variable, treating empty or whitespace-only values as unset
pub fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a comma-separated list from the environment
///
/// Blank items are skipped; an unset variable yields an empty list.
pub fn env_list(key: &str) -> Vec<String> {
    env_var(key)
        .map(|raw| split_list(&raw))
        .unwrap_or_default()
}

/// Parse a typed value from the environment
///
/// Returns `Ok(None)` when the variable is unset.
pub fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env_var(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
