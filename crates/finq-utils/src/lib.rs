//! Shared utilities for finq
//!
//! This crate provides common functionality used across the finq workspace,
//! including logging setup and environment-driven configuration helpers.

pub mod config;
pub mod logging;

pub use config::{AppConfig, ConfigError, env_list, env_parse, env_var};
pub use logging::{init_tracing, init_tracing_json, init_tracing_with_default};
