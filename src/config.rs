//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (ODL_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [compiler]
//! max_expansion_depth = 30
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! ODL_COMPILER__MAX_EXPANSION_DEPTH=50
//! ODL_LOGGING__LEVEL=debug
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the compiler and its surrounding tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Knobs that shape compilation itself, as opposed to how it's logged or
/// invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Upper bound on expansion recursion depth. A sugar tree that is
    /// self-referential, or simply nested deeper than any real
    /// organizational hierarchy should go, fails the Expander stage
    /// instead of overflowing the stack.
    #[serde(default = "default_max_expansion_depth")]
    pub max_expansion_depth: usize,
}

fn default_max_expansion_depth() -> usize {
    30
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig { max_expansion_depth: default_max_expansion_depth() }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: default_log_level(), format: default_log_format() }
    }
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Merges in order:
    /// 1. `config.toml` (base configuration)
    /// 2. `config.local.toml` (local overrides, git-ignored)
    /// 3. Environment variables (`ODL_*` prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("ODL_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("ODL_").split("__"))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config { compiler: CompilerConfig::default(), logging: LoggingConfig::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_documented_depth_guard() {
        let config = Config::default();
        assert_eq!(config.compiler.max_expansion_depth, 30);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[compiler]"));
        assert!(toml_str.contains("max_expansion_depth"));
    }

    #[test]
    fn from_file_falls_back_to_defaults_when_absent() {
        let config = Config::from_file("does-not-exist.toml").unwrap();
        assert_eq!(config.compiler.max_expansion_depth, 30);
    }
}
