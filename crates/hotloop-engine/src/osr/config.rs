//! OSR configuration
//!
//! Loaded from the `[osr]` table of a TOML file, then adjusted with
//! `name=value` option overrides. Every field has a default, so an empty
//! file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use super::defaults::{
    DEFAULT_COMPILATION_THRESHOLD, DEFAULT_COMPILE_QUEUE_CAPACITY, DEFAULT_MAX_REATTEMPTS, DEFAULT_POLL_INTERVAL,
    DEFAULT_ROOT_COMPILATION_THRESHOLD,
};

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Option name not recognized
    #[error("Unknown option: {0}")]
    UnknownOption(String),

    /// Option value could not be parsed
    #[error("Invalid value '{value}' for option {option}")]
    InvalidValue { option: String, value: String },

    /// Semantic validation failed
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// A recognized option, as printed by `hotloop options`
#[derive(Debug, Clone, Copy)]
pub struct OptionInfo {
    pub name: &'static str,
    pub help: &'static str,
}

/// Every option `OsrConfig::apply_option` accepts
pub const OPTIONS: &[OptionInfo] = &[
    OptionInfo { name: "osr", help: "Enable on-stack replacement of hot loops" },
    OptionInfo { name: "osr-compilation-threshold", help: "Back-edges before a loop is compiled" },
    OptionInfo { name: "osr-poll-interval", help: "Back-edges between two eligibility checks" },
    OptionInfo { name: "background-compilation", help: "Compile on a background thread instead of blocking" },
    OptionInfo { name: "osr-max-compilation-reattempts", help: "Bailouts and recompiles tolerated per unit" },
    OptionInfo {
        name: "throw-on-max-osr-compilation-reattempts",
        help: "Fail the call instead of silently disabling OSR when re-attempts run out",
    },
    OptionInfo { name: "single-tier-compilation-threshold", help: "Calls before a root call target is compiled" },
    OptionInfo { name: "compile-queue-capacity", help: "Pending background compilation requests" },
];

/// OSR configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct OsrConfig {
    /// Master switch for OSR (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Back-edge count at which a loop becomes eligible (default: 100_352)
    #[serde(default = "default_compilation_threshold")]
    pub compilation_threshold: u64,

    /// Eligibility is checked every `poll_interval` back-edges (default: 1024)
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Compile on the background thread (default: true)
    #[serde(default = "default_true")]
    pub background_compilation: bool,

    /// Re-attempts tolerated before the unit is disabled (default: 30)
    #[serde(default = "default_max_reattempts")]
    pub max_reattempts: u32,

    /// Raise `MaxReattemptsReached` instead of disabling silently
    #[serde(default)]
    pub throw_on_max_reattempts: bool,

    /// Calls before a root call target compiles itself (default: 1000)
    #[serde(default = "default_root_compilation_threshold")]
    pub root_compilation_threshold: u32,

    /// Capacity of the background compile queue (default: 256)
    #[serde(default = "default_compile_queue_capacity")]
    pub compile_queue_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_compilation_threshold() -> u64 {
    DEFAULT_COMPILATION_THRESHOLD
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL
}

fn default_max_reattempts() -> u32 {
    DEFAULT_MAX_REATTEMPTS
}

fn default_root_compilation_threshold() -> u32 {
    DEFAULT_ROOT_COMPILATION_THRESHOLD
}

fn default_compile_queue_capacity() -> usize {
    DEFAULT_COMPILE_QUEUE_CAPACITY
}

impl Default for OsrConfig {
    fn default() -> Self {
        OsrConfig {
            enabled: true,
            compilation_threshold: DEFAULT_COMPILATION_THRESHOLD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            background_compilation: true,
            max_reattempts: DEFAULT_MAX_REATTEMPTS,
            throw_on_max_reattempts: false,
            root_compilation_threshold: DEFAULT_ROOT_COMPILATION_THRESHOLD,
            compile_queue_capacity: DEFAULT_COMPILE_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    osr: OsrConfig,
}

impl OsrConfig {
    /// Load the `[osr]` table from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse the `[osr]` table from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        file.osr.validate()?;
        Ok(file.osr)
    }

    /// Apply one `name=value` override
    pub fn apply_assignment(&mut self, assignment: &str) -> Result<(), ConfigError> {
        let (name, value) = assignment.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
            option: assignment.to_string(),
            value: String::new(),
        })?;
        self.apply_option(name.trim(), value.trim())
    }

    /// Apply one option by its recognized name
    pub fn apply_option(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        match name {
            "osr" => self.enabled = parse(name, value)?,
            "osr-compilation-threshold" => self.compilation_threshold = parse(name, value)?,
            "osr-poll-interval" => self.poll_interval = parse(name, value)?,
            "background-compilation" => self.background_compilation = parse(name, value)?,
            "osr-max-compilation-reattempts" => self.max_reattempts = parse(name, value)?,
            "throw-on-max-osr-compilation-reattempts" => self.throw_on_max_reattempts = parse(name, value)?,
            "single-tier-compilation-threshold" => self.root_compilation_threshold = parse(name, value)?,
            "compile-queue-capacity" => self.compile_queue_capacity = parse(name, value)?,
            _ => return Err(ConfigError::UnknownOption(name.to_string())),
        }
        Ok(())
    }

    /// Current value of a recognized option, rendered as text
    pub fn option_value(&self, name: &str) -> Option<String> {
        let value = match name {
            "osr" => self.enabled.to_string(),
            "osr-compilation-threshold" => self.compilation_threshold.to_string(),
            "osr-poll-interval" => self.poll_interval.to_string(),
            "background-compilation" => self.background_compilation.to_string(),
            "osr-max-compilation-reattempts" => self.max_reattempts.to_string(),
            "throw-on-max-osr-compilation-reattempts" => self.throw_on_max_reattempts.to_string(),
            "single-tier-compilation-threshold" => self.root_compilation_threshold.to_string(),
            "compile-queue-capacity" => self.compile_queue_capacity.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval == 0 {
            return Err(ConfigError::ValidationError("osr-poll-interval must be positive".to_string()));
        }
        if self.compilation_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "osr-compilation-threshold must be positive".to_string(),
            ));
        }
        if self.root_compilation_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "single-tier-compilation-threshold must be positive".to_string(),
            ));
        }
        if self.background_compilation && self.compile_queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "compile-queue-capacity must be positive with background compilation".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(option: &str, value: &str) -> Result<T, ConfigError> {
    value.replace('_', "").parse().map_err(|_| ConfigError::InvalidValue {
        option: option.to_string(),
        value: value.to_string(),
    })
}
