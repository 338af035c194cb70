//! Worker configuration.
//!
//! Layers, lowest to highest precedence:
//! 1. Built-in defaults ([`WorkerConfig::default`])
//! 2. TOML file (`--config`); keys that are absent keep their default
//! 3. CLI overrides (`--allow`, `--fire-and-forget`)

use std::fs;
use std::path::{Path, PathBuf};

use authbridge_protocol::DEFAULT_METHOD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::builtins;
use crate::capability::Allowlist;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What the framing loop does with in-flight requests at end of input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Wait for every in-flight dispatch to answer before exiting.
    #[default]
    Drain,
    /// Exit once queued responses are flushed; in-flight dispatches are
    /// abandoned without a response.
    FireAndForget,
}

/// Worker configuration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// The single accepted RPC method name.
    pub method: String,
    /// Exact dotted capability names that may be called.
    pub allowlist: Vec<String>,
    /// Fail startup if an allowlisted name does not resolve.
    pub strict_allowlist: bool,
    /// End-of-input behaviour.
    pub shutdown: ShutdownPolicy,
    /// Default tracing filter, used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            method: DEFAULT_METHOD.to_string(),
            allowlist: builtins::NAMES.iter().map(|s| s.to_string()).collect(),
            strict_allowlist: true,
            shutdown: ShutdownPolicy::Drain,
            log_filter: "authbridge_worker=info".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Parse a TOML document, filling absent keys with defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Replace the allowlist (CLI `--allow`).
    pub fn with_allowlist<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowlist = names.into_iter().map(Into::into).collect();
        self
    }

    /// Check field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.method.trim().is_empty() {
            return Err(ConfigError::Invalid("method must not be empty".to_string()));
        }
        for name in &self.allowlist {
            if name.is_empty() || name.split('.').any(str::is_empty) {
                return Err(ConfigError::Invalid(format!(
                    "allowlist entry '{}' is not a dotted name",
                    name
                )));
            }
        }
        Ok(())
    }

    /// The immutable allowlist used by the resolver.
    pub fn allowlist(&self) -> Allowlist {
        Allowlist::new(self.allowlist.iter().cloned())
    }
}
