#![forbid(unsafe_code)]

//! Manager configuration.
//!
//! [`ManagerConfig`] can be built in code or, with the `config` feature,
//! loaded from TOML or JSON:
//!
//! ```toml
//! # opmgr.toml
//! storage_limit = 100
//! thread_name_prefix = "editor-op"
//! ```
//!
//! ```rust,ignore
//! let config = ManagerConfig::from_toml_file("opmgr.toml")?;
//! let manager = OpManager::new(config);
//! ```
//!
//! Omitted fields keep their defaults.

#[cfg(feature = "config")]
use std::path::Path;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

/// Storage limit value that disables the cap.
pub const UNLIMITED_STORAGE: usize = 0;

/// Configuration for an [`OpManager`](crate::OpManager).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct ManagerConfig {
    /// Maximum number of operations held in history, counting in-flight
    /// executes ([`UNLIMITED_STORAGE`] = no cap).
    pub storage_limit: usize,

    /// Prefix for task thread names (`{prefix}-{task id}`).
    pub thread_name_prefix: String,

    /// Stack size for task threads. `None` uses the platform default.
    pub thread_stack_size: Option<usize>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            storage_limit: UNLIMITED_STORAGE,
            thread_name_prefix: "opmgr-task".to_string(),
            thread_stack_size: None,
        }
    }
}

impl ManagerConfig {
    /// Default configuration with a storage cap.
    #[must_use]
    pub fn with_storage_limit(limit: usize) -> Self {
        Self {
            storage_limit: limit,
            ..Self::default()
        }
    }

    /// Default configuration without a storage cap.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Whether the storage cap is disabled.
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.storage_limit == UNLIMITED_STORAGE
    }

    /// Validate parameters. An empty list means the config is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.thread_name_prefix.trim().is_empty() {
            errors.push("thread_name_prefix must not be empty".to_string());
        }
        if self.thread_name_prefix.contains('\0') {
            errors.push("thread_name_prefix must not contain NUL bytes".to_string());
        }
        if let Some(size) = self.thread_stack_size.filter(|&s| s < 16 * 1024) {
            errors.push(format!("thread_stack_size must be at least 16 KiB, got {size}"));
        }
        errors
    }

    /// Load from a TOML string and validate.
    #[cfg(feature = "config")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(ConfigError::Toml)?;
        config.validated()
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string and validate.
    #[cfg(feature = "config")]
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s).map_err(ConfigError::Json)?;
        config.validated()
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "config")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Serialize to a single JSON line.
    #[cfg(feature = "config")]
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    #[cfg(feature = "config")]
    fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Errors that can occur when loading a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading a file.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
    /// TOML parse error.
    #[cfg(feature = "config")]
    #[error("TOML parse error: {0}")]
    Toml(#[source] toml::de::Error),
    /// JSON parse error.
    #[cfg(feature = "config")]
    #[error("JSON parse error: {0}")]
    Json(#[source] serde_json::Error),
    /// Validation errors.
    #[error("validation errors: {}", .0.join("; "))]
    Validation(Vec<String>),
}
