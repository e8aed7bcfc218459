//! Per-source configuration shared by every connector.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SourceError, SourceResult};

fn default_enabled() -> bool {
    true
}

fn default_priority() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

/// Configuration block common to all discovery sources.
///
/// Source-specific settings (API URLs, tokens, subnets) live in
/// `options` and are interpreted by the individual connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Unique name of this source instance, used in logs and provenance.
    pub name: String,
    /// Connector kind, e.g. "proxmox" or "network_scan".
    pub kind: String,
    /// Disabled sources are skipped by the discovery coordinator.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Merge priority. Lower values win when records conflict under
    /// priority-based merging.
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Hard deadline for a discovery call against this source.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Connector-specific settings.
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

impl SourceSettings {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            enabled: default_enabled(),
            priority: default_priority(),
            timeout_secs: default_timeout_secs(),
            options: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate the settings that are common to every connector.
    pub fn validate(&self) -> SourceResult<()> {
        if self.name.trim().is_empty() {
            return Err(SourceError::invalid_configuration("source name is empty"));
        }
        if self.kind.trim().is_empty() {
            return Err(SourceError::invalid_configuration(format!(
                "source '{}' has no kind",
                self.name
            )));
        }
        if self.timeout_secs == 0 {
            return Err(SourceError::invalid_configuration(format!(
                "source '{}' has a zero timeout",
                self.name
            )));
        }
        Ok(())
    }

    /// Fetch a required string option.
    pub fn require_str(&self, key: &str) -> SourceResult<&str> {
        self.options
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SourceError::invalid_configuration(format!(
                    "source '{}' is missing required option '{key}'",
                    self.name
                ))
            })
    }

    /// Fetch an optional string option.
    #[must_use]
    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    /// Fetch an optional boolean option, falling back to a default.
    #[must_use]
    pub fn opt_bool(&self, key: &str, default: bool) -> bool {
        self.options
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    /// Fetch an optional unsigned integer option, falling back to a default.
    #[must_use]
    pub fn opt_u64(&self, key: &str, default: u64) -> u64 {
        self.options
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or(default)
    }
}
