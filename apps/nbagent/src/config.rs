//! Agent configuration: one YAML file covering the NetBox connection,
//! the sync pipeline, and every discovery source.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use nbagent_connector::SourceSettings;
use nbagent_netbox::NetBoxConfig;
use nbagent_sync::SyncConfig;
use serde::Deserialize;

fn default_interval_secs() -> u64 {
    300
}

/// Scheduler and run-mode settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    /// Seconds between cycles in `run` mode.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// When set, every cycle previews instead of applying.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            dry_run: false,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub netbox: NetBoxConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub sources: Vec<SourceSettings>,
}

impl AgentConfig {
    /// Load and validate a configuration file. Fails fast: a config
    /// problem should stop the agent before the first cycle.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.netbox.url.trim().is_empty() {
            bail!("netbox.url is empty");
        }
        if self.netbox.token.trim().is_empty() {
            bail!("netbox.token is empty");
        }
        if self.agent.interval_secs == 0 {
            bail!("agent.interval_secs must be greater than zero");
        }
        if self.sources.is_empty() {
            bail!("no sources configured");
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            source
                .validate()
                .with_context(|| format!("source '{}' is invalid", source.name))?;
            if !names.insert(source.name.as_str()) {
                bail!("duplicate source name '{}'", source.name);
            }
        }
        Ok(())
    }
}
