//! Filesystem source: a hand-maintained YAML inventory file, for
//! assets nothing can discover automatically.

use std::collections::BTreeMap;
use std::path::PathBuf;

use nbagent_connector::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Required options: `path` (YAML file holding a list of entries).
///
/// ```yaml
/// - name: patch-panel-1
///   site: lab
///   role: passive
///   model: "24-port panel"
/// ```
pub struct FilesystemSource {
    settings: SourceSettings,
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    name: String,
    #[serde(default)]
    serial: Option<String>,
    #[serde(default)]
    macs: Vec<String>,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    manufacturer: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    site: Option<String>,
    #[serde(default)]
    status: Option<DeviceStatus>,
    #[serde(default)]
    attributes: BTreeMap<String, Value>,
}

impl FilesystemSource {
    pub fn new(settings: SourceSettings) -> SourceResult<Self> {
        settings.validate()?;
        let path = PathBuf::from(settings.require_str("path")?);
        Ok(Self { settings, path })
    }

    async fn load_entries(&self) -> SourceResult<Vec<FileEntry>> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        serde_yaml::from_str(&content).map_err(|e| {
            SourceError::invalid_response(format!(
                "inventory file {} is not valid: {e}",
                self.path.display()
            ))
        })
    }
}

#[async_trait]
impl Source for FilesystemSource {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn kind(&self) -> &str {
        "filesystem"
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    async fn test_connection(&self) -> SourceResult<()> {
        self.load_entries().await.map(|_| ())
    }

    async fn discover(&self) -> SourceResult<Vec<DiscoveredRecord>> {
        let entries = self.load_entries().await?;
        debug!(
            source = %self.name(),
            path = %self.path.display(),
            entries = entries.len(),
            "loaded inventory file"
        );

        Ok(entries
            .into_iter()
            .map(|entry| {
                let mut record = DiscoveredRecord::new(entry.name, self.name());
                record.serial = entry.serial;
                record.mac_addresses = entry.macs;
                record.primary_ip = entry.ip;
                record.manufacturer = entry.manufacturer;
                record.model = entry.model;
                record.role = entry.role;
                record.site = entry.site;
                record.status = entry.status.unwrap_or_default();
                record.attributes = entry.attributes;
                record
            })
            .collect())
    }
}
