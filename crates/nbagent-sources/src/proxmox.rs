//! Proxmox VE source: cluster nodes, and optionally their guests, via
//! the Proxmox REST API.

use nbagent_connector::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Required options: `url`, `token_id`, `token_secret`.
/// Optional: `verify_ssl` (default true), `include_vms` (default false),
/// `node_site` (site to assign to nodes).
pub struct ProxmoxSource {
    settings: SourceSettings,
    http: reqwest::Client,
    base_url: String,
    auth_header: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct PveNode {
    node: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    maxcpu: Option<u64>,
    #[serde(default)]
    maxmem: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PveResource {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    node: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    vmid: Option<u64>,
}

impl ProxmoxSource {
    pub fn new(settings: SourceSettings) -> SourceResult<Self> {
        settings.validate()?;
        let base_url = settings.require_str("url")?.trim_end_matches('/').to_string();
        let token_id = settings.require_str("token_id")?;
        let token_secret = settings.require_str("token_secret")?;
        let auth_header = format!("PVEAPIToken={token_id}={token_secret}");

        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .danger_accept_invalid_certs(!settings.opt_bool("verify_ssl", true))
            .build()
            .map_err(|e| SourceError::invalid_configuration(e.to_string()))?;

        Ok(Self {
            settings,
            http,
            base_url,
            auth_header,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> SourceResult<T> {
        let url = format!("{}/api2/json/{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::timeout(self.settings.timeout_secs)
                } else {
                    SourceError::connection_failed(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SourceError::authentication_failed(format!(
                "proxmox rejected token (status {status})"
            )));
        }
        if !status.is_success() {
            return Err(SourceError::invalid_response(format!(
                "status {status} from {url}"
            )));
        }
        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| SourceError::invalid_response(e.to_string()))?;
        Ok(envelope.data)
    }

    fn node_record(&self, node: &PveNode) -> DiscoveredRecord {
        let status = match node.status.as_deref() {
            Some("online") | None => DeviceStatus::Active,
            _ => DeviceStatus::Offline,
        };
        let mut record = DiscoveredRecord::new(&node.node, self.name())
            .with_role("server")
            .with_manufacturer("Proxmox")
            .with_model("PVE Node")
            .with_platform("Proxmox VE")
            .with_status(status);
        if let Some(cpu) = node.maxcpu {
            record = record.with_attribute("cpu_cores", json!(cpu));
        }
        if let Some(mem) = node.maxmem {
            record = record.with_attribute("memory_bytes", json!(mem));
        }
        if let Some(site) = self.settings.opt_str("node_site") {
            record = record.with_site(site);
        }
        record
    }

    fn vm_record(&self, vm: &PveResource) -> Option<DiscoveredRecord> {
        let name = vm.name.as_deref()?;
        let status = match vm.status.as_deref() {
            Some("running") => DeviceStatus::Active,
            _ => DeviceStatus::Offline,
        };
        let mut record = DiscoveredRecord::new(name, self.name())
            .with_role("virtual-machine")
            .with_manufacturer("Proxmox")
            .with_model("QEMU VM")
            .with_status(status);
        if let Some(vmid) = vm.vmid {
            record = record.with_attribute("vmid", json!(vmid));
        }
        if let Some(node) = &vm.node {
            record = record.with_attribute("hypervisor", json!(node));
        }
        Some(record)
    }
}

#[async_trait]
impl Source for ProxmoxSource {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn kind(&self) -> &str {
        "proxmox"
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    async fn test_connection(&self) -> SourceResult<()> {
        let _: Vec<PveNode> = self.get("nodes").await?;
        Ok(())
    }

    async fn discover(&self) -> SourceResult<Vec<DiscoveredRecord>> {
        let nodes: Vec<PveNode> = self.get("nodes").await?;
        debug!(source = %self.name(), nodes = nodes.len(), "fetched proxmox nodes");
        let mut records: Vec<DiscoveredRecord> =
            nodes.iter().map(|n| self.node_record(n)).collect();

        if self.settings.opt_bool("include_vms", false) {
            let resources: Vec<PveResource> =
                self.get("cluster/resources?type=vm").await?;
            records.extend(
                resources
                    .iter()
                    .filter(|r| r.kind == "qemu" || r.kind == "lxc")
                    .filter_map(|r| self.vm_record(r)),
            );
        }
        Ok(records)
    }
}
