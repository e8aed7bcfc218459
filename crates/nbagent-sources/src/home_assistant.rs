//! Home Assistant source: tracked network devices from the states API.

use nbagent_connector::prelude::*;
use serde::Deserialize;
use tracing::debug;

/// Required options: `url`, `token`.
/// Optional: `site`.
pub struct HomeAssistantSource {
    settings: SourceSettings,
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct HaState {
    entity_id: String,
    state: String,
    #[serde(default)]
    attributes: HaAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct HaAttributes {
    #[serde(default)]
    friendly_name: Option<String>,
    #[serde(default)]
    source_type: Option<String>,
    #[serde(default)]
    mac: Option<String>,
    #[serde(default)]
    ip: Option<String>,
}

impl HomeAssistantSource {
    pub fn new(settings: SourceSettings) -> SourceResult<Self> {
        settings.validate()?;
        let base_url = settings.require_str("url")?.trim_end_matches('/').to_string();
        let token = settings.require_str("token")?.to_string();

        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| SourceError::invalid_configuration(e.to_string()))?;

        Ok(Self {
            settings,
            http,
            base_url,
            token,
        })
    }

    async fn get_states(&self) -> SourceResult<Vec<HaState>> {
        let url = format!("{}/api/states", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
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
            return Err(SourceError::authentication_failed(
                "home assistant rejected token",
            ));
        }
        if !status.is_success() {
            return Err(SourceError::invalid_response(format!(
                "status {status} from {url}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| SourceError::invalid_response(e.to_string()))
    }

    fn tracker_record(&self, state: &HaState) -> DiscoveredRecord {
        let name = state
            .attributes
            .friendly_name
            .clone()
            .unwrap_or_else(|| {
                state
                    .entity_id
                    .strip_prefix("device_tracker.")
                    .unwrap_or(&state.entity_id)
                    .to_string()
            });
        let status = if state.state == "home" {
            DeviceStatus::Active
        } else {
            DeviceStatus::Offline
        };

        let mut record = DiscoveredRecord::new(name, self.name())
            .with_role("iot")
            .with_status(status);
        if let Some(mac) = &state.attributes.mac {
            record = record.with_mac(mac);
        }
        if let Some(ip) = &state.attributes.ip {
            record = record.with_primary_ip(ip);
        }
        if let Some(site) = self.settings.opt_str("site") {
            record = record.with_site(site);
        }
        record
    }
}

#[async_trait]
impl Source for HomeAssistantSource {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn kind(&self) -> &str {
        "home_assistant"
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    async fn test_connection(&self) -> SourceResult<()> {
        self.get_states().await.map(|_| ())
    }

    async fn discover(&self) -> SourceResult<Vec<DiscoveredRecord>> {
        let states = self.get_states().await?;
        let records: Vec<DiscoveredRecord> = states
            .iter()
            .filter(|s| {
                s.entity_id.starts_with("device_tracker.")
                    && s.attributes.source_type.as_deref() == Some("router")
            })
            .map(|s| self.tracker_record(s))
            .collect();
        debug!(
            source = %self.name(),
            entities = states.len(),
            trackers = records.len(),
            "filtered home assistant states"
        );
        Ok(records)
    }
}
