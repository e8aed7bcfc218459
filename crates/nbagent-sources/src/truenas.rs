//! TrueNAS source: the appliance itself, via the v2.0 REST API.

use nbagent_connector::prelude::*;
use serde::Deserialize;
use serde_json::json;

/// Required options: `url`, `api_key`.
/// Optional: `verify_ssl` (default true), `site`.
pub struct TrueNasSource {
    settings: SourceSettings,
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SystemInfo {
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    system_product: Option<String>,
    #[serde(default)]
    system_manufacturer: Option<String>,
    #[serde(default)]
    system_serial: Option<String>,
    #[serde(default)]
    cores: Option<u64>,
    #[serde(default)]
    physmem: Option<u64>,
}

impl TrueNasSource {
    pub fn new(settings: SourceSettings) -> SourceResult<Self> {
        settings.validate()?;
        let base_url = settings.require_str("url")?.trim_end_matches('/').to_string();
        let api_key = settings.require_str("api_key")?.to_string();

        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .danger_accept_invalid_certs(!settings.opt_bool("verify_ssl", true))
            .build()
            .map_err(|e| SourceError::invalid_configuration(e.to_string()))?;

        Ok(Self {
            settings,
            http,
            base_url,
            api_key,
        })
    }

    async fn system_info(&self) -> SourceResult<SystemInfo> {
        let url = format!("{}/api/v2.0/system/info", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
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
                "truenas rejected api key",
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
}

#[async_trait]
impl Source for TrueNasSource {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn kind(&self) -> &str {
        "truenas"
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    async fn test_connection(&self) -> SourceResult<()> {
        self.system_info().await.map(|_| ())
    }

    async fn discover(&self) -> SourceResult<Vec<DiscoveredRecord>> {
        let info = self.system_info().await?;
        let name = info
            .hostname
            .as_deref()
            .ok_or_else(|| SourceError::invalid_response("system info has no hostname"))?;

        let mut record = DiscoveredRecord::new(name, self.name())
            .with_role("storage")
            .with_manufacturer(
                info.system_manufacturer.as_deref().unwrap_or("iXsystems"),
            );
        if let Some(product) = &info.system_product {
            record = record.with_model(product);
        }
        if let Some(serial) = info.system_serial.as_deref().filter(|s| !s.is_empty()) {
            record = record.with_serial(serial);
        }
        if let Some(version) = &info.version {
            record = record.with_platform(format!("TrueNAS {version}"));
        }
        if let Some(site) = self.settings.opt_str("site") {
            record = record.with_site(site);
        }
        if let Some(cores) = info.cores {
            record = record.with_attribute("cpu_cores", json!(cores));
        }
        if let Some(mem) = info.physmem {
            record = record.with_attribute("memory_bytes", json!(mem));
        }
        Ok(vec![record])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(url: &str) -> SourceSettings {
        SourceSettings::new("nas", "truenas")
            .with_option("url", json!(url))
            .with_option("api_key", json!("key-123"))
    }

    #[tokio::test]
    async fn discovers_the_appliance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2.0/system/info"))
            .and(header("authorization", "Bearer key-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hostname": "nas01",
                "version": "TrueNAS-13.0-U6",
                "system_product": "TRUENAS-MINI-3.0",
                "system_serial": "A1-12345",
                "cores": 8,
                "physmem": 34359738368u64
            })))
            .mount(&server)
            .await;

        let source = TrueNasSource::new(settings(&server.uri())).unwrap();
        let records = source.discover().await.unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.name, "nas01");
        assert_eq!(record.serial.as_deref(), Some("A1-12345"));
        assert_eq!(record.role.as_deref(), Some("storage"));
        assert_eq!(record.manufacturer.as_deref(), Some("iXsystems"));
    }

    #[tokio::test]
    async fn missing_hostname_is_an_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2.0/system/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "x"})))
            .mount(&server)
            .await;

        let source = TrueNasSource::new(settings(&server.uri())).unwrap();
        let err = source.discover().await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_RESPONSE");
    }
}
