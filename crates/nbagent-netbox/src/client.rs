//! NetBox REST client and the [`Inventory`] abstraction over it.
//!
//! The synchronization engine talks to NetBox exclusively through the
//! [`Inventory`] trait, so its logic can be exercised against an
//! in-memory inventory in tests.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{NetBoxError, NetBoxResult};
use crate::models::{
    DeviceTypeWrite, DeviceWrite, NbDevice, NestedDeviceType, NestedRef, Paginated, RefKind,
    RefWrite,
};
use crate::rate_limit::{parse_retry_after, RateLimiter, RetryPolicy};

fn default_verify_ssl() -> bool {
    true
}

fn default_page_size() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_requests_per_sec() -> f64 {
    10.0
}

fn default_burst() -> u32 {
    5
}

/// Connection settings for the NetBox API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetBoxConfig {
    /// Base URL, e.g. `https://netbox.example.com`.
    pub url: String,
    /// API token.
    pub token: String,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
    /// Page size for list endpoints.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_requests_per_sec")]
    pub requests_per_sec: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Read/write access to the device inventory.
///
/// Implemented by [`NetBoxClient`] for production and by in-memory
/// fakes in the synchronization engine's tests.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// All devices currently in the inventory.
    async fn fetch_devices(&self) -> NetBoxResult<Vec<NbDevice>>;

    /// Create a device and return it as stored.
    async fn create_device(&self, payload: &DeviceWrite) -> NetBoxResult<NbDevice>;

    /// Apply a partial update to an existing device.
    async fn update_device(&self, id: i64, payload: &DeviceWrite) -> NetBoxResult<NbDevice>;

    /// Look up a manufacturer, role, or site by slug.
    async fn find_ref(&self, kind: RefKind, slug: &str) -> NetBoxResult<Option<i64>>;

    /// Create a manufacturer, role, or site.
    async fn create_ref(&self, kind: RefKind, name: &str, slug: &str) -> NetBoxResult<i64>;

    /// Look up a device type by slug.
    async fn find_device_type(&self, slug: &str) -> NetBoxResult<Option<i64>>;

    /// Create a device type under a manufacturer.
    async fn create_device_type(
        &self,
        manufacturer_id: i64,
        model: &str,
        slug: &str,
    ) -> NetBoxResult<i64>;
}

/// HTTP client for the NetBox REST API with token auth, pagination,
/// retry, and client-side rate limiting.
pub struct NetBoxClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    page_size: u32,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl fmt::Debug for NetBoxClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetBoxClient")
            .field("base_url", &self.base_url)
            .field("token", &"***")
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl NetBoxClient {
    pub fn new(config: &NetBoxConfig) -> NetBoxResult<Self> {
        let base_url = config.url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(NetBoxError::InvalidUrl {
                url: config.url.clone(),
                message: "expected an http(s) URL".into(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;

        Ok(Self {
            http,
            base_url,
            token: config.token.clone(),
            page_size: config.page_size.max(1),
            retry: config.retry.clone(),
            limiter: RateLimiter::new(config.requests_per_sec, config.burst),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}/", self.base_url, path.trim_matches('/'))
    }

    /// Verify connectivity and credentials; returns the NetBox version.
    pub async fn test_connection(&self) -> NetBoxResult<String> {
        let status: Value = self
            .send_json(Method::GET, "status", &[], None)
            .await?;
        let version = status
            .get("netbox-version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Ok(version)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> NetBoxResult<T> {
        let url = self.url(path);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.limiter.acquire().await;

            let mut request = self
                .http
                .request(method.clone(), &url)
                .header(header::AUTHORIZATION, format!("Token {}", self.token))
                .header(header::ACCEPT, "application/json")
                .query(query);
            if let Some(body) = &body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    let transient = err.is_timeout() || err.is_connect();
                    if transient && attempt <= self.retry.max_retries {
                        let backoff = self.retry.backoff_for(attempt);
                        warn!(
                            url = %url,
                            attempt,
                            error = %err,
                            backoff_ms = backoff.as_millis() as u64,
                            "netbox request failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(NetBoxError::Transport(err));
                }
            };

            let status = response.status();
            if status.is_success() {
                return response.json::<T>().await.map_err(NetBoxError::Transport);
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                let message = Self::error_body(response).await;
                return Err(NetBoxError::Authentication { message });
            }

            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);

            if self.retry.should_retry_status(status.as_u16()) && attempt <= self.retry.max_retries
            {
                let backoff = retry_after
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| self.retry.backoff_for(attempt));
                warn!(
                    url = %url,
                    attempt,
                    status = status.as_u16(),
                    backoff_ms = backoff.as_millis() as u64,
                    "netbox returned retryable status"
                );
                tokio::time::sleep(backoff).await;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(NetBoxError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }

            let message = Self::error_body(response).await;
            return Err(NetBoxError::api(status.as_u16(), message));
        }
    }

    async fn error_body(response: reqwest::Response) -> String {
        match response.text().await {
            Ok(text) if !text.is_empty() => {
                let mut text = text;
                text.truncate(512);
                text
            }
            _ => "<empty body>".to_string(),
        }
    }

    async fn fetch_all<T: DeserializeOwned>(&self, path: &str) -> NetBoxResult<Vec<T>> {
        let mut results = Vec::new();
        let mut offset: u64 = 0;
        loop {
            let page: Paginated<T> = self
                .send_json(
                    Method::GET,
                    path,
                    &[
                        ("limit", self.page_size.to_string()),
                        ("offset", offset.to_string()),
                    ],
                    None,
                )
                .await?;
            let fetched = page.results.len() as u64;
            results.extend(page.results);
            offset += fetched;
            debug!(path, fetched, total = page.count, "fetched netbox page");
            if page.next.is_none() || fetched == 0 || offset >= page.count {
                return Ok(results);
            }
        }
    }

    async fn find_by_slug<T: DeserializeOwned>(
        &self,
        path: &str,
        slug: &str,
    ) -> NetBoxResult<Option<T>> {
        let mut page: Paginated<T> = self
            .send_json(Method::GET, path, &[("slug", slug.to_string())], None)
            .await?;
        if page.results.is_empty() {
            Ok(None)
        } else {
            Ok(Some(page.results.remove(0)))
        }
    }
}

#[async_trait]
impl Inventory for NetBoxClient {
    async fn fetch_devices(&self) -> NetBoxResult<Vec<NbDevice>> {
        self.fetch_all("dcim/devices").await
    }

    async fn create_device(&self, payload: &DeviceWrite) -> NetBoxResult<NbDevice> {
        let body = serde_json::to_value(payload)
            .map_err(|e| NetBoxError::unexpected(e.to_string()))?;
        self.send_json(Method::POST, "dcim/devices", &[], Some(body))
            .await
    }

    async fn update_device(&self, id: i64, payload: &DeviceWrite) -> NetBoxResult<NbDevice> {
        let body = serde_json::to_value(payload)
            .map_err(|e| NetBoxError::unexpected(e.to_string()))?;
        self.send_json(
            Method::PATCH,
            &format!("dcim/devices/{id}"),
            &[],
            Some(body),
        )
        .await
    }

    async fn find_ref(&self, kind: RefKind, slug: &str) -> NetBoxResult<Option<i64>> {
        let found: Option<NestedRef> = self.find_by_slug(kind.endpoint(), slug).await?;
        Ok(found.map(|r| r.id))
    }

    async fn create_ref(&self, kind: RefKind, name: &str, slug: &str) -> NetBoxResult<i64> {
        let payload = RefWrite {
            name: name.to_string(),
            slug: slug.to_string(),
        };
        let body = serde_json::to_value(&payload)
            .map_err(|e| NetBoxError::unexpected(e.to_string()))?;
        let created: NestedRef = self
            .send_json(Method::POST, kind.endpoint(), &[], Some(body))
            .await?;
        debug!(kind = kind.label(), name, slug, id = created.id, "created reference object");
        Ok(created.id)
    }

    async fn find_device_type(&self, slug: &str) -> NetBoxResult<Option<i64>> {
        let found: Option<NestedDeviceType> =
            self.find_by_slug("dcim/device-types", slug).await?;
        Ok(found.map(|t| t.id))
    }

    async fn create_device_type(
        &self,
        manufacturer_id: i64,
        model: &str,
        slug: &str,
    ) -> NetBoxResult<i64> {
        let payload = DeviceTypeWrite {
            manufacturer: manufacturer_id,
            model: model.to_string(),
            slug: slug.to_string(),
        };
        let body = serde_json::to_value(&payload)
            .map_err(|e| NetBoxError::unexpected(e.to_string()))?;
        let created: NestedDeviceType = self
            .send_json(Method::POST, "dcim/device-types", &[], Some(body))
            .await?;
        Ok(created.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> NetBoxConfig {
        NetBoxConfig {
            url: url.to_string(),
            token: "secret".to_string(),
            verify_ssl: true,
            page_size: 100,
            timeout_secs: 5,
            requests_per_sec: 1000.0,
            burst: 100,
            retry: RetryPolicy::default(),
        }
    }

    #[test]
    fn rejects_non_http_url() {
        let err = NetBoxClient::new(&config("ftp://netbox")).unwrap_err();
        assert!(matches!(err, NetBoxError::InvalidUrl { .. }));
    }

    #[test]
    fn debug_redacts_token() {
        let client = NetBoxClient::new(&config("https://netbox.example.com/")).unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn url_joins_without_double_slash() {
        let client = NetBoxClient::new(&config("https://netbox.example.com/")).unwrap();
        assert_eq!(
            client.url("dcim/devices"),
            "https://netbox.example.com/api/dcim/devices/"
        );
    }
}
