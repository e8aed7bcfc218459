//! The normalized asset record produced by every discovery source.
//!
//! Sources translate whatever their upstream API returns into
//! [`DiscoveredRecord`] so the deduplication and reconciliation layers
//! never see source-specific shapes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operational status of a discovered asset, mirroring the NetBox
/// device status choices we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    #[default]
    Active,
    Offline,
    Planned,
    Staged,
    Failed,
    Decommissioning,
}

impl DeviceStatus {
    /// NetBox API representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Offline => "offline",
            Self::Planned => "planned",
            Self::Staged => "staged",
            Self::Failed => "failed",
            Self::Decommissioning => "decommissioning",
        }
    }
}

/// A single asset as reported by one discovery source.
///
/// Optional fields are `None` when the source has no knowledge of them;
/// the merge step combines knowledge from different sources into one
/// record per physical asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredRecord {
    /// Asset name as the source knows it. Never empty after normalization.
    pub name: String,
    /// Serial number, when the source exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// All MAC addresses observed for this asset.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mac_addresses: Vec<String>,
    /// Primary IPv4/IPv6 address, without prefix length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_ip: Option<String>,
    /// Hardware manufacturer name (e.g. "Proxmox", "iXsystems").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    /// Hardware model / device type name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Functional role hint (e.g. "server", "router"). Inferred from
    /// the name when the source gives none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Site placement hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Operational status.
    #[serde(default)]
    pub status: DeviceStatus,
    /// Operating system / platform, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Free-form attributes the source wants carried into NetBox
    /// custom fields. Sorted map so serialization is deterministic.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    /// Name of the source that produced this record.
    pub source: String,
    /// When the source observed this asset.
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredRecord {
    /// Create a record with only the mandatory fields populated.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            serial: None,
            mac_addresses: Vec::new(),
            primary_ip: None,
            manufacturer: None,
            model: None,
            role: None,
            site: None,
            status: DeviceStatus::Active,
            platform: None,
            attributes: BTreeMap::new(),
            source: source.into(),
            discovered_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    #[must_use]
    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac_addresses.push(mac.into());
        self
    }

    #[must_use]
    pub fn with_primary_ip(mut self, ip: impl Into<String>) -> Self {
        self.primary_ip = Some(ip.into());
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    #[must_use]
    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    #[must_use]
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Role to use when the source gave none, guessed from keywords in
    /// the asset name and model.
    #[must_use]
    pub fn effective_role(&self) -> String {
        if let Some(role) = &self.role {
            return role.clone();
        }
        let haystack = format!(
            "{} {}",
            self.name.to_lowercase(),
            self.model.as_deref().unwrap_or("").to_lowercase()
        );
        infer_role(&haystack).to_string()
    }
}

/// Keyword-based role inference for assets whose source reports no role.
fn infer_role(haystack: &str) -> &'static str {
    const KEYWORDS: &[(&str, &str)] = &[
        ("router", "router"),
        ("gateway", "router"),
        ("firewall", "firewall"),
        ("switch", "switch"),
        ("access-point", "wireless"),
        ("ap-", "wireless"),
        ("server", "server"),
        ("host", "server"),
        ("hypervisor", "server"),
        ("nas", "storage"),
        ("storage", "storage"),
        ("sensor", "iot"),
        ("iot", "iot"),
        ("camera", "iot"),
        ("printer", "printer"),
    ];
    for (keyword, role) in KEYWORDS {
        if haystack.contains(keyword) {
            return role;
        }
    }
    "unknown"
}

/// Derive a NetBox slug from a display name: lowercase, with whitespace
/// and underscores collapsed to hyphens and everything else non-alphanumeric
/// dropped.
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_hyphen = true;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_hyphen = false;
        } else if (ch.is_whitespace() || ch == '_' || ch == '-' || ch == '.') && !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Normalize a MAC address for comparison: separators stripped,
/// lowercased. Returns `None` when the result is not 12 hex digits.
#[must_use]
pub fn normalize_mac(mac: &str) -> Option<String> {
    let normalized: String = mac
        .chars()
        .filter(|c| *c != ':' && *c != '-' && *c != '.')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if normalized.len() == 12 && normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(normalized)
    } else {
        None
    }
}
