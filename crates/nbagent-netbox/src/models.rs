//! Wire models for the NetBox DCIM API.
//!
//! Read models keep only the fields the agent compares and updates;
//! NetBox returns far more, and serde ignores the rest.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One page of a paginated NetBox list response.
#[derive(Debug, Clone, Deserialize)]
pub struct Paginated<T> {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

/// A nested reference as NetBox embeds it (role, site, manufacturer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedRef {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

/// A nested device type reference. NetBox names the display field
/// `model` rather than `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedDeviceType {
    pub id: i64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

/// A nested IP address reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedIp {
    pub id: i64,
    pub address: String,
}

/// NetBox serializes choice fields as `{"value": ..., "label": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceField {
    pub value: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// A device as NetBox returns it.
#[derive(Debug, Clone, Deserialize)]
pub struct NbDevice {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub status: Option<ChoiceField>,
    #[serde(default)]
    pub device_type: Option<NestedDeviceType>,
    #[serde(default)]
    pub role: Option<NestedRef>,
    #[serde(default)]
    pub site: Option<NestedRef>,
    #[serde(default)]
    pub platform: Option<NestedRef>,
    #[serde(default)]
    pub primary_ip4: Option<NestedIp>,
    #[serde(default)]
    pub primary_ip6: Option<NestedIp>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl NbDevice {
    /// Status value string, defaulting to "active" when NetBox omits it.
    #[must_use]
    pub fn status_value(&self) -> &str {
        self.status
            .as_ref()
            .map(|s| s.value.as_str())
            .unwrap_or("active")
    }
}

/// Payload for device create (POST) and update (PATCH) calls.
///
/// `None` fields are omitted, which on PATCH leaves the server value
/// untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceWrite {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_fields: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

impl DeviceWrite {
    /// Whether this payload would change anything at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.device_type.is_none()
            && self.role.is_none()
            && self.site.is_none()
            && self.status.is_none()
            && self.serial.is_none()
            && self.custom_fields.is_empty()
            && self.comments.is_none()
    }
}

/// The referenced-object kinds the agent auto-creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Manufacturer,
    DeviceRole,
    Site,
}

impl RefKind {
    /// API path segment under `/api/`.
    #[must_use]
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Manufacturer => "dcim/manufacturers",
            Self::DeviceRole => "dcim/device-roles",
            Self::Site => "dcim/sites",
        }
    }

    /// Human name for logs and conflict messages.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Manufacturer => "manufacturer",
            Self::DeviceRole => "device role",
            Self::Site => "site",
        }
    }
}

/// Payload for creating a manufacturer, role, or site.
#[derive(Debug, Clone, Serialize)]
pub struct RefWrite {
    pub name: String,
    pub slug: String,
}

/// Payload for creating a device type.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceTypeWrite {
    pub manufacturer: i64,
    pub model: String,
    pub slug: String,
}
