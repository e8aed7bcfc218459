//! Snapshot cache: a one-shot read of the NetBox device inventory,
//! indexed for the reconciliation step.
//!
//! The snapshot is rebuilt at the start of every cycle. A failed build
//! aborts the cycle, since reconciling against stale or partial state
//! would produce wrong decisions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use nbagent_netbox::{Inventory, NbDevice, NetBoxResult};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// One inventory device with its precomputed content hash.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub device: NbDevice,
    /// Hash over the comparable content, excluding server-managed
    /// fields (id, timestamps, URLs).
    pub content_hash: String,
}

/// Point-in-time view of the NetBox device inventory, keyed by
/// normalized device name.
#[derive(Debug)]
pub struct Snapshot {
    by_name: BTreeMap<String, SnapshotEntry>,
    pub fetched_at: DateTime<Utc>,
    /// Devices NetBox returned without a name; they cannot be matched.
    pub unnamed_skipped: usize,
}

impl Snapshot {
    /// Fetch all devices and index them.
    pub async fn build(inventory: &dyn Inventory) -> NetBoxResult<Self> {
        let devices = inventory.fetch_devices().await?;
        Ok(Self::from_devices(devices))
    }

    #[must_use]
    pub fn from_devices(devices: Vec<NbDevice>) -> Self {
        let mut by_name = BTreeMap::new();
        let mut unnamed_skipped = 0usize;

        for device in devices {
            let Some(name) = device.name.as_deref() else {
                warn!(id = device.id, "inventory device has no name, skipping");
                unnamed_skipped += 1;
                continue;
            };
            let key = normalize_name(name);
            if key.is_empty() {
                unnamed_skipped += 1;
                continue;
            }
            let content_hash = content_hash(&device);
            if let Some(previous) = by_name.insert(
                key.clone(),
                SnapshotEntry {
                    device,
                    content_hash,
                },
            ) {
                warn!(
                    name = %key,
                    previous_id = previous.device.id,
                    "duplicate device name in inventory, keeping latest"
                );
            }
        }

        let snapshot = Self {
            by_name,
            fetched_at: Utc::now(),
            unnamed_skipped,
        };
        info!(
            devices = snapshot.len(),
            skipped = snapshot.unnamed_skipped,
            "inventory snapshot built"
        );
        snapshot
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SnapshotEntry> {
        self.by_name.get(&normalize_name(name))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SnapshotEntry)> {
        self.by_name.iter()
    }
}

/// Matching key: trimmed, lowercased.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Hash the fields the agent compares, in a canonical order. Server
/// bookkeeping (id, last_updated) is excluded so it never masks or
/// fakes a content change.
#[must_use]
pub fn content_hash(device: &NbDevice) -> String {
    let mut hasher = Sha256::new();
    let mut feed = |label: &str, value: &str| {
        hasher.update(label.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    };

    feed("name", device.name.as_deref().unwrap_or(""));
    feed("serial", device.serial.as_deref().unwrap_or(""));
    feed("status", device.status_value());
    feed(
        "device_type",
        device
            .device_type
            .as_ref()
            .and_then(|t| t.slug.as_deref())
            .unwrap_or(""),
    );
    feed(
        "role",
        device
            .role
            .as_ref()
            .and_then(|r| r.slug.as_deref())
            .unwrap_or(""),
    );
    feed(
        "site",
        device
            .site
            .as_ref()
            .and_then(|s| s.slug.as_deref())
            .unwrap_or(""),
    );
    for (key, value) in &device.custom_fields {
        feed(&format!("cf.{key}"), &value.to_string());
    }

    format!("{:x}", hasher.finalize())
}
