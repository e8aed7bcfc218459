//! Reconciliation: deciding, for every merged asset, how the inventory
//! must change, and applying those decisions in batches.
//!
//! Planning is read-only. A dry run produces exactly the same
//! decisions as a live run and performs no mutating calls at all;
//! the difference is confined to [`Reconciler::apply`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use nbagent_connector::slugify;
use nbagent_netbox::{DeviceWrite, Inventory, NetBoxResult, RefKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::dedup::MergedRecord;
use crate::snapshot::{Snapshot, SnapshotEntry};

/// How to resolve a field that differs between a source record and the
/// existing inventory device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Never write to an existing device; differences from discovery
    /// are reported in the skip rationale.
    PreferNetbox,
    /// The discovered value always wins.
    PreferSource,
    /// Fill only fields the inventory is missing or empty; anything
    /// already set remotely is preserved.
    #[default]
    Merge,
    /// Never write a differing field; surface the record as a conflict
    /// for a human to resolve.
    Manual,
}

fn default_batch_size() -> usize {
    500
}

fn default_auto_create_refs() -> bool {
    true
}

fn default_site() -> String {
    "discovered".to_string()
}

fn default_manufacturer() -> String {
    "Generic".to_string()
}

fn default_model() -> String {
    "Generic Device".to_string()
}

/// Reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Decisions are applied in batches of this size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Create missing sites, roles, manufacturers, and device types on
    /// demand. When disabled, a record needing a missing reference
    /// becomes a conflict instead.
    #[serde(default = "default_auto_create_refs")]
    pub auto_create_refs: bool,
    /// Site for records whose sources report no placement.
    #[serde(default = "default_site")]
    pub default_site: String,
    #[serde(default = "default_manufacturer")]
    pub default_manufacturer: String,
    #[serde(default = "default_model")]
    pub default_model: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            batch_size: default_batch_size(),
            auto_create_refs: default_auto_create_refs(),
            default_site: default_site(),
            default_manufacturer: default_manufacturer(),
            default_model: default_model(),
        }
    }
}

/// The action decided for one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Skip,
    Conflict,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Skip => "skip",
            Self::Conflict => "conflict",
        };
        f.write_str(s)
    }
}

/// A referenced object a decision needs before its device write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefSpec {
    Role { name: String },
    Site { name: String },
    DeviceType { manufacturer: String, model: String },
}

/// A planned change for one asset.
#[derive(Debug, Clone)]
pub struct Decision {
    pub name: String,
    pub action: SyncAction,
    /// Inventory id when the asset already exists.
    pub existing_id: Option<i64>,
    /// Write payload for create/update. Reference id fields are filled
    /// during apply, once the refs in `refs` are resolved.
    pub payload: DeviceWrite,
    pub refs: Vec<RefSpec>,
    /// Human-readable explanation (skip and conflict reasons, fields
    /// retained by policy).
    pub reason: String,
    pub sources: Vec<String>,
}

/// Result of applying (or previewing) one decision.
#[derive(Debug, Clone)]
pub enum ApplyStatus {
    Created { id: i64 },
    Updated { id: i64 },
    Skipped,
    ConflictRecorded,
    /// Dry run: the write was computed but not sent.
    Previewed,
    Failed { error: String },
}

/// One asset's final outcome for the cycle report.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub name: String,
    pub action: SyncAction,
    pub status: ApplyStatus,
    pub reason: String,
}

impl SyncOutcome {
    #[must_use]
    pub fn failed(&self) -> bool {
        matches!(self.status, ApplyStatus::Failed { .. })
    }
}

/// Plans and applies inventory changes.
pub struct Reconciler {
    inventory: Arc<dyn Inventory>,
    config: ReconcileConfig,
}

impl Reconciler {
    #[must_use]
    pub fn new(inventory: Arc<dyn Inventory>, config: ReconcileConfig) -> Self {
        Self { inventory, config }
    }

    /// Decide an action for every merged record. Read-only: performs
    /// reference lookups only when `auto_create_refs` is disabled, and
    /// never mutates the inventory.
    pub async fn plan(
        &self,
        merged: &[MergedRecord],
        snapshot: &Snapshot,
    ) -> NetBoxResult<Vec<Decision>> {
        let mut decisions = Vec::with_capacity(merged.len());
        let mut lookup_cache: HashMap<String, Option<i64>> = HashMap::new();

        for asset in merged {
            let decision = match snapshot.get(&asset.record.name) {
                None => self.plan_create(asset),
                Some(entry) => self.plan_update(asset, entry),
            };
            let decision = if self.config.auto_create_refs {
                decision
            } else {
                self.demote_missing_refs(decision, &mut lookup_cache).await?
            };
            decisions.push(decision);
        }

        let counts = count_actions(&decisions);
        info!(
            create = counts.0,
            update = counts.1,
            skip = counts.2,
            conflict = counts.3,
            "reconciliation plan ready"
        );
        Ok(decisions)
    }

    fn plan_create(&self, asset: &MergedRecord) -> Decision {
        let desired = self.desired_state(asset);
        Decision {
            name: asset.record.name.clone(),
            action: SyncAction::Create,
            existing_id: None,
            payload: DeviceWrite {
                name: Some(asset.record.name.clone()),
                serial: desired.serial.clone(),
                status: Some(desired.status.clone()),
                custom_fields: desired.custom_fields.clone(),
                ..DeviceWrite::default()
            },
            refs: vec![
                RefSpec::DeviceType {
                    manufacturer: desired.manufacturer.clone(),
                    model: desired.model.clone(),
                },
                RefSpec::Role {
                    name: desired.role.clone(),
                },
                RefSpec::Site {
                    name: desired.site.clone(),
                },
            ],
            reason: "not present in inventory".to_string(),
            sources: asset.sources.clone(),
        }
    }

    fn plan_update(&self, asset: &MergedRecord, entry: &SnapshotEntry) -> Decision {
        let desired = self.desired_state(asset);
        let device = &entry.device;
        let policy = self.config.conflict_policy;

        let mut payload = DeviceWrite::default();
        let mut refs = Vec::new();
        let mut conflicts: Vec<String> = Vec::new();
        let mut retained: Vec<String> = Vec::new();

        // Serial.
        let existing_serial = device.serial.as_deref().filter(|s| !s.is_empty());
        if let Some(want) = desired.serial.as_deref() {
            match existing_serial {
                None => match policy {
                    ConflictPolicy::PreferNetbox => retained.push("serial".into()),
                    _ => payload.serial = Some(want.to_string()),
                },
                Some(have) if have != want => match policy {
                    ConflictPolicy::PreferNetbox | ConflictPolicy::Merge => {
                        retained.push("serial".into());
                    }
                    ConflictPolicy::PreferSource => payload.serial = Some(want.to_string()),
                    ConflictPolicy::Manual => conflicts.push(format!(
                        "serial: inventory '{have}' vs discovered '{want}'"
                    )),
                },
                Some(_) => {}
            }
        }

        // Status is never empty on an existing device, so only
        // prefer_source may rewrite it.
        let have_status = device.status_value();
        if have_status != desired.status {
            match policy {
                ConflictPolicy::PreferNetbox | ConflictPolicy::Merge => {
                    retained.push("status".into());
                }
                ConflictPolicy::PreferSource => payload.status = Some(desired.status.clone()),
                ConflictPolicy::Manual => conflicts.push(format!(
                    "status: inventory '{have_status}' vs discovered '{}'",
                    desired.status
                )),
            }
        }

        // Role, site, device type.
        self.diff_ref_field(
            "role",
            device.role.as_ref().and_then(|r| r.slug.as_deref()),
            &desired.role,
            RefSpec::Role {
                name: desired.role.clone(),
            },
            policy,
            &mut refs,
            &mut conflicts,
            &mut retained,
        );
        self.diff_ref_field(
            "site",
            device.site.as_ref().and_then(|s| s.slug.as_deref()),
            &desired.site,
            RefSpec::Site {
                name: desired.site.clone(),
            },
            policy,
            &mut refs,
            &mut conflicts,
            &mut retained,
        );
        self.diff_ref_field(
            "device_type",
            device.device_type.as_ref().and_then(|t| t.slug.as_deref()),
            &desired.model,
            RefSpec::DeviceType {
                manufacturer: desired.manufacturer.clone(),
                model: desired.model.clone(),
            },
            policy,
            &mut refs,
            &mut conflicts,
            &mut retained,
        );

        // Custom fields, compared key-wise.
        let mut changed_customs = BTreeMap::new();
        for (key, want) in &desired.custom_fields {
            match device.custom_fields.get(key) {
                None | Some(Value::Null) => match policy {
                    ConflictPolicy::PreferNetbox => retained.push(format!("cf.{key}")),
                    _ => {
                        changed_customs.insert(key.clone(), want.clone());
                    }
                },
                Some(have) if have != want => match policy {
                    ConflictPolicy::PreferNetbox | ConflictPolicy::Merge => {
                        retained.push(format!("cf.{key}"));
                    }
                    ConflictPolicy::PreferSource => {
                        changed_customs.insert(key.clone(), want.clone());
                    }
                    ConflictPolicy::Manual => conflicts.push(format!(
                        "custom field '{key}': inventory {have} vs discovered {want}"
                    )),
                },
                Some(_) => {}
            }
        }
        if !changed_customs.is_empty() {
            // PATCH with only the keys being changed; NetBox merges
            // custom_fields key-wise.
            payload.custom_fields = changed_customs;
        }

        if !conflicts.is_empty() {
            return Decision {
                name: asset.record.name.clone(),
                action: SyncAction::Conflict,
                existing_id: Some(device.id),
                payload: DeviceWrite::default(),
                refs: Vec::new(),
                reason: conflicts.join("; "),
                sources: asset.sources.clone(),
            };
        }

        if payload.is_empty() && refs.is_empty() {
            debug!(
                name = %asset.record.name,
                content_hash = %entry.content_hash,
                "device already in sync"
            );
            let reason = if retained.is_empty() {
                "in sync".to_string()
            } else {
                format!("differences retained by policy: {}", retained.join(", "))
            };
            return Decision {
                name: asset.record.name.clone(),
                action: SyncAction::Skip,
                existing_id: Some(device.id),
                payload: DeviceWrite::default(),
                refs: Vec::new(),
                reason,
                sources: asset.sources.clone(),
            };
        }

        let reason = if retained.is_empty() {
            "drift from discovered state".to_string()
        } else {
            format!("partial update; retained: {}", retained.join(", "))
        };
        Decision {
            name: asset.record.name.clone(),
            action: SyncAction::Update,
            existing_id: Some(device.id),
            payload,
            refs,
            reason,
            sources: asset.sources.clone(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn diff_ref_field(
        &self,
        field: &str,
        existing_slug: Option<&str>,
        desired_name: &str,
        spec: RefSpec,
        policy: ConflictPolicy,
        refs: &mut Vec<RefSpec>,
        conflicts: &mut Vec<String>,
        retained: &mut Vec<String>,
    ) {
        let desired_slug = slugify(desired_name);
        match existing_slug {
            None => match policy {
                ConflictPolicy::PreferNetbox => retained.push(field.into()),
                _ => refs.push(spec),
            },
            Some(have) if have != desired_slug => match policy {
                ConflictPolicy::PreferNetbox | ConflictPolicy::Merge => retained.push(field.into()),
                ConflictPolicy::PreferSource => refs.push(spec),
                ConflictPolicy::Manual => conflicts.push(format!(
                    "{field}: inventory '{have}' vs discovered '{desired_slug}'"
                )),
            },
            Some(_) => {}
        }
    }

    /// With auto-creation disabled, any decision needing a reference
    /// that does not exist becomes a conflict.
    async fn demote_missing_refs(
        &self,
        decision: Decision,
        cache: &mut HashMap<String, Option<i64>>,
    ) -> NetBoxResult<Decision> {
        let mut missing: Vec<String> = Vec::new();
        for spec in &decision.refs {
            let (label, key, found) = match spec {
                RefSpec::Role { name } => {
                    let slug = slugify(name);
                    let key = format!("role:{slug}");
                    let found = self
                        .cached_find(cache, &key, RefKind::DeviceRole, &slug)
                        .await?;
                    ("device role", name.clone(), found)
                }
                RefSpec::Site { name } => {
                    let slug = slugify(name);
                    let key = format!("site:{slug}");
                    let found = self.cached_find(cache, &key, RefKind::Site, &slug).await?;
                    ("site", name.clone(), found)
                }
                RefSpec::DeviceType { model, .. } => {
                    let slug = slugify(model);
                    let key = format!("type:{slug}");
                    let found = match cache.get(&key) {
                        Some(v) => *v,
                        None => {
                            let v = self.inventory.find_device_type(&slug).await?;
                            cache.insert(key, v);
                            v
                        }
                    };
                    ("device type", model.clone(), found)
                }
            };
            if found.is_none() {
                missing.push(format!("{label} '{key}'"));
            }
        }

        if missing.is_empty() {
            return Ok(decision);
        }
        warn!(
            name = %decision.name,
            missing = %missing.join(", "),
            "reference auto-creation disabled and dependencies are missing"
        );
        Ok(Decision {
            action: SyncAction::Conflict,
            payload: DeviceWrite::default(),
            refs: Vec::new(),
            reason: format!("missing dependency: {}", missing.join(", ")),
            ..decision
        })
    }

    async fn cached_find(
        &self,
        cache: &mut HashMap<String, Option<i64>>,
        key: &str,
        kind: RefKind,
        slug: &str,
    ) -> NetBoxResult<Option<i64>> {
        if let Some(found) = cache.get(key) {
            return Ok(*found);
        }
        let found = self.inventory.find_ref(kind, slug).await?;
        cache.insert(key.to_string(), found);
        Ok(found)
    }

    /// Apply decisions in batches. Best-effort: one failed write is
    /// recorded and the rest of the batch continues. With `dry_run`
    /// set, no inventory call is made at all.
    pub async fn apply(&self, decisions: Vec<Decision>, dry_run: bool) -> Vec<SyncOutcome> {
        if dry_run {
            return decisions
                .into_iter()
                .map(|d| {
                    let status = match d.action {
                        SyncAction::Create | SyncAction::Update => ApplyStatus::Previewed,
                        SyncAction::Skip => ApplyStatus::Skipped,
                        SyncAction::Conflict => ApplyStatus::ConflictRecorded,
                    };
                    SyncOutcome {
                        name: d.name,
                        action: d.action,
                        status,
                        reason: d.reason,
                    }
                })
                .collect();
        }

        let batch_size = self.config.batch_size.max(1);
        let mut outcomes = Vec::with_capacity(decisions.len());
        let mut ref_cache = RefCache::default();
        let total_batches = decisions.len().div_ceil(batch_size);

        for (batch_idx, batch) in decisions.chunks(batch_size).enumerate() {
            info!(
                batch = batch_idx + 1,
                of = total_batches,
                size = batch.len(),
                "applying reconciliation batch"
            );
            for decision in batch {
                outcomes.push(self.apply_one(decision, &mut ref_cache).await);
            }
        }
        outcomes
    }

    async fn apply_one(&self, decision: &Decision, cache: &mut RefCache) -> SyncOutcome {
        let base = SyncOutcome {
            name: decision.name.clone(),
            action: decision.action,
            status: ApplyStatus::Skipped,
            reason: decision.reason.clone(),
        };

        match decision.action {
            SyncAction::Skip => base,
            SyncAction::Conflict => {
                warn!(name = %decision.name, reason = %decision.reason, "conflict requires manual resolution");
                SyncOutcome {
                    status: ApplyStatus::ConflictRecorded,
                    ..base
                }
            }
            SyncAction::Create | SyncAction::Update => {
                let mut payload = decision.payload.clone();
                if let Err(err) = self.resolve_refs(&decision.refs, &mut payload, cache).await {
                    warn!(name = %decision.name, error = %err, "failed to resolve references");
                    return SyncOutcome {
                        status: ApplyStatus::Failed {
                            error: err.to_string(),
                        },
                        ..base
                    };
                }

                let result = match decision.existing_id {
                    None => self
                        .inventory
                        .create_device(&payload)
                        .await
                        .map(|d| ApplyStatus::Created { id: d.id }),
                    Some(id) => self
                        .inventory
                        .update_device(id, &payload)
                        .await
                        .map(|d| ApplyStatus::Updated { id: d.id }),
                };

                match result {
                    Ok(status) => {
                        debug!(name = %decision.name, action = %decision.action, "applied");
                        SyncOutcome { status, ..base }
                    }
                    Err(err) => {
                        warn!(name = %decision.name, action = %decision.action, error = %err, "write failed");
                        SyncOutcome {
                            status: ApplyStatus::Failed {
                                error: err.to_string(),
                            },
                            ..base
                        }
                    }
                }
            }
        }
    }

    async fn resolve_refs(
        &self,
        refs: &[RefSpec],
        payload: &mut DeviceWrite,
        cache: &mut RefCache,
    ) -> NetBoxResult<()> {
        for spec in refs {
            match spec {
                RefSpec::Role { name } => {
                    payload.role = Some(self.ensure_plain(cache, RefKind::DeviceRole, name).await?);
                }
                RefSpec::Site { name } => {
                    payload.site = Some(self.ensure_plain(cache, RefKind::Site, name).await?);
                }
                RefSpec::DeviceType {
                    manufacturer,
                    model,
                } => {
                    payload.device_type =
                        Some(self.ensure_device_type(cache, manufacturer, model).await?);
                }
            }
        }
        Ok(())
    }

    async fn ensure_plain(
        &self,
        cache: &mut RefCache,
        kind: RefKind,
        name: &str,
    ) -> NetBoxResult<i64> {
        let slug = slugify(name);
        if let Some(id) = cache.plain.get(&(kind, slug.clone())) {
            return Ok(*id);
        }
        let id = match self.inventory.find_ref(kind, &slug).await? {
            Some(id) => id,
            None => self.inventory.create_ref(kind, name, &slug).await?,
        };
        cache.plain.insert((kind, slug), id);
        Ok(id)
    }

    async fn ensure_device_type(
        &self,
        cache: &mut RefCache,
        manufacturer: &str,
        model: &str,
    ) -> NetBoxResult<i64> {
        let slug = slugify(model);
        if let Some(id) = cache.types.get(&slug) {
            return Ok(*id);
        }
        let id = match self.inventory.find_device_type(&slug).await? {
            Some(id) => id,
            None => {
                let manufacturer_id = self
                    .ensure_plain(cache, RefKind::Manufacturer, manufacturer)
                    .await?;
                self.inventory
                    .create_device_type(manufacturer_id, model, &slug)
                    .await?
            }
        };
        cache.types.insert(slug, id);
        Ok(id)
    }

    fn desired_state(&self, asset: &MergedRecord) -> DesiredState {
        let record = &asset.record;
        let mut custom_fields = record.attributes.clone();
        custom_fields.insert(
            "discovery_sources".to_string(),
            Value::String(asset.sources.join(",")),
        );
        if let Some(ip) = &record.primary_ip {
            custom_fields.insert("discovered_ip".to_string(), Value::String(ip.clone()));
        }

        DesiredState {
            serial: record
                .serial
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
            status: record.status.as_str().to_string(),
            role: record.effective_role(),
            site: record
                .site
                .clone()
                .unwrap_or_else(|| self.config.default_site.clone()),
            manufacturer: record
                .manufacturer
                .clone()
                .unwrap_or_else(|| self.config.default_manufacturer.clone()),
            model: record
                .model
                .clone()
                .unwrap_or_else(|| self.config.default_model.clone()),
            custom_fields,
        }
    }
}

/// The inventory state a merged record asks for.
struct DesiredState {
    serial: Option<String>,
    status: String,
    role: String,
    site: String,
    manufacturer: String,
    model: String,
    custom_fields: BTreeMap<String, Value>,
}

#[derive(Default)]
struct RefCache {
    plain: HashMap<(RefKind, String), i64>,
    types: HashMap<String, i64>,
}

fn count_actions(decisions: &[Decision]) -> (usize, usize, usize, usize) {
    let mut counts = (0, 0, 0, 0);
    for d in decisions {
        match d.action {
            SyncAction::Create => counts.0 += 1,
            SyncAction::Update => counts.1 += 1,
            SyncAction::Skip => counts.2 += 1,
            SyncAction::Conflict => counts.3 += 1,
        }
    }
    counts
}
