//! Deduplication: grouping records that describe the same physical
//! asset and merging each group into a single record.
//!
//! Identity is a SHA-256 signature over a configurable set of
//! normalized identity fields. Records that yield no signature at all
//! (no usable identity field) cannot be correlated and pass through as
//! singletons.

use std::collections::BTreeMap;

use nbagent_connector::record::normalize_mac;
use nbagent_connector::DiscoveredRecord;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Identity fields that can participate in the device signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityField {
    Name,
    Serial,
    Mac,
    Ip,
}

/// How to combine records within one signature group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// The most recently observed record wins; older records only fill
    /// fields the winner lacks.
    #[default]
    PreferNewest,
    /// The record from `preferred_source` wins when present, with
    /// newest-wins as the fallback.
    PreferSource,
    /// Field-level union: each field is taken from the newest record
    /// that has it, with per-field provenance recorded.
    MergeAll,
}

fn default_identity_fields() -> Vec<IdentityField> {
    vec![
        IdentityField::Name,
        IdentityField::Serial,
        IdentityField::Mac,
        IdentityField::Ip,
    ]
}

/// Deduplication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_identity_fields")]
    pub identity_fields: Vec<IdentityField>,
    #[serde(default)]
    pub strategy: MergeStrategy,
    /// Winning source for [`MergeStrategy::PreferSource`].
    #[serde(default)]
    pub preferred_source: Option<String>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            identity_fields: default_identity_fields(),
            strategy: MergeStrategy::default(),
            preferred_source: None,
        }
    }
}

/// One asset after merging, with its identity and provenance.
#[derive(Debug, Clone)]
pub struct MergedRecord {
    /// Signature shared by the merged group; `None` for records that
    /// had no usable identity field.
    pub signature: Option<String>,
    /// The merged record content.
    pub record: DiscoveredRecord,
    /// Names of all sources that contributed, sorted.
    pub sources: Vec<String>,
    /// Which source supplied each field, for [`MergeStrategy::MergeAll`].
    pub provenance: BTreeMap<String, String>,
}

/// Summary counters for one deduplication pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupSummary {
    pub input_records: usize,
    pub merged_assets: usize,
    pub duplicates_merged: usize,
    pub unidentified: usize,
}

/// Groups records by signature and merges each group.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    config: DedupConfig,
}

impl Deduplicator {
    #[must_use]
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// Compute the identity signature for a record, or `None` when no
    /// configured identity field has a usable value.
    #[must_use]
    pub fn signature(&self, record: &DiscoveredRecord) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        for field in &self.config.identity_fields {
            match field {
                IdentityField::Name => {
                    let name = record.name.trim().to_lowercase();
                    if !name.is_empty() {
                        parts.push(format!("name:{name}"));
                    }
                }
                IdentityField::Serial => {
                    if let Some(serial) = &record.serial {
                        let serial = serial.trim().to_lowercase();
                        if !serial.is_empty() {
                            parts.push(format!("serial:{serial}"));
                        }
                    }
                }
                IdentityField::Mac => {
                    for mac in &record.mac_addresses {
                        if let Some(mac) = normalize_mac(mac) {
                            parts.push(format!("mac:{mac}"));
                        }
                    }
                }
                IdentityField::Ip => {
                    if let Some(ip) = &record.primary_ip {
                        let ip = ip.trim().to_lowercase();
                        if !ip.is_empty() {
                            parts.push(format!("ip:{ip}"));
                        }
                    }
                }
            }
        }
        if parts.is_empty() {
            return None;
        }
        parts.sort();
        parts.dedup();
        let mut hasher = Sha256::new();
        hasher.update(parts.join("|").as_bytes());
        Some(format!("{:x}", hasher.finalize()))
    }

    /// Group and merge. `priorities` maps source name to merge priority
    /// (lower wins); it breaks ties between records discovered at the
    /// same instant.
    pub fn dedupe(
        &self,
        records: Vec<DiscoveredRecord>,
        priorities: &BTreeMap<String, u32>,
    ) -> (Vec<MergedRecord>, DedupSummary) {
        let input_records = records.len();
        let mut groups: BTreeMap<String, Vec<DiscoveredRecord>> = BTreeMap::new();
        let mut singletons: Vec<DiscoveredRecord> = Vec::new();

        for record in records {
            match self.signature(&record) {
                Some(signature) => groups.entry(signature).or_default().push(record),
                None => {
                    warn!(
                        source = %record.source,
                        name = %record.name,
                        "record has no usable identity field, treating as unique"
                    );
                    singletons.push(record);
                }
            }
        }

        let unidentified = singletons.len();
        let mut duplicates_merged = 0usize;
        let mut merged: Vec<MergedRecord> = Vec::new();

        for (signature, mut group) in groups {
            duplicates_merged += group.len().saturating_sub(1);
            if group.len() > 1 {
                debug!(
                    signature = %&signature[..12],
                    count = group.len(),
                    "merging duplicate records"
                );
            }
            // Deterministic order regardless of discovery order:
            // newest first, priority then source name as tie-breakers.
            group.sort_by(|a, b| {
                b.discovered_at
                    .cmp(&a.discovered_at)
                    .then_with(|| source_priority(priorities, a).cmp(&source_priority(priorities, b)))
                    .then_with(|| a.source.cmp(&b.source))
            });
            merged.push(self.merge_group(signature, group));
        }

        for record in singletons {
            merged.push(MergedRecord {
                signature: None,
                sources: vec![record.source.clone()],
                provenance: BTreeMap::new(),
                record,
            });
        }

        let summary = DedupSummary {
            input_records,
            merged_assets: merged.len(),
            duplicates_merged,
            unidentified,
        };
        (merged, summary)
    }

    /// `group` arrives newest-first.
    fn merge_group(&self, signature: String, group: Vec<DiscoveredRecord>) -> MergedRecord {
        let mut sources: Vec<String> = group.iter().map(|r| r.source.clone()).collect();
        sources.sort();
        sources.dedup();

        if group.len() == 1 {
            let record = group.into_iter().next().unwrap();
            return MergedRecord {
                signature: Some(signature),
                record,
                sources,
                provenance: BTreeMap::new(),
            };
        }

        let (base_idx, record_provenance) = match self.config.strategy {
            MergeStrategy::PreferNewest => (0, false),
            MergeStrategy::PreferSource => {
                let preferred = self.config.preferred_source.as_deref();
                let idx = preferred
                    .and_then(|p| group.iter().position(|r| r.source == p))
                    .unwrap_or(0);
                (idx, false)
            }
            MergeStrategy::MergeAll => (0, true),
        };

        let mut provenance = BTreeMap::new();
        let mut iter = group.into_iter();
        let mut base = if base_idx == 0 {
            iter.next().unwrap()
        } else {
            let mut rest: Vec<_> = iter.collect();
            let base = rest.remove(base_idx);
            iter = rest.into_iter();
            base
        };

        if record_provenance {
            record_field_provenance(&mut provenance, &base);
        }

        // Fill fields the winner lacks from the remaining records,
        // newest first.
        for other in iter {
            fill_missing(&mut base, &other, record_provenance.then_some(&mut provenance));
        }

        MergedRecord {
            signature: Some(signature),
            record: base,
            sources,
            provenance,
        }
    }
}

fn source_priority(priorities: &BTreeMap<String, u32>, record: &DiscoveredRecord) -> u32 {
    priorities.get(&record.source).copied().unwrap_or(u32::MAX)
}

fn record_field_provenance(provenance: &mut BTreeMap<String, String>, record: &DiscoveredRecord) {
    let source = &record.source;
    provenance.insert("name".into(), source.clone());
    if record.serial.is_some() {
        provenance.insert("serial".into(), source.clone());
    }
    if record.primary_ip.is_some() {
        provenance.insert("primary_ip".into(), source.clone());
    }
    if record.manufacturer.is_some() {
        provenance.insert("manufacturer".into(), source.clone());
    }
    if record.model.is_some() {
        provenance.insert("model".into(), source.clone());
    }
    if record.role.is_some() {
        provenance.insert("role".into(), source.clone());
    }
    if record.site.is_some() {
        provenance.insert("site".into(), source.clone());
    }
    if record.platform.is_some() {
        provenance.insert("platform".into(), source.clone());
    }
    for key in record.attributes.keys() {
        provenance.insert(format!("attributes.{key}"), source.clone());
    }
}

/// Copy fields `donor` has and `base` lacks, merging MAC address sets
/// and attribute maps.
fn fill_missing(
    base: &mut DiscoveredRecord,
    donor: &DiscoveredRecord,
    mut provenance: Option<&mut BTreeMap<String, String>>,
) {
    let mut note = |field: String, prov: &mut Option<&mut BTreeMap<String, String>>| {
        if let Some(prov) = prov {
            prov.insert(field, donor.source.clone());
        }
    };

    if base.serial.is_none() && donor.serial.is_some() {
        base.serial = donor.serial.clone();
        note("serial".into(), &mut provenance);
    }
    if base.primary_ip.is_none() && donor.primary_ip.is_some() {
        base.primary_ip = donor.primary_ip.clone();
        note("primary_ip".into(), &mut provenance);
    }
    if base.manufacturer.is_none() && donor.manufacturer.is_some() {
        base.manufacturer = donor.manufacturer.clone();
        note("manufacturer".into(), &mut provenance);
    }
    if base.model.is_none() && donor.model.is_some() {
        base.model = donor.model.clone();
        note("model".into(), &mut provenance);
    }
    if base.role.is_none() && donor.role.is_some() {
        base.role = donor.role.clone();
        note("role".into(), &mut provenance);
    }
    if base.site.is_none() && donor.site.is_some() {
        base.site = donor.site.clone();
        note("site".into(), &mut provenance);
    }
    if base.platform.is_none() && donor.platform.is_some() {
        base.platform = donor.platform.clone();
        note("platform".into(), &mut provenance);
    }

    for mac in &donor.mac_addresses {
        let normalized = normalize_mac(mac);
        let known = base
            .mac_addresses
            .iter()
            .any(|m| normalize_mac(m) == normalized && normalized.is_some());
        if !known {
            base.mac_addresses.push(mac.clone());
        }
    }

    for (key, value) in &donor.attributes {
        if !base.attributes.contains_key(key) {
            base.attributes.insert(key.clone(), value.clone());
            note(format!("attributes.{key}"), &mut provenance);
        }
    }
}
