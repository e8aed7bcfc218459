//! End-to-end tests for the synchronization pipeline, run against
//! static sources and an in-memory inventory.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use nbagent_connector::{
    DiscoveredRecord, Source, SourceError, SourceResult, SourceSettings,
};
use nbagent_netbox::{
    ChoiceField, DeviceWrite, Inventory, NbDevice, NestedDeviceType, NestedRef, NetBoxError,
    NetBoxResult, RefKind,
};
use nbagent_sync::{
    ConflictPolicy, CycleRunner, DedupConfig, ReconcileConfig, SyncAction, SyncConfig,
};
use tokio::sync::Mutex;

/// A source that returns a fixed record set (or a fixed error).
struct StaticSource {
    settings: SourceSettings,
    records: Vec<DiscoveredRecord>,
    fail: bool,
}

impl StaticSource {
    fn new(name: &str, records: Vec<DiscoveredRecord>) -> Arc<dyn Source> {
        Arc::new(Self {
            settings: SourceSettings::new(name, "static"),
            records,
            fail: false,
        })
    }

    fn failing(name: &str) -> Arc<dyn Source> {
        Arc::new(Self {
            settings: SourceSettings::new(name, "static"),
            records: Vec::new(),
            fail: true,
        })
    }
}

#[async_trait]
impl Source for StaticSource {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn kind(&self) -> &str {
        &self.settings.kind
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    async fn test_connection(&self) -> SourceResult<()> {
        Ok(())
    }

    async fn discover(&self) -> SourceResult<Vec<DiscoveredRecord>> {
        if self.fail {
            Err(SourceError::connection_failed("unreachable"))
        } else {
            Ok(self.records.clone())
        }
    }
}

/// In-memory inventory that counts mutating calls.
#[derive(Default)]
struct FakeInventory {
    devices: Mutex<Vec<NbDevice>>,
    refs: Mutex<HashMap<(RefKind, String), i64>>,
    types: Mutex<HashMap<String, i64>>,
    next_id: AtomicI64,
    mutations: AtomicU64,
    fail_creates_for: HashSet<String>,
}

impl FakeInventory {
    fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    fn alloc_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    async fn seed_device(&self, device: NbDevice) {
        self.devices.lock().await.push(device);
    }

    async fn device_by_name(&self, name: &str) -> Option<NbDevice> {
        self.devices
            .lock()
            .await
            .iter()
            .find(|d| d.name.as_deref() == Some(name))
            .cloned()
    }
}

fn empty_device(id: i64, name: &str) -> NbDevice {
    NbDevice {
        id,
        name: Some(name.to_string()),
        serial: None,
        status: Some(ChoiceField {
            value: "active".into(),
            label: None,
        }),
        device_type: None,
        role: None,
        site: None,
        platform: None,
        primary_ip4: None,
        primary_ip6: None,
        custom_fields: BTreeMap::new(),
        last_updated: None,
    }
}

#[async_trait]
impl Inventory for FakeInventory {
    async fn fetch_devices(&self) -> NetBoxResult<Vec<NbDevice>> {
        Ok(self.devices.lock().await.clone())
    }

    async fn create_device(&self, payload: &DeviceWrite) -> NetBoxResult<NbDevice> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let name = payload.name.clone().unwrap_or_default();
        if self.fail_creates_for.contains(&name) {
            return Err(NetBoxError::api(500, "injected failure"));
        }
        let mut device = empty_device(self.alloc_id(), &name);
        device.serial = payload.serial.clone();
        device.status = Some(ChoiceField {
            value: payload.status.clone().unwrap_or_else(|| "active".into()),
            label: None,
        });
        device.custom_fields = payload.custom_fields.clone();
        if let Some(role) = payload.role {
            device.role = Some(NestedRef {
                id: role,
                name: None,
                slug: self.slug_for(RefKind::DeviceRole, role).await,
            });
        }
        if let Some(site) = payload.site {
            device.site = Some(NestedRef {
                id: site,
                name: None,
                slug: self.slug_for(RefKind::Site, site).await,
            });
        }
        if let Some(type_id) = payload.device_type {
            device.device_type = Some(NestedDeviceType {
                id: type_id,
                model: None,
                slug: self.type_slug_for(type_id).await,
            });
        }
        self.devices.lock().await.push(device.clone());
        Ok(device)
    }

    async fn update_device(&self, id: i64, payload: &DeviceWrite) -> NetBoxResult<NbDevice> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut devices = self.devices.lock().await;
        let device = devices
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| NetBoxError::api(404, "no such device"))?;
        if let Some(serial) = &payload.serial {
            device.serial = Some(serial.clone());
        }
        if let Some(status) = &payload.status {
            device.status = Some(ChoiceField {
                value: status.clone(),
                label: None,
            });
        }
        for (key, value) in &payload.custom_fields {
            device.custom_fields.insert(key.clone(), value.clone());
        }
        if let Some(role) = payload.role {
            device.role = Some(NestedRef {
                id: role,
                name: None,
                slug: None,
            });
        }
        if let Some(site) = payload.site {
            device.site = Some(NestedRef {
                id: site,
                name: None,
                slug: None,
            });
        }
        Ok(device.clone())
    }

    async fn find_ref(&self, kind: RefKind, slug: &str) -> NetBoxResult<Option<i64>> {
        Ok(self.refs.lock().await.get(&(kind, slug.to_string())).copied())
    }

    async fn create_ref(&self, kind: RefKind, _name: &str, slug: &str) -> NetBoxResult<i64> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let id = self.alloc_id();
        self.refs.lock().await.insert((kind, slug.to_string()), id);
        Ok(id)
    }

    async fn find_device_type(&self, slug: &str) -> NetBoxResult<Option<i64>> {
        Ok(self.types.lock().await.get(slug).copied())
    }

    async fn create_device_type(
        &self,
        _manufacturer_id: i64,
        _model: &str,
        slug: &str,
    ) -> NetBoxResult<i64> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let id = self.alloc_id();
        self.types.lock().await.insert(slug.to_string(), id);
        Ok(id)
    }
}

impl FakeInventory {
    async fn slug_for(&self, kind: RefKind, id: i64) -> Option<String> {
        self.refs
            .lock()
            .await
            .iter()
            .find(|((k, _), v)| *k == kind && **v == id)
            .map(|((_, slug), _)| slug.clone())
    }

    async fn type_slug_for(&self, id: i64) -> Option<String> {
        self.types
            .lock()
            .await
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(slug, _)| slug.clone())
    }
}

fn runner(
    sources: Vec<Arc<dyn Source>>,
    inventory: Arc<FakeInventory>,
    config: SyncConfig,
) -> CycleRunner {
    CycleRunner::new(sources, inventory, config)
}

#[tokio::test]
async fn first_cycle_creates_everything() {
    let inventory = Arc::new(FakeInventory::new());
    let sources = vec![StaticSource::new(
        "proxmox",
        vec![
            DiscoveredRecord::new("pve-node1", "proxmox").with_serial("SN-1"),
            DiscoveredRecord::new("pve-node2", "proxmox"),
        ],
    )];

    let report = runner(sources, inventory.clone(), SyncConfig::default())
        .run(false)
        .await
        .unwrap();

    assert!(!report.dry_run);
    assert_eq!(report.stats.created, 2);
    assert_eq!(report.stats.failures, 0);
    let created = inventory.device_by_name("pve-node1").await.unwrap();
    assert_eq!(created.serial.as_deref(), Some("SN-1"));
    // Default site and role were auto-created.
    assert!(created.site.is_some());
    assert!(created.role.is_some());
}

#[tokio::test]
async fn second_cycle_is_idempotent() {
    let inventory = Arc::new(FakeInventory::new());
    let sources = vec![StaticSource::new(
        "proxmox",
        vec![DiscoveredRecord::new("pve-node1", "proxmox").with_serial("SN-1")],
    )];

    let r = runner(sources.clone(), inventory.clone(), SyncConfig::default());
    let first = r.run(false).await.unwrap();
    assert_eq!(first.stats.created, 1);

    let mutations_after_first = inventory.mutation_count();
    let second = r.run(false).await.unwrap();

    assert_eq!(second.stats.created, 0);
    assert_eq!(second.stats.updated, 0);
    assert_eq!(second.stats.skipped, 1);
    // No writes at all on the second pass.
    assert_eq!(inventory.mutation_count(), mutations_after_first);
}

#[tokio::test]
async fn overlapping_sources_collapse_before_sync() {
    let inventory = Arc::new(FakeInventory::new());
    let shared_mac = "AA:BB:CC:00:11:22";
    let sources = vec![
        StaticSource::new(
            "proxmox",
            vec![
                DiscoveredRecord::new("host-1", "proxmox").with_mac(shared_mac),
                DiscoveredRecord::new("host-2", "proxmox"),
            ],
        ),
        StaticSource::new(
            "scan",
            vec![
                DiscoveredRecord::new("host-1", "scan").with_mac(shared_mac),
                DiscoveredRecord::new("host-3", "scan"),
            ],
        ),
    ];

    let report = runner(sources, inventory.clone(), SyncConfig::default())
        .run(false)
        .await
        .unwrap();

    // 4 records, 3 assets.
    assert_eq!(report.stats.records_discovered, 4);
    assert_eq!(report.stats.duplicates_merged, 1);
    assert_eq!(report.stats.assets_after_merge, 3);
    assert_eq!(report.stats.created, 3);
    assert_eq!(inventory.fetch_devices().await.unwrap().len(), 3);
}

#[tokio::test]
async fn dry_run_decides_identically_and_writes_nothing() {
    let make = || {
        vec![StaticSource::new(
            "proxmox",
            vec![
                DiscoveredRecord::new("pve-node1", "proxmox").with_serial("SN-1"),
                DiscoveredRecord::new("pve-node2", "proxmox"),
            ],
        )]
    };

    let preview_inventory = Arc::new(FakeInventory::new());
    let preview = runner(make(), preview_inventory.clone(), SyncConfig::default())
        .run(true)
        .await
        .unwrap();

    assert!(preview.dry_run);
    assert_eq!(preview_inventory.mutation_count(), 0);
    assert_eq!(preview_inventory.fetch_devices().await.unwrap().len(), 0);

    let live_inventory = Arc::new(FakeInventory::new());
    let live = runner(make(), live_inventory.clone(), SyncConfig::default())
        .run(false)
        .await
        .unwrap();

    // Same decision for every asset, only the outcome differs.
    let mut preview_actions: Vec<(String, SyncAction)> = preview
        .actions
        .iter()
        .map(|a| (a.name.clone(), a.action))
        .collect();
    let mut live_actions: Vec<(String, SyncAction)> = live
        .actions
        .iter()
        .map(|a| (a.name.clone(), a.action))
        .collect();
    preview_actions.sort();
    live_actions.sort();
    assert_eq!(preview_actions, live_actions);
    assert!(preview
        .actions
        .iter()
        .filter(|a| a.action == SyncAction::Create)
        .all(|a| a.outcome == "previewed"));
}

#[tokio::test]
async fn failing_source_does_not_abort_the_cycle() {
    let inventory = Arc::new(FakeInventory::new());
    let sources = vec![
        StaticSource::failing("truenas"),
        StaticSource::new(
            "proxmox",
            vec![DiscoveredRecord::new("pve-node1", "proxmox")],
        ),
    ];

    let report = runner(sources, inventory.clone(), SyncConfig::default())
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.stats.sources_failed, 1);
    assert_eq!(report.stats.created, 1);
    let failed = report.sources.iter().find(|s| s.name == "truenas").unwrap();
    assert!(failed.error.is_some());
}

#[tokio::test]
async fn manual_policy_surfaces_conflicts_without_writing() {
    let inventory = Arc::new(FakeInventory::new());
    let mut existing = empty_device(1, "pve-node1");
    existing.serial = Some("SN-OPERATOR".into());
    inventory.seed_device(existing).await;

    let sources = vec![StaticSource::new(
        "proxmox",
        vec![DiscoveredRecord::new("pve-node1", "proxmox").with_serial("SN-DISCOVERED")],
    )];
    let config = SyncConfig {
        reconcile: ReconcileConfig {
            conflict_policy: ConflictPolicy::Manual,
            ..ReconcileConfig::default()
        },
        ..SyncConfig::default()
    };

    let report = runner(sources, inventory.clone(), config)
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.stats.conflicts, 1);
    assert_eq!(inventory.mutation_count(), 0);
    let conflict = &report.actions[0];
    assert_eq!(conflict.action, SyncAction::Conflict);
    assert!(conflict.reason.contains("SN-OPERATOR"));
    // The operator's value is untouched.
    let device = inventory.device_by_name("pve-node1").await.unwrap();
    assert_eq!(device.serial.as_deref(), Some("SN-OPERATOR"));
}

#[tokio::test]
async fn prefer_netbox_never_touches_an_existing_device() {
    let inventory = Arc::new(FakeInventory::new());
    let mut existing = empty_device(1, "srv1");
    existing.serial = Some("OLD1".into());
    inventory.seed_device(existing).await;

    let sources = vec![StaticSource::new(
        "proxmox",
        vec![DiscoveredRecord::new("srv1", "proxmox")
            .with_serial("SN123")
            .with_attribute("vcpus", serde_json::json!(8))],
    )];
    let config = SyncConfig {
        reconcile: ReconcileConfig {
            conflict_policy: ConflictPolicy::PreferNetbox,
            ..ReconcileConfig::default()
        },
        ..SyncConfig::default()
    };

    let report = runner(sources, inventory.clone(), config)
        .run(false)
        .await
        .unwrap();

    // Skip, with the discarded differences in the rationale.
    assert_eq!(report.stats.updated, 0);
    assert_eq!(report.stats.skipped, 1);
    assert_eq!(inventory.mutation_count(), 0);
    let skipped = &report.actions[0];
    assert_eq!(skipped.action, SyncAction::Skip);
    assert!(skipped.reason.contains("serial"));
    let device = inventory.device_by_name("srv1").await.unwrap();
    assert_eq!(device.serial.as_deref(), Some("OLD1"));
    assert!(device.custom_fields.is_empty());
}

#[tokio::test]
async fn merge_fills_gaps_but_preserves_remote_values() {
    let inventory = Arc::new(FakeInventory::new());
    let mut existing = empty_device(1, "srv1");
    existing.serial = Some("OLD1".into());
    inventory.seed_device(existing).await;

    let sources = vec![StaticSource::new(
        "proxmox",
        vec![DiscoveredRecord::new("srv1", "proxmox")
            .with_serial("SN123")
            .with_attribute("vcpus", serde_json::json!(8))],
    )];

    // Merge is the default policy.
    let report = runner(sources, inventory.clone(), SyncConfig::default())
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.stats.updated, 1);
    let device = inventory.device_by_name("srv1").await.unwrap();
    // Remote-set serial preserved, missing custom field filled.
    assert_eq!(device.serial.as_deref(), Some("OLD1"));
    assert_eq!(device.custom_fields.get("vcpus"), Some(&serde_json::json!(8)));
    assert!(report.actions[0].reason.contains("serial"));
}

#[tokio::test]
async fn role_drift_alone_is_applied_under_prefer_source() {
    let inventory = Arc::new(FakeInventory::new());
    let mut existing = empty_device(1, "edge-1");
    existing.serial = Some("SN-1".into());
    existing.role = Some(NestedRef {
        id: 7,
        name: None,
        slug: Some("server".into()),
    });
    existing.site = Some(NestedRef {
        id: 8,
        name: None,
        slug: Some("discovered".into()),
    });
    existing.device_type = Some(NestedDeviceType {
        id: 9,
        model: None,
        slug: Some("generic-device".into()),
    });
    existing
        .custom_fields
        .insert("discovery_sources".into(), serde_json::json!("scan"));
    inventory.seed_device(existing).await;

    let sources = vec![StaticSource::new(
        "scan",
        vec![DiscoveredRecord::new("edge-1", "scan")
            .with_serial("SN-1")
            .with_role("router")],
    )];
    let config = SyncConfig {
        reconcile: ReconcileConfig {
            conflict_policy: ConflictPolicy::PreferSource,
            ..ReconcileConfig::default()
        },
        ..SyncConfig::default()
    };

    let report = runner(sources, inventory.clone(), config)
        .run(false)
        .await
        .unwrap();

    // The only drift is the role; it must still produce an update.
    assert_eq!(report.stats.updated, 1);
    let router_id = inventory
        .find_ref(RefKind::DeviceRole, "router")
        .await
        .unwrap()
        .expect("role auto-created");
    let device = inventory.device_by_name("edge-1").await.unwrap();
    assert_eq!(device.role.unwrap().id, router_id);
}

#[tokio::test]
async fn prefer_source_overwrites_drift() {
    let inventory = Arc::new(FakeInventory::new());
    let mut existing = empty_device(1, "pve-node1");
    existing.serial = Some("SN-STALE".into());
    inventory.seed_device(existing).await;

    let sources = vec![StaticSource::new(
        "proxmox",
        vec![DiscoveredRecord::new("pve-node1", "proxmox").with_serial("SN-FRESH")],
    )];
    let config = SyncConfig {
        reconcile: ReconcileConfig {
            conflict_policy: ConflictPolicy::PreferSource,
            ..ReconcileConfig::default()
        },
        ..SyncConfig::default()
    };

    runner(sources, inventory.clone(), config)
        .run(false)
        .await
        .unwrap();

    let device = inventory.device_by_name("pve-node1").await.unwrap();
    assert_eq!(device.serial.as_deref(), Some("SN-FRESH"));
}

#[tokio::test]
async fn missing_refs_become_conflicts_when_auto_create_disabled() {
    let inventory = Arc::new(FakeInventory::new());
    let sources = vec![StaticSource::new(
        "proxmox",
        vec![DiscoveredRecord::new("pve-node1", "proxmox").with_site("new-lab")],
    )];
    let config = SyncConfig {
        reconcile: ReconcileConfig {
            auto_create_refs: false,
            ..ReconcileConfig::default()
        },
        ..SyncConfig::default()
    };

    let report = runner(sources, inventory.clone(), config)
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.stats.conflicts, 1);
    assert_eq!(report.stats.created, 0);
    assert_eq!(inventory.mutation_count(), 0);
    assert!(report.actions[0].reason.contains("missing dependency"));
    assert!(report.actions[0].reason.contains("new-lab"));
}

#[tokio::test]
async fn one_failed_write_does_not_stop_the_batch() {
    let mut inventory = FakeInventory::new();
    inventory.fail_creates_for.insert("doomed".to_string());
    let inventory = Arc::new(inventory);

    let sources = vec![StaticSource::new(
        "scan",
        vec![
            DiscoveredRecord::new("doomed", "scan"),
            DiscoveredRecord::new("survivor", "scan"),
        ],
    )];

    let report = runner(sources, inventory.clone(), SyncConfig::default())
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.stats.failures, 1);
    assert_eq!(report.stats.created, 1);
    assert!(inventory.device_by_name("survivor").await.is_some());
    assert!(inventory.device_by_name("doomed").await.is_none());
}

#[tokio::test]
async fn repeated_planning_is_deterministic() {
    let inventory = Arc::new(FakeInventory::new());
    let make = || {
        vec![
            StaticSource::new(
                "proxmox",
                vec![
                    DiscoveredRecord::new("host-b", "proxmox"),
                    DiscoveredRecord::new("host-a", "proxmox"),
                ],
            ),
            StaticSource::new("scan", vec![DiscoveredRecord::new("host-a", "scan")]),
        ]
    };

    let first = runner(make(), inventory.clone(), SyncConfig::default())
        .run(true)
        .await
        .unwrap();
    let second = runner(make(), inventory.clone(), SyncConfig::default())
        .run(true)
        .await
        .unwrap();

    let actions = |r: &nbagent_sync::CycleReport| {
        let mut v: Vec<(String, SyncAction)> =
            r.actions.iter().map(|a| (a.name.clone(), a.action)).collect();
        v.sort();
        v
    };
    assert_eq!(actions(&first), actions(&second));
    assert_eq!(first.stats.assets_after_merge, second.stats.assets_after_merge);
}

#[tokio::test]
async fn dedup_config_flows_through_the_runner() {
    let inventory = Arc::new(FakeInventory::new());
    // Identity on serial only: same serial, different names, one asset.
    let config = SyncConfig {
        dedup: DedupConfig {
            identity_fields: vec![nbagent_sync::IdentityField::Serial],
            ..DedupConfig::default()
        },
        ..SyncConfig::default()
    };
    let sources = vec![
        StaticSource::new(
            "proxmox",
            vec![DiscoveredRecord::new("node-via-proxmox", "proxmox").with_serial("SN-X")],
        ),
        StaticSource::new(
            "truenas",
            vec![DiscoveredRecord::new("node-via-truenas", "truenas").with_serial("SN-X")],
        ),
    ];

    let report = runner(sources, inventory.clone(), config)
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.stats.assets_after_merge, 1);
    assert_eq!(report.stats.created, 1);
}
