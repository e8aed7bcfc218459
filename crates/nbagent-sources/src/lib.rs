//! Discovery source connectors and the registry that builds them from
//! configuration.

use std::sync::Arc;

use nbagent_connector::{Source, SourceError, SourceResult, SourceSettings};

pub mod filesystem;
pub mod home_assistant;
pub mod network_scan;
pub mod proxmox;
pub mod truenas;

pub use filesystem::FilesystemSource;
pub use home_assistant::HomeAssistantSource;
pub use network_scan::NetworkScanSource;
pub use proxmox::ProxmoxSource;
pub use truenas::TrueNasSource;

/// Connector kinds this crate knows how to build.
pub const KNOWN_KINDS: &[&str] = &[
    "proxmox",
    "truenas",
    "home_assistant",
    "network_scan",
    "filesystem",
];

/// Build a source from its settings, dispatching on `kind`.
pub fn build_source(settings: SourceSettings) -> SourceResult<Arc<dyn Source>> {
    match settings.kind.as_str() {
        "proxmox" => Ok(Arc::new(ProxmoxSource::new(settings)?)),
        "truenas" => Ok(Arc::new(TrueNasSource::new(settings)?)),
        "home_assistant" => Ok(Arc::new(HomeAssistantSource::new(settings)?)),
        "network_scan" => Ok(Arc::new(NetworkScanSource::new(settings)?)),
        "filesystem" => Ok(Arc::new(FilesystemSource::new(settings)?)),
        other => Err(SourceError::invalid_configuration(format!(
            "unknown source kind '{other}' (known: {})",
            KNOWN_KINDS.join(", ")
        ))),
    }
}
