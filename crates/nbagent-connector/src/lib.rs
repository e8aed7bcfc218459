//! Connector framework for the NetBox discovery agent.
//!
//! This crate defines the contract between discovery sources and the
//! synchronization engine: the [`Source`] trait, the normalized
//! [`DiscoveredRecord`] every source emits, common per-source
//! configuration, and the shared error taxonomy.

pub mod config;
pub mod error;
pub mod record;
pub mod traits;

pub use config::SourceSettings;
pub use error::{SourceError, SourceResult};
pub use record::{normalize_mac, slugify, DeviceStatus, DiscoveredRecord};
pub use traits::Source;

/// Commonly used items for connector implementations.
pub mod prelude {
    pub use crate::config::SourceSettings;
    pub use crate::error::{SourceError, SourceResult};
    pub use crate::record::{DeviceStatus, DiscoveredRecord};
    pub use crate::traits::Source;
    pub use async_trait::async_trait;
}
