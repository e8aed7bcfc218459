//! The [`Source`] trait implemented by every discovery connector.

use async_trait::async_trait;

use crate::config::SourceSettings;
use crate::error::SourceResult;
use crate::record::DiscoveredRecord;

/// A discovery source: anything that can enumerate infrastructure
/// assets and report them as [`DiscoveredRecord`]s.
///
/// Implementations must be cheap to share across tasks; the discovery
/// coordinator queries all sources concurrently.
#[async_trait]
pub trait Source: Send + Sync {
    /// Unique instance name, taken from configuration.
    fn name(&self) -> &str;

    /// Connector kind, e.g. "proxmox".
    fn kind(&self) -> &str;

    /// The settings this source was built from.
    fn settings(&self) -> &SourceSettings;

    /// Verify the source is reachable and credentials work, without
    /// performing a full discovery.
    async fn test_connection(&self) -> SourceResult<()>;

    /// Enumerate all assets this source knows about.
    async fn discover(&self) -> SourceResult<Vec<DiscoveredRecord>>;

    /// Merge priority shorthand.
    fn priority(&self) -> u32 {
        self.settings().priority
    }
}
