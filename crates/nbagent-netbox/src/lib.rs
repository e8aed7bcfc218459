//! NetBox REST API client for the discovery agent.
//!
//! Provides the typed wire models, a rate-limited retrying HTTP client,
//! and the [`Inventory`] trait the synchronization engine is written
//! against.

pub mod client;
pub mod error;
pub mod models;
pub mod rate_limit;

pub use client::{Inventory, NetBoxClient, NetBoxConfig};
pub use error::{NetBoxError, NetBoxResult};
pub use models::{
    ChoiceField, DeviceTypeWrite, DeviceWrite, NbDevice, NestedDeviceType, NestedIp, NestedRef,
    Paginated, RefKind, RefWrite,
};
pub use rate_limit::{RateLimiter, RetryPolicy};
