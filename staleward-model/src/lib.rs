//! Core data model definitions shared across Staleward crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod error;
pub mod host;
pub mod ids;
pub mod staleness;

// Intentionally curated re-exports for downstream consumers.
pub use error::{ModelError, Result as ModelResult};
pub use host::{GroupRef, HostRecord, ReporterStaleness};
pub use ids::{HostId, TenantId};
pub use staleness::{
    HostKind, PolicyDeltas, StalenessDeltas, StalenessPolicy, StalenessState,
    StalenessTimestamps,
};
