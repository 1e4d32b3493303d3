//! Storage port and adapters.
//!
//! The engine talks to storage only through [`HostStore`] and the
//! [`HostSession`] it opens. A session is owned by a single run and is
//! always closed by the caller, on success and failure alike.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use staleward_model::{
    GroupRef, HostId, ModelError, PolicyDeltas, ReporterStaleness,
    StalenessDeltas, TenantId,
};

use crate::error::StorageError;
use crate::scan::{ScanCursor, ScanOrder};
use crate::staleness::HostPredicate;

pub use memory::MemoryHostStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresHostStore;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait HostStore: Send + Sync {
    async fn open_session(&self) -> StorageResult<Box<dyn HostSession>>;
}

#[async_trait]
pub trait HostSession: Send {
    async fn load_all_policies(&mut self) -> StorageResult<Vec<PolicyRecord>>;

    async fn load_policy(
        &mut self,
        tenant_id: &TenantId,
    ) -> StorageResult<Option<PolicyRecord>>;

    async fn upsert_policy(&mut self, record: &PolicyRecord) -> StorageResult<()>;

    /// Returns whether a record was removed.
    async fn delete_policy(&mut self, tenant_id: &TenantId)
    -> StorageResult<bool>;

    /// One page of matching hosts ordered by `(tenant_id, host_id)`,
    /// starting strictly after `request.after`.
    async fn query(&mut self, request: &ChunkRequest) -> StorageResult<ChunkPage>;

    async fn write_host(&mut self, update: &HostUpdate) -> StorageResult<()>;

    /// Releases the session. Safe to call more than once.
    async fn close(&mut self) -> StorageResult<()>;
}

/// Raw thresholds in seconds as stored, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdSeconds {
    pub stale: i64,
    pub stale_warning: i64,
    pub culled: i64,
}

impl ThresholdSeconds {
    pub fn to_deltas(self) -> Result<StalenessDeltas, ModelError> {
        StalenessDeltas::from_seconds(self.stale, self.stale_warning, self.culled)
    }
}

impl From<&StalenessDeltas> for ThresholdSeconds {
    fn from(deltas: &StalenessDeltas) -> Self {
        Self {
            stale: deltas.stale_after.num_seconds(),
            stale_warning: deltas.stale_warning_after.num_seconds(),
            culled: deltas.cull_after.num_seconds(),
        }
    }
}

/// A tenant's custom policy row. Validation happens in the resolver, so
/// adapters return whatever is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub tenant_id: String,
    pub conventional: ThresholdSeconds,
    pub immutable: ThresholdSeconds,
}

impl PolicyRecord {
    pub fn from_deltas(tenant_id: &TenantId, deltas: &PolicyDeltas) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            conventional: (&deltas.conventional).into(),
            immutable: (&deltas.immutable).into(),
        }
    }

    pub fn to_deltas(&self) -> Result<PolicyDeltas, ModelError> {
        PolicyDeltas::new(
            self.conventional.to_deltas()?,
            self.immutable.to_deltas()?,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub predicate: HostPredicate,
    pub order: ScanOrder,
    pub limit: usize,
    pub after: Option<ScanCursor>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkPage {
    pub records: Vec<staleward_model::HostRecord>,
    /// `None` once the adapter knows no further rows match.
    pub next: Option<ScanCursor>,
}

/// Fields a pre-emit transformation writes back for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostUpdate {
    pub id: HostId,
    pub tenant_id: TenantId,
    pub groups: Vec<GroupRef>,
    pub per_reporter_staleness: BTreeMap<String, ReporterStaleness>,
}
