use std::fmt;

use serde::{Deserialize, Serialize};
use staleward_model::{HostId, HostRecord, TenantId};

/// Keyset bookmark: the last `(tenant_id, host_id)` returned. The next
/// chunk starts strictly after it.
#[derive(
    Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ScanCursor {
    pub tenant_id: TenantId,
    pub host_id: HostId,
}

impl ScanCursor {
    pub fn new(tenant_id: TenantId, host_id: HostId) -> Self {
        Self { tenant_id, host_id }
    }

    pub fn from_record(record: &HostRecord) -> Self {
        Self::new(record.tenant_id.clone(), record.id)
    }

    /// Whether `record` sorts strictly after this bookmark.
    pub fn precedes(&self, record: &HostRecord) -> bool {
        (&self.tenant_id, &self.host_id) < record.scan_key()
    }
}

impl fmt::Display for ScanCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.host_id)
    }
}

/// Ordering applied to every scan. Only one ordering is supported; the
/// cursor format depends on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanOrder {
    #[default]
    TenantThenHost,
}
