use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::ids::{HostId, TenantId};
use crate::staleness::HostKind;

/// Reference to a host group the host belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub ungrouped: bool,
}

/// Staleness bookkeeping recorded per reporter that has checked the host in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterStaleness {
    pub last_check_in: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_warning_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culled_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub check_in_succeeded: bool,
}

impl ReporterStaleness {
    pub fn checked_in_at(last_check_in: DateTime<Utc>) -> Self {
        Self {
            last_check_in,
            stale_timestamp: None,
            stale_warning_timestamp: None,
            culled_timestamp: None,
            check_in_succeeded: true,
        }
    }
}

/// Transient read copy of one host row.
///
/// Group memberships are always normalized: storage adapters pass a nullable
/// column through [`HostRecord::normalize_groups`] so the engine never sees
/// (or emits) a null group list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: HostId,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub kind: HostKind,
    pub last_check_in: DateTime<Utc>,
    pub reporter: String,
    #[serde(default, deserialize_with = "nullable_groups")]
    pub groups: Vec<GroupRef>,
    #[serde(default)]
    pub per_reporter_staleness: BTreeMap<String, ReporterStaleness>,
    /// Opaque profile attributes carried through to events untouched.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl HostRecord {
    pub fn new(
        id: HostId,
        tenant_id: TenantId,
        last_check_in: DateTime<Utc>,
        reporter: impl Into<String>,
    ) -> Self {
        let reporter = reporter.into();
        let mut per_reporter_staleness = BTreeMap::new();
        per_reporter_staleness.insert(
            reporter.clone(),
            ReporterStaleness::checked_in_at(last_check_in),
        );
        Self {
            id,
            tenant_id,
            kind: HostKind::Conventional,
            last_check_in,
            reporter,
            groups: Vec::new(),
            per_reporter_staleness,
            attributes: Map::new(),
        }
    }

    pub fn with_kind(mut self, kind: HostKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_groups(mut self, groups: Vec<GroupRef>) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Position of this host in the scan order.
    pub fn scan_key(&self) -> (&TenantId, &HostId) {
        (&self.tenant_id, &self.id)
    }

    /// Coerce a nullable group column to an empty list.
    pub fn normalize_groups(groups: Option<Vec<GroupRef>>) -> Vec<GroupRef> {
        groups.unwrap_or_default()
    }
}

fn nullable_groups<'de, D>(deserializer: D) -> Result<Vec<GroupRef>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<GroupRef>>::deserialize(deserializer)
        .map(HostRecord::normalize_groups)
}
