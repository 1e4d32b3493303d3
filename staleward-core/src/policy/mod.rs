//! Staleness policy resolution.
//!
//! Custom policies are loaded once per run into a [`PolicySet`]; every
//! tenant without a custom record falls back to the configured default.
//! The set is never cached across runs.

pub mod admin;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use staleward_model::{
    HostRecord, PolicyDeltas, StalenessPolicy, StalenessState, TenantId,
};
use tracing::{debug, info};

use crate::error::PolicyLoadError;
use crate::staleness::ClassifyPolicy;
use crate::storage::{HostSession, PolicyRecord};

pub use admin::{effective_policy, reset_policy, set_policy};

/// Every policy in force for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySet {
    default: PolicyDeltas,
    custom: BTreeMap<TenantId, PolicyDeltas>,
}

impl PolicySet {
    pub fn new(default: PolicyDeltas) -> Self {
        Self {
            default,
            custom: BTreeMap::new(),
        }
    }

    /// Adds a custom policy. Returns the previous deltas if the tenant
    /// already had one.
    pub fn insert_custom(
        &mut self,
        tenant_id: TenantId,
        deltas: PolicyDeltas,
    ) -> Option<PolicyDeltas> {
        self.custom.insert(tenant_id, deltas)
    }

    pub fn default_deltas(&self) -> &PolicyDeltas {
        &self.default
    }

    pub fn custom(&self) -> &BTreeMap<TenantId, PolicyDeltas> {
        &self.custom
    }

    pub fn is_custom(&self, tenant_id: &TenantId) -> bool {
        self.custom.contains_key(tenant_id)
    }

    pub fn deltas_for(&self, tenant_id: &TenantId) -> &PolicyDeltas {
        self.custom.get(tenant_id).unwrap_or(&self.default)
    }

    pub fn policy_for(&self, tenant_id: &TenantId) -> StalenessPolicy {
        match self.custom.get(tenant_id) {
            Some(deltas) => StalenessPolicy::Custom {
                tenant_id: tenant_id.clone(),
                deltas: *deltas,
            },
            None => StalenessPolicy::Default {
                deltas: self.default,
            },
        }
    }

    /// State of `host` under its own tenant's policy.
    pub fn classify(
        &self,
        host: &HostRecord,
        now: DateTime<Utc>,
    ) -> StalenessState {
        self.policy_for(&host.tenant_id).classify_host(host, now)
    }
}

/// Loads custom policies and validates them against the threshold
/// invariant.
#[derive(Debug, Clone)]
pub struct PolicyResolver {
    defaults: PolicyDeltas,
}

impl PolicyResolver {
    pub fn new(defaults: PolicyDeltas) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &PolicyDeltas {
        &self.defaults
    }

    /// All-or-nothing: an unreachable store or a single invalid record
    /// fails the whole load.
    pub async fn resolve_all(
        &self,
        session: &mut dyn HostSession,
    ) -> Result<PolicySet, PolicyLoadError> {
        let records = session
            .load_all_policies()
            .await
            .map_err(PolicyLoadError::Unreachable)?;

        let mut set = PolicySet::new(self.defaults);
        for record in records {
            let (tenant_id, deltas) = validate_record(record)?;
            debug!(tenant_id = %tenant_id, "loaded custom staleness policy");
            if set.insert_custom(tenant_id.clone(), deltas).is_some() {
                return Err(PolicyLoadError::Duplicate(tenant_id));
            }
        }

        info!(custom_policies = set.custom.len(), "resolved staleness policies");
        Ok(set)
    }
}

pub(crate) fn validate_record(
    record: PolicyRecord,
) -> Result<(TenantId, PolicyDeltas), PolicyLoadError> {
    let invalid = |tenant_id: &str, source| PolicyLoadError::Invalid {
        tenant_id: tenant_id.to_string(),
        source,
    };
    let tenant_id = TenantId::new(record.tenant_id.as_str())
        .map_err(|err| invalid(&record.tenant_id, err))?;
    let deltas = record
        .to_deltas()
        .map_err(|err| invalid(&record.tenant_id, err))?;
    Ok((tenant_id, deltas))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{HostStore, MemoryHostStore, ThresholdSeconds};
    use staleward_model::{ModelError, StalenessDeltas};

    fn defaults() -> PolicyDeltas {
        PolicyDeltas::new(
            StalenessDeltas::from_seconds(100, 200, 300).unwrap(),
            StalenessDeltas::from_seconds(1_000, 2_000, 3_000).unwrap(),
        )
        .unwrap()
    }

    fn record(tenant: &str, stale: i64, warn: i64, cull: i64) -> PolicyRecord {
        PolicyRecord {
            tenant_id: tenant.to_string(),
            conventional: ThresholdSeconds {
                stale,
                stale_warning: warn,
                culled: cull,
            },
            immutable: ThresholdSeconds {
                stale: 1_000,
                stale_warning: 2_000,
                culled: 3_000,
            },
        }
    }

    #[tokio::test]
    async fn absent_tenants_fall_back_to_default() {
        let store = MemoryHostStore::default();
        store.put_policy_record(record("org-a", 10, 20, 30)).await;

        let mut session = store.open_session().await.unwrap();
        let set = PolicyResolver::new(defaults())
            .resolve_all(session.as_mut())
            .await
            .unwrap();

        let a = TenantId::new("org-a").unwrap();
        let b = TenantId::new("org-b").unwrap();
        assert!(set.policy_for(&a).is_custom());
        assert_eq!(set.policy_for(&b), StalenessPolicy::Default {
            deltas: defaults()
        });
        assert_eq!(set.deltas_for(&a).conventional.cull_after.num_seconds(), 30);
    }

    #[tokio::test]
    async fn non_monotonic_record_rejects_the_whole_set() {
        let store = MemoryHostStore::default();
        store.put_policy_record(record("org-a", 10, 20, 30)).await;
        store.put_policy_record(record("org-b", 50, 20, 30)).await;

        let mut session = store.open_session().await.unwrap();
        let err = PolicyResolver::new(defaults())
            .resolve_all(session.as_mut())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PolicyLoadError::Invalid { ref tenant_id, .. } if tenant_id == "org-b"
        ));
    }

    #[tokio::test]
    async fn out_of_range_record_is_invalid_not_a_panic() {
        let store = MemoryHostStore::default();
        store
            .put_policy_record(record("org-a", 10, 20, i64::MAX / 1_000 + 1))
            .await;

        let mut session = store.open_session().await.unwrap();
        let err = PolicyResolver::new(defaults())
            .resolve_all(session.as_mut())
            .await
            .unwrap_err();
        match err {
            PolicyLoadError::Invalid { tenant_id, source } => {
                assert_eq!(tenant_id, "org-a");
                assert!(matches!(source, ModelError::InvalidThresholds(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_storage_is_a_load_error() {
        let store = MemoryHostStore::default();
        store.fail_policy_loads(true).await;

        let mut session = store.open_session().await.unwrap();
        let err = PolicyResolver::new(defaults())
            .resolve_all(session.as_mut())
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyLoadError::Unreachable(_)));
    }
}
