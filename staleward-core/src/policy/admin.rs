//! Tenant policy administration: read, replace and reset a custom policy.

use staleward_model::{PolicyDeltas, StalenessPolicy, TenantId};
use tracing::info;

use crate::error::{PolicyAdminError, PolicyLoadError, StorageError};
use crate::storage::{HostSession, PolicyRecord};

use super::validate_record;

/// The custom policy for `tenant_id`, or the default when it has none.
pub async fn effective_policy(
    session: &mut dyn HostSession,
    tenant_id: &TenantId,
    defaults: &PolicyDeltas,
) -> Result<StalenessPolicy, PolicyAdminError> {
    let Some(record) = session.load_policy(tenant_id).await? else {
        return Ok(StalenessPolicy::Default { deltas: *defaults });
    };
    let (tenant_id, deltas) = validate_record(record).map_err(|err| match err {
        PolicyLoadError::Invalid { source, .. } => {
            PolicyAdminError::Invalid(source)
        }
        PolicyLoadError::Unreachable(source) => {
            PolicyAdminError::Storage(source)
        }
        PolicyLoadError::Duplicate(tenant) => {
            PolicyAdminError::Storage(StorageError::InvalidRecord(format!(
                "duplicate policy for tenant {tenant}"
            )))
        }
    })?;
    Ok(StalenessPolicy::Custom { tenant_id, deltas })
}

/// Validates and stores a custom policy, replacing any existing one.
pub async fn set_policy(
    session: &mut dyn HostSession,
    tenant_id: &TenantId,
    deltas: PolicyDeltas,
) -> Result<StalenessPolicy, PolicyAdminError> {
    deltas.validate()?;
    let record = PolicyRecord::from_deltas(tenant_id, &deltas);
    session.upsert_policy(&record).await?;
    info!(tenant_id = %tenant_id, "custom staleness policy stored");
    Ok(StalenessPolicy::Custom {
        tenant_id: tenant_id.clone(),
        deltas,
    })
}

/// Removes the custom policy. Returns whether one existed; either way the
/// tenant is on the default afterwards.
pub async fn reset_policy(
    session: &mut dyn HostSession,
    tenant_id: &TenantId,
) -> Result<bool, PolicyAdminError> {
    let removed = session.delete_policy(tenant_id).await?;
    info!(tenant_id = %tenant_id, removed, "custom staleness policy reset");
    Ok(removed)
}
