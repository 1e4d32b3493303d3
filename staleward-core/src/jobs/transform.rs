//! Named pre-emit transformations. The orchestrator applies one right
//! before writing the host back and publishing its event.

use staleward_model::{
    HostRecord, ModelError, ReporterStaleness, StalenessDeltas,
};

use crate::storage::HostUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostTransform {
    SynchronizeHost,
    RefreshReporterStaleness,
}

impl HostTransform {
    pub fn name(&self) -> &'static str {
        match self {
            HostTransform::SynchronizeHost => "synchronize_host",
            HostTransform::RefreshReporterStaleness => {
                "refresh_reporter_staleness"
            }
        }
    }

    pub fn apply(
        &self,
        host: &mut HostRecord,
        deltas: &StalenessDeltas,
    ) -> Result<HostUpdate, ModelError> {
        match self {
            HostTransform::SynchronizeHost => synchronize_host(host, deltas),
            HostTransform::RefreshReporterStaleness => {
                refresh_reporter_staleness(host, deltas)
            }
        }
    }
}

/// Brings the stored row in line with what the event will carry: the group
/// list is written back as an explicit (possibly empty) list, the primary
/// reporter has a staleness entry, and every entry's timestamps are
/// recomputed under the current policy.
pub fn synchronize_host(
    host: &mut HostRecord,
    deltas: &StalenessDeltas,
) -> Result<HostUpdate, ModelError> {
    let last_check_in = host.last_check_in;
    host.per_reporter_staleness
        .entry(host.reporter.clone())
        .or_insert_with(|| ReporterStaleness::checked_in_at(last_check_in));
    recompute_all(host, deltas)?;
    Ok(update_for(host))
}

/// Fills in derived timestamps for every reporter entry, including those
/// written before culled timestamps were tracked.
pub fn refresh_reporter_staleness(
    host: &mut HostRecord,
    deltas: &StalenessDeltas,
) -> Result<HostUpdate, ModelError> {
    recompute_all(host, deltas)?;
    Ok(update_for(host))
}

/// All-or-nothing: entries are only touched once every one of them has
/// representable timestamps.
fn recompute_all(
    host: &mut HostRecord,
    deltas: &StalenessDeltas,
) -> Result<(), ModelError> {
    let stamps = host
        .per_reporter_staleness
        .values()
        .map(|entry| deltas.timestamps(entry.last_check_in))
        .collect::<Result<Vec<_>, _>>()?;
    for (entry, stamps) in host.per_reporter_staleness.values_mut().zip(stamps)
    {
        entry.stale_timestamp = Some(stamps.stale_timestamp);
        entry.stale_warning_timestamp = Some(stamps.stale_warning_timestamp);
        entry.culled_timestamp = Some(stamps.culled_timestamp);
    }
    Ok(())
}

fn update_for(host: &HostRecord) -> HostUpdate {
    HostUpdate {
        id: host.id,
        tenant_id: host.tenant_id.clone(),
        groups: host.groups.clone(),
        per_reporter_staleness: host.per_reporter_staleness.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use staleward_model::{HostId, TenantId};

    fn host() -> HostRecord {
        HostRecord::new(
            HostId::new(),
            TenantId::new("org-a").unwrap(),
            DateTime::from_timestamp(1_000, 0).unwrap(),
            "puptoo",
        )
    }

    #[test]
    fn synchronize_restores_primary_reporter_entry() {
        let mut host = host();
        host.per_reporter_staleness.clear();
        let deltas = StalenessDeltas::from_seconds(10, 20, 30).unwrap();

        let update = synchronize_host(&mut host, &deltas).unwrap();
        let entry = update.per_reporter_staleness.get("puptoo").unwrap();
        assert_eq!(entry.culled_timestamp.unwrap().timestamp(), 1_030);
        assert!(update.groups.is_empty());
        assert_eq!(update.per_reporter_staleness, host.per_reporter_staleness);
    }

    #[test]
    fn refresh_fills_every_reporter() {
        let mut host = host();
        host.per_reporter_staleness.insert(
            "yuptoo".into(),
            ReporterStaleness::checked_in_at(
                DateTime::from_timestamp(2_000, 0).unwrap(),
            ),
        );
        let deltas = StalenessDeltas::from_seconds(10, 20, 30).unwrap();

        let update = refresh_reporter_staleness(&mut host, &deltas).unwrap();
        assert!(
            update
                .per_reporter_staleness
                .values()
                .all(|entry| entry.culled_timestamp.is_some())
        );
        assert_eq!(
            update.per_reporter_staleness["yuptoo"]
                .stale_timestamp
                .unwrap()
                .timestamp(),
            2_010
        );
    }
}
