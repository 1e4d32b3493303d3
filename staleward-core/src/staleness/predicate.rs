//! Storage-agnostic host filter expressions.
//!
//! A [`HostPredicate`] is what the engine hands to a storage adapter. The
//! Postgres adapter compiles it to a `WHERE` clause; the in-memory adapter
//! (and the orchestrator's sanity checks) evaluate it with
//! [`HostPredicate::matches`]. Both must agree, so the evaluator is the
//! reference semantics for every variant.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use staleward_model::{HostKind, HostRecord, TenantId};

/// Half-open interval over `last_check_in`: `after < t <= not_after`.
/// A missing bound is unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckInWindow {
    pub after: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

impl CheckInWindow {
    pub fn contains(&self, last_check_in: DateTime<Utc>) -> bool {
        let lower = self.after.is_none_or(|after| last_check_in > after);
        let upper = self.not_after.is_none_or(|bound| last_check_in <= bound);
        lower && upper
    }

    pub fn is_unbounded(&self) -> bool {
        self.after.is_none() && self.not_after.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPredicate {
    Never,
    Always,
    TenantIs(TenantId),
    TenantIn(BTreeSet<TenantId>),
    TenantNotIn(BTreeSet<TenantId>),
    KindIs(HostKind),
    CheckedIn(CheckInWindow),
    /// At least one of the named reporters has a per-reporter staleness
    /// entry whose `culled_timestamp` is absent or null.
    MissingReporterStaleness(Vec<String>),
    And(Vec<HostPredicate>),
    Or(Vec<HostPredicate>),
    Not(Box<HostPredicate>),
}

impl HostPredicate {
    /// Conjunction that drops `Always` terms and collapses on `Never`.
    pub fn all(terms: impl IntoIterator<Item = HostPredicate>) -> Self {
        let mut kept = Vec::new();
        for term in terms {
            match term {
                HostPredicate::Always => {}
                HostPredicate::Never => return HostPredicate::Never,
                HostPredicate::And(inner) => kept.extend(inner),
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => HostPredicate::Always,
            1 => kept.remove(0),
            _ => HostPredicate::And(kept),
        }
    }

    /// Disjunction that drops `Never` terms and collapses on `Always`.
    pub fn any(terms: impl IntoIterator<Item = HostPredicate>) -> Self {
        let mut kept = Vec::new();
        for term in terms {
            match term {
                HostPredicate::Never => {}
                HostPredicate::Always => return HostPredicate::Always,
                HostPredicate::Or(inner) => kept.extend(inner),
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => HostPredicate::Never,
            1 => kept.remove(0),
            _ => HostPredicate::Or(kept),
        }
    }

    pub fn negate(term: HostPredicate) -> Self {
        match term {
            HostPredicate::Never => HostPredicate::Always,
            HostPredicate::Always => HostPredicate::Never,
            HostPredicate::Not(inner) => *inner,
            other => HostPredicate::Not(Box::new(other)),
        }
    }

    pub fn is_never(&self) -> bool {
        matches!(self, HostPredicate::Never)
    }

    pub fn matches(&self, host: &HostRecord) -> bool {
        match self {
            HostPredicate::Never => false,
            HostPredicate::Always => true,
            HostPredicate::TenantIs(tenant) => &host.tenant_id == tenant,
            HostPredicate::TenantIn(set) => set.contains(&host.tenant_id),
            HostPredicate::TenantNotIn(set) => !set.contains(&host.tenant_id),
            HostPredicate::KindIs(kind) => host.kind == *kind,
            HostPredicate::CheckedIn(window) => {
                window.contains(host.last_check_in)
            }
            HostPredicate::MissingReporterStaleness(reporters) => {
                reporters.iter().any(|reporter| {
                    host.per_reporter_staleness
                        .get(reporter)
                        .is_some_and(|entry| entry.culled_timestamp.is_none())
                })
            }
            HostPredicate::And(terms) => terms.iter().all(|t| t.matches(host)),
            HostPredicate::Or(terms) => terms.iter().any(|t| t.matches(host)),
            HostPredicate::Not(inner) => !inner.matches(host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use staleward_model::{HostId, ReporterStaleness};

    fn host(tenant: &str, secs: i64) -> HostRecord {
        HostRecord::new(
            HostId::new(),
            TenantId::new(tenant).unwrap(),
            DateTime::from_timestamp(secs, 0).unwrap(),
            "puptoo",
        )
    }

    #[test]
    fn window_is_exclusive_below_inclusive_above() {
        let window = CheckInWindow {
            after: DateTime::from_timestamp(100, 0),
            not_after: DateTime::from_timestamp(200, 0),
        };
        assert!(!window.contains(DateTime::from_timestamp(100, 0).unwrap()));
        assert!(window.contains(DateTime::from_timestamp(101, 0).unwrap()));
        assert!(window.contains(DateTime::from_timestamp(200, 0).unwrap()));
        assert!(!window.contains(DateTime::from_timestamp(201, 0).unwrap()));
    }

    #[test]
    fn combinators_simplify_constants() {
        let tenant = HostPredicate::TenantIs(TenantId::new("a").unwrap());
        assert_eq!(
            HostPredicate::all([HostPredicate::Always, tenant.clone()]),
            tenant
        );
        assert_eq!(
            HostPredicate::all([HostPredicate::Never, tenant.clone()]),
            HostPredicate::Never
        );
        assert_eq!(HostPredicate::any(Vec::new()), HostPredicate::Never);
        assert_eq!(
            HostPredicate::negate(HostPredicate::negate(tenant.clone())),
            tenant
        );
    }

    #[test]
    fn missing_reporter_staleness_ignores_absent_reporters() {
        let mut record = host("a", 1_000);
        let predicate = HostPredicate::MissingReporterStaleness(vec![
            "puptoo".into(),
            "yuptoo".into(),
        ]);
        assert!(predicate.matches(&record));

        let entry = record.per_reporter_staleness.get_mut("puptoo").unwrap();
        entry.culled_timestamp = DateTime::from_timestamp(9_000, 0);
        assert!(!predicate.matches(&record));

        record.per_reporter_staleness.insert(
            "yuptoo".into(),
            ReporterStaleness::checked_in_at(record.last_check_in),
        );
        assert!(predicate.matches(&record));
    }

    #[test]
    fn null_culled_timestamp_counts_as_missing() {
        let mut record = host("a", 1_000);
        let raw = serde_json::json!({
            "last_check_in": "2024-01-01T00:00:00Z",
            "culled_timestamp": null,
        });
        let entry: ReporterStaleness = serde_json::from_value(raw).unwrap();
        record.per_reporter_staleness.insert("puptoo".into(), entry);

        let predicate =
            HostPredicate::MissingReporterStaleness(vec!["puptoo".into()]);
        assert!(predicate.matches(&record));
    }

    #[test]
    fn tenant_exclusion_matches_others() {
        let set: BTreeSet<_> = [TenantId::new("a").unwrap()].into();
        let predicate = HostPredicate::TenantNotIn(set);
        assert!(!predicate.matches(&host("a", 1)));
        assert!(predicate.matches(&host("b", 1)));
    }
}
