use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use staleward_model::{
    HostKind, PolicyDeltas, StalenessDeltas, StalenessState, TenantId,
};
use tracing::debug;

use crate::error::PredicateBuildError;
use crate::policy::PolicySet;

use super::predicate::{CheckInWindow, HostPredicate};

/// The part of a predicate governed by one set of thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyBranch {
    /// Custom-policy tenants sharing these thresholds, `None` for the
    /// default branch.
    pub tenants: Option<BTreeSet<TenantId>>,
    pub predicate: HostPredicate,
}

/// Turns a set of target states into a host predicate.
///
/// Custom tenants with identical thresholds share one branch restricted to
/// those tenants. The default branch covers every tenant outside the custom
/// set, so a host is matched by at most one branch and evaluated under
/// exactly one policy.
#[derive(Debug, Clone)]
pub struct PredicateBuilder {
    now: DateTime<Utc>,
    scope: Option<TenantId>,
    extra: Option<HostPredicate>,
}

impl PredicateBuilder {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            scope: None,
            extra: None,
        }
    }

    /// Limit the predicate to a single tenant.
    pub fn scoped_to(mut self, tenant_id: TenantId) -> Self {
        self.scope = Some(tenant_id);
        self
    }

    /// AND an additional job-specific filter into the result.
    pub fn restrict(mut self, extra: HostPredicate) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn build(
        &self,
        targets: &BTreeSet<StalenessState>,
        policies: &PolicySet,
    ) -> Result<HostPredicate, PredicateBuildError> {
        if targets.is_empty() {
            return Ok(HostPredicate::Never);
        }
        let branches = self.branches(targets, policies)?;
        debug!(
            branches = branches.len(),
            targets = ?targets,
            "built staleness predicate"
        );
        let combined =
            HostPredicate::any(branches.into_iter().map(|b| b.predicate));
        Ok(HostPredicate::all([
            combined,
            self.extra.clone().unwrap_or(HostPredicate::Always),
        ]))
    }

    /// One branch per distinct custom threshold set in scope, then the
    /// default branch if any tenant in scope falls back to it.
    pub fn branches(
        &self,
        targets: &BTreeSet<StalenessState>,
        policies: &PolicySet,
    ) -> Result<Vec<PolicyBranch>, PredicateBuildError> {
        let mut groups: Vec<(&PolicyDeltas, BTreeSet<TenantId>)> =
            Vec::new();
        for (tenant_id, deltas) in policies.custom() {
            if self.scope.as_ref().is_some_and(|scope| scope != tenant_id) {
                continue;
            }
            match groups.iter_mut().find(|(shared, _)| *shared == deltas) {
                Some((_, tenants)) => {
                    tenants.insert(tenant_id.clone());
                }
                None => {
                    groups.push((deltas, BTreeSet::from([tenant_id.clone()])));
                }
            }
        }

        let mut branches = Vec::new();
        for (deltas, tenants) in groups {
            let windows = self.kind_windows(targets, deltas).map_err(|err| {
                let names: Vec<&str> =
                    tenants.iter().map(TenantId::as_str).collect();
                with_scope(err, &names.join(","))
            })?;
            let tenant_filter = match (tenants.len(), tenants.first()) {
                (1, Some(only)) => HostPredicate::TenantIs(only.clone()),
                _ => HostPredicate::TenantIn(tenants.clone()),
            };
            branches.push(PolicyBranch {
                tenants: Some(tenants),
                predicate: HostPredicate::all([tenant_filter, windows]),
            });
        }

        let tenant_filter = match &self.scope {
            Some(scope) if policies.is_custom(scope) => None,
            Some(scope) => Some(HostPredicate::TenantIs(scope.clone())),
            None if policies.custom().is_empty() => Some(HostPredicate::Always),
            None => Some(HostPredicate::TenantNotIn(
                policies.custom().keys().cloned().collect(),
            )),
        };
        if let Some(tenant_filter) = tenant_filter {
            let windows = self
                .kind_windows(targets, policies.default_deltas())
                .map_err(|err| with_scope(err, "default"))?;
            branches.push(PolicyBranch {
                tenants: None,
                predicate: HostPredicate::all([tenant_filter, windows]),
            });
        }

        Ok(branches)
    }

    fn kind_windows(
        &self,
        targets: &BTreeSet<StalenessState>,
        deltas: &PolicyDeltas,
    ) -> Result<HostPredicate, PredicateBuildError> {
        let mut per_kind = Vec::with_capacity(HostKind::ALL.len());
        for kind in HostKind::ALL {
            let windows = self.windows(targets, deltas.for_kind(kind))?;
            per_kind.push(HostPredicate::all([
                HostPredicate::KindIs(kind),
                windows,
            ]));
        }
        Ok(HostPredicate::any(per_kind))
    }

    /// Check-in windows for the target states under one delta set, with
    /// adjacent states merged into a single window.
    fn windows(
        &self,
        targets: &BTreeSet<StalenessState>,
        deltas: &StalenessDeltas,
    ) -> Result<HostPredicate, PredicateBuildError> {
        deltas
            .validate()
            .map_err(|source| PredicateBuildError::NonMonotonic {
                scope: String::new(),
                source,
            })?;

        let states = StalenessState::ALL;
        let mut windows = Vec::new();
        let mut index = 0;
        while index < states.len() {
            if !targets.contains(&states[index]) {
                index += 1;
                continue;
            }
            let first = states[index];
            while index + 1 < states.len()
                && targets.contains(&states[index + 1])
            {
                index += 1;
            }
            let next = states.get(index + 1).copied();
            index += 1;

            let not_after = match deltas.threshold(first) {
                Some(delta) => Some(self.offset(first, delta)?),
                None => None,
            };
            let after = match next {
                Some(state) => match deltas.threshold(state) {
                    Some(delta) => Some(self.offset(state, delta)?),
                    None => None,
                },
                None => None,
            };
            let window = CheckInWindow { after, not_after };
            windows.push(if window.is_unbounded() {
                HostPredicate::Always
            } else {
                HostPredicate::CheckedIn(window)
            });
        }
        Ok(HostPredicate::any(windows))
    }

    fn offset(
        &self,
        state: StalenessState,
        delta: TimeDelta,
    ) -> Result<DateTime<Utc>, PredicateBuildError> {
        self.now.checked_sub_signed(delta).ok_or(
            PredicateBuildError::WindowOutOfRange {
                state,
                seconds: delta.num_seconds(),
            },
        )
    }
}

fn with_scope(err: PredicateBuildError, scope: &str) -> PredicateBuildError {
    match err {
        PredicateBuildError::NonMonotonic { source, .. } => {
            PredicateBuildError::NonMonotonic {
                scope: scope.to_string(),
                source,
            }
        }
        other => other,
    }
}
