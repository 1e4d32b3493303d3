//! Maintenance jobs built on the scan-and-emit pipeline.

mod orchestrator;
mod shutdown;
pub mod transform;

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use staleward_model::{HostKind, StalenessState};

use crate::bus::{EmitOutcome, EventKind};
use crate::staleness::HostPredicate;

pub use orchestrator::{JobOrchestrator, RunPhase};
pub use shutdown::ShutdownSignal;
pub use transform::HostTransform;

/// Reporters whose per-reporter staleness entries the refresh job repairs
/// when no list is configured.
pub const DEFAULT_REFRESH_REPORTERS: [&str; 7] = [
    "cloud-connector",
    "puptoo",
    "rhsm-conduit",
    "rhsm-system-profile-bridge",
    "yuptoo",
    "discovery",
    "satellite",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    StaleHostNotification,
    HostSynchronizer,
    ReporterStalenessRefresh,
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::StaleHostNotification => "stale-host-notification",
            JobKind::HostSynchronizer => "host-synchronizer",
            JobKind::ReporterStalenessRefresh => "reporter-staleness-refresh",
        }
    }

    /// Job name reported to the metrics push gateway.
    pub fn metrics_job(&self) -> &'static str {
        match self {
            JobKind::StaleHostNotification => {
                "inventory-stale-host-notification"
            }
            JobKind::HostSynchronizer => "inventory-host-synchronizer",
            JobKind::ReporterStalenessRefresh => {
                "inventory-update-edge-hosts-prs"
            }
        }
    }

    pub fn default_targets(&self) -> BTreeSet<StalenessState> {
        match self {
            JobKind::StaleHostNotification => [StalenessState::Stale].into(),
            JobKind::HostSynchronizer => [
                StalenessState::Fresh,
                StalenessState::Stale,
                StalenessState::StaleWarning,
            ]
            .into(),
            JobKind::ReporterStalenessRefresh => {
                StalenessState::ALL.into_iter().collect()
            }
        }
    }

    pub fn event_kind(&self) -> EventKind {
        match self {
            JobKind::StaleHostNotification => EventKind::BecameStaleNotification,
            JobKind::HostSynchronizer | JobKind::ReporterStalenessRefresh => {
                EventKind::LifecycleUpdate
            }
        }
    }

    pub fn transform(&self) -> Option<HostTransform> {
        match self {
            JobKind::StaleHostNotification => None,
            JobKind::HostSynchronizer => Some(HostTransform::SynchronizeHost),
            JobKind::ReporterStalenessRefresh => {
                Some(HostTransform::RefreshReporterStaleness)
            }
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A job together with its selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub kind: JobKind,
    pub targets: BTreeSet<StalenessState>,
    pub refresh_reporters: Vec<String>,
}

impl JobSpec {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            targets: kind.default_targets(),
            refresh_reporters: DEFAULT_REFRESH_REPORTERS
                .iter()
                .map(|r| r.to_string())
                .collect(),
        }
    }

    pub fn with_targets(mut self, targets: BTreeSet<StalenessState>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_refresh_reporters(mut self, reporters: Vec<String>) -> Self {
        if !reporters.is_empty() {
            self.refresh_reporters = reporters;
        }
        self
    }

    /// Job-specific filter ANDed into the staleness predicate.
    pub fn extra_predicate(&self) -> Option<HostPredicate> {
        match self.kind {
            JobKind::ReporterStalenessRefresh => Some(HostPredicate::all([
                HostPredicate::KindIs(HostKind::Immutable),
                HostPredicate::MissingReporterStaleness(
                    self.refresh_reporters.clone(),
                ),
            ])),
            _ => None,
        }
    }
}

/// Counts for one run. For a run that reached the end of the scan,
/// `delivered + failed + skipped == scanned`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub scanned: u64,
    pub delivered: u64,
    pub failed: u64,
    pub skipped: u64,
    pub chunks: u64,
    /// Stopped early on a shutdown request.
    pub interrupted: bool,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &EmitOutcome) {
        match outcome {
            EmitOutcome::Delivered => self.delivered += 1,
            EmitOutcome::HostFailed(_) => self.failed += 1,
            EmitOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_job_restricts_to_immutable_hosts_missing_stamps() {
        let spec = JobSpec::new(JobKind::ReporterStalenessRefresh)
            .with_refresh_reporters(vec!["puptoo".into()]);
        assert_eq!(
            spec.extra_predicate(),
            Some(HostPredicate::And(vec![
                HostPredicate::KindIs(HostKind::Immutable),
                HostPredicate::MissingReporterStaleness(vec!["puptoo".into()]),
            ]))
        );
        assert_eq!(spec.targets.len(), 4);
    }

    #[test]
    fn empty_reporter_override_keeps_defaults() {
        let spec = JobSpec::new(JobKind::ReporterStalenessRefresh)
            .with_refresh_reporters(Vec::new());
        assert_eq!(spec.refresh_reporters.len(), DEFAULT_REFRESH_REPORTERS.len());
    }

    #[test]
    fn notification_job_targets_stale_only() {
        let spec = JobSpec::new(JobKind::StaleHostNotification);
        assert_eq!(spec.targets, [StalenessState::Stale].into());
        assert_eq!(spec.kind.event_kind(), EventKind::BecameStaleNotification);
        assert!(spec.kind.transform().is_none());
        assert!(spec.extra_predicate().is_none());
    }
}
