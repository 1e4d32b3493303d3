use chrono::{DateTime, Utc};
use staleward_model::{
    HostKind, HostRecord, StalenessDeltas, StalenessPolicy, StalenessState,
};

/// Highest state whose threshold `now - last_check_in` has reached.
///
/// A check-in in the future (negative elapsed time, e.g. clock skew between
/// reporters) is `Fresh`.
pub fn classify(
    last_check_in: DateTime<Utc>,
    deltas: &StalenessDeltas,
    now: DateTime<Utc>,
) -> StalenessState {
    let elapsed = now.signed_duration_since(last_check_in);
    if elapsed >= deltas.cull_after {
        StalenessState::Culled
    } else if elapsed >= deltas.stale_warning_after {
        StalenessState::StaleWarning
    } else if elapsed >= deltas.stale_after {
        StalenessState::Stale
    } else {
        StalenessState::Fresh
    }
}

/// Classification that first picks the delta set for the host kind.
pub trait ClassifyPolicy {
    fn classify(
        &self,
        kind: HostKind,
        last_check_in: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StalenessState;

    fn classify_host(
        &self,
        host: &HostRecord,
        now: DateTime<Utc>,
    ) -> StalenessState {
        self.classify(host.kind, host.last_check_in, now)
    }
}

impl ClassifyPolicy for StalenessPolicy {
    fn classify(
        &self,
        kind: HostKind,
        last_check_in: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StalenessState {
        classify(last_check_in, self.deltas_for(kind), now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use proptest::prelude::*;
    use staleward_model::PolicyDeltas;

    fn deltas() -> StalenessDeltas {
        StalenessDeltas::from_seconds(100, 200, 300).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn thresholds_are_inclusive() {
        let now = at(10_000);
        let d = deltas();
        assert_eq!(classify(at(10_000 - 99), &d, now), StalenessState::Fresh);
        assert_eq!(classify(at(10_000 - 100), &d, now), StalenessState::Stale);
        assert_eq!(
            classify(at(10_000 - 200), &d, now),
            StalenessState::StaleWarning
        );
        assert_eq!(
            classify(at(10_000 - 300), &d, now),
            StalenessState::Culled
        );
    }

    #[test]
    fn future_check_in_is_fresh() {
        let now = at(10_000);
        assert_eq!(
            classify(now + TimeDelta::hours(3), &deltas(), now),
            StalenessState::Fresh
        );
    }

    #[test]
    fn policy_uses_delta_set_of_host_kind() {
        let policy = StalenessPolicy::Default {
            deltas: PolicyDeltas::new(
                deltas(),
                StalenessDeltas::from_seconds(1_000, 2_000, 3_000).unwrap(),
            )
            .unwrap(),
        };
        let now = at(10_000);
        let check_in = at(10_000 - 500);
        assert_eq!(
            policy.classify(HostKind::Conventional, check_in, now),
            StalenessState::Culled
        );
        assert_eq!(
            policy.classify(HostKind::Immutable, check_in, now),
            StalenessState::Fresh
        );
    }

    proptest! {
        #[test]
        fn classification_is_monotonic_in_elapsed_time(
            a in 0i64..1_000,
            b in 0i64..1_000,
        ) {
            let now = at(50_000);
            let d = deltas();
            let (older, newer) = if a >= b { (a, b) } else { (b, a) };
            let older_state = classify(at(50_000 - older), &d, now);
            let newer_state = classify(at(50_000 - newer), &d, now);
            prop_assert!(older_state >= newer_state);
        }
    }
}
