//! Staleness vocabulary: states, host kinds, thresholds and policies.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::ids::TenantId;

/// Lifecycle stage of a host, derived from the time since its last check-in.
///
/// Variants are declared in lifecycle order so the derived `Ord` is the
/// staleness order: `Fresh < Stale < StaleWarning < Culled`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StalenessState {
    Fresh,
    Stale,
    StaleWarning,
    Culled,
}

impl StalenessState {
    pub const ALL: [StalenessState; 4] = [
        StalenessState::Fresh,
        StalenessState::Stale,
        StalenessState::StaleWarning,
        StalenessState::Culled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StalenessState::Fresh => "fresh",
            StalenessState::Stale => "stale",
            StalenessState::StaleWarning => "stale_warning",
            StalenessState::Culled => "culled",
        }
    }
}

impl fmt::Display for StalenessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StalenessState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fresh" => Ok(StalenessState::Fresh),
            "stale" => Ok(StalenessState::Stale),
            "stale_warning" | "stale-warning" => {
                Ok(StalenessState::StaleWarning)
            }
            "culled" => Ok(StalenessState::Culled),
            other => Err(ModelError::UnknownVariant {
                kind: "staleness state",
                value: other.to_string(),
            }),
        }
    }
}

/// Conventional hosts check in regularly; immutable (image-based, edge)
/// hosts are updated rarely and get longer thresholds.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    #[default]
    Conventional,
    Immutable,
}

impl HostKind {
    pub const ALL: [HostKind; 2] = [HostKind::Conventional, HostKind::Immutable];

    pub fn as_str(&self) -> &'static str {
        match self {
            HostKind::Conventional => "conventional",
            HostKind::Immutable => "immutable",
        }
    }
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three ordered thresholds of a staleness policy, measured from the
/// host's last check-in.
///
/// Invariant (checked by [`StalenessDeltas::validate`]):
/// `0 <= stale_after < stale_warning_after < cull_after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessDeltas {
    #[serde(with = "seconds")]
    pub stale_after: TimeDelta,
    #[serde(with = "seconds")]
    pub stale_warning_after: TimeDelta,
    #[serde(with = "seconds")]
    pub cull_after: TimeDelta,
}

impl StalenessDeltas {
    pub fn new(
        stale_after: TimeDelta,
        stale_warning_after: TimeDelta,
        cull_after: TimeDelta,
    ) -> Result<Self> {
        let deltas = Self {
            stale_after,
            stale_warning_after,
            cull_after,
        };
        deltas.validate()?;
        Ok(deltas)
    }

    pub fn from_seconds(
        stale_after: i64,
        stale_warning_after: i64,
        cull_after: i64,
    ) -> Result<Self> {
        Self::new(
            checked_seconds("stale_after", stale_after)?,
            checked_seconds("stale_warning_after", stale_warning_after)?,
            checked_seconds("cull_after", cull_after)?,
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.stale_after < TimeDelta::zero() {
            return Err(ModelError::InvalidThresholds(format!(
                "stale_after must not be negative (got {}s)",
                self.stale_after.num_seconds()
            )));
        }
        if self.stale_after >= self.stale_warning_after {
            return Err(ModelError::InvalidThresholds(format!(
                "stale_after ({}s) must be less than stale_warning_after ({}s)",
                self.stale_after.num_seconds(),
                self.stale_warning_after.num_seconds()
            )));
        }
        if self.stale_warning_after >= self.cull_after {
            return Err(ModelError::InvalidThresholds(format!(
                "stale_warning_after ({}s) must be less than cull_after ({}s)",
                self.stale_warning_after.num_seconds(),
                self.cull_after.num_seconds()
            )));
        }
        Ok(())
    }

    /// Threshold a host must cross to enter `state`. `Fresh` has none.
    pub fn threshold(&self, state: StalenessState) -> Option<TimeDelta> {
        match state {
            StalenessState::Fresh => None,
            StalenessState::Stale => Some(self.stale_after),
            StalenessState::StaleWarning => Some(self.stale_warning_after),
            StalenessState::Culled => Some(self.cull_after),
        }
    }

    /// Absolute timestamps at which a host that checked in at
    /// `last_check_in` changes state.
    pub fn timestamps(
        &self,
        last_check_in: DateTime<Utc>,
    ) -> Result<StalenessTimestamps> {
        let offset = |delta: TimeDelta| {
            last_check_in.checked_add_signed(delta).ok_or_else(|| {
                ModelError::TimestampOutOfRange(format!(
                    "{last_check_in} + {}s",
                    delta.num_seconds()
                ))
            })
        };
        Ok(StalenessTimestamps {
            stale_timestamp: offset(self.stale_after)?,
            stale_warning_timestamp: offset(self.stale_warning_after)?,
            culled_timestamp: offset(self.cull_after)?,
        })
    }
}

fn checked_seconds(field: &str, seconds: i64) -> Result<TimeDelta> {
    TimeDelta::try_seconds(seconds).ok_or_else(|| {
        ModelError::InvalidThresholds(format!(
            "{field} out of range (got {seconds}s)"
        ))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessTimestamps {
    pub stale_timestamp: DateTime<Utc>,
    pub stale_warning_timestamp: DateTime<Utc>,
    pub culled_timestamp: DateTime<Utc>,
}

/// One delta set per host kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDeltas {
    pub conventional: StalenessDeltas,
    pub immutable: StalenessDeltas,
}

impl PolicyDeltas {
    pub fn new(
        conventional: StalenessDeltas,
        immutable: StalenessDeltas,
    ) -> Result<Self> {
        let deltas = Self {
            conventional,
            immutable,
        };
        deltas.validate()?;
        Ok(deltas)
    }

    pub fn for_kind(&self, kind: HostKind) -> &StalenessDeltas {
        match kind {
            HostKind::Conventional => &self.conventional,
            HostKind::Immutable => &self.immutable,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.conventional.validate().map_err(|err| match err {
            ModelError::InvalidThresholds(msg) => {
                ModelError::InvalidThresholds(format!("conventional: {msg}"))
            }
            other => other,
        })?;
        self.immutable.validate().map_err(|err| match err {
            ModelError::InvalidThresholds(msg) => {
                ModelError::InvalidThresholds(format!("immutable: {msg}"))
            }
            other => other,
        })
    }
}

/// Staleness policy in force for a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum StalenessPolicy {
    /// Tenant-specific thresholds overriding the system default.
    Custom {
        tenant_id: TenantId,
        deltas: PolicyDeltas,
    },
    /// System default thresholds from process configuration.
    Default { deltas: PolicyDeltas },
}

impl StalenessPolicy {
    pub fn deltas(&self) -> &PolicyDeltas {
        match self {
            StalenessPolicy::Custom { deltas, .. } => deltas,
            StalenessPolicy::Default { deltas } => deltas,
        }
    }

    pub fn deltas_for(&self, kind: HostKind) -> &StalenessDeltas {
        self.deltas().for_kind(kind)
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, StalenessPolicy::Custom { .. })
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        match self {
            StalenessPolicy::Custom { tenant_id, .. } => Some(tenant_id),
            StalenessPolicy::Default { .. } => None,
        }
    }
}

/// Durations travel as whole seconds, the unit the policy table uses.
mod seconds {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &TimeDelta,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<TimeDelta, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        TimeDelta::try_seconds(raw).ok_or_else(|| {
            serde::de::Error::custom(format!("duration out of range: {raw}s"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_ordered_by_lifecycle() {
        assert!(StalenessState::Fresh < StalenessState::Stale);
        assert!(StalenessState::Stale < StalenessState::StaleWarning);
        assert!(StalenessState::StaleWarning < StalenessState::Culled);
    }

    #[test]
    fn state_parses_both_spellings() {
        assert_eq!(
            "stale-warning".parse::<StalenessState>().unwrap(),
            StalenessState::StaleWarning
        );
        assert_eq!(
            "STALE_WARNING".parse::<StalenessState>().unwrap(),
            StalenessState::StaleWarning
        );
        assert!("gone".parse::<StalenessState>().is_err());
    }

    #[test]
    fn deltas_must_be_strictly_increasing() {
        assert!(StalenessDeltas::from_seconds(10, 20, 30).is_ok());
        assert!(StalenessDeltas::from_seconds(20, 20, 30).is_err());
        assert!(StalenessDeltas::from_seconds(10, 40, 30).is_err());
        assert!(StalenessDeltas::from_seconds(10, 30, 30).is_err());
        assert!(StalenessDeltas::from_seconds(-1, 20, 30).is_err());
        assert!(StalenessDeltas::from_seconds(0, 20, 30).is_ok());
    }

    #[test]
    fn policy_deltas_name_the_failing_kind() {
        let good = StalenessDeltas::from_seconds(1, 2, 3).unwrap();
        let bad = StalenessDeltas {
            stale_after: TimeDelta::seconds(5),
            stale_warning_after: TimeDelta::seconds(2),
            cull_after: TimeDelta::seconds(9),
        };
        let err = PolicyDeltas::new(good, bad).unwrap_err();
        assert!(err.to_string().contains("immutable"));
    }

    #[test]
    fn deltas_serialize_as_seconds() {
        let deltas = StalenessDeltas::from_seconds(60, 120, 180).unwrap();
        let json = serde_json::to_value(deltas).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "stale_after": 60,
                "stale_warning_after": 120,
                "cull_after": 180
            })
        );
    }

    #[test]
    fn timestamps_offset_last_check_in() {
        let deltas = StalenessDeltas::from_seconds(60, 120, 180).unwrap();
        let check_in = DateTime::from_timestamp(1_000, 0).unwrap();
        let stamps = deltas.timestamps(check_in).unwrap();
        assert_eq!(stamps.stale_timestamp.timestamp(), 1_060);
        assert_eq!(stamps.stale_warning_timestamp.timestamp(), 1_120);
        assert_eq!(stamps.culled_timestamp.timestamp(), 1_180);
    }

    #[test]
    fn out_of_range_seconds_are_invalid_thresholds() {
        let err =
            StalenessDeltas::from_seconds(10, 20, i64::MAX / 1_000 + 1)
                .unwrap_err();
        assert!(matches!(err, ModelError::InvalidThresholds(_)));
        assert!(err.to_string().contains("cull_after"));
    }

    #[test]
    fn timestamps_past_the_calendar_are_errors() {
        // Valid as a delta, but not addable to a present-day check-in.
        let huge = TimeDelta::days(100_000_000);
        let deltas = StalenessDeltas::new(
            TimeDelta::seconds(10),
            TimeDelta::seconds(20),
            huge,
        )
        .unwrap();
        let check_in = DateTime::from_timestamp(1_000, 0).unwrap();
        assert!(matches!(
            deltas.timestamps(check_in),
            Err(ModelError::TimestampOutOfRange(_))
        ));
    }
}
