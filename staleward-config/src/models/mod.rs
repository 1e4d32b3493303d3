pub mod sources;

use std::path::PathBuf;
use std::time::Duration;

use staleward_model::chrono::TimeDelta;
use staleward_model::{ModelError, PolicyDeltas, StalenessDeltas};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_EVENT_TOPIC: &str = "platform.inventory.events";
pub const DEFAULT_NOTIFICATION_TOPIC: &str = "platform.notifications.ingress";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub bus: BusConfig,
    pub staleness: StalenessConfig,
    pub jobs: JobsConfig,
    pub metrics: MetricsConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub primary_url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub redis_url: Option<String>,
    pub event_topic: String,
    pub notification_topic: String,
    /// Approximate cap applied to every stream on publish.
    pub stream_max_len: Option<usize>,
}

/// Thresholds for one host kind, as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaDurations {
    pub stale: Duration,
    pub stale_warning: Duration,
    pub culled: Duration,
}

impl DeltaDurations {
    pub fn to_deltas(&self) -> Result<StalenessDeltas, ModelError> {
        StalenessDeltas::from_seconds(
            seconds(self.stale)?,
            seconds(self.stale_warning)?,
            seconds(self.culled)?,
        )
    }
}

fn seconds(duration: Duration) -> Result<i64, ModelError> {
    i64::try_from(duration.as_secs())
        .ok()
        .filter(|secs| *secs <= TimeDelta::MAX.num_seconds())
        .ok_or_else(|| {
            ModelError::InvalidThresholds(format!(
                "{} seconds does not fit a threshold",
                duration.as_secs()
            ))
        })
}

/// Defaults for tenants without a custom policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessConfig {
    pub conventional: DeltaDurations,
    pub immutable: DeltaDurations,
}

impl StalenessConfig {
    pub fn policy_deltas(&self) -> Result<PolicyDeltas, ModelError> {
        PolicyDeltas::new(
            self.conventional.to_deltas()?,
            self.immutable.to_deltas()?,
        )
    }
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            conventional: DeltaDurations {
                stale: Duration::from_secs(29 * HOUR),
                stale_warning: Duration::from_secs(7 * DAY),
                culled: Duration::from_secs(14 * DAY),
            },
            immutable: DeltaDurations {
                stale: Duration::from_secs(2 * DAY),
                stale_warning: Duration::from_secs(120 * DAY),
                culled: Duration::from_secs(180 * DAY),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub chunk_size: usize,
    /// Reporters checked by the reporter staleness refresh. Empty means the
    /// built-in list.
    pub refresh_reporters: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsConfig {
    pub pushgateway_url: Option<String>,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
