use staleward_model::{ModelError, PolicyDeltas};
use thiserror::Error;

use crate::models::Config;

/// Chunk sizes above this hold a large result set in memory per query.
pub const LARGE_CHUNK_SIZE: usize = 10_000;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("default staleness thresholds for {kind} hosts are invalid")]
    InvalidDefaults {
        kind: &'static str,
        #[source]
        source: ModelError,
    },
    #[error("chunk size must be at least 1")]
    ZeroChunkSize,
    #[error("{field} must not be empty")]
    EmptyTopic { field: &'static str },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    validate_defaults(config)?;

    if config.jobs.chunk_size == 0 {
        return Err(ConfigGuardRailError::ZeroChunkSize);
    }
    if config.jobs.chunk_size > LARGE_CHUNK_SIZE {
        warnings.push_with_hint(
            format!(
                "Chunk size {} is very large; each query holds that many hosts in memory",
                config.jobs.chunk_size
            ),
            format!("Keep SCRIPT_CHUNK_SIZE at or below {LARGE_CHUNK_SIZE}"),
        );
    }

    if config.bus.event_topic.trim().is_empty() {
        return Err(ConfigGuardRailError::EmptyTopic {
            field: "EVENT_TOPIC",
        });
    }
    if config.bus.notification_topic.trim().is_empty() {
        return Err(ConfigGuardRailError::EmptyTopic {
            field: "NOTIFICATION_TOPIC",
        });
    }

    if config.database.primary_url.is_none() {
        warnings.push_with_hint(
            "No database URL configured; jobs cannot run",
            "Set DATABASE_URL or DATABASE_HOST/DATABASE_USER/DATABASE_NAME",
        );
    }

    if config.bus.redis_url.is_none() {
        warnings.push_with_hint(
            "REDIS_URL not configured; event emission is unavailable",
            "Set REDIS_URL or add a [bus] redis_url entry to the config file",
        );
    }

    if config.metrics.pushgateway_url.is_none() {
        warnings.push_with_hint(
            "PROMETHEUS_PUSHGATEWAY not configured; job metrics will not be pushed",
            "Set PROMETHEUS_PUSHGATEWAY to collect per-run counters",
        );
    }

    Ok(warnings)
}

fn validate_defaults(config: &Config) -> Result<(), ConfigGuardRailError> {
    let conventional = config.staleness.conventional.to_deltas().map_err(
        |source| ConfigGuardRailError::InvalidDefaults {
            kind: "conventional",
            source,
        },
    )?;
    let immutable = config.staleness.immutable.to_deltas().map_err(
        |source| ConfigGuardRailError::InvalidDefaults {
            kind: "immutable",
            source,
        },
    )?;
    PolicyDeltas::new(conventional, immutable)
        .map(|_| ())
        .map_err(|source| ConfigGuardRailError::InvalidDefaults {
            kind: "default",
            source,
        })
}
