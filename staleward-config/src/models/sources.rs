use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::{parse_csv_var, parse_var};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub bus: FileBusConfig,
    #[serde(default)]
    pub staleness: FileStalenessConfig,
    #[serde(default)]
    pub jobs: FileJobsConfig,
    #[serde(default)]
    pub metrics: FileMetricsConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileBusConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_max_len: Option<usize>,
}

/// Durations are humantime strings such as `"29h"` or `"7days"`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDeltaConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub culled: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileStalenessConfig {
    #[serde(default)]
    pub conventional: FileDeltaConfig,
    #[serde(default)]
    pub immutable: FileDeltaConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileJobsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_reporters: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileMetricsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pushgateway_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Raw threshold strings for one host kind.
#[derive(Debug, Default, Clone)]
pub struct EnvDeltaConfig {
    pub stale: Option<String>,
    pub stale_warning: Option<String>,
    pub culled: Option<String>,
}

impl EnvDeltaConfig {
    fn gather(prefix: &str) -> Self {
        Self {
            stale: std::env::var(format!("{prefix}_STALE")).ok(),
            stale_warning: std::env::var(format!("{prefix}_STALE_WARNING"))
                .ok(),
            culled: std::env::var(format!("{prefix}_CULLED")).ok(),
        }
    }
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub database_url_file: Option<PathBuf>,
    pub database_host: Option<String>,
    pub database_port: Option<u16>,
    pub database_user: Option<String>,
    pub database_name: Option<String>,
    pub database_password: Option<String>,
    pub database_password_file: Option<PathBuf>,
    pub database_max_connections: Option<u32>,
    pub redis_url: Option<String>,
    pub event_topic: Option<String>,
    pub notification_topic: Option<String>,
    pub stream_max_len: Option<usize>,
    pub conventional: EnvDeltaConfig,
    pub immutable: EnvDeltaConfig,
    pub chunk_size: Option<usize>,
    pub refresh_reporters: Option<Vec<String>>,
    pub pushgateway_url: Option<String>,
    pub namespace: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: std::env::var("STALEWARD_CONFIG")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
            database_url: std::env::var("DATABASE_URL").ok(),
            database_url_file: std::env::var("DATABASE_URL_FILE")
                .ok()
                .map(PathBuf::from),
            database_host: std::env::var("DATABASE_HOST").ok(),
            database_port: parse_var("DATABASE_PORT"),
            database_user: std::env::var("DATABASE_USER").ok(),
            database_name: std::env::var("DATABASE_NAME").ok(),
            database_password: std::env::var("DATABASE_PASSWORD").ok(),
            database_password_file: std::env::var("DATABASE_PASSWORD_FILE")
                .ok()
                .map(PathBuf::from),
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS"),
            redis_url: std::env::var("REDIS_URL").ok(),
            event_topic: std::env::var("EVENT_TOPIC").ok(),
            notification_topic: std::env::var("NOTIFICATION_TOPIC").ok(),
            stream_max_len: parse_var("STREAM_MAX_LEN"),
            conventional: EnvDeltaConfig::gather("STALENESS_CONVENTIONAL"),
            immutable: EnvDeltaConfig::gather("STALENESS_IMMUTABLE"),
            chunk_size: parse_var("SCRIPT_CHUNK_SIZE"),
            refresh_reporters: parse_csv_var("REFRESH_REPORTERS"),
            pushgateway_url: std::env::var("PROMETHEUS_PUSHGATEWAY").ok(),
            namespace: std::env::var("NAMESPACE").ok(),
        }
    }
}
