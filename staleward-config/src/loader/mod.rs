pub mod db_url;
pub mod error;

use once_cell::sync::Lazy;
use std::{fs, path::PathBuf, time::Duration};
use tracing::debug;

use crate::{
    models::{
        BusConfig, Config, ConfigMetadata, DEFAULT_CHUNK_SIZE,
        DEFAULT_DATABASE_MAX_CONNECTIONS, DEFAULT_EVENT_TOPIC,
        DEFAULT_NOTIFICATION_TOPIC, DatabaseConfig, DeltaDurations,
        JobsConfig, MetricsConfig, StalenessConfig,
        sources::{EnvConfig, EnvDeltaConfig, FileConfig, FileDeltaConfig},
    },
    util::parse_duration,
    validation::{self, ConfigWarnings},
};

use error::ConfigLoadError;

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("staleward.toml"),
        PathBuf::from("config/staleward.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Loads `.env`, then composes the file and process environment.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        let mut load = self.load_from(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Composes configuration from an already gathered environment.
    /// Environment values override the file, which overrides defaults.
    pub fn load_from(
        &self,
        env: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;

        let mut warnings = ConfigWarnings::default();
        if config_path.is_none() {
            warnings.push_with_hint(
                "No staleward.toml detected; falling back to environment variables",
                "Pass --config or set STALEWARD_CONFIG to use a configuration file",
            );
        }

        let config =
            compose_config(file_config.unwrap_or_default(), env, config_path)?;
        warnings.extend(validation::apply_guard_rails(&config)?);

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        // An explicit or env-provided path must exist; defaults are optional.
        let explicit = self.options.config_path.as_ref();
        let (path, required) = match (explicit, &env.config_path) {
            (Some(explicit), _) => (Some(explicit.clone()), true),
            (None, Some(from_env)) => (Some(from_env.clone()), true),
            (None, None) => (
                DEFAULT_CONFIG_LOCATIONS
                    .iter()
                    .find(|candidate| candidate.exists())
                    .cloned(),
                false,
            ),
        };

        let Some(path) = path else {
            return Ok((None, None));
        };
        if !path.exists() {
            if required {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|source| {
            ConfigLoadError::Io {
                path: path.clone(),
                source,
            }
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| {
                ConfigLoadError::Parse {
                    path: path.clone(),
                    source,
                }
            })?;
        debug!(path = %path.display(), "loaded configuration file");

        Ok((Some(file_config), Some(path)))
    }
}

fn compose_config(
    file: FileConfig,
    env: EnvConfig,
    config_path: Option<PathBuf>,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        database: file_database,
        bus: file_bus,
        staleness: file_staleness,
        jobs: file_jobs,
        metrics: file_metrics,
    } = file;

    let database = DatabaseConfig {
        primary_url: db_url::resolve_database_url(&env, &file_database)?,
        max_connections: env
            .database_max_connections
            .or(file_database.max_connections)
            .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
    };

    let bus = BusConfig {
        redis_url: non_empty(env.redis_url).or(non_empty(file_bus.redis_url)),
        event_topic: env
            .event_topic
            .or(file_bus.event_topic)
            .unwrap_or_else(|| DEFAULT_EVENT_TOPIC.to_string()),
        notification_topic: env
            .notification_topic
            .or(file_bus.notification_topic)
            .unwrap_or_else(|| DEFAULT_NOTIFICATION_TOPIC.to_string()),
        stream_max_len: env.stream_max_len.or(file_bus.stream_max_len),
    };

    let builtin = StalenessConfig::default();
    let staleness = StalenessConfig {
        conventional: compose_deltas(
            "conventional",
            &env.conventional,
            &file_staleness.conventional,
            builtin.conventional,
        )?,
        immutable: compose_deltas(
            "immutable",
            &env.immutable,
            &file_staleness.immutable,
            builtin.immutable,
        )?,
    };

    let jobs = JobsConfig {
        chunk_size: env
            .chunk_size
            .or(file_jobs.chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE),
        refresh_reporters: env
            .refresh_reporters
            .or(file_jobs.refresh_reporters)
            .unwrap_or_default(),
    };

    let metrics = MetricsConfig {
        pushgateway_url: non_empty(env.pushgateway_url)
            .or(non_empty(file_metrics.pushgateway_url)),
        namespace: non_empty(env.namespace)
            .or(non_empty(file_metrics.namespace)),
    };

    Ok(Config {
        database,
        bus,
        staleness,
        jobs,
        metrics,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded: false,
        },
    })
}

fn compose_deltas(
    kind: &str,
    env: &EnvDeltaConfig,
    file: &FileDeltaConfig,
    builtin: DeltaDurations,
) -> Result<DeltaDurations, ConfigLoadError> {
    let pick = |field: &str,
                env_value: &Option<String>,
                file_value: &Option<String>,
                fallback: Duration|
     -> Result<Duration, ConfigLoadError> {
        match env_value.as_ref().or(file_value.as_ref()) {
            Some(raw) => parse_duration(raw).map_err(|source| {
                ConfigLoadError::InvalidDuration {
                    key: format!("staleness.{kind}.{field}"),
                    value: raw.clone(),
                    source,
                }
            }),
            None => Ok(fallback),
        }
    };

    Ok(DeltaDurations {
        stale: pick("stale", &env.stale, &file.stale, builtin.stale)?,
        stale_warning: pick(
            "stale_warning",
            &env.stale_warning,
            &file.stale_warning,
            builtin.stale_warning,
        )?,
        culled: pick("culled", &env.culled, &file.culled, builtin.culled)?,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
