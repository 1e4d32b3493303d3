use std::{fs, time::Duration};

use staleward_config::{
    ConfigGuardRailError, ConfigLoadError, ConfigLoader,
    models::sources::{EnvConfig, EnvDeltaConfig},
};
use tempfile::tempdir;

fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("staleward.toml");
    fs::write(&path, contents).expect("write config");
    (dir, path)
}

#[test]
fn defaults_apply_without_file_or_env() {
    let load = ConfigLoader::new()
        .load_from(EnvConfig::default())
        .expect("load");
    let config = load.config;

    assert_eq!(config.jobs.chunk_size, 500);
    assert_eq!(config.bus.event_topic, "platform.inventory.events");
    assert_eq!(
        config.staleness.conventional.stale,
        Duration::from_secs(29 * 3600)
    );
    assert!(config.metadata.config_path.is_none());
    // No file, database, redis or push gateway.
    assert_eq!(load.warnings.items.len(), 4);
}

#[test]
fn file_values_are_overridden_by_env() {
    let (_dir, path) = write_config(
        r#"
[database]
url = "postgresql://inventory@db:5432/insights"

[bus]
redis_url = "redis://bus:6379"
notification_topic = "notifications"
stream_max_len = 100000

[staleness.conventional]
stale = "1d"
stale_warning = "3d"
culled = "5d"

[jobs]
chunk_size = 250
refresh_reporters = ["puptoo"]

[metrics]
pushgateway_url = "http://pushgateway:9091"
namespace = "inventory-stage"
"#,
    );

    let env = EnvConfig {
        chunk_size: Some(50),
        conventional: EnvDeltaConfig {
            culled: Some("10d".into()),
            ..EnvDeltaConfig::default()
        },
        ..EnvConfig::default()
    };
    let load = ConfigLoader::new()
        .with_config_path(&path)
        .load_from(env)
        .expect("load");
    let config = load.config;

    assert_eq!(config.jobs.chunk_size, 50);
    assert_eq!(config.jobs.refresh_reporters, vec!["puptoo".to_string()]);
    assert_eq!(config.bus.notification_topic, "notifications");
    assert_eq!(config.bus.event_topic, "platform.inventory.events");
    assert_eq!(config.bus.stream_max_len, Some(100_000));
    assert_eq!(
        config.staleness.conventional.stale,
        Duration::from_secs(86_400)
    );
    assert_eq!(
        config.staleness.conventional.culled,
        Duration::from_secs(10 * 86_400)
    );
    assert_eq!(
        config.metrics.namespace.as_deref(),
        Some("inventory-stage")
    );
    assert_eq!(config.metadata.config_path.as_deref(), Some(path.as_path()));
    assert!(load.warnings.is_empty());

    let deltas = config.staleness.policy_deltas().expect("valid deltas");
    assert_eq!(deltas.conventional.stale_warning_after.num_days(), 3);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = tempdir().expect("tempdir");
    let err = ConfigLoader::new()
        .with_config_path(dir.path().join("absent.toml"))
        .load_from(EnvConfig::default())
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[test]
fn env_config_path_must_exist_too() {
    let dir = tempdir().expect("tempdir");
    let env = EnvConfig {
        config_path: Some(dir.path().join("absent.toml")),
        ..EnvConfig::default()
    };
    let err = ConfigLoader::new().load_from(env).unwrap_err();
    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[test]
fn malformed_toml_reports_the_path() {
    let (_dir, path) = write_config("[jobs\nchunk_size = 1");
    let err = ConfigLoader::new()
        .with_config_path(&path)
        .load_from(EnvConfig::default())
        .unwrap_err();
    match err {
        ConfigLoadError::Parse { path: reported, .. } => {
            assert_eq!(reported, path)
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn unparsable_duration_names_the_key() {
    let env = EnvConfig {
        immutable: EnvDeltaConfig {
            stale: Some("eventually".into()),
            ..EnvDeltaConfig::default()
        },
        ..EnvConfig::default()
    };
    let err = ConfigLoader::new().load_from(env).unwrap_err();
    match err {
        ConfigLoadError::InvalidDuration { key, value, .. } => {
            assert_eq!(key, "staleness.immutable.stale");
            assert_eq!(value, "eventually");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn non_monotonic_defaults_are_rejected() {
    let env = EnvConfig {
        conventional: EnvDeltaConfig {
            stale: Some("8d".into()),
            ..EnvDeltaConfig::default()
        },
        ..EnvConfig::default()
    };
    let err = ConfigLoader::new().load_from(env).unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::InvalidDefaults {
            kind: "conventional",
            ..
        })
    ));
}

#[test]
fn zero_chunk_size_is_rejected_and_huge_warns() {
    let zero = EnvConfig {
        chunk_size: Some(0),
        ..EnvConfig::default()
    };
    assert!(matches!(
        ConfigLoader::new().load_from(zero).unwrap_err(),
        ConfigLoadError::GuardRail(ConfigGuardRailError::ZeroChunkSize)
    ));

    let huge = EnvConfig {
        chunk_size: Some(50_000),
        ..EnvConfig::default()
    };
    let load = ConfigLoader::new().load_from(huge).expect("load");
    assert!(
        load.warnings
            .items
            .iter()
            .any(|w| w.message.contains("Chunk size 50000"))
    );
}
