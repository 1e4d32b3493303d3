use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::{TimeDelta, Utc};
use staleward_config::{Config, ConfigLoad, ConfigLoader, ConfigWarnings};
use staleward_core::{
    JobKind, JobOrchestrator, JobSpec, PolicyResolver, ShutdownSignal,
    bus::{EventBus, RedisEventBus, Topics},
    context::{RunContext, TenantContext, TenantScope},
    metrics::{MetricsSink, NoopSink, PushGateway},
    policy::{effective_policy, reset_policy, set_policy},
    storage::{HostSession, HostStore, PostgresHostStore},
};
use staleward_model::{PolicyDeltas, StalenessDeltas, TenantId};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::cli::{Cli, PolicyCommand, PolicySetArgs, RunArgs};
use crate::exit::RunStatus;

pub fn load_config(cli: &Cli) -> anyhow::Result<ConfigLoad> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &cli.env_file {
        loader = loader.with_env_file(path);
    }
    loader.load().context("failed to load configuration")
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,staleward=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub fn log_warnings(config: &Config, warnings: &ConfigWarnings) {
    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "using configuration file");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(
                    message = %warning.message,
                    hint = %hint,
                    "configuration warning"
                )
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }
}

fn host_store(config: &Config) -> anyhow::Result<Arc<dyn HostStore>> {
    let url = config
        .database
        .primary_url
        .as_deref()
        .ok_or_else(|| anyhow!("no database URL configured"))?;
    let store =
        PostgresHostStore::connect_lazy(url, config.database.max_connections)
            .context("failed to create PostgreSQL pool")?;
    Ok(Arc::new(store))
}

fn event_bus(config: &Config) -> anyhow::Result<Arc<dyn EventBus>> {
    let url = config
        .bus
        .redis_url
        .as_deref()
        .ok_or_else(|| anyhow!("no REDIS_URL configured"))?;
    let bus = RedisEventBus::open(url, config.bus.stream_max_len)
        .context("failed to create Redis client")?;
    Ok(Arc::new(bus))
}

fn metrics_sink(config: &Config) -> anyhow::Result<Arc<dyn MetricsSink>> {
    match &config.metrics.pushgateway_url {
        Some(url) => {
            let gateway =
                PushGateway::new(url, config.metrics.namespace.clone())
                    .context("invalid push gateway URL")?;
            Ok(Arc::new(gateway))
        }
        None => Ok(Arc::new(NoopSink)),
    }
}

pub fn default_policy(config: &Config) -> anyhow::Result<PolicyDeltas> {
    config
        .staleness
        .policy_deltas()
        .context("invalid default staleness thresholds")
}

pub fn topics(config: &Config) -> Topics {
    Topics {
        events: config.bus.event_topic.clone(),
        notifications: config.bus.notification_topic.clone(),
    }
}

pub fn job_spec(kind: JobKind, config: &Config) -> JobSpec {
    JobSpec::new(kind)
        .with_refresh_reporters(config.jobs.refresh_reporters.clone())
}

/// Request context for one run. A request id is generated when none is
/// given so every event of the run can be correlated.
pub fn run_context(args: &RunArgs) -> anyhow::Result<RunContext> {
    let mut ctx = RunContext::new(Utc::now()).with_request_id(
        args.request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
    );
    if let Some(tenant) = &args.tenant {
        let tenant_id = TenantId::new(tenant.as_str())
            .with_context(|| format!("invalid tenant '{tenant}'"))?;
        ctx = ctx
            .with_scope(TenantScope::Tenant(TenantContext::new(tenant_id)));
    }
    Ok(ctx)
}

pub fn orchestrator(
    store: Arc<dyn HostStore>,
    bus: Arc<dyn EventBus>,
    config: &Config,
    args: &RunArgs,
) -> anyhow::Result<JobOrchestrator> {
    Ok(JobOrchestrator::new(
        store,
        bus,
        PolicyResolver::new(default_policy(config)?),
        topics(config),
    )
    .with_chunk_size(args.chunk_size.unwrap_or(config.jobs.chunk_size)))
}

pub async fn run_job(
    kind: JobKind,
    args: &RunArgs,
    config: &Config,
    shutdown: ShutdownSignal,
) -> anyhow::Result<RunStatus> {
    let store = host_store(config)?;
    let bus = event_bus(config)?;
    let runner = orchestrator(store, bus, config, args)?
        .with_metrics_sink(metrics_sink(config)?)
        .with_shutdown(shutdown);
    let spec = job_spec(kind, config);
    let ctx = run_context(args)?;

    // The orchestrator logs the outcome, fatal errors included.
    let result = runner.run(&spec, &ctx).await;
    let status = RunStatus::from_result(&result);
    if let Ok(summary) = &result
        && let Ok(json) = serde_json::to_string(summary)
    {
        println!("{json}");
    }
    Ok(status)
}

pub async fn run_policy(
    command: &PolicyCommand,
    config: &Config,
) -> anyhow::Result<()> {
    let store = host_store(config)?;
    let mut session = store
        .open_session()
        .await
        .context("failed to open storage session")?;
    let result = policy_command(session.as_mut(), command, config).await;
    if let Err(err) = session.close().await {
        warn!(error = %err, "failed to close storage session");
    }
    let output = result?;
    println!("{output}");
    Ok(())
}

pub async fn policy_command(
    session: &mut dyn HostSession,
    command: &PolicyCommand,
    config: &Config,
) -> anyhow::Result<String> {
    let defaults = default_policy(config)?;
    match command {
        PolicyCommand::Get { tenant } => {
            let tenant_id = parse_tenant(tenant)?;
            let policy =
                effective_policy(session, &tenant_id, &defaults).await?;
            Ok(serde_json::to_string_pretty(&policy)?)
        }
        PolicyCommand::Set(args) => {
            let tenant_id = parse_tenant(&args.tenant)?;
            let current =
                effective_policy(session, &tenant_id, &defaults).await?;
            let deltas = merge_deltas(current.deltas(), args)?;
            let policy = set_policy(session, &tenant_id, deltas).await?;
            Ok(serde_json::to_string_pretty(&policy)?)
        }
        PolicyCommand::Reset { tenant } => {
            let tenant_id = parse_tenant(tenant)?;
            let removed = reset_policy(session, &tenant_id).await?;
            Ok(serde_json::json!({
                "org_id": tenant_id,
                "removed": removed,
            })
            .to_string())
        }
    }
}

fn parse_tenant(raw: &str) -> anyhow::Result<TenantId> {
    TenantId::new(raw).with_context(|| format!("invalid tenant '{raw}'"))
}

/// Overlays the thresholds given on the command line onto `current`.
pub fn merge_deltas(
    current: &PolicyDeltas,
    args: &PolicySetArgs,
) -> anyhow::Result<PolicyDeltas> {
    let conventional = overlay(
        &current.conventional,
        args.conventional_stale,
        args.conventional_stale_warning,
        args.conventional_culled,
    )?;
    let immutable = overlay(
        &current.immutable,
        args.immutable_stale,
        args.immutable_stale_warning,
        args.immutable_culled,
    )?;
    PolicyDeltas::new(conventional, immutable)
        .context("thresholds must satisfy stale < stale_warning < culled")
}

fn overlay(
    base: &StalenessDeltas,
    stale: Option<Duration>,
    stale_warning: Option<Duration>,
    culled: Option<Duration>,
) -> anyhow::Result<StalenessDeltas> {
    let pick = |value: Option<Duration>, fallback: TimeDelta| {
        value
            .map(|d| TimeDelta::from_std(d).context("threshold out of range"))
            .unwrap_or(Ok(fallback))
    };
    Ok(StalenessDeltas {
        stale_after: pick(stale, base.stale_after)?,
        stale_warning_after: pick(stale_warning, base.stale_warning_after)?,
        cull_after: pick(culled, base.cull_after)?,
    })
}
