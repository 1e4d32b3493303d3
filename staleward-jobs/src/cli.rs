use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use staleward_config::util::parse_duration;
use staleward_core::JobKind;

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "staleward")]
#[command(
    about = "Classify inventory hosts by check-in staleness and run the maintenance jobs built on it"
)]
pub struct Cli {
    /// Path to a staleward.toml configuration file
    #[arg(long, global = true, env = "STALEWARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env when present)
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Publish a became-stale notification for every stale host
    StaleNotify(RunArgs),
    /// Recompute and write back derived fields, then publish lifecycle
    /// updates for every host that is not culled
    Synchronize(RunArgs),
    /// Fill in missing per-reporter staleness on immutable hosts
    RefreshReporterStaleness(RunArgs),
    /// Inspect or change a tenant's custom staleness policy
    #[command(subcommand)]
    Policy(PolicyCommand),
}

impl Command {
    pub fn job(&self) -> Option<(JobKind, &RunArgs)> {
        match self {
            Command::StaleNotify(args) => {
                Some((JobKind::StaleHostNotification, args))
            }
            Command::Synchronize(args) => Some((JobKind::HostSynchronizer, args)),
            Command::RefreshReporterStaleness(args) => {
                Some((JobKind::ReporterStalenessRefresh, args))
            }
            Command::Policy(_) => None,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Hosts per storage query (overrides config)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Restrict the run to one tenant
    #[arg(long)]
    pub tenant: Option<String>,

    /// Request id carried in every event's platform metadata
    #[arg(long, env = "REQUEST_ID")]
    pub request_id: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum PolicyCommand {
    /// Print the policy in force for a tenant
    Get {
        #[arg(long)]
        tenant: String,
    },
    /// Store a custom policy. Thresholds not given keep their current value.
    Set(PolicySetArgs),
    /// Remove a tenant's custom policy so it falls back to the default
    Reset {
        #[arg(long)]
        tenant: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct PolicySetArgs {
    #[arg(long)]
    pub tenant: String,

    #[arg(long, value_parser = duration_arg)]
    pub conventional_stale: Option<Duration>,
    #[arg(long, value_parser = duration_arg)]
    pub conventional_stale_warning: Option<Duration>,
    #[arg(long, value_parser = duration_arg)]
    pub conventional_culled: Option<Duration>,

    #[arg(long, value_parser = duration_arg)]
    pub immutable_stale: Option<Duration>,
    #[arg(long, value_parser = duration_arg)]
    pub immutable_stale_warning: Option<Duration>,
    #[arg(long, value_parser = duration_arg)]
    pub immutable_culled: Option<Duration>,
}

fn duration_arg(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).map_err(|err| err.to_string())
}
