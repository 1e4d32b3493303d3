use std::process::ExitCode;

use clap::Parser;
use staleward_core::ShutdownSignal;
use staleward_jobs::{
    app,
    cli::{Cli, Command},
    exit::RunStatus,
    signals,
};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(status) => status.into(),
        Err(err) => {
            error!(error = format!("{err:#}"), "staleward failed");
            eprintln!("error: {err:#}");
            RunStatus::Fatal.into()
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<RunStatus> {
    let load = app::load_config(&cli)?;
    app::init_tracing();
    app::log_warnings(&load.config, &load.warnings);

    if let Some((kind, args)) = cli.command.job() {
        let shutdown = ShutdownSignal::new();
        signals::install(shutdown.clone());
        return app::run_job(kind, args, &load.config, shutdown).await;
    }
    if let Command::Policy(command) = &cli.command {
        app::run_policy(command, &load.config).await?;
    }
    Ok(RunStatus::Clean)
}
