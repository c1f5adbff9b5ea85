use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use consensus_runner::config::AppConfig;
use consensus_runner::consensus::ConsensusEngine;
use consensus_runner::dispatch::Dispatcher;
use consensus_runner::matrix;
use consensus_runner::orchestrator::Orchestrator;
use consensus_runner::platform::github::GitHubTrigger;
use consensus_runner::server::{create_router, AppState};
use consensus_runner::shutdown::{graceful_shutdown, wait_for_shutdown};
use consensus_runner::tunnel;

#[derive(Parser)]
#[command(
    name = "consensus-runner",
    about = "Run screen-reader automation jobs repeatedly and measure how consistent they are"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the number of runs per combination
    #[arg(long)]
    num_runs: Option<u32>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Write the JSON report to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

fn init_tracing(config: &AppConfig) {
    let default_level = if config.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(num_runs) = cli.num_runs {
        config.runner.num_runs = num_runs;
    }
    if let Some(path) = cli.report {
        config.report.path = Some(path);
    }
    config.debug |= cli.debug;
    config.validate()?;

    init_tracing(&config);

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        public_url = %config.tunnel.public_url,
        "Starting consensus runner"
    );

    let state = Arc::new(AppState::new(config.clone())?);

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.server.host, config.server.port
    ))
    .await?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    let (stop_server, server_stopped) = oneshot::channel::<()>();
    let app = create_router(Arc::clone(&state));
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = server_stopped.await;
            })
            .await
    });

    if config.tunnel.probe {
        match tunnel::probe(&config.tunnel.public_url).await {
            Ok(()) => tracing::info!("Tunnel reaches this server"),
            Err(e) => tracing::warn!(error = %e, "Tunnel probe failed, callbacks may not arrive"),
        }
    }

    let trigger = Arc::new(GitHubTrigger::new(&config.github)?);
    let orchestrator = Orchestrator::new(
        Arc::clone(&state.registry),
        Dispatcher::new(trigger, &config),
        ConsensusEngine::new(config.consensus.check_incomplete),
        config.runner.num_runs,
        config.runner.run_timeout(),
    );

    let combinations = matrix::enumerate(&config.runner.matrix, &config.runner.test_plans);
    tracing::info!(
        combinations = combinations.len(),
        test_plans = config.runner.test_plans.len(),
        runs = config.runner.num_runs,
        timeout_secs = ?config.runner.run_timeout_secs,
        "Starting runs"
    );

    let run = orchestrator.run(&combinations);
    tokio::pin!(run);

    let report = tokio::select! {
        report = &mut run => report,
        _ = wait_for_shutdown() => {
            graceful_shutdown(&state, &orchestrator).await;
            run.await
        }
    };

    let _ = stop_server.send(());
    server.await??;

    if let Some(path) = &config.report.path {
        report.write_json(path)?;
        tracing::info!(path = %path.display(), "Wrote report");
    }

    tracing::info!(
        plans = report.plans.len(),
        interrupted = report.interrupted,
        "All test plans complete"
    );

    Ok(())
}
