use std::{collections::HashSet, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use sekia::config::Config;
use sekia_agent_sdk::{Agent, Bus};
use sekia_broker::Broker;
use sekia_control_api::{AppState, ControlApi};
use sekia_registry::Registry;
use sekia_workflow::WorkflowEngine;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tools::http::http_server::HttpServer;
use tracing::{error, info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Embedded event bus, agent registry, and scripted workflow engine.
#[derive(Parser)]
#[command(name = "sekia")]
struct Cli {
    /// Path to the TOML configuration file; overrides the default search order.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tools::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::parse(cli.config.as_deref())?;

    let broker = if config.journal.enabled {
        Broker::with_journal(config.journal.dir.clone())?
    } else {
        Broker::new()
    };

    let registry = Registry::new();
    let registry_subs = registry.attach(&broker)?;

    let engine = WorkflowEngine::new(broker.clone(), config.workflows.dir.clone(), config.command_secret.clone().into_bytes());
    engine.set_verify_integrity(config.workflows.verify_integrity);
    engine.set_handler_timeout(Duration::from_secs(config.workflows.handler_timeout_secs));
    engine.attach()?;
    if let Err(e) = engine.reload_all() {
        warn!(error = ?e, "initial workflow load failed");
    }

    let bus: Arc<dyn Bus> = Arc::new(broker.clone());
    let agent = Agent::connect(
        bus,
        "sekia",
        env!("CARGO_PKG_VERSION"),
        HashSet::new(),
        HashSet::new(),
        config.command_secret.clone().into_bytes(),
    )?;

    let control_state = AppState::new(broker.clone(), registry.clone(), Some(engine.clone()));
    let control_api = ControlApi::new(config.server.socket_path.clone(), control_state);

    let shutdown = CancellationToken::new();
    let control_token = shutdown.clone();
    let control_task = tokio::spawn(async move {
        if let Err(e) = control_api.run(control_token).await {
            error!(error = ?e, "control API exited with an error");
        }
    });

    let metrics_server = HttpServer::new(config.server.http_addr.clone(), config.server.metrics_addr.clone());
    let metrics_task = tokio::spawn(async move {
        if let Err(e) = metrics_server.run().await {
            error!(error = ?e, "metrics server exited with an error");
        }
    });

    info!(
        socket = %config.server.socket_path.display(),
        http_addr = %config.server.http_addr,
        "sekia is up"
    );

    shutdown_signal().await;
    info!("shutdown signal received, draining");

    shutdown.cancel();
    let _ = control_task.await;
    metrics_task.abort();

    agent.close();
    engine.detach();
    engine.shutdown();
    registry.detach(&broker, registry_subs);
    broker.shutdown();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(unix)]
    let quit = async {
        signal::unix::signal(signal::unix::SignalKind::quit())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
        () = quit => {},
    }
}
