use std::{fmt::Display, future::ready, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::{signal, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A long-running component that starts alongside an `HttpServer` and is
/// handed a `CancellationToken` to stop by.
#[async_trait]
pub trait HttpServerProcess: Send + Sync + 'static {
    async fn pre_run(&self) -> Result<()>;
    async fn run(&self, token: CancellationToken) -> Result<()>;
}

/// Settings for an `HttpServer`.
#[derive(Default, Clone)]
pub struct HttpServerConfig {
    pub addr: String,
    pub metrics_addr: String,
    pub pre_run_tasks_timeout: Duration,
}

/// TCP server bootstrap with a readiness/liveness/metrics router and a
/// `pre_run`/`run` process lifecycle, mirroring the dual app+metrics server
/// pattern used across sekia's binaries.
#[derive(Default)]
pub struct HttpServer {
    config: HttpServerConfig,
    processes: Option<Vec<Arc<dyn HttpServerProcess>>>,
}

impl HttpServer {
    #[must_use]
    pub fn new(addr: String, metrics_addr: String) -> Self {
        Self {
            config: HttpServerConfig {
                addr,
                metrics_addr,
                pre_run_tasks_timeout: Duration::from_secs(60),
            },
            processes: None,
        }
    }

    #[must_use]
    pub fn with_processes(mut self, processes: Vec<Arc<dyn HttpServerProcess>>) -> Self {
        self.processes = Some(processes);
        self
    }

    pub async fn run(&self) -> Result<()> {
        let empty_vec = Vec::new();
        let processes = self.processes.as_ref().unwrap_or(&empty_vec);
        Self::pre_run_processes(processes, self.config.pre_run_tasks_timeout).await?;

        let shutdown = CancellationToken::new();
        let mut runnable_tasks = Self::run_processes(processes, shutdown.clone());

        let app_server = bootstrap_server(&self.config.addr, get_default_router(), ServerKind::Application);
        let metrics_server =
            bootstrap_server(&self.config.metrics_addr, get_metrics_router(), ServerKind::Metrics);

        tokio::try_join!(app_server, metrics_server).context("failed to bootstrap servers")?;

        shutdown.cancel();
        Self::shutdown_processes(&mut runnable_tasks).await;

        Ok(())
    }

    async fn pre_run_processes(processes: &[Arc<dyn HttpServerProcess>], tasks_timeout: Duration) -> Result<()> {
        let tasks: Vec<_> = processes
            .iter()
            .map(|p| {
                let p = Arc::clone(p);
                tokio::spawn(async move { timeout(tasks_timeout, p.pre_run()).await })
            })
            .collect();

        for task in tasks {
            let result = task.await?.context("pre-run task failed")?;
            result?;
        }

        Ok(())
    }

    fn run_processes(
        processes: &[Arc<dyn HttpServerProcess>],
        token: CancellationToken,
    ) -> Vec<JoinHandle<Result<()>>> {
        processes
            .iter()
            .map(|p| {
                let p = Arc::clone(p);
                let token = token.clone();
                tokio::spawn(async move { p.run(token).await })
            })
            .collect()
    }

    async fn shutdown_processes(tasks: &mut [JoinHandle<Result<()>>]) {
        for task in tasks.iter_mut() {
            if let Err(e) = task.await {
                error!("failed to await run task: {:?}", e);
            }
        }
    }
}

async fn bootstrap_server(addr: &str, router: Router, server_kind: ServerKind) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to address: {addr}"))?;

    info!("listening {server_kind} server on {}", addr);

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .with_context(|| format!("failed to start {server_kind} server on {addr}"))?;

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

#[derive(Copy, Clone)]
enum ServerKind {
    Application,
    Metrics,
}

impl Display for ServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Application => write!(f, "app"),
            Self::Metrics => write!(f, "metrics"),
        }
    }
}

fn get_default_router() -> Router {
    Router::new()
        .route("/readiness", get(|| async { "OK" }))
        .route("/liveness", get(|| async { "OK" }))
}

fn get_metrics_router() -> Router {
    let recorder_handle = setup_metrics_recorder();
    get_default_router().route("/metrics", get(move || ready(recorder_handle.render())))
}

fn setup_metrics_recorder() -> PrometheusHandle {
    PrometheusBuilder::new().install_recorder().expect("failed to install Prometheus recorder")
}
