use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use coreflow::common::{cpuid, DevMsrDriver, Family, SchedAffinity, Topology, CPU_ARCH};
use coreflow::counters::CounterWidths;
use coreflow::orchestrator::SnapshotReceiver;
use coreflow::plugins::{self, ConfigInfo};
use coreflow::{AgentConfig, CoreflowError, Poller, SampleExporter, Session};

#[derive(Parser, Debug)]
#[command(name = "coreflow")]
#[command(about = "Per-thread PMC sampling with SMT-aware aggregation for Intel CPUs")]
struct Args {
    #[arg(short, long, help = "Monitoring config to program (see --list-configs)")]
    config: Option<String>,

    #[arg(long, value_enum, help = "Use this family's configs instead of detecting the CPU")]
    family: Option<Family>,

    #[arg(long, help = "List the monitoring configs for the CPU and exit")]
    list_configs: bool,

    #[arg(long, default_value_t = 1000, help = "Sampling interval in milliseconds")]
    interval_ms: u64,

    #[arg(long, default_value = "0.0.0.0:8080", help = "HTTP listen address")]
    listen: SocketAddr,

    #[arg(long, help = "Do not serve /metrics, /rows and /configs")]
    no_http: bool,

    #[arg(long, help = "Print the metric table after every tick")]
    print: bool,

    #[arg(
        short,
        long,
        help = "Enable verbose logging (shows all MSR read/write operations)"
    )]
    verbose: bool,
}

impl Args {
    fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            family: self.family,
            config_name: self.config.clone(),
            interval: Duration::from_millis(self.interval_ms),
            listen: self.listen,
            serve_http: !self.no_http,
            print_table: self.print,
        }
    }
}

struct AppState {
    family: Family,
    exporter: Arc<SampleExporter>,
    snapshots: SnapshotReceiver,
    poller: Arc<Poller>,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    let metric_families = state.exporter.registry().gather();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }

    let content_type = encoder.format_type().to_string();
    (
        [("Content-Type", content_type)],
        String::from_utf8(buffer).unwrap_or_default(),
    )
}

async fn rows_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let latest = state.snapshots.borrow().clone();
    match latest {
        Some(snapshot) => Json(snapshot.as_ref()).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no sample yet").into_response(),
    }
}

async fn configs_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ConfigInfo>> {
    Json(plugins::configs(state.family).iter().map(ConfigInfo::from).collect())
}

async fn select_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let config = match plugins::find(state.family, &name) {
        Ok(config) => config,
        Err(e) => return (StatusCode::NOT_FOUND, e.to_string()),
    };
    match state.poller.select(config).await {
        Ok(()) => {
            tracing::warn!("Switched to '{}'", config.name);
            (StatusCode::OK, config.name.to_string())
        }
        Err(e) => {
            let status = match e {
                CoreflowError::UnsupportedEvent(_) => StatusCode::UNPROCESSABLE_ENTITY,
                CoreflowError::NotInitialized(_) | CoreflowError::DriverUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, e.to_string())
        }
    }
}

fn list_configs(family: Family) {
    println!("{} monitoring configs:", family.name());
    for config in plugins::configs(family) {
        println!("\n  {}", config.name);
        for line in config.full_help().lines() {
            println!("    {line}");
        }
    }
}

/// Print each new snapshot until cancelled
async fn print_snapshots(mut snapshots: SnapshotReceiver, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if let Some(snapshot) = snapshot {
                    println!(
                        "\n[{}] {} ({:.2}s)\n{}",
                        snapshot.sequence,
                        snapshot.results.config,
                        snapshot.results.elapsed_secs,
                        snapshot.results.render_table()
                    );
                }
            }
        }
    }
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    tracing::info!("Installing signal handlers...");

    let ctrl_c = async {
        tracing::debug!("Waiting for Ctrl+C...");
        match signal::ctrl_c().await {
            Ok(()) => tracing::info!("Ctrl+C received!"),
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        tracing::debug!("Waiting for SIGTERM...");
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("SIGTERM received!");
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Shutdown triggered by Ctrl+C");
        },
        _ = terminate => {
            tracing::warn!("Shutdown triggered by SIGTERM");
        },
        _ = cancel_token.cancelled() => {
            tracing::warn!("Shutdown triggered by the poller");
        },
    }

    tracing::warn!("Shutdown signal received, initiating graceful shutdown...");
    cancel_token.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup logging based on verbose flag; RUST_LOG wins when set
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let agent_config = args.agent_config();
    let family = agent_config.resolve_family(*CPU_ARCH)?;

    if args.list_configs {
        list_configs(family);
        return Ok(());
    }

    agent_config.validate()?;
    let config = agent_config.resolve_config(family)?;
    tracing::info!("Using {} config '{}'", family.name(), config.name);

    let topology = Arc::new(Topology::discover().context("failed to discover CPU topology")?);
    let probe_cpu = topology.threads().first().map(|t| t.cpu).unwrap_or(0);
    let driver = Arc::new(DevMsrDriver::new(probe_cpu));
    let widths = CounterWidths::from(cpuid::pmu_capabilities());

    let exporter = Arc::new(SampleExporter::new(&topology)?);
    let session = Session::new(driver, Box::new(SchedAffinity), Arc::clone(&topology), widths);

    let cancel_token = CancellationToken::new();
    let poller = Arc::new(
        Poller::spawn(
            session,
            config,
            agent_config.interval,
            Some(Arc::clone(&exporter)),
            cancel_token.clone(),
        )
        .await
        .with_context(|| format!("failed to start '{}'", config.name))?,
    );

    let printer = agent_config.print_table.then(|| {
        tokio::spawn(print_snapshots(poller.subscribe(), cancel_token.clone()))
    });

    if agent_config.serve_http {
        let app_state = Arc::new(AppState {
            family,
            exporter,
            snapshots: poller.subscribe(),
            poller: Arc::clone(&poller),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/rows", get(rows_handler))
            .route("/configs", get(configs_handler))
            .route("/configs/{name}", post(select_handler))
            .with_state(app_state);

        tracing::warn!("Starting HTTP server on {}", agent_config.listen);
        let listener = tokio::net::TcpListener::bind(agent_config.listen).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel_token.clone()))
            .await?;
        tracing::info!("Server shutdown complete");
    } else {
        shutdown_signal(cancel_token.clone()).await;
    }

    if let Some(handle) = printer {
        let _ = handle.await;
    }

    // The last handle joins the polling thread, which disables the counters
    match Arc::try_unwrap(poller) {
        Ok(poller) => poller.stop(),
        Err(_) => tracing::warn!("Poller still referenced at exit"),
    }

    tracing::info!("All tasks completed, exiting");

    Ok(())
}
