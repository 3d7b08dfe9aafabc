/// Worker process: runs the ingestion and consistency engine (backfill,
/// live-tail, reorg resolution) and serves Prometheus metrics.
use axum::{routing::get, Router};
use eth_indexer::config::Settings;
use eth_indexer::metrics;
use eth_indexer::supervisor::Supervisor;
use eth_indexer::telemetry::{init_tracing, TelemetryConfig};
use std::net::SocketAddr;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = init_tracing(TelemetryConfig::default()) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = metrics::init_metrics() {
        error!(error = %e, "failed to initialize metrics");
        std::process::exit(1);
    }

    let metrics_port = settings.metrics_port;
    tokio::spawn(async move {
        serve_metrics(metrics_port).await;
    });

    info!("starting worker");
    let supervisor = Supervisor::new(settings);
    if let Err(e) = supervisor.run().await {
        error!(error = %e, "worker exited with error");
        std::process::exit(1);
    }
}

async fn serve_metrics(port: u16) {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            info!(%addr, "serving metrics");
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "metrics server failed");
            }
        }
        Err(e) => error!(error = %e, "failed to bind metrics listener"),
    }
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
