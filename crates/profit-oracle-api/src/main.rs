use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use profit_oracle_agents::ConsultingTeam;
use profit_oracle_api::{ApiConfig, AppState, RequestQueue, build_router};
use profit_oracle_core::{
    ConfigLoader, OpenAiClient, TelemetryOptions, init_telemetry, metrics,
};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = ConfigLoader::load(None)?;
    init_telemetry(
        TelemetryOptions {
            with_target: false,
            ..TelemetryOptions::default()
        }
        .with_default_level(&config.logging.level),
    )?;
    metrics::init_metrics_from_env("profit-oracle-api");

    let api = ApiConfig::from_env(config.output.records_dir.clone())?;
    let addr: SocketAddr = api
        .listen_addr
        .parse()
        .with_context(|| format!("invalid PROFIT_ORACLE_API_ADDR {}", api.listen_addr))?;

    let client = Arc::new(OpenAiClient::from_config(&config)?);
    let nodes = ConsultingTeam::from_config(&config, client);
    let queue = RequestQueue::new(
        nodes,
        api.max_concurrency,
        api.work_dir.clone(),
        api.records_dir.clone(),
        Duration::from_secs(api.download_timeout_secs),
    )?;

    let app = build_router(AppState::new(queue));

    info!(
        %addr,
        max_concurrency = api.max_concurrency,
        "Profit Oracle API listening"
    );

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
