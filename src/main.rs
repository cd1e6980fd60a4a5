/*
 * Vigil - Block-synchronous CEX/DEX arbitrage detector
 * Main entry point for the application
 */

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil::{
    api,
    cex::{create_cex_client, CexClient},
    config::Config,
    dex::UniswapQuoter,
    listener::HeadSource,
    notifier::WsServer,
    observability::Metrics,
    rpc::RpcClient,
    service::Orchestrator,
};

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting Vigil arbitrage detector");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(provider = ?config.cex_provider, symbol = %config.symbol, "Configuration loaded");

    let ctx = CancellationToken::new();
    spawn_signal_handler(ctx.clone());

    let metrics = Arc::new(Metrics::new());
    let cex: Arc<dyn CexClient> = Arc::from(create_cex_client(config.cex_provider));
    let rpc = Arc::new(RpcClient::new(&config.eth_node_http)?);
    let dex = Arc::new(UniswapQuoter::new(rpc)?);
    let source = Arc::new(HeadSource::new(config.eth_node_ws.clone()));
    let notifier = Arc::new(WsServer::new());

    {
        let notifier = notifier.clone();
        let ctx = ctx.clone();
        let port = config.ws_port;
        tokio::spawn(async move {
            notifier.serve(port, ctx).await;
        });
    }

    {
        let rocket = api::create_rocket(
            api::ApiState {
                metrics: metrics.clone(),
            },
            config.metrics_port,
        );
        info!(port = config.metrics_port, "Starting metrics server");
        tokio::spawn(async move {
            if let Err(e) = rocket.launch().await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    let orchestrator = Arc::new(Orchestrator::new(
        config, cex, dex, source, notifier, metrics,
    ));
    orchestrator.run(ctx).await?;

    info!("Shutdown complete");
    Ok(())
}

fn spawn_signal_handler(ctx: CancellationToken) {
    tokio::spawn(async move {
        let sigterm = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm => {}
        }

        info!("Shutdown signal received");
        ctx.cancel();
    });
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
