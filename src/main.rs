use std::sync::Arc;

use hypercopy::cache::RedisCache;
use hypercopy::config::AppConfig;
use hypercopy::exchange::{ExchangeAdapter, HyperliquidClient, PaperExchange};
use hypercopy::store::PgCopyStore;
use hypercopy::{metrics, CopyEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;

    metrics::init_metrics(config.metrics_port)?;
    tracing::info!(port = config.metrics_port, "Prometheus exporter listening");

    tracing::info!("Connecting to database...");
    let store = PgCopyStore::connect(&config.database_url).await?;
    tracing::info!("Database connected, migrations applied");

    let cache = RedisCache::connect(&config.redis_url).await?;
    tracing::info!("Redis connected");

    let exchange: Arc<dyn ExchangeAdapter> = if config.dry_run {
        tracing::info!("Dry-run mode — orders go to the paper exchange");
        Arc::new(PaperExchange)
    } else {
        tracing::info!(
            testnet = config.exchange.testnet,
            "Live mode — orders go to Hyperliquid"
        );
        Arc::new(HyperliquidClient::new(&config.exchange))
    };

    let engine = CopyEngine::new(
        Arc::new(store),
        Arc::new(cache),
        exchange,
        config.engine.clone(),
    );
    engine.start().await?;
    tracing::info!(
        max_concurrency = config.engine.max_concurrency,
        ingress_capacity = config.engine.ingress_capacity,
        "Copy engine running"
    );

    shutdown_signal().await;

    tracing::info!("Shutting down gracefully...");
    engine.stop().await?;
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown...");
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();
}
