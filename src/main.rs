use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coinsync_backend::config::Config;
use coinsync_backend::jobs::{indicator_engine, snapshot_sync};
use coinsync_backend::services::clock;
use coinsync_backend::services::coingecko::CoinGeckoClient;
use coinsync_backend::services::monitor::{EventKind, EventLevel, MonitorClient, MonitorEvent};
use coinsync_backend::services::store::SnapshotStore;

const SERVICE_NAME: &str = "coinsync";
const DB_CONNECT_ATTEMPTS: u32 = 5;

// Exit codes: 0 clean shutdown, 1 configuration error, 2 database
// unreachable at startup. Runtime faults never exit.
const EXIT_CONFIG: i32 = 1;
const EXIT_DATABASE: i32 = 2;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,coinsync_backend=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration error: {}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    tracing::info!("Connecting to database...");
    let db = match connect_with_retry(&config).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("database unreachable at startup: {}", e);
            std::process::exit(EXIT_DATABASE);
        }
    };

    tracing::info!("Running migrations...");
    if let Err(e) = Migrator::up(&db, None).await {
        tracing::error!("failed to run migrations: {}", e);
        std::process::exit(EXIT_DATABASE);
    }

    let store = SnapshotStore::new(db, config.statement_timeout);

    // Fail fast on schema drift before any tick runs
    if let Err(e) = store.probe_schema().await {
        tracing::error!("schema probe failed: {}", e);
        std::process::exit(EXIT_DATABASE);
    }

    // One HTTP client with a bounded pool, shared by the fetcher and the
    // monitor webhooks
    let http = match reqwest::Client::builder()
        .timeout(config.http_timeout)
        .pool_max_idle_per_host(config.concurrency)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("failed to build HTTP client: {}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    let monitor = MonitorClient::new(http.clone(), SERVICE_NAME, config.webhook_urls.clone());
    let coingecko = CoinGeckoClient::new(http, &config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = Arc::new(config);

    let sync_job = snapshot_sync::start_snapshot_sync_job(
        store.clone(),
        coingecko,
        monitor.clone(),
        config.clone(),
        shutdown_rx.clone(),
    );
    let indicator_job = indicator_engine::start_indicator_engine_job(
        store.clone(),
        monitor.clone(),
        config.clone(),
        shutdown_rx,
    );

    monitor.emit(
        MonitorEvent::new(
            EventKind::Health,
            EventLevel::Info,
            format!(
                "pipeline started: bucket {} ms, page size {}, {} page(s) max per tick",
                config.bucket_ms, config.page_size, config.pages_per_tick
            ),
            clock::now_ms(),
        )
        .detail("bucket_ms", config.bucket_ms)
        .detail("concurrency", config.concurrency as u64),
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("shutdown signal received, draining jobs");

    let _ = shutdown_tx.send(true);
    let _ = sync_job.await;
    let _ = indicator_job.await;

    monitor.emit(MonitorEvent::new(
        EventKind::Health,
        EventLevel::Info,
        "pipeline stopped cleanly",
        clock::now_ms(),
    ));
    tracing::info!("shutdown complete");
}

async fn connect_with_retry(config: &Config) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.database_url.clone());
    options
        .max_connections(config.concurrency.max(4) as u32)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);

    let mut attempt: u32 = 0;
    loop {
        match Database::connect(options.clone()).await {
            Ok(db) => match db.ping().await {
                Ok(()) => return Ok(db),
                Err(e) if attempt + 1 < DB_CONNECT_ATTEMPTS => {
                    tracing::warn!(attempt = attempt + 1, "database ping failed: {}", e);
                }
                Err(e) => return Err(e),
            },
            Err(e) if attempt + 1 < DB_CONNECT_ATTEMPTS => {
                tracing::warn!(attempt = attempt + 1, "database connect failed: {}", e);
            }
            Err(e) => return Err(e),
        }
        tokio::time::sleep(Duration::from_secs(1 << attempt.min(4))).await;
        attempt += 1;
    }
}
