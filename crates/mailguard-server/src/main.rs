//! MailGuard - Mail security scanning service entry point

use anyhow::Result;
use mailguard_common::config::Config;
use mailguard_core::checks::{
    DnsPostureProvider, HeaderAuthProvider, HeuristicUrlProvider, RemoteReputationProvider,
    SignatureAttachmentProvider,
};
use mailguard_core::{
    CheckRegistry, MemoryJobQueue, ScanOrchestrator, ScanService, ScanTimeouts,
};
use mailguard_storage::{DatabasePool, MemoryMessageStore, MessageStore, PgMessageStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so the log filter can come from it
    let config = Config::load()?;

    init_logging(&config.logging.filter);

    info!("Starting MailGuard scanning service...");

    // Initialize the message store
    let store: Arc<dyn MessageStore> = if config.database.url.is_some() {
        let db_pool = DatabasePool::new(&config.database).await?;
        info!("Database connection established");

        db_pool.migrate().await?;
        info!("Database migrations completed");

        Arc::new(PgMessageStore::new(db_pool))
    } else {
        info!("No database configured, using in-memory message store");
        Arc::new(MemoryMessageStore::new())
    };

    // Build the check provider registry
    let mut registry = CheckRegistry::new();
    registry.register(Arc::new(HeaderAuthProvider));
    if config.providers.enable_dns_posture {
        registry.register(Arc::new(DnsPostureProvider::new()));
        info!("DNS posture provider enabled");
    }
    registry.register(Arc::new(HeuristicUrlProvider::new(
        config.providers.url_blocklist.clone(),
    )));
    if let Some(endpoint) = &config.providers.reputation_endpoint {
        registry.register(Arc::new(RemoteReputationProvider::new(
            endpoint.clone(),
            config.providers.reputation_timeout_ms,
        )));
        info!("Remote URL reputation provider enabled: {}", endpoint);
    }
    registry.register(Arc::new(SignatureAttachmentProvider));

    // Wire up the pipeline
    let orchestrator = Arc::new(ScanOrchestrator::new(
        Arc::new(registry),
        ScanTimeouts::from_config(&config.scan),
        config.scan.weights,
    ));
    let queue = Arc::new(MemoryJobQueue::new(&config.queue));
    let service = Arc::new(ScanService::new(
        store,
        queue,
        orchestrator,
        config.queue.max_attempts,
    ));

    // Start scan workers
    let shutdown = CancellationToken::new();
    let workers = service.spawn_workers(config.scan.workers, shutdown.clone());
    info!("Started {} scan workers", config.scan.workers);

    info!("MailGuard scanning service started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    for worker in workers {
        let _ = worker.await;
    }

    info!("MailGuard scanning service shutdown complete");

    Ok(())
}

fn init_logging(filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter.to_string()));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .init();
}
