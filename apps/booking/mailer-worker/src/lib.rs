//! Mailer Worker Service
//!
//! A background worker that delivers transactional email for the booking
//! platform.
//!
//! ## Architecture
//!
//! ```text
//! Booking API / handlers
//!   ↓ (MailQueue::enqueue)
//! Redis (queue:pending / queue:processing / queue:failed)
//!   ↓ (poll tick)
//! MailWorker → SMTP
//!   ↓ (digest tick)
//! DigestBuilder → operator sink
//! ```
//!
//! ## Features
//!
//! - At-least-once delivery with exponential backoff and a DLQ
//! - Stale-lease reclaim so a crashed worker cannot strand emails
//! - Daily failure digest for operators
//! - Graceful shutdown handling (SIGINT/SIGTERM)

use core_config::redis::RedisConfig;
use core_config::{Environment, FromEnv};
use domain_mailer::{
    metrics, DigestBuilder, MailQueue, MailWorker, QueueConfig, RedisStore, SmtpMailer,
    TracingDigestSink, WorkerConfig,
};
use eyre::{Result, WrapErr};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Run the mailer worker.
///
/// This is the main entry point for the worker. It:
/// 1. Sets up structured logging (env-aware: JSON for prod, pretty for dev)
/// 2. Connects to Redis for queue state
/// 3. Builds the SMTP transport from `SMTP_*` environment variables
/// 4. Starts the delivery loop and the digest timer with graceful shutdown
///
/// # Errors
///
/// Returns an error if:
/// - Redis configuration is invalid or the connection fails
/// - SMTP configuration is invalid
/// - The worker encounters a fatal error
pub async fn run() -> Result<()> {
    // Initialize tracing (env-aware: JSON for prod, pretty for dev)
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    // Initialize Prometheus metrics
    metrics::init_metrics();

    info!("Starting mailer worker service");
    info!("Environment: {:?}", environment);

    // Load Redis configuration from the environment
    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;

    info!("Connecting to Redis...");
    let redis = connect_with_retry(&redis_config).await?;
    info!("Connected to Redis successfully");

    let store = Arc::new(RedisStore::new(redis));

    let queue_config = QueueConfig::default();
    let queue = Arc::new(MailQueue::new(store.clone(), queue_config.clone()));

    let transport = Arc::new(
        SmtpMailer::from_env()
            .map_err(|e| eyre::eyre!("Failed to build SMTP transport: {}", e))?,
    );

    let worker_config = WorkerConfig::default();
    info!(
        consumer_id = %worker_config.consumer_id,
        batch_limit = %worker_config.batch_limit,
        poll_interval_ms = %worker_config.poll_interval_ms,
        "Worker configuration loaded"
    );

    // Set up a shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    // Spawn the failure-digest timer
    let digest = DigestBuilder::new(store, &queue_config);
    let digest_interval_secs: u64 = std::env::var("MAILER_DIGEST_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(24 * 60 * 60);
    let mut digest_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let sink = TracingDigestSink;
        let mut interval = tokio::time::interval(Duration::from_secs(digest_interval_secs));
        // The first tick fires immediately; skip it so the digest runs on
        // the configured cadence only
        interval.tick().await;

        loop {
            tokio::select! {
                _ = digest_shutdown.changed() => {
                    if *digest_shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = digest.run(&sink).await {
                        warn!(error = %e, "Failure digest run failed");
                    }
                }
            }
        }
    });

    // Run the delivery worker
    info!("Starting email delivery loop...");
    let worker = MailWorker::new(queue, transport, worker_config);
    worker.run(shutdown_rx).await?;

    info!("Mailer worker service stopped");
    Ok(())
}

/// Connect to Redis, retrying with exponential backoff.
async fn connect_with_retry(config: &RedisConfig) -> Result<ConnectionManager> {
    const MAX_ATTEMPTS: u32 = 5;

    let client = redis::Client::open(config.uri.clone()).wrap_err("Invalid Redis URI")?;

    let mut delay = Duration::from_secs(1);
    for attempt in 1..MAX_ATTEMPTS {
        match ConnectionManager::new(client.clone()).await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(
                    attempt = %attempt,
                    error = %e,
                    retry_in_secs = %delay.as_secs(),
                    "Redis connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }
        }
    }

    ConnectionManager::new(client)
        .await
        .wrap_err("Failed to connect to Redis")
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
