mod api;
mod config;
mod csr_client;
mod db;
mod dedup;
mod description;
mod error;
mod lock;
mod logging;
mod materialize;
mod metrics;
mod models;
mod normalizer;
mod notifications;
mod poller;
mod retention;
mod scheduler;
mod snooze;
mod store;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::{signal, sync::watch};
use tracing::info;

use csr_client::CsrClient;
use db::{PgLeaseProvider, PgNotificationStore, PgSnoozePreferenceStore};
use lock::{LockConfiguration, MutualExclusionScheduler};
use materialize::{LogSink, NotificationMaterializer};
use notifications::NotificationService;
use poller::RegionPoller;
use scheduler::PollCycle;
use snooze::SnoozeGate;

fn main() -> Result<()> {
    // Build custom runtime with explicit thread configuration
    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or_else(num_cpus::get);

    println!("Starting with {} Tokio worker threads", worker_threads);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    runtime.block_on(async {
        // Initialize logging first thing
        logging::setup_logging();

        // Load environment variables from .env file if present
        dotenv::dotenv().ok();

        info!("Starting Shift Change Notification Service");

        let config = config::Config::from_env()?;
        info!(
            regions = ?config.csr_regions,
            owner = %config.lock_owner,
            "Configuration loaded"
        );

        let db_pool = db::init_db_pool(&config.database_url).await?;

        let notification_store = Arc::new(PgNotificationStore::new(db_pool.clone()));
        let snooze_store = Arc::new(PgSnoozePreferenceStore::new(db_pool.clone()));
        let lease_provider = Arc::new(PgLeaseProvider::new(db_pool.clone()));
        let snooze_gate = Arc::new(SnoozeGate::new(snooze_store));

        let csr_client = Arc::new(CsrClient::new(
            &config.csr_api_url,
            config.csr_api_token.clone(),
            config.csr_timeout,
            config.csr_retry_backoff,
        )?);

        let poll_cycle = Arc::new(PollCycle::new(
            RegionPoller::new(
                csr_client,
                notification_store.clone(),
                config.csr_region_concurrency,
            ),
            NotificationMaterializer::new(
                notification_store.clone(),
                snooze_gate.clone(),
                Arc::new(LogSink),
            ),
            MutualExclusionScheduler::new(lease_provider.clone(), config.lock_owner.clone()),
            LockConfiguration::for_poll(config.poll_interval, config.poll_lock_at_most),
            config.csr_regions.clone(),
        ));

        // Create shutdown signal
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poll_handle = tokio::spawn(scheduler::run_poll_loop(
            poll_cycle,
            config.poll_interval,
            config.poll_active_hours,
            shutdown_rx.clone(),
        ));

        let tidy_handle = tokio::spawn(scheduler::run_tidy_loop(
            notification_store.clone(),
            Arc::new(MutualExclusionScheduler::new(
                lease_provider,
                config.lock_owner.clone(),
            )),
            config.tidy_interval,
            config.retention_months,
            shutdown_rx.clone(),
        ));

        // Spawn API server
        let api_state = Arc::new(api::ApiState {
            notifications: NotificationService::new(
                notification_store,
                snooze_gate.clone(),
                config.default_window_months,
            ),
            snooze: snooze_gate,
        });
        let api_router = api::create_api_router(api_state);

        let addr = config.api_bind_address.clone();
        info!("Starting API server on {}", addr);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind API server to {}", addr))?;

        let mut api_shutdown = shutdown_rx;
        let api_handle = tokio::spawn(async move {
            let result = axum::serve(listener, api_router)
                .with_graceful_shutdown(async move {
                    let _ = api_shutdown.changed().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!("API server error: {}", e);
            }
        });

        // Handle graceful shutdown
        signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Received shutdown signal, shutting down gracefully");

        // Send shutdown signal to tasks
        let _ = shutdown_tx.send(true);

        // Wait for ALL tasks to complete
        let _ = tokio::join!(poll_handle, tidy_handle, api_handle);

        info!("Shutdown complete");
        Ok(())
    })
}
