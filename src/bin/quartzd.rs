//! The scheduler daemon: loads configuration, connects the configured job
//! store, and runs the scheduling core until a shutdown signal arrives.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quartz_core::config::{JobStoreClass, SchedulerConfig};
use quartz_core::cluster::ClusterManager;
use quartz_core::listener::ListenerManager;
use quartz_core::registry::JobRegistry;
use quartz_core::scheduler::SchedulingParams;
use quartz_core::store::memory::InMemoryJobStore;
use quartz_core::store::sql::lock::LockRetryPolicy;
use quartz_core::store::sql::PostgresJobStore;
use quartz_core::store::JobStore;
use quartz_core::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,quartz_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting quartzd");

    let config = SchedulerConfig::from_env().context("failed to load scheduler configuration")?;
    tracing::info!(instance_id = %config.instance_id, job_store = ?config.job_store_class, "configuration loaded");

    // Job handlers register themselves here before the scheduler (and the
    // store, which looks capabilities up from it) starts. A real deployment
    // wires its own handlers in; none are built in.
    let registry = Arc::new(JobRegistry::new());

    let (store, cluster_shutdown_tx): (Arc<dyn JobStore>, Option<tokio::sync::watch::Sender<bool>>) = match config.job_store_class {
        JobStoreClass::Memory => (Arc::new(InMemoryJobStore::new(registry.clone())), None),
        JobStoreClass::Postgres => {
            let database_url = config.database_url.as_deref().context("DATABASE_URL must be set for the postgres job store")?;

            tracing::info!("connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(database_url)
                .await
                .context("failed to connect to database")?;

            tracing::info!("running database migrations...");
            sqlx::migrate!("./migrations").run(&pool).await.context("failed to run migrations")?;

            let lock_retry = LockRetryPolicy { max_retry: config.lock_max_retry, retry_period: config.lock_retry_period };
            let store = Arc::new(
                PostgresJobStore::new(pool.clone(), config.instance_name.clone(), registry.clone())
                    .with_lock_retry(lock_retry),
            );

            let cluster_shutdown_tx = if config.is_clustered {
                let (tx, rx) = tokio::sync::watch::channel(false);
                let cluster = Arc::new(ClusterManager::new(
                    pool,
                    config.instance_name.clone(),
                    config.instance_id.clone(),
                    config.cluster_checkin_interval,
                ));
                tokio::spawn(cluster.run(rx));
                Some(tx)
            } else {
                None
            };

            (store, cluster_shutdown_tx)
        }
    };

    let listeners = Arc::new(ListenerManager::new());
    let params = SchedulingParams::from(&config);

    let scheduler = Arc::new(Scheduler::new(config.instance_id.clone(), store, registry, listeners, params));
    scheduler.start();
    tracing::info!("quartzd running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received, draining in-flight jobs");

    scheduler.shutdown(true).await;
    if let Some(tx) = cluster_shutdown_tx {
        let _ = tx.send(true);
    }

    Ok(())
}
