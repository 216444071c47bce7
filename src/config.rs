//! Environment-driven configuration, mirroring the recognized keys a
//! deployment would set on `quartzd`.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Which `JobStore` implementation the scheduler runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStoreClass {
    Memory,
    Postgres,
}

/// Everything the scheduling core needs to boot, loaded once from the
/// environment (optionally via a `.env` file) and validated up front.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub instance_name: String,
    pub instance_id: String,
    pub thread_count: usize,

    pub job_store_class: JobStoreClass,
    pub misfire_threshold: Duration,
    pub database_url: Option<String>,
    pub table_prefix: String,
    pub is_clustered: bool,
    pub cluster_checkin_interval: Duration,
    pub acquire_triggers_within_lock: bool,
    pub lock_max_retry: u32,
    pub lock_retry_period: Duration,
    pub db_retry_interval: Duration,
    pub database_max_connections: u32,
}

impl SchedulerConfig {
    /// Load and validate configuration from the environment. Unset required
    /// keys (the database URL, when clustered) are load-time errors with
    /// context, not panics.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let instance_name =
            env::var("SCHEDULER_INSTANCE_NAME").unwrap_or_else(|_| "QuartzScheduler".to_string());

        let instance_id = match env::var("SCHEDULER_INSTANCE_ID") {
            Ok(v) if v == "AUTO" || v.is_empty() => auto_instance_id(),
            Ok(v) => v,
            Err(_) => auto_instance_id(),
        };

        let thread_count = env_parse("SCHEDULER_THREAD_COUNT", 10usize)?;

        let job_store_class = match env::var("JOB_STORE_CLASS").unwrap_or_else(|_| "memory".to_string()).as_str() {
            "postgres" => JobStoreClass::Postgres,
            "memory" => JobStoreClass::Memory,
            other => {
                return Err(anyhow::anyhow!("JOB_STORE_CLASS must be 'memory' or 'postgres', got '{other}'"))
            }
        };

        let misfire_threshold = Duration::from_millis(env_parse("JOB_STORE_MISFIRE_THRESHOLD_MS", 60_000u64)?);

        let database_url = match env::var("DATABASE_URL") {
            Ok(v) => Some(v),
            Err(_) if job_store_class == JobStoreClass::Postgres => {
                return Err(anyhow::anyhow!("DATABASE_URL must be set")).context("loading scheduler configuration")
            }
            Err(_) => None,
        };

        let table_prefix = env::var("JOB_STORE_TABLE_PREFIX").unwrap_or_else(|_| "QRTZ_".to_string());
        let is_clustered = env_parse("JOB_STORE_IS_CLUSTERED", false)?;
        let cluster_checkin_interval =
            Duration::from_millis(env_parse("JOB_STORE_CLUSTER_CHECKIN_INTERVAL_MS", 7_500u64)?);
        let acquire_triggers_within_lock = env_parse("JOB_STORE_ACQUIRE_TRIGGERS_WITHIN_LOCK", is_clustered)?;
        let lock_max_retry = env_parse("JOB_STORE_LOCK_MAX_RETRY", 3u32)?;
        let lock_retry_period = Duration::from_millis(env_parse("JOB_STORE_LOCK_RETRY_PERIOD_MS", 1_000u64)?);
        let db_retry_interval = Duration::from_millis(env_parse("JOB_STORE_DB_RETRY_INTERVAL_MS", 15_000u64)?);
        let database_max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 10u32)?;

        Ok(Self {
            instance_name,
            instance_id,
            thread_count,
            job_store_class,
            misfire_threshold,
            database_url,
            table_prefix,
            is_clustered,
            cluster_checkin_interval,
            acquire_triggers_within_lock,
            lock_max_retry,
            lock_retry_period,
            db_retry_interval,
            database_max_connections,
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v.parse::<T>().map_err(|e| anyhow::anyhow!("{key} must be valid: {e}")),
        Err(_) => Ok(default),
    }
}

fn auto_instance_id() -> String {
    let host = hostname_or_default();
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{host}-{now}")
}

fn hostname_or_default() -> String {
    env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_job_store_class_is_rejected() {
        std::env::set_var("JOB_STORE_CLASS", "bogus");
        let result = SchedulerConfig::from_env();
        std::env::remove_var("JOB_STORE_CLASS");
        assert!(result.is_err());
    }

    #[test]
    fn defaults_to_memory_store() {
        std::env::remove_var("JOB_STORE_CLASS");
        std::env::remove_var("DATABASE_URL");
        let config = SchedulerConfig::from_env().unwrap();
        assert_eq!(config.job_store_class, JobStoreClass::Memory);
        assert!(config.database_url.is_none());
    }
}
