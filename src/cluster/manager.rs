//! Heartbeat checkin and failover recovery, the two cooperating activities
//! that keep a database-shared cluster of scheduler instances consistent.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

use crate::error::{QuartzError, Result};
use crate::store::sql::lock::{self, LockRetryPolicy, STATE_ACCESS};

fn store_err(e: sqlx::Error) -> QuartzError {
    QuartzError::StoreTransient(e.into())
}

/// How much longer than its own declared interval a peer is given before
/// being considered dead.
const SAFETY_MARGIN_FACTOR: i64 = 2;

/// Drives the two cluster-coordination activities: periodic heartbeats into
/// `scheduler_state` and, on the same cadence, a scan for peers that have
/// stopped checking in.
pub struct ClusterManager {
    pool: PgPool,
    sched_name: String,
    instance_id: String,
    checkin_interval: StdDuration,
    lock_retry: LockRetryPolicy,
}

impl ClusterManager {
    pub fn new(pool: PgPool, sched_name: impl Into<String>, instance_id: impl Into<String>, checkin_interval: StdDuration) -> Self {
        Self {
            pool,
            sched_name: sched_name.into(),
            instance_id: instance_id.into(),
            checkin_interval,
            lock_retry: LockRetryPolicy::default(),
        }
    }

    /// Upserts this instance's checkin row under `STATE_ACCESS`. The
    /// checkin time comes from the database clock, not the local wall
    /// clock, so peer comparisons never trust a local clock directly.
    pub async fn checkin(&self) -> Result<()> {
        lock::with_lock_scope(|| async {
            let mut tx = self.pool.begin().await.map_err(store_err)?;
            lock::acquire(&self.pool, &mut tx, &self.sched_name, STATE_ACCESS, self.lock_retry).await?;

            let now: DateTime<Utc> = sqlx::query_scalar("SELECT now()")
                .fetch_one(&mut *tx)
                .await
                .map_err(store_err)?;

            sqlx::query(
                "INSERT INTO scheduler_state (sched_name, instance_id, last_checkin_time, checkin_interval)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (sched_name, instance_id) DO UPDATE SET last_checkin_time = $3, checkin_interval = $4",
            )
            .bind(&self.sched_name)
            .bind(&self.instance_id)
            .bind(now.timestamp_millis())
            .bind(self.checkin_interval.as_millis() as i64)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

            tx.commit().await.map_err(store_err)?;
            debug!(instance_id = %self.instance_id, "cluster checkin");
            Ok(())
        })
        .await
    }

    /// Finds peers whose last checkin is older than their declared interval
    /// plus a safety margin, recovers their in-flight fires, and removes
    /// their `scheduler_state` row. Returns the recovered instance ids.
    pub async fn scan_and_recover(&self) -> Result<Vec<String>> {
        lock::with_lock_scope(|| async {
            let mut tx = self.pool.begin().await.map_err(store_err)?;
            lock::acquire(&self.pool, &mut tx, &self.sched_name, STATE_ACCESS, self.lock_retry).await?;

            let now_ms: i64 = sqlx::query_scalar("SELECT (extract(epoch from now()) * 1000)::bigint")
                .fetch_one(&mut *tx)
                .await
                .map_err(store_err)?;

            let dead_rows = sqlx::query(
                "SELECT instance_id, last_checkin_time, checkin_interval FROM scheduler_state
                 WHERE sched_name = $1 AND instance_id != $2
                   AND last_checkin_time + checkin_interval * $3 < $4",
            )
            .bind(&self.sched_name)
            .bind(&self.instance_id)
            .bind(SAFETY_MARGIN_FACTOR)
            .bind(now_ms)
            .fetch_all(&mut *tx)
            .await
            .map_err(store_err)?;

            let mut recovered = Vec::with_capacity(dead_rows.len());
            for row in dead_rows {
                let dead_instance_id: String = row.try_get("instance_id").map_err(store_err)?;
                recover_instance(&mut tx, &self.sched_name, &dead_instance_id).await?;

                sqlx::query("DELETE FROM scheduler_state WHERE sched_name = $1 AND instance_id = $2")
                    .bind(&self.sched_name)
                    .bind(&dead_instance_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(store_err)?;

                warn!(dead_instance_id = %dead_instance_id, "recovered dead cluster instance");
                recovered.push(dead_instance_id);
            }

            tx.commit().await.map_err(store_err)?;
            Ok(recovered)
        })
        .await
    }

    /// Runs `checkin` then `scan_and_recover` on a fixed cadence until the
    /// token fires. Each iteration's failure is logged and retried on the
    /// next tick rather than aborting the loop.
    pub async fn run(self: std::sync::Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.checkin_interval);
        info!(instance_id = %self.instance_id, "cluster manager starting");
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.checkin().await {
                warn!(error = %e, "cluster checkin failed");
            }
            match self.scan_and_recover().await {
                Ok(recovered) if !recovered.is_empty() => {
                    info!(count = recovered.len(), "failover recovery completed");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failover scan failed"),
            }
        }
        info!(instance_id = %self.instance_id, "cluster manager stopped");
    }
}

/// Recovers every `fired_triggers` row owned by `dead_instance_id`: entries
/// requesting recovery become a one-shot trigger preserving the original
/// scheduled time and job data; everything else is released back to
/// `Waiting`, or deleted outright if the trigger already completed.
async fn recover_instance(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, sched_name: &str, dead_instance_id: &str) -> Result<()> {
    let fired_rows = sqlx::query(
        "SELECT fire_instance_id, trigger_name, trigger_group, job_name, job_group,
                scheduled_time, priority, requests_recovery, job_data
         FROM fired_triggers WHERE sched_name = $1 AND instance_id = $2",
    )
    .bind(sched_name)
    .bind(dead_instance_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(store_err)?;

    for row in fired_rows {
        let fire_instance_id: String = row.try_get("fire_instance_id").map_err(store_err)?;
        let trigger_name: String = row.try_get("trigger_name").map_err(store_err)?;
        let trigger_group: String = row.try_get("trigger_group").map_err(store_err)?;
        let job_name: String = row.try_get("job_name").map_err(store_err)?;
        let job_group: String = row.try_get("job_group").map_err(store_err)?;
        let scheduled_time: i64 = row.try_get("scheduled_time").map_err(store_err)?;
        let priority: i32 = row.try_get("priority").map_err(store_err)?;
        let requests_recovery: bool = row.try_get("requests_recovery").map_err(store_err)?;
        let job_data: sqlx::types::Json<serde_json::Value> = row.try_get("job_data").map_err(store_err)?;

        if requests_recovery {
            let recovery_name = format!("recover-{fire_instance_id}");
            let mut data = job_data.0;
            if let serde_json::Value::Object(map) = &mut data {
                map.insert("quartz_recovering_job".into(), serde_json::Value::Bool(true));
                map.insert("quartz_failed_fire_instance_id".into(), serde_json::Value::String(fire_instance_id.clone()));
            }

            sqlx::query(
                "INSERT INTO triggers (sched_name, trigger_name, trigger_group, job_name, job_group,
                    next_fire_time, priority, trigger_state, trigger_type, start_time, misfire_instr, job_data)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, 'WAITING', 'S', $6, 1, $8)",
            )
            .bind(sched_name)
            .bind(&recovery_name)
            .bind(&trigger_group)
            .bind(&job_name)
            .bind(&job_group)
            .bind(scheduled_time)
            .bind(priority)
            .bind(sqlx::types::Json(data))
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;

            sqlx::query(
                "INSERT INTO simple_triggers (sched_name, trigger_name, trigger_group, repeat_interval, repeat_count)
                 VALUES ($1, $2, $3, 0, 0)",
            )
            .bind(sched_name)
            .bind(&recovery_name)
            .bind(&trigger_group)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        } else {
            let current_state: Option<String> = sqlx::query_scalar(
                "SELECT trigger_state FROM triggers WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3",
            )
            .bind(sched_name)
            .bind(&trigger_name)
            .bind(&trigger_group)
            .fetch_optional(&mut **tx)
            .await
            .map_err(store_err)?;

            match current_state.as_deref() {
                Some("COMPLETE") => {
                    sqlx::query("DELETE FROM triggers WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3")
                        .bind(sched_name)
                        .bind(&trigger_name)
                        .bind(&trigger_group)
                        .execute(&mut **tx)
                        .await
                        .map_err(store_err)?;
                }
                Some(_) => {
                    sqlx::query(
                        "UPDATE triggers SET trigger_state = 'WAITING'
                         WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3",
                    )
                    .bind(sched_name)
                    .bind(&trigger_name)
                    .bind(&trigger_group)
                    .execute(&mut **tx)
                    .await
                    .map_err(store_err)?;
                }
                None => {}
            }
        }

        sqlx::query("DELETE FROM fired_triggers WHERE sched_name = $1 AND fire_instance_id = $2")
            .bind(sched_name)
            .bind(&fire_instance_id)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
    }

    Ok(())
}
