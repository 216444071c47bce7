//! The clustered, transactional store: Postgres rows for jobs, triggers,
//! calendars, and cluster coordination state, guarded by the row-lock
//! semaphore for the invariants `FOR UPDATE SKIP LOCKED` alone can't give.

mod delegate;
pub mod lock;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::{types::Json, PgPool, Row};

use self::lock::{LockRetryPolicy, TRIGGER_ACCESS};
use super::{FireResult, JobStore};
use crate::error::{QuartzError, Result};
use crate::model::{
    Calendar, CompletionInstruction, GroupMatcher, JobDataMap, JobDetail, JobKey,
    MisfirePolicy, Trigger, TriggerKey, TriggerState,
};
use crate::registry::JobRegistry;
use crate::schedule;

fn store_err(e: sqlx::Error) -> QuartzError {
    QuartzError::StoreTransient(e.into())
}

fn trigger_state_str(state: TriggerState) -> &'static str {
    match state {
        TriggerState::Waiting => "WAITING",
        TriggerState::Acquired => "ACQUIRED",
        TriggerState::Executing => "EXECUTING",
        TriggerState::Complete => "COMPLETE",
        TriggerState::Paused => "PAUSED",
        TriggerState::PausedBlocked => "PAUSED_BLOCKED",
        TriggerState::Blocked => "BLOCKED",
        TriggerState::Error => "ERROR",
    }
}

fn trigger_state_from_str(s: &str) -> Result<TriggerState> {
    Ok(match s {
        "WAITING" => TriggerState::Waiting,
        "ACQUIRED" => TriggerState::Acquired,
        "EXECUTING" => TriggerState::Executing,
        "COMPLETE" => TriggerState::Complete,
        "PAUSED" => TriggerState::Paused,
        "PAUSED_BLOCKED" => TriggerState::PausedBlocked,
        "BLOCKED" => TriggerState::Blocked,
        "ERROR" => TriggerState::Error,
        other => return Err(QuartzError::StoreFatal(anyhow::anyhow!("unknown trigger_state '{other}'"))),
    })
}

fn misfire_policy_to_i16(policy: MisfirePolicy) -> i16 {
    match policy {
        MisfirePolicy::SmartPolicy => 0,
        MisfirePolicy::FireNow => 1,
        MisfirePolicy::DoNothing => 2,
        MisfirePolicy::RescheduleNextWithRemainingCount => 3,
        MisfirePolicy::RescheduleNowWithExistingCount => 4,
        MisfirePolicy::RescheduleNowWithRemainingCount => 5,
        MisfirePolicy::IgnoreMisfirePolicy => 6,
    }
}

fn misfire_policy_from_i16(code: i16) -> MisfirePolicy {
    match code {
        1 => MisfirePolicy::FireNow,
        2 => MisfirePolicy::DoNothing,
        3 => MisfirePolicy::RescheduleNextWithRemainingCount,
        4 => MisfirePolicy::RescheduleNowWithExistingCount,
        5 => MisfirePolicy::RescheduleNowWithRemainingCount,
        6 => MisfirePolicy::IgnoreMisfirePolicy,
        _ => MisfirePolicy::SmartPolicy,
    }
}

/// The clustered SQL job store. `sched_name` scopes a logical scheduler
/// (and its rows) within a database shared by other scheduler instances.
pub struct PostgresJobStore {
    pool: PgPool,
    sched_name: String,
    lock_retry: LockRetryPolicy,
    registry: Arc<JobRegistry>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool, sched_name: impl Into<String>, registry: Arc<JobRegistry>) -> Self {
        Self { pool, sched_name: sched_name.into(), lock_retry: LockRetryPolicy::default(), registry }
    }

    pub fn with_lock_retry(mut self, policy: LockRetryPolicy) -> Self {
        self.lock_retry = policy;
        self
    }

    /// The underlying connection pool, shared with the cluster manager so
    /// checkins and failover recovery run against the same database.
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn sched_name(&self) -> &str {
        &self.sched_name
    }

    async fn load_trigger_row(&self, row: &sqlx::postgres::PgRow) -> Result<Trigger> {
        let trigger_name: String = row.try_get("trigger_name").map_err(store_err)?;
        let trigger_group: String = row.try_get("trigger_group").map_err(store_err)?;
        let job_name: String = row.try_get("job_name").map_err(store_err)?;
        let job_group: String = row.try_get("job_group").map_err(store_err)?;
        let trigger_type: String = row.try_get("trigger_type").map_err(store_err)?;
        let discriminator = trigger_type.chars().next().unwrap_or('S');

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let delegate = delegate::delegate_for(discriminator)?;
        let schedule_payload = delegate.load(&mut tx, &self.sched_name, &trigger_name, &trigger_group).await?;
        tx.commit().await.map_err(store_err)?;

        let job_data: Json<JobDataMap> = row.try_get("job_data").map_err(store_err)?;
        let state: String = row.try_get("trigger_state").map_err(store_err)?;
        let start_time_ms: i64 = row.try_get("start_time").map_err(store_err)?;
        let end_time_ms: Option<i64> = row.try_get("end_time").map_err(store_err)?;
        let next_fire_time_ms: Option<i64> = row.try_get("next_fire_time").map_err(store_err)?;
        let prev_fire_time_ms: Option<i64> = row.try_get("prev_fire_time").map_err(store_err)?;
        let description: Option<String> = row.try_get("description").map_err(store_err)?;
        let calendar_name: Option<String> = row.try_get("calendar_name").map_err(store_err)?;

        let mut trigger = Trigger::builder()
            .key(TriggerKey::new(trigger_name, Some(trigger_group))?)
            .job_key(JobKey::new(job_name, Some(job_group))?)
            .start_time(millis_to_time(start_time_ms))
            .priority(row.try_get::<i32, _>("priority").map_err(store_err)?)
            .job_data_map(job_data.0)
            .state(trigger_state_from_str(&state)?)
            .schedule(schedule_payload)
            .build();
        trigger.description = description;
        trigger.calendar_name = calendar_name;
        trigger.end_time = end_time_ms.map(millis_to_time);
        trigger.next_fire_time = next_fire_time_ms.map(millis_to_time);
        trigger.previous_fire_time = prev_fire_time_ms.map(millis_to_time);
        trigger.misfire_policy = misfire_policy_from_i16(row.try_get("misfire_instr").map_err(store_err)?);
        Ok(trigger)
    }
}

fn millis_to_time(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn time_to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn store_job(&self, job: JobDetail, replace_existing: bool) -> Result<()> {
        let conflict = if replace_existing {
            "DO UPDATE SET description = EXCLUDED.description, job_type = EXCLUDED.job_type,
                           is_durable = EXCLUDED.is_durable, requests_recovery = EXCLUDED.requests_recovery,
                           job_data = EXCLUDED.job_data"
        } else {
            "DO NOTHING"
        };
        let sql = format!(
            "INSERT INTO job_details (sched_name, job_name, job_group, description, job_type,
                                       is_durable, requests_recovery, job_data)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (sched_name, job_name, job_group) {conflict}"
        );
        sqlx::query(&sql)
            .bind(&self.sched_name)
            .bind(&job.key.name)
            .bind(&job.key.group)
            .bind(&job.description)
            .bind(&job.job_type)
            .bind(job.durable)
            .bind(job.requests_recovery)
            .bind(Json(&job.job_data_map))
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn store_trigger(&self, mut trigger: Trigger, replace_existing: bool) -> Result<()> {
        trigger.validate()?;
        if trigger.next_fire_time.is_none() {
            trigger.next_fire_time = schedule::first_fire_time(&trigger, None)?;
        }
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        lock::acquire(&self.pool, &mut tx, &self.sched_name, TRIGGER_ACCESS, self.lock_retry).await?;

        let paused: bool = sqlx::query(
            "SELECT 1 FROM paused_trigger_groups WHERE sched_name = $1 AND trigger_group = $2",
        )
        .bind(&self.sched_name)
        .bind(&trigger.key.group)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?
        .is_some();
        if paused {
            trigger.state = TriggerState::Paused;
        }

        let conflict = if replace_existing {
            "DO UPDATE SET next_fire_time = EXCLUDED.next_fire_time, prev_fire_time = EXCLUDED.prev_fire_time,
                           priority = EXCLUDED.priority, trigger_state = EXCLUDED.trigger_state,
                           start_time = EXCLUDED.start_time, end_time = EXCLUDED.end_time,
                           calendar_name = EXCLUDED.calendar_name, job_data = EXCLUDED.job_data"
        } else {
            "DO NOTHING"
        };
        let sql = format!(
            "INSERT INTO triggers (sched_name, trigger_name, trigger_group, job_name, job_group, description,
                                    next_fire_time, prev_fire_time, priority, trigger_state, trigger_type,
                                    start_time, end_time, calendar_name, misfire_instr, job_data)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
             ON CONFLICT (sched_name, trigger_name, trigger_group) {conflict}"
        );
        sqlx::query(&sql)
            .bind(&self.sched_name)
            .bind(&trigger.key.name)
            .bind(&trigger.key.group)
            .bind(&trigger.job_key.name)
            .bind(&trigger.job_key.group)
            .bind(&trigger.description)
            .bind(trigger.next_fire_time.map(time_to_millis))
            .bind(trigger.previous_fire_time.map(time_to_millis))
            .bind(trigger.priority)
            .bind(trigger_state_str(trigger.state))
            .bind(trigger.schedule.discriminator().to_string())
            .bind(time_to_millis(trigger.start_time))
            .bind(trigger.end_time.map(time_to_millis))
            .bind(&trigger.calendar_name)
            .bind(misfire_policy_to_i16(trigger.misfire_policy))
            .bind(Json(&trigger.job_data_map))
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        let delegate = delegate::delegate_for_schedule(&trigger.schedule);
        delegate.insert(&mut tx, &self.sched_name, &trigger.key.name, &trigger.key.group, &trigger.schedule).await?;

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn remove_job(&self, key: &JobKey) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        sqlx::query("DELETE FROM triggers WHERE sched_name = $1 AND job_name = $2 AND job_group = $3")
            .bind(&self.sched_name)
            .bind(&key.name)
            .bind(&key.group)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        let deleted = sqlx::query("DELETE FROM job_details WHERE sched_name = $1 AND job_name = $2 AND job_group = $3")
            .bind(&self.sched_name)
            .bind(&key.name)
            .bind(&key.group)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        tx.commit().await.map_err(store_err)?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn remove_trigger(&self, key: &TriggerKey) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        lock::acquire(&self.pool, &mut tx, &self.sched_name, TRIGGER_ACCESS, self.lock_retry).await?;

        let row = sqlx::query(
            "SELECT job_name, job_group, trigger_type FROM triggers
             WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3",
        )
        .bind(&self.sched_name)
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;
        let Some(row) = row else { return Ok(false) };
        let job_name: String = row.try_get("job_name").map_err(store_err)?;
        let job_group: String = row.try_get("job_group").map_err(store_err)?;
        let trigger_type: String = row.try_get("trigger_type").map_err(store_err)?;
        let discriminator = trigger_type.chars().next().unwrap_or('S');

        delegate::delegate_for(discriminator)?
            .delete(&mut tx, &self.sched_name, &key.name, &key.group)
            .await?;
        sqlx::query("DELETE FROM triggers WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3")
            .bind(&self.sched_name)
            .bind(&key.name)
            .bind(&key.group)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        let remaining: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM triggers WHERE sched_name = $1 AND job_name = $2 AND job_group = $3",
        )
        .bind(&self.sched_name)
        .bind(&job_name)
        .bind(&job_group)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_err)?;

        if remaining == 0 {
            sqlx::query(
                "DELETE FROM job_details
                 WHERE sched_name = $1 AND job_name = $2 AND job_group = $3 AND is_durable = false",
            )
            .bind(&self.sched_name)
            .bind(&job_name)
            .bind(&job_group)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;
        Ok(true)
    }

    async fn replace_trigger(&self, key: &TriggerKey, mut new_trigger: Trigger) -> Result<bool> {
        new_trigger.key = key.clone();
        if !self.check_trigger_exists(key).await? {
            return Ok(false);
        }
        self.remove_trigger(key).await?;
        self.store_trigger(new_trigger, true).await?;
        Ok(true)
    }

    async fn check_job_exists(&self, key: &JobKey) -> Result<bool> {
        Ok(sqlx::query(
            "SELECT 1 FROM job_details WHERE sched_name = $1 AND job_name = $2 AND job_group = $3",
        )
        .bind(&self.sched_name)
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?
        .is_some())
    }

    async fn check_trigger_exists(&self, key: &TriggerKey) -> Result<bool> {
        Ok(sqlx::query(
            "SELECT 1 FROM triggers WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3",
        )
        .bind(&self.sched_name)
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?
        .is_some())
    }

    async fn retrieve_job(&self, key: &JobKey) -> Result<Option<JobDetail>> {
        let row = sqlx::query(
            "SELECT job_name, job_group, description, job_type, is_durable, requests_recovery, job_data
             FROM job_details WHERE sched_name = $1 AND job_name = $2 AND job_group = $3",
        )
        .bind(&self.sched_name)
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        let Some(row) = row else { return Ok(None) };
        let job_data: Json<JobDataMap> = row.try_get("job_data").map_err(store_err)?;
        let description: Option<String> = row.try_get("description").map_err(store_err)?;
        let mut job = JobDetail::builder()
            .key(JobKey::new(
                row.try_get::<String, _>("job_name").map_err(store_err)?,
                Some(row.try_get::<String, _>("job_group").map_err(store_err)?),
            )?)
            .job_type(row.try_get::<String, _>("job_type").map_err(store_err)?)
            .job_data_map(job_data.0)
            .durable(row.try_get("is_durable").map_err(store_err)?)
            .requests_recovery(row.try_get("requests_recovery").map_err(store_err)?)
            .build();
        job.description = description;
        Ok(Some(job))
    }

    async fn retrieve_trigger(&self, key: &TriggerKey) -> Result<Option<Trigger>> {
        let row = sqlx::query(
            "SELECT * FROM triggers WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3",
        )
        .bind(&self.sched_name)
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        match row {
            Some(row) => Ok(Some(self.load_trigger_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn get_job_keys(&self, matcher: &GroupMatcher) -> Result<Vec<JobKey>> {
        let rows = sqlx::query("SELECT job_name, job_group FROM job_details WHERE sched_name = $1")
            .bind(&self.sched_name)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        let mut keys = Vec::new();
        for row in rows {
            let group: String = row.try_get("job_group").map_err(store_err)?;
            if matcher.matches(&group) {
                keys.push(JobKey::new(row.try_get::<String, _>("job_name").map_err(store_err)?, Some(group))?);
            }
        }
        Ok(keys)
    }

    async fn get_trigger_keys(&self, matcher: &GroupMatcher) -> Result<Vec<TriggerKey>> {
        let rows = sqlx::query("SELECT trigger_name, trigger_group FROM triggers WHERE sched_name = $1")
            .bind(&self.sched_name)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        let mut keys = Vec::new();
        for row in rows {
            let group: String = row.try_get("trigger_group").map_err(store_err)?;
            if matcher.matches(&group) {
                keys.push(TriggerKey::new(
                    row.try_get::<String, _>("trigger_name").map_err(store_err)?,
                    Some(group),
                )?);
            }
        }
        Ok(keys)
    }

    async fn pause_trigger(&self, key: &TriggerKey) -> Result<()> {
        sqlx::query(
            "UPDATE triggers SET trigger_state = 'PAUSED'
             WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3 AND trigger_state != 'COMPLETE'",
        )
        .bind(&self.sched_name)
        .bind(&key.name)
        .bind(&key.group)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn pause_triggers(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        lock::acquire(&self.pool, &mut tx, &self.sched_name, TRIGGER_ACCESS, self.lock_retry).await?;
        let keys = self.get_trigger_keys(matcher).await?;
        let mut groups: Vec<String> = Vec::new();
        for key in &keys {
            sqlx::query(
                "UPDATE triggers SET trigger_state = 'PAUSED'
                 WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3 AND trigger_state != 'COMPLETE'",
            )
            .bind(&self.sched_name)
            .bind(&key.name)
            .bind(&key.group)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
            if !groups.contains(&key.group) {
                groups.push(key.group.clone());
            }
        }
        for group in &groups {
            sqlx::query(
                "INSERT INTO paused_trigger_groups (sched_name, trigger_group) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(&self.sched_name)
            .bind(group)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        Ok(groups)
    }

    async fn resume_trigger(&self, key: &TriggerKey) -> Result<()> {
        sqlx::query(
            "UPDATE triggers SET trigger_state = 'WAITING'
             WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3
               AND trigger_state IN ('PAUSED', 'PAUSED_BLOCKED')",
        )
        .bind(&self.sched_name)
        .bind(&key.name)
        .bind(&key.group)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn resume_triggers(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        lock::acquire(&self.pool, &mut tx, &self.sched_name, TRIGGER_ACCESS, self.lock_retry).await?;
        let keys = self.get_trigger_keys(matcher).await?;
        let mut groups: Vec<String> = Vec::new();
        for key in &keys {
            sqlx::query(
                "UPDATE triggers SET trigger_state = 'WAITING'
                 WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3
                   AND trigger_state IN ('PAUSED', 'PAUSED_BLOCKED')",
            )
            .bind(&self.sched_name)
            .bind(&key.name)
            .bind(&key.group)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
            if !groups.contains(&key.group) {
                groups.push(key.group.clone());
            }
        }
        for group in &groups {
            sqlx::query("DELETE FROM paused_trigger_groups WHERE sched_name = $1 AND trigger_group = $2")
                .bind(&self.sched_name)
                .bind(group)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        Ok(groups)
    }

    async fn pause_job(&self, key: &JobKey) -> Result<()> {
        sqlx::query(
            "UPDATE triggers SET trigger_state = 'PAUSED'
             WHERE sched_name = $1 AND job_name = $2 AND job_group = $3 AND trigger_state != 'COMPLETE'",
        )
        .bind(&self.sched_name)
        .bind(&key.name)
        .bind(&key.group)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn resume_job(&self, key: &JobKey) -> Result<()> {
        sqlx::query(
            "UPDATE triggers SET trigger_state = 'WAITING'
             WHERE sched_name = $1 AND job_name = $2 AND job_group = $3
               AND trigger_state IN ('PAUSED', 'PAUSED_BLOCKED')",
        )
        .bind(&self.sched_name)
        .bind(&key.name)
        .bind(&key.group)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> Result<Vec<Trigger>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        lock::acquire(&self.pool, &mut tx, &self.sched_name, TRIGGER_ACCESS, self.lock_retry).await?;

        let deadline = time_to_millis(no_later_than + time_window);
        let rows = sqlx::query(
            "WITH due AS (
                 SELECT trigger_name, trigger_group FROM triggers
                 WHERE sched_name = $1 AND trigger_state = 'WAITING' AND next_fire_time <= $2
                 ORDER BY next_fire_time ASC, priority DESC, trigger_name ASC
                 LIMIT $3
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE triggers t SET trigger_state = 'ACQUIRED'
             FROM due WHERE t.sched_name = $1 AND t.trigger_name = due.trigger_name AND t.trigger_group = due.trigger_group
             RETURNING t.*",
        )
        .bind(&self.sched_name)
        .bind(deadline)
        .bind(max_count as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(store_err)?;

        let mut acquired = Vec::with_capacity(rows.len());
        for row in &rows {
            acquired.push(self.load_trigger_row(row).await?);
        }
        tx.commit().await.map_err(store_err)?;
        Ok(acquired)
    }

    async fn triggers_fired(&self, acquired: &[Trigger]) -> Result<Vec<FireResult>> {
        let mut results = Vec::new();
        for trigger in acquired {
            let Some(job) = self.retrieve_job(&trigger.job_key).await? else { continue };
            let capabilities = job.effective_capabilities(self.registry.capabilities(&job.job_type));

            let mut tx = self.pool.begin().await.map_err(store_err)?;
            lock::acquire(&self.pool, &mut tx, &self.sched_name, TRIGGER_ACCESS, self.lock_retry).await?;

            let job_is_now_blocked = if capabilities.concurrent_execution_disallowed {
                let blocked: bool = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM fired_triggers WHERE sched_name = $1 AND job_name = $2
                         AND job_group = $3 AND state = 'EXECUTING')",
                )
                .bind(&self.sched_name)
                .bind(&job.key.name)
                .bind(&job.key.group)
                .fetch_one(&mut *tx)
                .await
                .map_err(store_err)?;
                if blocked {
                    sqlx::query(
                        "UPDATE triggers SET trigger_state = 'BLOCKED'
                         WHERE sched_name = $1 AND job_name = $2 AND job_group = $3 AND trigger_state = 'WAITING'",
                    )
                    .bind(&self.sched_name)
                    .bind(&job.key.name)
                    .bind(&job.key.group)
                    .execute(&mut *tx)
                    .await
                    .map_err(store_err)?;
                    sqlx::query(
                        "UPDATE triggers SET trigger_state = 'PAUSED_BLOCKED'
                         WHERE sched_name = $1 AND job_name = $2 AND job_group = $3 AND trigger_state = 'PAUSED'",
                    )
                    .bind(&self.sched_name)
                    .bind(&job.key.name)
                    .bind(&job.key.group)
                    .execute(&mut *tx)
                    .await
                    .map_err(store_err)?;
                }
                blocked
            } else {
                false
            };

            let mut fired = trigger.clone();
            fired.previous_fire_time = fired.next_fire_time;
            let next = schedule::fire_time_after(&fired, fired.next_fire_time.unwrap_or(fired.start_time), None)?;
            fired.next_fire_time = next;
            fired.state = if next.is_none() { TriggerState::Complete } else { TriggerState::Executing };

            sqlx::query(
                "UPDATE triggers SET trigger_state = $4, next_fire_time = $5, prev_fire_time = $6
                 WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3",
            )
            .bind(&self.sched_name)
            .bind(&fired.key.name)
            .bind(&fired.key.group)
            .bind(trigger_state_str(fired.state))
            .bind(fired.next_fire_time.map(time_to_millis))
            .bind(fired.previous_fire_time.map(time_to_millis))
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

            let fire_instance_id = uuid::Uuid::now_v7().to_string();
            sqlx::query(
                "INSERT INTO fired_triggers
                    (sched_name, fire_instance_id, trigger_name, trigger_group, job_name, job_group,
                     instance_id, fired_time, scheduled_time, state, priority,
                     is_nonconcurrent, requests_recovery, job_data)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,'EXECUTING',$10,$11,$12,$13)",
            )
            .bind(&self.sched_name)
            .bind(&fire_instance_id)
            .bind(&fired.key.name)
            .bind(&fired.key.group)
            .bind(&job.key.name)
            .bind(&job.key.group)
            .bind(&self.sched_name)
            .bind(time_to_millis(Utc::now()))
            .bind(fired.previous_fire_time.map(time_to_millis).unwrap_or_else(|| time_to_millis(Utc::now())))
            .bind(fired.priority)
            .bind(capabilities.concurrent_execution_disallowed)
            .bind(job.requests_recovery)
            .bind(Json(&fired.job_data_map))
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

            tx.commit().await.map_err(store_err)?;
            results.push(FireResult { trigger: fired, job_detail: job, job_is_now_blocked });
        }
        Ok(results)
    }

    async fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job_detail: &JobDetail,
        instruction: CompletionInstruction,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        lock::acquire(&self.pool, &mut tx, &self.sched_name, TRIGGER_ACCESS, self.lock_retry).await?;

        sqlx::query("DELETE FROM fired_triggers WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3")
            .bind(&self.sched_name)
            .bind(&trigger.key.name)
            .bind(&trigger.key.group)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        let capabilities = job_detail.effective_capabilities(self.registry.capabilities(&job_detail.job_type));
        if capabilities.concurrent_execution_disallowed {
            let still_running: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM fired_triggers WHERE sched_name = $1 AND job_name = $2 AND job_group = $3)",
            )
            .bind(&self.sched_name)
            .bind(&job_detail.key.name)
            .bind(&job_detail.key.group)
            .fetch_one(&mut *tx)
            .await
            .map_err(store_err)?;
            if !still_running {
                sqlx::query(
                    "UPDATE triggers SET trigger_state = 'WAITING'
                     WHERE sched_name = $1 AND job_name = $2 AND job_group = $3 AND trigger_state = 'BLOCKED'",
                )
                .bind(&self.sched_name)
                .bind(&job_detail.key.name)
                .bind(&job_detail.key.group)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
                sqlx::query(
                    "UPDATE triggers SET trigger_state = 'PAUSED'
                     WHERE sched_name = $1 AND job_name = $2 AND job_group = $3 AND trigger_state = 'PAUSED_BLOCKED'",
                )
                .bind(&self.sched_name)
                .bind(&job_detail.key.name)
                .bind(&job_detail.key.group)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
        }

        match instruction {
            CompletionInstruction::Noop => {
                sqlx::query(
                    "UPDATE triggers SET trigger_state = 'WAITING'
                     WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3
                       AND trigger_state = 'EXECUTING' AND next_fire_time IS NOT NULL",
                )
                .bind(&self.sched_name)
                .bind(&trigger.key.name)
                .bind(&trigger.key.group)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
            CompletionInstruction::ReExecuteJob => {
                sqlx::query(
                    "UPDATE triggers SET trigger_state = 'WAITING', next_fire_time = $4
                     WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3",
                )
                .bind(&self.sched_name)
                .bind(&trigger.key.name)
                .bind(&trigger.key.group)
                .bind(time_to_millis(Utc::now()))
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
            CompletionInstruction::SetTriggerComplete => {
                sqlx::query(
                    "UPDATE triggers SET trigger_state = 'COMPLETE'
                     WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3",
                )
                .bind(&self.sched_name)
                .bind(&trigger.key.name)
                .bind(&trigger.key.group)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
            CompletionInstruction::DeleteTrigger => {
                tx.commit().await.map_err(store_err)?;
                self.remove_trigger(&trigger.key).await?;
                return Ok(());
            }
            CompletionInstruction::SetAllJobTriggersComplete => {
                sqlx::query(
                    "UPDATE triggers SET trigger_state = 'COMPLETE'
                     WHERE sched_name = $1 AND job_name = $2 AND job_group = $3",
                )
                .bind(&self.sched_name)
                .bind(&job_detail.key.name)
                .bind(&job_detail.key.group)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
            CompletionInstruction::SetTriggerError => {
                sqlx::query(
                    "UPDATE triggers SET trigger_state = 'ERROR'
                     WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3",
                )
                .bind(&self.sched_name)
                .bind(&trigger.key.name)
                .bind(&trigger.key.group)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
            CompletionInstruction::SetAllJobTriggersError => {
                sqlx::query(
                    "UPDATE triggers SET trigger_state = 'ERROR'
                     WHERE sched_name = $1 AND job_name = $2 AND job_group = $3",
                )
                .bind(&self.sched_name)
                .bind(&job_detail.key.name)
                .bind(&job_detail.key.group)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
        }

        if capabilities.persist_job_data_after_execution {
            sqlx::query(
                "UPDATE job_details SET job_data = $4
                 WHERE sched_name = $1 AND job_name = $2 AND job_group = $3",
            )
            .bind(&self.sched_name)
            .bind(&job_detail.key.name)
            .bind(&job_detail.key.group)
            .bind(Json(&job_detail.job_data_map))
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn store_calendar(&self, calendar: Calendar, replace_existing: bool) -> Result<()> {
        let conflict = if replace_existing { "DO UPDATE SET definition = EXCLUDED.definition" } else { "DO NOTHING" };
        let sql = format!(
            "INSERT INTO calendars (sched_name, calendar_name, definition) VALUES ($1, $2, $3)
             ON CONFLICT (sched_name, calendar_name) {conflict}"
        );
        sqlx::query(&sql)
            .bind(&self.sched_name)
            .bind(&calendar.name)
            .bind(Json(&calendar))
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn retrieve_calendar(&self, name: &str) -> Result<Option<Calendar>> {
        let row = sqlx::query("SELECT definition FROM calendars WHERE sched_name = $1 AND calendar_name = $2")
            .bind(&self.sched_name)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        match row {
            Some(row) => {
                let def: Json<Calendar> = row.try_get("definition").map_err(store_err)?;
                Ok(Some(def.0))
            }
            None => Ok(None),
        }
    }

    async fn remove_calendar(&self, name: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM calendars WHERE sched_name = $1 AND calendar_name = $2")
            .bind(&self.sched_name)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(deleted.rows_affected() > 0)
    }
}
