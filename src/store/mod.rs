//! The pluggable persistence contract: an in-memory store for tests and
//! single-node use, and a clustered SQL store for production.

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::model::{
    Calendar, CompletionInstruction, GroupMatcher, JobDetail, JobKey, Trigger, TriggerKey,
};

/// The outcome of firing one previously-acquired trigger: the job to run,
/// its fully-advanced next fire time, and whether the job is now blocked by
/// a concurrently-executing instance of itself.
#[derive(Debug, Clone)]
pub struct FireResult {
    pub trigger: Trigger,
    pub job_detail: JobDetail,
    pub job_is_now_blocked: bool,
}

/// The persistence contract every store implementation fulfills: job and
/// trigger CRUD, pause/resume, and the atomic acquire/fire/complete
/// sequence the scheduling loop drives.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn store_job(&self, job: JobDetail, replace_existing: bool) -> Result<()>;
    async fn store_trigger(&self, trigger: Trigger, replace_existing: bool) -> Result<()>;
    async fn remove_job(&self, key: &JobKey) -> Result<bool>;
    async fn remove_trigger(&self, key: &TriggerKey) -> Result<bool>;
    async fn replace_trigger(&self, key: &TriggerKey, new_trigger: Trigger) -> Result<bool>;
    async fn check_job_exists(&self, key: &JobKey) -> Result<bool>;
    async fn check_trigger_exists(&self, key: &TriggerKey) -> Result<bool>;
    async fn retrieve_job(&self, key: &JobKey) -> Result<Option<JobDetail>>;
    async fn retrieve_trigger(&self, key: &TriggerKey) -> Result<Option<Trigger>>;
    async fn get_job_keys(&self, matcher: &GroupMatcher) -> Result<Vec<JobKey>>;
    async fn get_trigger_keys(&self, matcher: &GroupMatcher) -> Result<Vec<TriggerKey>>;

    async fn pause_trigger(&self, key: &TriggerKey) -> Result<()>;
    async fn pause_triggers(&self, matcher: &GroupMatcher) -> Result<Vec<String>>;
    async fn resume_trigger(&self, key: &TriggerKey) -> Result<()>;
    async fn resume_triggers(&self, matcher: &GroupMatcher) -> Result<Vec<String>>;
    async fn pause_job(&self, key: &JobKey) -> Result<()>;
    async fn resume_job(&self, key: &JobKey) -> Result<()>;

    /// Atomically acquire up to `max_count` `Waiting` triggers due within
    /// `time_window` of `no_later_than`, transitioning each to `Acquired`.
    /// Ordering: `(next_fire_time asc, priority desc, key asc)`.
    async fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> Result<Vec<Trigger>>;

    /// Transition acquired triggers to `Executing`, advancing each one's
    /// `next_fire_time` and resolving its `JobDetail`.
    async fn triggers_fired(&self, acquired: &[Trigger]) -> Result<Vec<FireResult>>;

    /// Apply the post-execution completion instruction, persisting an
    /// updated `job_data_map` when the job requests it.
    async fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job_detail: &JobDetail,
        instruction: CompletionInstruction,
    ) -> Result<()>;

    async fn store_calendar(&self, calendar: Calendar, replace_existing: bool) -> Result<()>;
    async fn retrieve_calendar(&self, name: &str) -> Result<Option<Calendar>>;
    async fn remove_calendar(&self, name: &str) -> Result<bool>;
}
