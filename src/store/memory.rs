//! A single-mutex, in-process store: no persistence, used for tests and
//! single-node deployments that don't need clustering.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use super::{FireResult, JobStore};
use crate::error::{QuartzError, Result};
use crate::model::{
    Calendar, CompletionInstruction, GroupMatcher, JobDetail, JobKey, Trigger,
    TriggerKey, TriggerState,
};
use crate::registry::JobRegistry;
use crate::schedule;

/// A lazily-validated entry in the acquire-order heap: popped entries are
/// checked against the live trigger map and discarded if stale (the
/// trigger moved on, was removed, or was rescheduled since this entry was
/// pushed).
struct HeapEntry {
    next_fire_time: DateTime<Utc>,
    priority: i32,
    key: TriggerKey,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.next_fire_time == other.next_fire_time && self.priority == other.priority && self.key == other.key
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert `next_fire_time` so the
        // earliest-due trigger sorts highest, keep `priority` as-is so a
        // higher priority sorts highest, and invert `key` for ascending
        // tie-break order.
        other
            .next_fire_time
            .cmp(&self.next_fire_time)
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| other.key.cmp(&self.key))
    }
}

#[derive(Default)]
struct State {
    jobs: HashMap<JobKey, JobDetail>,
    triggers: HashMap<TriggerKey, Trigger>,
    job_triggers: HashMap<JobKey, HashSet<TriggerKey>>,
    calendars: HashMap<String, Calendar>,
    paused_trigger_groups: HashSet<String>,
    paused_job_groups: HashSet<String>,
    blocked_jobs: HashSet<JobKey>,
    ready_heap: BinaryHeap<HeapEntry>,
}

impl State {
    fn push_ready(&mut self, trigger: &Trigger) {
        if let Some(next) = trigger.next_fire_time {
            if trigger.state == TriggerState::Waiting {
                self.ready_heap.push(HeapEntry {
                    next_fire_time: next,
                    priority: trigger.priority,
                    key: trigger.key.clone(),
                });
            }
        }
    }
}

/// An in-memory [`JobStore`] guarded by a single async mutex.
pub struct InMemoryJobStore {
    state: Mutex<State>,
    registry: Arc<JobRegistry>,
}

impl InMemoryJobStore {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { state: Mutex::new(State::default()), registry }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn store_job(&self, job: JobDetail, replace_existing: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.key) && !replace_existing {
            return Err(QuartzError::Validation(format!("job {} already exists", job.key)));
        }
        if !job.durable && !state.job_triggers.get(&job.key).is_some_and(|t| !t.is_empty()) {
            return Err(QuartzError::NonDurableJobWithoutTrigger(job.key.clone()));
        }
        state.job_triggers.entry(job.key.clone()).or_default();
        state.jobs.insert(job.key.clone(), job);
        Ok(())
    }

    async fn store_trigger(&self, mut trigger: Trigger, replace_existing: bool) -> Result<()> {
        trigger.validate()?;
        let mut state = self.state.lock().await;
        if state.triggers.contains_key(&trigger.key) && !replace_existing {
            return Err(QuartzError::Validation(format!("trigger {} already exists", trigger.key)));
        }
        if !state.jobs.contains_key(&trigger.job_key) {
            return Err(QuartzError::JobNotFound(trigger.job_key.clone()));
        }
        if trigger.next_fire_time.is_none() {
            trigger.next_fire_time = schedule::first_fire_time(&trigger, None)?;
        }
        if state.paused_job_groups.contains(&trigger.job_key.group)
            || state.paused_trigger_groups.contains(&trigger.key.group)
        {
            trigger.state = TriggerState::Paused;
        }
        state.job_triggers.entry(trigger.job_key.clone()).or_default().insert(trigger.key.clone());
        state.push_ready(&trigger);
        state.triggers.insert(trigger.key.clone(), trigger);
        Ok(())
    }

    async fn remove_job(&self, key: &JobKey) -> Result<bool> {
        let mut state = self.state.lock().await;
        let trigger_keys = state.job_triggers.remove(key).unwrap_or_default();
        for tk in &trigger_keys {
            state.triggers.remove(tk);
        }
        Ok(state.jobs.remove(key).is_some())
    }

    async fn remove_trigger(&self, key: &TriggerKey) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(trigger) = state.triggers.remove(key) else { return Ok(false) };
        if let Some(set) = state.job_triggers.get_mut(&trigger.job_key) {
            set.remove(key);
            let now_empty = set.is_empty();
            if now_empty {
                if let Some(job) = state.jobs.get(&trigger.job_key) {
                    if !job.durable {
                        let job_key = trigger.job_key.clone();
                        state.jobs.remove(&job_key);
                        state.job_triggers.remove(&job_key);
                    }
                }
            }
        }
        Ok(true)
    }

    async fn replace_trigger(&self, key: &TriggerKey, mut new_trigger: Trigger) -> Result<bool> {
        new_trigger.validate()?;
        let mut state = self.state.lock().await;
        if !state.triggers.contains_key(key) {
            return Ok(false);
        }
        new_trigger.key = key.clone();
        if new_trigger.next_fire_time.is_none() {
            new_trigger.next_fire_time = schedule::first_fire_time(&new_trigger, None)?;
        }
        state.push_ready(&new_trigger);
        state.triggers.insert(key.clone(), new_trigger);
        Ok(true)
    }

    async fn check_job_exists(&self, key: &JobKey) -> Result<bool> {
        Ok(self.state.lock().await.jobs.contains_key(key))
    }

    async fn check_trigger_exists(&self, key: &TriggerKey) -> Result<bool> {
        Ok(self.state.lock().await.triggers.contains_key(key))
    }

    async fn retrieve_job(&self, key: &JobKey) -> Result<Option<JobDetail>> {
        Ok(self.state.lock().await.jobs.get(key).cloned())
    }

    async fn retrieve_trigger(&self, key: &TriggerKey) -> Result<Option<Trigger>> {
        Ok(self.state.lock().await.triggers.get(key).cloned())
    }

    async fn get_job_keys(&self, matcher: &GroupMatcher) -> Result<Vec<JobKey>> {
        Ok(self
            .state
            .lock()
            .await
            .jobs
            .keys()
            .filter(|k| matcher.matches(&k.group))
            .cloned()
            .collect())
    }

    async fn get_trigger_keys(&self, matcher: &GroupMatcher) -> Result<Vec<TriggerKey>> {
        Ok(self
            .state
            .lock()
            .await
            .triggers
            .keys()
            .filter(|k| matcher.matches(&k.group))
            .cloned()
            .collect())
    }

    async fn pause_trigger(&self, key: &TriggerKey) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(t) = state.triggers.get_mut(key) {
            if t.state != TriggerState::Complete {
                t.state = TriggerState::Paused;
            }
        }
        Ok(())
    }

    async fn pause_triggers(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        let mut groups = HashSet::new();
        let keys: Vec<TriggerKey> =
            state.triggers.keys().filter(|k| matcher.matches(&k.group)).cloned().collect();
        for key in &keys {
            groups.insert(key.group.clone());
            if let Some(t) = state.triggers.get_mut(key) {
                if t.state != TriggerState::Complete {
                    t.state = TriggerState::Paused;
                }
            }
        }
        for g in &groups {
            state.paused_trigger_groups.insert(g.clone());
        }
        Ok(groups.into_iter().collect())
    }

    async fn resume_trigger(&self, key: &TriggerKey) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(t) = state.triggers.get_mut(key) {
            if t.state == TriggerState::Paused || t.state == TriggerState::PausedBlocked {
                t.state =
                    if state.blocked_jobs.contains(&t.job_key) { TriggerState::Blocked } else { TriggerState::Waiting };
                state.push_ready(t);
            }
        }
        Ok(())
    }

    async fn resume_triggers(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        let mut groups = Vec::new();
        let keys: Vec<TriggerKey> =
            state.triggers.keys().filter(|k| matcher.matches(&k.group)).cloned().collect();
        for key in &keys {
            if matcher.matches(&key.group) {
                groups.push(key.group.clone());
            }
            let blocked = state.blocked_jobs.clone();
            if let Some(t) = state.triggers.get_mut(key) {
                if t.state == TriggerState::Paused || t.state == TriggerState::PausedBlocked {
                    t.state = if blocked.contains(&t.job_key) { TriggerState::Blocked } else { TriggerState::Waiting };
                    let snapshot = t.clone();
                    state.push_ready(&snapshot);
                }
            }
        }
        state.paused_trigger_groups.retain(|g| !groups.contains(g));
        groups.sort();
        groups.dedup();
        Ok(groups)
    }

    async fn pause_job(&self, key: &JobKey) -> Result<()> {
        let mut state = self.state.lock().await;
        let trigger_keys: Vec<TriggerKey> = state.job_triggers.get(key).cloned().unwrap_or_default().into_iter().collect();
        for tk in trigger_keys {
            if let Some(t) = state.triggers.get_mut(&tk) {
                if t.state != TriggerState::Complete {
                    t.state = TriggerState::Paused;
                }
            }
        }
        state.paused_job_groups.insert(key.group.clone());
        Ok(())
    }

    async fn resume_job(&self, key: &JobKey) -> Result<()> {
        let mut state = self.state.lock().await;
        let trigger_keys: Vec<TriggerKey> = state.job_triggers.get(key).cloned().unwrap_or_default().into_iter().collect();
        for tk in trigger_keys {
            if let Some(t) = state.triggers.get_mut(&tk) {
                if t.state == TriggerState::Paused || t.state == TriggerState::PausedBlocked {
                    t.state = TriggerState::Waiting;
                    let snapshot = t.clone();
                    state.push_ready(&snapshot);
                }
            }
        }
        Ok(())
    }

    async fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> Result<Vec<Trigger>> {
        let mut state = self.state.lock().await;
        let deadline = no_later_than + time_window;
        let mut acquired = Vec::new();
        let mut skipped = Vec::new();

        while acquired.len() < max_count {
            let Some(entry) = state.ready_heap.pop() else { break };
            let Some(current) = state.triggers.get(&entry.key) else { continue };
            if current.state != TriggerState::Waiting || current.next_fire_time != Some(entry.next_fire_time) {
                continue; // stale heap entry
            }
            if entry.next_fire_time > deadline {
                skipped.push(entry);
                break;
            }
            let trigger = state.triggers.get_mut(&entry.key).expect("checked above");
            trigger.state = TriggerState::Acquired;
            acquired.push(trigger.clone());
        }
        for s in skipped {
            state.ready_heap.push(s);
        }
        Ok(acquired)
    }

    async fn triggers_fired(&self, acquired: &[Trigger]) -> Result<Vec<FireResult>> {
        let mut state = self.state.lock().await;
        let mut results = Vec::new();
        for trigger in acquired {
            let Some(stored) = state.triggers.get(&trigger.key).cloned() else { continue };
            if stored.state != TriggerState::Acquired {
                continue;
            }
            let Some(job) = state.jobs.get(&stored.job_key).cloned() else { continue };
            let capabilities = job.effective_capabilities(self.registry.capabilities(&job.job_type));

            let job_is_now_blocked = capabilities.concurrent_execution_disallowed
                && state.blocked_jobs.contains(&job.key);
            if capabilities.concurrent_execution_disallowed {
                state.blocked_jobs.insert(job.key.clone());
                if let Some(siblings) = state.job_triggers.get(&job.key).cloned() {
                    for tk in siblings {
                        if tk == stored.key {
                            continue;
                        }
                        if let Some(t) = state.triggers.get_mut(&tk) {
                            if t.state == TriggerState::Waiting {
                                t.state = TriggerState::Blocked;
                            } else if t.state == TriggerState::Paused {
                                t.state = TriggerState::PausedBlocked;
                            }
                        }
                    }
                }
            }

            let mut fired = stored.clone();
            fired.previous_fire_time = fired.next_fire_time;
            let next = schedule::fire_time_after(&fired, fired.next_fire_time.unwrap_or(fired.start_time), None)?;
            fired.next_fire_time = next;
            fired.state = if next.is_none() { TriggerState::Complete } else { TriggerState::Executing };
            state.triggers.insert(fired.key.clone(), fired.clone());

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
        let mut state = self.state.lock().await;
        let capabilities = job_detail.effective_capabilities(self.registry.capabilities(&job_detail.job_type));
        if capabilities.concurrent_execution_disallowed {
            state.blocked_jobs.remove(&job_detail.key);
            if let Some(siblings) = state.job_triggers.get(&job_detail.key).cloned() {
                for tk in siblings {
                    if let Some(t) = state.triggers.get_mut(&tk) {
                        if t.state == TriggerState::Blocked {
                            t.state = TriggerState::Waiting;
                            let snapshot = t.clone();
                            state.push_ready(&snapshot);
                        } else if t.state == TriggerState::PausedBlocked {
                            t.state = TriggerState::Paused;
                        }
                    }
                }
            }
        }

        match instruction {
            CompletionInstruction::Noop => {
                // The common case for a recurring trigger with remaining
                // fire times: return it to the waiting pool.
                if let Some(t) = state.triggers.get_mut(&trigger.key) {
                    if t.state == TriggerState::Executing && t.next_fire_time.is_some() {
                        t.state = TriggerState::Waiting;
                        let snapshot = t.clone();
                        state.push_ready(&snapshot);
                    }
                }
            }
            CompletionInstruction::ReExecuteJob => {
                if let Some(t) = state.triggers.get_mut(&trigger.key) {
                    t.next_fire_time = Some(Utc::now());
                    t.state = TriggerState::Waiting;
                    let snapshot = t.clone();
                    state.push_ready(&snapshot);
                }
            }
            CompletionInstruction::SetTriggerComplete => {
                if let Some(t) = state.triggers.get_mut(&trigger.key) {
                    t.state = TriggerState::Complete;
                }
            }
            CompletionInstruction::DeleteTrigger => {
                drop(state);
                self.remove_trigger(&trigger.key).await?;
                return Ok(());
            }
            CompletionInstruction::SetAllJobTriggersComplete => {
                if let Some(siblings) = state.job_triggers.get(&job_detail.key).cloned() {
                    for tk in siblings {
                        if let Some(t) = state.triggers.get_mut(&tk) {
                            t.state = TriggerState::Complete;
                        }
                    }
                }
            }
            CompletionInstruction::SetTriggerError => {
                if let Some(t) = state.triggers.get_mut(&trigger.key) {
                    t.state = TriggerState::Error;
                }
            }
            CompletionInstruction::SetAllJobTriggersError => {
                if let Some(siblings) = state.job_triggers.get(&job_detail.key).cloned() {
                    for tk in siblings {
                        if let Some(t) = state.triggers.get_mut(&tk) {
                            t.state = TriggerState::Error;
                        }
                    }
                }
            }
        }

        if capabilities.persist_job_data_after_execution {
            if let Some(job) = state.jobs.get_mut(&job_detail.key) {
                job.job_data_map = job_detail.job_data_map.clone();
            }
        }
        Ok(())
    }

    async fn store_calendar(&self, calendar: Calendar, replace_existing: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.calendars.contains_key(&calendar.name) && !replace_existing {
            return Err(QuartzError::Validation(format!("calendar {} already exists", calendar.name)));
        }
        state.calendars.insert(calendar.name.clone(), calendar);
        Ok(())
    }

    async fn retrieve_calendar(&self, name: &str) -> Result<Option<Calendar>> {
        Ok(self.state.lock().await.calendars.get(name).cloned())
    }

    async fn remove_calendar(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().await.calendars.remove(name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobKey, TriggerKey, TriggerSchedule};

    fn job(key: JobKey) -> JobDetail {
        JobDetail::builder().key(key).job_type("test:noop").durable(true).build()
    }

    fn trigger(key: TriggerKey, job_key: JobKey, start: DateTime<Utc>) -> Trigger {
        Trigger::builder()
            .key(key)
            .job_key(job_key)
            .start_time(start)
            .schedule(TriggerSchedule::Simple { repeat_interval_ms: 60_000, repeat_count: -1 })
            .build()
    }

    #[tokio::test]
    async fn store_and_retrieve_round_trip() {
        let store = InMemoryJobStore::new(Arc::new(JobRegistry::new()));
        let jk = JobKey::of("j1").unwrap();
        store.store_job(job(jk.clone()), false).await.unwrap();
        assert!(store.retrieve_job(&jk).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn non_durable_job_without_trigger_is_rejected() {
        let store = InMemoryJobStore::new(Arc::new(JobRegistry::new()));
        let jk = JobKey::of("j1").unwrap();
        let mut j = job(jk);
        j.durable = false;
        assert!(store.store_job(j, false).await.is_err());
    }

    #[tokio::test]
    async fn acquire_returns_only_due_triggers() {
        let store = InMemoryJobStore::new(Arc::new(JobRegistry::new()));
        let jk = JobKey::of("j1").unwrap();
        store.store_job(job(jk.clone()), false).await.unwrap();
        let tk = TriggerKey::of("t1").unwrap();
        let now = Utc::now();
        store.store_trigger(trigger(tk, jk, now + Duration::hours(1)), false).await.unwrap();

        let acquired = store.acquire_next_triggers(now, 10, Duration::seconds(0)).await.unwrap();
        assert!(acquired.is_empty());
    }

    #[tokio::test]
    async fn acquire_orders_by_fire_time_then_priority() {
        let store = InMemoryJobStore::new(Arc::new(JobRegistry::new()));
        let jk = JobKey::of("j1").unwrap();
        store.store_job(job(jk.clone()), false).await.unwrap();
        let now = Utc::now() - Duration::seconds(5);

        let mut low = trigger(TriggerKey::of("low").unwrap(), jk.clone(), now);
        low.priority = 1;
        let mut high = trigger(TriggerKey::of("high").unwrap(), jk.clone(), now);
        high.priority = 10;
        store.store_trigger(low, false).await.unwrap();
        store.store_trigger(high, false).await.unwrap();

        let acquired = store.acquire_next_triggers(Utc::now(), 10, Duration::seconds(0)).await.unwrap();
        assert_eq!(acquired.len(), 2);
        assert_eq!(acquired[0].key.name, "high");
    }

    #[tokio::test]
    async fn pausing_a_group_is_sticky_for_new_triggers() {
        let store = InMemoryJobStore::new(Arc::new(JobRegistry::new()));
        let jk = JobKey::of("j1", Some("G")).unwrap();
        store.store_job(job(jk.clone()), false).await.unwrap();
        store
            .pause_triggers(&GroupMatcher::Equals("G".into()))
            .await
            .unwrap();

        let tk = TriggerKey::new("t1", Some("G")).unwrap();
        store.store_trigger(trigger(tk.clone(), jk, Utc::now()), false).await.unwrap();
        let stored = store.retrieve_trigger(&tk).await.unwrap().unwrap();
        assert_eq!(stored.state, TriggerState::Paused);
    }
}
