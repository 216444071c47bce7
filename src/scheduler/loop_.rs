//! The acquire -> sleep -> fire pipeline run by `Scheduler::start`.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::misfire;
use super::{Scheduler, SchedulerState};

/// Runs until the scheduler's state is `ShuttingDown` or `Shutdown`. Honors
/// `Standby` by idling without acquiring; wakes early on
/// `Scheduler::notify_schedule_change`.
pub(super) async fn run(scheduler: Arc<Scheduler>) {
    loop {
        match scheduler.state() {
            SchedulerState::ShuttingDown | SchedulerState::Shutdown => break,
            SchedulerState::Standby | SchedulerState::Created => {
                wait_for_wakeup_or(&scheduler, scheduler.params.idle_wait_time).await;
                continue;
            }
            SchedulerState::Started => {}
        }

        // Step 1: wait for at least one free worker slot.
        let permit = scheduler.worker_pool.acquire_slot().await;

        if !matches!(scheduler.state(), SchedulerState::Started) {
            drop(permit);
            continue;
        }

        // Step 2: compute the acquire window and ask the store for due triggers.
        let no_later_than = Utc::now() + chrono::Duration::from_std(scheduler.params.idle_wait_time).unwrap_or(chrono::Duration::seconds(30));
        let acquired = match scheduler
            .store
            .acquire_next_triggers(no_later_than, scheduler.params.batch_size, scheduler.params.batch_time_window)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "failed to acquire triggers, backing off");
                drop(permit);
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
        };

        // Step 3: nothing due — sleep until idle_wait_time or a wakeup.
        if acquired.is_empty() {
            drop(permit);
            wait_for_wakeup_or(&scheduler, scheduler.params.idle_wait_time).await;
            continue;
        }

        debug!(count = acquired.len(), "acquired triggers");

        // Misfire detection: a trigger due well enough in the past gets its
        // misfire policy applied and the repair persisted before it fires.
        let now = Utc::now();
        let mut acquired = acquired;
        for trigger in acquired.iter_mut() {
            if misfire::has_misfired(&*trigger, now, scheduler.params.misfire_threshold) {
                for listener in scheduler.listeners.triggers.matching_trigger(&trigger.key) {
                    listener.trigger_misfired(&trigger.key).await;
                }
                let calendar = match &trigger.calendar_name {
                    Some(name) => scheduler.store.retrieve_calendar(name).await.ok().flatten(),
                    None => None,
                };
                if let Err(e) = misfire::apply(trigger, now, calendar.as_ref()) {
                    warn!(error = %e, trigger = %trigger.key, "failed to apply misfire policy");
                    continue;
                }
                if let Err(e) = scheduler.store.replace_trigger(&trigger.key.clone(), trigger.clone()).await {
                    warn!(error = %e, trigger = %trigger.key, "failed to persist misfire repair");
                }
            }
        }

        // Step 4: sleep until just before the earliest trigger's fire time.
        if let Some(first) = acquired.first() {
            if let Some(next) = first.next_fire_time {
                let threshold_half = scheduler.params.misfire_threshold / 2;
                let target = next - threshold_half;
                let until = target - Utc::now();
                if let Ok(std_duration) = until.to_std() {
                    let _ = timeout(std_duration, scheduler.wakeup.notified()).await;
                }
            }
        }

        if !matches!(scheduler.state(), SchedulerState::Started) {
            drop(permit);
            continue;
        }

        // Step 5: fire the acquired batch.
        match scheduler.store.triggers_fired(&acquired).await {
            Ok(results) => {
                let mut results = results.into_iter();
                if let Some(first_result) = results.next() {
                    scheduler.worker_pool.spawn_fire(permit, first_result);
                }
                for result in results {
                    let extra_permit = scheduler.worker_pool.acquire_slot().await;
                    scheduler.worker_pool.spawn_fire(extra_permit, result);
                }
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(error = %e, "transient failure firing triggers, backing off");
                } else {
                    error!(error = %e, "fatal failure firing triggers");
                }
                drop(permit);
            }
        }
    }
}

async fn wait_for_wakeup_or(scheduler: &Arc<Scheduler>, duration: std::time::Duration) {
    let _ = timeout(duration, scheduler.wakeup.notified()).await;
}
