//! The bounded worker pool: tokio tasks gated by a counting semaphore, each
//! turning one fire bundle into a job execution and the listener fanout
//! around it.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::QuartzError;
use crate::listener::{ExecutionOutcome, ListenerManager};
use crate::model::CompletionInstruction;
use crate::registry::{JobExecutionContext, JobRegistry};
use crate::store::{FireResult, JobStore};

/// A bounded pool of job-execution slots. The scheduling loop waits for a
/// free slot before acquiring more triggers; a slot is released when the
/// spawned execution, and its listener fanout, finish.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    registry: Arc<JobRegistry>,
    store: Arc<dyn JobStore>,
    listeners: Arc<ListenerManager>,
}

impl WorkerPool {
    pub fn new(
        capacity: usize,
        registry: Arc<JobRegistry>,
        store: Arc<dyn JobStore>,
        listeners: Arc<ListenerManager>,
    ) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(capacity)), capacity, registry, store, listeners }
    }

    /// Number of idle worker slots right now.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Block until every slot is idle, i.e. every in-flight fire spawned by
    /// `spawn_fire` has finished and dropped its permit. Acquires and
    /// immediately releases all `capacity` permits at once, so a fire that
    /// completes and is re-acquired by a fresh one while we wait is still
    /// accounted for correctly (we just wait longer).
    pub async fn wait_for_idle(&self) {
        let _permits = self
            .semaphore
            .clone()
            .acquire_many_owned(self.capacity as u32)
            .await
            .expect("worker pool semaphore is never closed");
    }

    /// Wait for a free slot, then consume it for the lifetime of the
    /// returned permit. The scheduling loop holds this across the sleep
    /// preceding a fire so it can't acquire more triggers than it has
    /// capacity to run.
    pub async fn acquire_slot(&self) -> tokio::sync::OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker pool semaphore is never closed")
    }

    /// Run one fire bundle to completion in a new task, releasing its slot
    /// (via the dropped permit) when done. Listener and handler failures are
    /// fault-isolated: neither aborts the trigger's completion path.
    pub fn spawn_fire(&self, permit: tokio::sync::OwnedSemaphorePermit, fire: FireResult) -> tokio::task::JoinHandle<()> {
        let registry = self.registry.clone();
        let store = self.store.clone();
        let listeners = self.listeners.clone();

        tokio::spawn(async move {
            let _permit = permit;
            run_one(&registry, &store, &listeners, fire).await;
        })
    }
}

async fn run_one(
    registry: &JobRegistry,
    store: &Arc<dyn JobStore>,
    listeners: &ListenerManager,
    fire: FireResult,
) {
    let trigger_key = fire.trigger.key.clone();
    let job_key = fire.job_detail.key.clone();
    let span = tracing::info_span!(
        "job_execution",
        trigger = %trigger_key,
        job = %job_key,
        fire_instance_id = fire.trigger.fire_instance_id.as_deref().unwrap_or(""),
    );
    let _enter = span.enter();

    let ctx = JobExecutionContext {
        job_key: job_key.clone(),
        trigger_key: trigger_key.clone(),
        fire_instance_id: fire.trigger.fire_instance_id.clone().unwrap_or_default(),
        fire_time: chrono::Utc::now(),
        scheduled_fire_time: fire.trigger.previous_fire_time.unwrap_or(fire.trigger.start_time),
        job_data_map: fire.trigger.job_data_map.clone(),
        recovering: false,
    };

    for listener in listeners.triggers.matching_trigger(&trigger_key) {
        if listener.veto_job_execution(&ctx).await {
            listener.trigger_misfired(&trigger_key).await;
            info!("job execution vetoed by trigger listener");
            for job_listener in listeners.jobs.matching_job(&job_key) {
                job_listener.job_execution_vetoed(&ctx).await;
            }
            return;
        }
    }

    for listener in listeners.triggers.matching_trigger(&trigger_key) {
        listener.trigger_fired(&ctx).await;
    }
    for job_listener in listeners.jobs.matching_job(&job_key) {
        job_listener.job_to_be_executed(&ctx).await;
    }

    let handler = match registry.handler(&fire.job_detail.job_type) {
        Some(h) => h,
        None => {
            let message = QuartzError::UnknownJobType(fire.job_detail.job_type.clone()).to_string();
            error!(%message, "no handler registered for job type");
            notify_scheduler_error(listeners, &message, Some(&ctx)).await;
            return;
        }
    };

    let outcome = match handler.execute(&ctx).await {
        Ok(()) => ExecutionOutcome::Success,
        Err(e) => {
            warn!(error = %e.0, "job execution failed");
            ExecutionOutcome::Failed(e.0.to_string())
        }
    };

    for listener in listeners.triggers.matching_trigger(&trigger_key) {
        listener.trigger_complete(&ctx, &outcome).await;
    }
    for job_listener in listeners.jobs.matching_job(&job_key) {
        job_listener.job_was_executed(&ctx, &outcome).await;
    }

    let instruction = completion_instruction(&fire, &outcome);
    if let Err(e) = store.triggered_job_complete(&fire.trigger, &fire.job_detail, instruction).await {
        error!(error = %e, "failed to finalize trigger completion");
        notify_scheduler_error(listeners, &e.to_string(), Some(&ctx)).await;
    }
}

/// Derives the post-execution instruction from the outcome and the
/// trigger's already-advanced `next_fire_time` (set by `triggers_fired`
/// before the job ran).
fn completion_instruction(fire: &FireResult, outcome: &ExecutionOutcome) -> CompletionInstruction {
    match outcome {
        ExecutionOutcome::Success => {
            if fire.trigger.next_fire_time.is_some() {
                CompletionInstruction::Noop
            } else {
                CompletionInstruction::SetTriggerComplete
            }
        }
        ExecutionOutcome::Failed(_) => CompletionInstruction::SetTriggerError,
    }
}

async fn notify_scheduler_error(listeners: &ListenerManager, message: &str, ctx: Option<&JobExecutionContext>) {
    for listener in listeners.scheduler.all() {
        listener.scheduler_error(message, ctx).await;
    }
}
