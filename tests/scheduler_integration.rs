//! End-to-end tests driving a real `Scheduler` against the in-memory store,
//! exercising the acquire/fire/complete pipeline without a database.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use quartz_core::listener::ListenerManager;
use quartz_core::model::{JobDetail, JobKey, Trigger, TriggerKey, TriggerSchedule, TriggerState};
use quartz_core::registry::JobRegistry;
use quartz_core::scheduler::SchedulingParams;
use quartz_core::store::memory::InMemoryJobStore;
use quartz_core::store::JobStore;
use quartz_core::testing::MockJobHandler;
use quartz_core::Scheduler;

fn fast_params() -> SchedulingParams {
    SchedulingParams {
        idle_wait_time: StdDuration::from_millis(20),
        batch_size: 10,
        batch_time_window: Duration::zero(),
        misfire_threshold: Duration::seconds(60),
        worker_count: 4,
    }
}

async fn wait_until(mut check: impl FnMut() -> bool, timeout: StdDuration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met before timeout");
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
}

async fn wait_until_trigger_state(
    store: &dyn JobStore,
    key: &TriggerKey,
    expected: TriggerState,
    timeout: StdDuration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if store.retrieve_trigger(key).await.unwrap().map(|t| t.state) == Some(expected) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("trigger {key} did not reach {expected:?} before timeout");
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn a_due_simple_trigger_fires_and_reschedules() {
    let handler = Arc::new(MockJobHandler::new());

    let mut registry = JobRegistry::new();
    registry.register("noop", handler.clone(), Default::default());
    let registry = Arc::new(registry);

    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new(registry.clone()));

    let job_key = JobKey::of("job-1").unwrap();
    store
        .store_job(JobDetail::builder().key(job_key.clone()).job_type("noop").durable(true).build(), false)
        .await
        .unwrap();

    let trigger = Trigger::builder()
        .key(TriggerKey::of("trigger-1").unwrap())
        .job_key(job_key)
        .start_time(Utc::now() - Duration::seconds(1))
        .schedule(TriggerSchedule::Simple { repeat_interval_ms: 50, repeat_count: -1 })
        .build();
    store.store_trigger(trigger, false).await.unwrap();

    let scheduler = Arc::new(Scheduler::new(
        "test-instance",
        store.clone(),
        registry,
        Arc::new(ListenerManager::new()),
        fast_params(),
    ));
    scheduler.start();

    wait_until(|| handler.invocation_count() >= 2, StdDuration::from_secs(5)).await;

    scheduler.shutdown(false).await;
    assert!(handler.invocation_count() >= 2);
}

#[tokio::test]
async fn a_one_shot_trigger_completes_after_firing_once() {
    let handler = Arc::new(MockJobHandler::new());

    let mut registry = JobRegistry::new();
    registry.register("noop", handler.clone(), Default::default());
    let registry = Arc::new(registry);

    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new(registry.clone()));

    let job_key = JobKey::of("job-2").unwrap();
    store
        .store_job(JobDetail::builder().key(job_key.clone()).job_type("noop").durable(true).build(), false)
        .await
        .unwrap();

    let trigger_key = TriggerKey::of("trigger-2").unwrap();
    let trigger = Trigger::builder()
        .key(trigger_key.clone())
        .job_key(job_key)
        .start_time(Utc::now() - Duration::seconds(1))
        .schedule(TriggerSchedule::Simple { repeat_interval_ms: 0, repeat_count: 0 })
        .build();
    store.store_trigger(trigger, false).await.unwrap();

    let scheduler = Arc::new(Scheduler::new(
        "test-instance",
        store.clone(),
        registry,
        Arc::new(ListenerManager::new()),
        fast_params(),
    ));
    scheduler.start();

    wait_until(|| handler.invocation_count() >= 1, StdDuration::from_secs(5)).await;
    wait_until_trigger_state(&*store, &trigger_key, TriggerState::Complete, StdDuration::from_secs(5)).await;

    scheduler.shutdown(false).await;
    assert_eq!(handler.invocation_count(), 1);
}

#[tokio::test]
async fn a_failing_handler_moves_its_trigger_to_error() {
    let handler = Arc::new(MockJobHandler::new());
    handler.set_should_fail(true);

    let mut registry = JobRegistry::new();
    registry.register("noop", handler.clone(), Default::default());
    let registry = Arc::new(registry);

    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new(registry.clone()));

    let job_key = JobKey::of("job-3").unwrap();
    store
        .store_job(JobDetail::builder().key(job_key.clone()).job_type("noop").durable(true).build(), false)
        .await
        .unwrap();

    let trigger_key = TriggerKey::of("trigger-3").unwrap();
    let trigger = Trigger::builder()
        .key(trigger_key.clone())
        .job_key(job_key)
        .start_time(Utc::now() - Duration::seconds(1))
        .schedule(TriggerSchedule::Simple { repeat_interval_ms: 0, repeat_count: 0 })
        .build();
    store.store_trigger(trigger, false).await.unwrap();

    let scheduler = Arc::new(Scheduler::new(
        "test-instance",
        store.clone(),
        registry,
        Arc::new(ListenerManager::new()),
        fast_params(),
    ));
    scheduler.start();

    wait_until(|| handler.invocation_count() >= 1, StdDuration::from_secs(5)).await;
    wait_until_trigger_state(&*store, &trigger_key, TriggerState::Error, StdDuration::from_secs(5)).await;

    scheduler.shutdown(false).await;
}

#[tokio::test]
async fn pausing_a_trigger_group_stops_it_from_being_acquired() {
    let handler = Arc::new(MockJobHandler::new());

    let mut registry = JobRegistry::new();
    registry.register("noop", handler.clone(), Default::default());
    let registry = Arc::new(registry);

    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new(registry.clone()));

    let job_key = JobKey::of("job-4").unwrap();
    store
        .store_job(JobDetail::builder().key(job_key.clone()).job_type("noop").durable(true).build(), false)
        .await
        .unwrap();

    let trigger_key = TriggerKey::of("trigger-4").unwrap();
    let trigger = Trigger::builder()
        .key(trigger_key.clone())
        .job_key(job_key)
        .start_time(Utc::now() - Duration::seconds(1))
        .schedule(TriggerSchedule::Simple { repeat_interval_ms: 0, repeat_count: 0 })
        .build();
    store.store_trigger(trigger, false).await.unwrap();
    store.pause_trigger(&trigger_key).await.unwrap();

    let scheduler = Arc::new(Scheduler::new(
        "test-instance",
        store.clone(),
        registry,
        Arc::new(ListenerManager::new()),
        fast_params(),
    ));
    scheduler.start();

    tokio::time::sleep(StdDuration::from_millis(200)).await;
    scheduler.shutdown(false).await;

    assert_eq!(handler.invocation_count(), 0);
}
