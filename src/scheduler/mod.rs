//! The scheduler: the `Created -> Standby <-> Started -> ShuttingDown ->
//! Shutdown` lifecycle around the acquire/fire pipeline, its misfire
//! handling, and the components (store, worker pool, registry, listeners)
//! it coordinates.

mod loop_;
pub mod misfire;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use futures::future::join_all;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::SchedulerConfig;
use crate::listener::ListenerManager;
use crate::registry::JobRegistry;
use crate::store::JobStore;
use crate::worker::WorkerPool;

/// Lifecycle states of a `Scheduler`. `Standby` and `Started` toggle freely;
/// `ShuttingDown` and `Shutdown` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Created = 0,
    Standby = 1,
    Started = 2,
    ShuttingDown = 3,
    Shutdown = 4,
}

impl SchedulerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SchedulerState::Created,
            1 => SchedulerState::Standby,
            2 => SchedulerState::Started,
            3 => SchedulerState::ShuttingDown,
            _ => SchedulerState::Shutdown,
        }
    }
}

/// Tunables for the acquire/fire pipeline, independent of environment
/// configuration so tests can construct a `Scheduler` without going through
/// `SchedulerConfig::from_env`.
#[derive(Debug, Clone, Copy)]
pub struct SchedulingParams {
    pub idle_wait_time: StdDuration,
    pub batch_size: usize,
    pub batch_time_window: Duration,
    pub misfire_threshold: Duration,
    pub worker_count: usize,
}

impl Default for SchedulingParams {
    fn default() -> Self {
        Self {
            idle_wait_time: StdDuration::from_secs(30),
            batch_size: 1,
            batch_time_window: Duration::zero(),
            misfire_threshold: Duration::seconds(60),
            worker_count: 10,
        }
    }
}

impl From<&SchedulerConfig> for SchedulingParams {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            idle_wait_time: StdDuration::from_secs(30),
            batch_size: config.thread_count.max(1),
            batch_time_window: Duration::zero(),
            misfire_threshold: Duration::milliseconds(config.misfire_threshold.as_millis() as i64),
            worker_count: config.thread_count.max(1),
        }
    }
}

/// The scheduling core's top-level handle: one store, one worker pool, the
/// listener registries, and the lifecycle state driving the acquire/fire
/// loop.
pub struct Scheduler {
    pub(crate) instance_id: String,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) registry: Arc<JobRegistry>,
    pub(crate) listeners: Arc<ListenerManager>,
    pub(crate) worker_pool: Arc<WorkerPool>,
    pub(crate) params: SchedulingParams,
    state: AtomicU8,
    pub(crate) wakeup: Arc<Notify>,
    loop_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        instance_id: impl Into<String>,
        store: Arc<dyn JobStore>,
        registry: Arc<JobRegistry>,
        listeners: Arc<ListenerManager>,
        params: SchedulingParams,
    ) -> Self {
        let worker_pool = Arc::new(WorkerPool::new(params.worker_count, registry.clone(), store.clone(), listeners.clone()));
        Self {
            instance_id: instance_id.into(),
            store,
            registry,
            listeners,
            worker_pool,
            params,
            state: AtomicU8::new(SchedulerState::Created as u8),
            wakeup: Arc::new(Notify::new()),
            loop_handle: std::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Wake the scheduling loop early, e.g. after a store mutation makes an
    /// earlier trigger exist than the one it's currently sleeping toward.
    pub fn notify_schedule_change(&self) {
        self.wakeup.notify_one();
    }

    /// Transition into `Started`, spawning the acquire/fire loop if it isn't
    /// already running.
    pub fn start(self: &Arc<Self>) {
        let previous = self.state.swap(SchedulerState::Started as u8, Ordering::SeqCst);
        if previous == SchedulerState::Started as u8 {
            return;
        }
        info!(instance_id = %self.instance_id, "scheduler started");
        for listener in self.listeners.scheduler.all() {
            let listener = listener.clone();
            tokio::spawn(async move { listener.scheduler_started().await });
        }
        if previous == SchedulerState::Created as u8 {
            let scheduler = self.clone();
            let handle = tokio::spawn(async move { loop_::run(scheduler).await });
            *self.loop_handle.lock().unwrap() = Some(handle);
        } else {
            self.wakeup.notify_one();
        }
    }

    /// Transition into `Standby`: the loop keeps running but stops acquiring
    /// new triggers until `start()` is called again.
    pub fn standby(&self) {
        self.state.store(SchedulerState::Standby as u8, Ordering::SeqCst);
        self.wakeup.notify_one();
    }

    /// `shutdown(wait_for_jobs_to_complete)`: stops acquiring new triggers
    /// immediately; if `wait`, blocks until in-flight fires drain before
    /// returning.
    pub async fn shutdown(&self, wait_for_jobs_to_complete: bool) {
        self.state.store(SchedulerState::ShuttingDown as u8, Ordering::SeqCst);
        self.wakeup.notify_one();

        let handle = self.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if wait_for_jobs_to_complete {
                let _ = handle.await;
                self.worker_pool.wait_for_idle().await;
            } else {
                handle.abort();
            }
        }

        self.state.store(SchedulerState::Shutdown as u8, Ordering::SeqCst);
        join_all(self.listeners.scheduler.all().into_iter().map(|listener| async move {
            listener.scheduler_shutdown().await;
        }))
        .await;
        info!(instance_id = %self.instance_id, "scheduler shutdown");
    }
}
