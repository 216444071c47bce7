//! Listener fanout: trigger, job, and scheduler event registries, each
//! dispatching to its registrations in insertion order, filtered by matcher.

use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{GroupMatcher, JobKey, TriggerKey};
use crate::registry::JobExecutionContext;

/// Matches a registration against the key of the trigger or job an event
/// concerns. `Any` matches everything; the rest match on the key's group.
#[derive(Debug, Clone)]
pub enum KeyMatcher {
    Key(String),
    Group(GroupMatcher),
    Any,
}

impl KeyMatcher {
    fn matches(&self, name: &str, group: &str) -> bool {
        match self {
            KeyMatcher::Key(key_display) => key_display == &format!("{group}.{name}"),
            KeyMatcher::Group(g) => g.matches(group),
            KeyMatcher::Any => true,
        }
    }
}

/// What happened to a fired trigger's job execution, handed to
/// `job_was_executed` and the scheduler-error channel.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Success,
    Failed(String),
}

/// Observes trigger lifecycle events: fired, misfired, or completed.
#[async_trait]
pub trait TriggerListener: Send + Sync {
    /// Called before the job runs. Returning `true` vetoes the execution.
    async fn veto_job_execution(&self, _ctx: &JobExecutionContext) -> bool {
        false
    }
    async fn trigger_fired(&self, _ctx: &JobExecutionContext) {}
    async fn trigger_misfired(&self, _trigger_key: &TriggerKey) {}
    async fn trigger_complete(&self, _ctx: &JobExecutionContext, _outcome: &ExecutionOutcome) {}
}

/// Observes job execution completion.
#[async_trait]
pub trait JobListener: Send + Sync {
    async fn job_to_be_executed(&self, _ctx: &JobExecutionContext) {}
    async fn job_execution_vetoed(&self, _ctx: &JobExecutionContext) {}
    async fn job_was_executed(&self, _ctx: &JobExecutionContext, _outcome: &ExecutionOutcome) {}
}

/// Observes scheduler-wide events: errors, shutdown, pause/resume.
#[async_trait]
pub trait SchedulerListener: Send + Sync {
    async fn scheduler_error(&self, _message: &str, _ctx: Option<&JobExecutionContext>) {}
    async fn scheduler_started(&self) {}
    async fn scheduler_shutdown(&self) {}
    async fn triggers_paused(&self, _group: &str) {}
    async fn triggers_resumed(&self, _group: &str) {}
}

struct Registration<L: ?Sized> {
    matcher: KeyMatcher,
    listener: Arc<L>,
}

/// A registry of listeners of one kind, invoked in insertion order. Fault
/// isolation is the caller's responsibility: a listener invocation that
/// panics or errors must not be allowed to suppress the remaining fanout
/// (see `crate::worker::pool`).
pub struct ListenerRegistry<L: ?Sized> {
    registrations: Vec<Registration<L>>,
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self { registrations: Vec::new() }
    }
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Arc<L>, matcher: KeyMatcher) {
        self.registrations.push(Registration { matcher, listener });
    }

    pub fn remove(&mut self, listener: &Arc<L>) {
        self.registrations.retain(|r| !Arc::ptr_eq(&r.listener, listener));
    }

    /// Listeners registered against `(name, group)`, in insertion order.
    pub fn matching(&self, name: &str, group: &str) -> Vec<Arc<L>> {
        self.registrations
            .iter()
            .filter(|r| r.matcher.matches(name, group))
            .map(|r| r.listener.clone())
            .collect()
    }
}

impl ListenerRegistry<dyn TriggerListener> {
    pub fn matching_trigger(&self, key: &TriggerKey) -> Vec<Arc<dyn TriggerListener>> {
        self.matching(&key.name, &key.group)
    }
}

impl ListenerRegistry<dyn JobListener> {
    pub fn matching_job(&self, key: &JobKey) -> Vec<Arc<dyn JobListener>> {
        self.matching(&key.name, &key.group)
    }
}

impl ListenerRegistry<dyn SchedulerListener> {
    pub fn all(&self) -> Vec<Arc<dyn SchedulerListener>> {
        self.registrations.iter().map(|r| r.listener.clone()).collect()
    }
}

/// The three listener registries a scheduler carries, bundled together so
/// the worker pool and scheduling loop can share one handle.
#[derive(Default)]
pub struct ListenerManager {
    pub triggers: ListenerRegistry<dyn TriggerListener>,
    pub jobs: ListenerRegistry<dyn JobListener>,
    pub scheduler: ListenerRegistry<dyn SchedulerListener>,
}

impl ListenerManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        order: Arc<std::sync::Mutex<Vec<usize>>>,
        id: usize,
    }

    #[async_trait]
    impl TriggerListener for CountingListener {
        async fn trigger_fired(&self, _ctx: &JobExecutionContext) {
            self.order.lock().unwrap().push(self.id);
        }
    }

    #[tokio::test]
    async fn listeners_fire_in_insertion_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut registry: ListenerRegistry<dyn TriggerListener> = ListenerRegistry::new();
        for id in 0..3 {
            registry.add(Arc::new(CountingListener { order: order.clone(), id }), KeyMatcher::Any);
        }

        let key = TriggerKey::of("t").unwrap();
        let ctx_counter = AtomicUsize::new(0);
        for listener in registry.matching_trigger(&key) {
            ctx_counter.fetch_add(1, Ordering::Relaxed);
            listener
                .trigger_fired(&JobExecutionContext {
                    job_key: JobKey::of("j").unwrap(),
                    trigger_key: key.clone(),
                    fire_instance_id: "f1".into(),
                    fire_time: chrono::Utc::now(),
                    scheduled_fire_time: chrono::Utc::now(),
                    job_data_map: Default::default(),
                    recovering: false,
                })
                .await;
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(ctx_counter.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn group_matcher_filters_registrations() {
        struct Dummy;
        #[async_trait]
        impl TriggerListener for Dummy {}

        let mut registry: ListenerRegistry<dyn TriggerListener> = ListenerRegistry::new();
        registry.add(Arc::new(Dummy), KeyMatcher::Group(GroupMatcher::Equals("GroupA".into())));

        let in_group = TriggerKey::new("t", Some("GroupA")).unwrap();
        let other_group = TriggerKey::new("t", Some("GroupB")).unwrap();
        assert_eq!(registry.matching_trigger(&in_group).len(), 1);
        assert_eq!(registry.matching_trigger(&other_group).len(), 0);
    }
}
