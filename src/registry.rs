//! The job registry: maps a job type name to an executable handler, resolved
//! once at registration instead of through runtime reflection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{FiredTrigger, JobCapabilities, JobDataMap, JobKey, TriggerKey};

/// Everything a handler needs to run one firing of a job.
#[derive(Debug, Clone)]
pub struct JobExecutionContext {
    pub job_key: JobKey,
    pub trigger_key: TriggerKey,
    pub fire_instance_id: String,
    pub fire_time: DateTime<Utc>,
    pub scheduled_fire_time: DateTime<Utc>,
    pub job_data_map: JobDataMap,
    /// Set when this execution is a failover recovery of a fire whose owning
    /// instance died before it completed.
    pub recovering: bool,
}

impl JobExecutionContext {
    pub fn from_recovery(fired: &FiredTrigger) -> Self {
        Self {
            job_key: fired.job_key.clone(),
            trigger_key: fired.trigger_key.clone(),
            fire_instance_id: fired.fire_instance_id.clone(),
            fire_time: fired.fired_at,
            scheduled_fire_time: fired.scheduled_at,
            job_data_map: fired.as_recovery_data(),
            recovering: true,
        }
    }
}

/// An error raised by a job handler's `execute`. Carries the underlying
/// cause; the scheduling core does not interpret its contents beyond
/// deciding whether the listener fanout and trigger completion path should
/// record it.
#[derive(Debug, thiserror::Error)]
#[error("job execution failed: {0}")]
pub struct JobExecutionError(#[from] pub anyhow::Error);

/// A registered unit of work. Implementations own whatever side effects the
/// job performs; the scheduler only calls `execute` and, best-effort,
/// `interrupt`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, ctx: &JobExecutionContext) -> Result<(), JobExecutionError>;

    /// Best-effort cooperative cancellation. Handlers that don't support
    /// interruption simply don't override this; the scheduler has no way to
    /// preempt a running job otherwise.
    fn interrupt(&self) {}
}

struct Registration {
    handler: Arc<dyn JobHandler>,
    capabilities: JobCapabilities,
}

/// The in-process map from job type name to its handler and declared
/// capabilities.
#[derive(Default)]
pub struct JobRegistry {
    handlers: HashMap<String, Registration>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        job_type: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        capabilities: JobCapabilities,
    ) {
        self.handlers.insert(job_type.into(), Registration { handler, capabilities });
    }

    pub fn handler(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).map(|r| r.handler.clone())
    }

    pub fn capabilities(&self, job_type: &str) -> Option<JobCapabilities> {
        self.handlers.get(job_type).map(|r| r.capabilities)
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn execute(&self, _ctx: &JobExecutionContext) -> Result<(), JobExecutionError> {
            Ok(())
        }
    }

    #[test]
    fn unregistered_job_type_has_no_handler() {
        let registry = JobRegistry::new();
        assert!(registry.handler("email:send").is_none());
    }

    #[test]
    fn registered_capabilities_are_retrievable() {
        let mut registry = JobRegistry::new();
        let caps = JobCapabilities { concurrent_execution_disallowed: true, persist_job_data_after_execution: false };
        registry.register("email:send", Arc::new(Noop), caps);
        assert_eq!(registry.capabilities("email:send"), Some(caps));
        assert!(registry.is_registered("email:send"));
    }
}
