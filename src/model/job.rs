//! `JobDetail` — the stored description of a unit of work.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::key::JobKey;

/// Flags that control how the scheduler treats executions of a job.
///
/// In the source system these come from annotations on the job class
/// (`@DisallowConcurrentExecution`, `@PersistJobDataAfterExecution`), resolved
/// via reflection. Here they are a plain descriptor, supplied once when a job
/// type is registered in the [`crate::registry::JobRegistry`] and optionally
/// overridden on an individual `JobDetail`. The registration-derived value
/// wins when both are present (see `JobDetail::effective_capabilities`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCapabilities {
    pub concurrent_execution_disallowed: bool,
    pub persist_job_data_after_execution: bool,
}

/// A JSON-valued bag of job data, analogous to Quartz's `JobDataMap`.
pub type JobDataMap = HashMap<String, serde_json::Value>;

/// The stored description of a job: what to run, and how the scheduler
/// should treat its executions.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobDetail {
    pub key: JobKey,

    /// The name under which a handler is registered in the `JobRegistry`.
    pub job_type: String,

    #[builder(default, setter(strip_option))]
    pub description: Option<String>,

    #[builder(default)]
    pub job_data_map: JobDataMap,

    /// A durable job with no triggers persists; a non-durable one is deleted
    /// when its last trigger is removed.
    #[builder(default)]
    pub durable: bool,

    /// Whether a crashed fire of this job should be recovered after failover.
    #[builder(default)]
    pub requests_recovery: bool,

    /// Explicit override of the job type's registered capabilities. `None`
    /// defers entirely to the registration.
    #[builder(default, setter(strip_option))]
    pub capabilities_override: Option<JobCapabilities>,
}

impl JobDetail {
    /// Resolve the effective capabilities for this job: the registered
    /// capabilities for `job_type` win when the job type is registered.
    /// `capabilities_override` applies only as a fallback, for a job type
    /// the registry doesn't know about.
    pub fn effective_capabilities(&self, registered: Option<JobCapabilities>) -> JobCapabilities {
        registered.unwrap_or_else(|| self.capabilities_override.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> JobKey {
        JobKey::of("send-email").unwrap()
    }

    #[test]
    fn non_durable_by_default() {
        let job = JobDetail::builder().key(key()).job_type("email:send").build();
        assert!(!job.durable);
    }

    #[test]
    fn registration_wins_without_override() {
        let job = JobDetail::builder().key(key()).job_type("email:send").build();
        let registered = JobCapabilities {
            concurrent_execution_disallowed: true,
            persist_job_data_after_execution: false,
        };
        assert_eq!(job.effective_capabilities(Some(registered)), registered);
    }

    #[test]
    fn registration_wins_over_override() {
        let override_caps = JobCapabilities {
            concurrent_execution_disallowed: true,
            persist_job_data_after_execution: true,
        };
        let job = JobDetail::builder()
            .key(key())
            .job_type("email:send")
            .capabilities_override(override_caps)
            .build();
        let registered = JobCapabilities::default();
        assert_eq!(job.effective_capabilities(Some(registered)), registered);
    }

    #[test]
    fn override_applies_when_job_type_is_not_registered() {
        let override_caps = JobCapabilities {
            concurrent_execution_disallowed: true,
            persist_job_data_after_execution: true,
        };
        let job = JobDetail::builder()
            .key(key())
            .job_type("email:send")
            .capabilities_override(override_caps)
            .build();
        assert_eq!(job.effective_capabilities(None), override_caps);
    }

    #[test]
    fn default_capabilities_when_neither_is_present() {
        let job = JobDetail::builder().key(key()).job_type("email:send").build();
        assert_eq!(job.effective_capabilities(None), JobCapabilities::default());
    }
}
