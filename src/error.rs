//! Error types for the scheduling core.
//!
//! Library code returns `QuartzError` so callers can match on the kind of
//! failure (validation vs. transient-store vs. fatal-store). Binaries bridge
//! these into `anyhow::Result` at the call site.

use crate::model::{JobKey, TriggerKey};

/// The kinds of failure the scheduling core can surface.
#[derive(Debug, thiserror::Error)]
pub enum QuartzError {
    /// A client supplied a value that violates a documented invariant.
    /// Fails synchronously; no state change occurs.
    #[error("validation error: {0}")]
    Validation(String),

    /// A job was referenced that isn't registered or stored.
    #[error("job not found: {0}")]
    JobNotFound(JobKey),

    /// A trigger was referenced that isn't stored.
    #[error("trigger not found: {0}")]
    TriggerNotFound(TriggerKey),

    /// A non-durable job was stored without at least one trigger.
    #[error("job {0} is not durable and has no triggers")]
    NonDurableJobWithoutTrigger(JobKey),

    /// Retryable failure in the store layer: connection drop, lock-acquire
    /// timeout, serialization conflict. The caller should back off and retry.
    #[error("transient store error: {0}")]
    StoreTransient(#[source] anyhow::Error),

    /// Unretryable failure in the store layer: missing schema, a payload
    /// that can no longer be deserialized. The trigger involved is moved to
    /// `Error` state by the caller.
    #[error("fatal store error: {0}")]
    StoreFatal(#[source] anyhow::Error),

    /// The row-lock semaphore exhausted its retries.
    #[error("could not acquire lock {lock_name} after {attempts} attempts")]
    LockAcquireFailed { lock_name: String, attempts: u32 },

    /// A job handler was invoked for a job type with no registered handler.
    #[error("no handler registered for job type {0}")]
    UnknownJobType(String),

    /// A job's `execute` returned an error.
    #[error("job execution failed: {0}")]
    JobExecution(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, QuartzError>;

impl QuartzError {
    /// Whether this error represents a condition the scheduling loop should
    /// back off and retry, as opposed to one that should escalate to an
    /// `Error`-state trigger and a scheduler-listener event.
    pub fn is_transient(&self) -> bool {
        matches!(self, QuartzError::StoreTransient(_) | QuartzError::LockAcquireFailed { .. })
    }
}
