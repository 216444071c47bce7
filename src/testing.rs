//! Test utilities: a mock job handler that records invocations for later
//! inspection.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::registry::{JobExecutionContext, JobExecutionError, JobHandler};

/// A job handler that records every invocation and can be told to fail on
/// demand, for use in scheduler/store integration tests.
pub struct MockJobHandler {
    invocations: RwLock<Vec<JobExecutionContext>>,
    should_fail: RwLock<bool>,
}

impl Default for MockJobHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockJobHandler {
    pub fn new() -> Self {
        Self { invocations: RwLock::new(Vec::new()), should_fail: RwLock::new(false) }
    }

    pub fn invocations(&self) -> Vec<JobExecutionContext> {
        self.invocations.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        *self.should_fail.write().unwrap_or_else(|e| e.into_inner()) = should_fail;
    }

    pub fn clear(&self) {
        self.invocations.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[async_trait]
impl JobHandler for MockJobHandler {
    async fn execute(&self, ctx: &JobExecutionContext) -> Result<(), JobExecutionError> {
        self.invocations.write().unwrap_or_else(|e| e.into_inner()).push(ctx.clone());
        if *self.should_fail.read().unwrap_or_else(|e| e.into_inner()) {
            return Err(JobExecutionError(anyhow::anyhow!("mock handler configured to fail")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobKey, TriggerKey};

    fn ctx() -> JobExecutionContext {
        JobExecutionContext {
            job_key: JobKey::of("j").unwrap(),
            trigger_key: TriggerKey::of("t").unwrap(),
            fire_instance_id: "f1".into(),
            fire_time: chrono::Utc::now(),
            scheduled_fire_time: chrono::Utc::now(),
            job_data_map: Default::default(),
            recovering: false,
        }
    }

    #[tokio::test]
    async fn records_invocations() {
        let handler = MockJobHandler::new();
        handler.execute(&ctx()).await.unwrap();
        handler.execute(&ctx()).await.unwrap();
        assert_eq!(handler.invocation_count(), 2);
    }

    #[tokio::test]
    async fn fails_when_configured_to() {
        let handler = MockJobHandler::new();
        handler.set_should_fail(true);
        assert!(handler.execute(&ctx()).await.is_err());
    }
}
