//! `FiredTrigger` — the record of a single in-flight execution, used for
//! crash recovery and listener dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::JobDataMap;
use super::key::{JobKey, TriggerKey};

/// The execution state of a fired trigger, as seen by other cluster nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FiredTriggerState {
    Acquired,
    Executing,
}

/// One row of the `fired_triggers` table: a trigger that has been acquired
/// or is currently executing somewhere in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiredTrigger {
    pub fire_instance_id: String,
    pub trigger_key: TriggerKey,
    pub job_key: JobKey,
    pub instance_id: String,
    pub fired_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub state: FiredTriggerState,
    pub priority: i32,
    pub concurrent_execution_disallowed: bool,
    pub requests_recovery: bool,
    pub job_data_map: JobDataMap,
}

impl FiredTrigger {
    /// A synthetic `JobDataMap` entry recording what fire this is a recovery
    /// of, for handlers that want to distinguish a recovery run from a
    /// fresh one.
    pub fn as_recovery_data(&self) -> JobDataMap {
        let mut map = self.job_data_map.clone();
        map.insert(
            "quartz_recovering_job".into(),
            serde_json::Value::Bool(true),
        );
        map.insert(
            "quartz_failed_fire_instance_id".into(),
            serde_json::Value::String(self.fire_instance_id.clone()),
        );
        map.insert(
            "quartz_failed_scheduled_fire_time".into(),
            serde_json::Value::String(self.scheduled_at.to_rfc3339()),
        );
        map
    }
}
