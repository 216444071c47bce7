//! `SchedulerInstance` — one row of `scheduler_state`, a cluster node's
//! check-in record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cluster node's last-known check-in, as seen by [`crate::cluster::manager::ClusterManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerInstance {
    pub instance_id: String,
    pub last_checkin_time: DateTime<Utc>,
    pub checkin_interval_ms: i64,
}

impl SchedulerInstance {
    /// An instance is considered failed once its last check-in is older than
    /// its own declared interval plus the grace period the cluster manager
    /// applies.
    pub fn is_overdue(&self, now: DateTime<Utc>, grace_period_ms: i64) -> bool {
        let deadline = self.last_checkin_time
            + chrono::Duration::milliseconds(self.checkin_interval_ms + grace_period_ms);
        now > deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_overdue_immediately_after_checkin() {
        let inst = SchedulerInstance {
            instance_id: "node-1".into(),
            last_checkin_time: Utc::now(),
            checkin_interval_ms: 7500,
        };
        assert!(!inst.is_overdue(Utc::now(), 7500));
    }

    #[test]
    fn overdue_after_interval_plus_grace_elapses() {
        let inst = SchedulerInstance {
            instance_id: "node-1".into(),
            last_checkin_time: Utc::now() - chrono::Duration::milliseconds(20_000),
            checkin_interval_ms: 7500,
        };
        assert!(inst.is_overdue(Utc::now(), 7500));
    }
}
