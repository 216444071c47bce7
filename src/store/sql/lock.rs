//! The row-lock semaphore: a named mutual-exclusion primitive backed by a
//! row in the `locks` table, giving the cluster its only cross-process
//! coordination primitive.

use std::cell::RefCell;
use std::collections::HashSet;
use std::time::Duration as StdDuration;

use rand::Rng;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::time::sleep;

use crate::error::{QuartzError, Result};

tokio::task_local! {
    static HELD_LOCKS: RefCell<HashSet<String>>;
}

/// `TRIGGER_ACCESS` guards the acquire/fire/pause bookkeeping; `STATE_ACCESS`
/// guards cluster check-ins and failover recovery.
pub const TRIGGER_ACCESS: &str = "TRIGGER_ACCESS";
pub const STATE_ACCESS: &str = "STATE_ACCESS";

#[derive(Debug, Clone, Copy)]
pub struct LockRetryPolicy {
    pub max_retry: u32,
    pub retry_period: StdDuration,
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self { max_retry: 3, retry_period: StdDuration::from_millis(1000) }
    }
}

/// Acquire `lock_name` for the duration of `tx`, reentrant within the
/// current async task: a task that already holds the lock (tracked in a
/// task-local set, standing in for the source system's thread-local one in
/// this async runtime) returns immediately.
///
/// The row that actually provides mutual exclusion is read with
/// `SELECT ... FOR UPDATE` inside the caller's own `tx`, so the lock is held
/// until that transaction commits or rolls back. If the row doesn't exist
/// yet, it's bootstrapped via a separate, short-lived transaction against
/// `pool` so that a contended insert never holds the caller's transaction
/// open across the retry sleep; each retry of that bootstrap path runs in
/// its own fresh transaction.
pub async fn acquire(
    pool: &PgPool,
    tx: &mut Transaction<'_, Postgres>,
    sched_name: &str,
    lock_name: &str,
    policy: LockRetryPolicy,
) -> Result<()> {
    let already_held = HELD_LOCKS
        .try_with(|held| held.borrow().contains(lock_name))
        .unwrap_or(false);
    if already_held {
        return Ok(());
    }

    let mut attempt = 0;
    loop {
        let row = sqlx::query("SELECT lock_name FROM locks WHERE sched_name = $1 AND lock_name = $2 FOR UPDATE")
            .bind(sched_name)
            .bind(lock_name)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| QuartzError::StoreTransient(e.into()))?;

        if row.is_some() {
            mark_held(lock_name);
            return Ok(());
        }

        attempt += 1;
        if attempt > policy.max_retry {
            return Err(QuartzError::LockAcquireFailed { lock_name: lock_name.to_string(), attempts: attempt });
        }

        let mut bootstrap = pool.begin().await.map_err(|e| QuartzError::StoreTransient(e.into()))?;
        let insert = sqlx::query("INSERT INTO locks (sched_name, lock_name) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(sched_name)
            .bind(lock_name)
            .execute(&mut *bootstrap)
            .await
            .map_err(|e| QuartzError::StoreTransient(e.into()))?;
        bootstrap.commit().await.map_err(|e| QuartzError::StoreTransient(e.into()))?;

        if insert.rows_affected() != 1 {
            // Another instance's bootstrap won the race; the row exists now,
            // so the next loop's `SELECT ... FOR UPDATE` will either take it
            // or block until whoever holds it commits.
            sleep(jittered(policy.retry_period)).await;
        }
    }
}

/// Adds up to 20% random jitter to a retry period, so competing instances
/// contending for the same lock don't retry in lockstep.
fn jittered(period: StdDuration) -> StdDuration {
    let extra = rand::thread_rng().gen_range(0..=period.as_millis() as u64 / 5);
    period + StdDuration::from_millis(extra)
}

fn mark_held(lock_name: &str) {
    let _ = HELD_LOCKS.try_with(|held| {
        held.borrow_mut().insert(lock_name.to_string());
    });
}

/// Run `body` with the reentrancy set scoped to this task, releasing
/// tracked locks when `body` completes (the database-side lock itself is
/// released by the caller's transaction commit/rollback).
pub async fn with_lock_scope<F, Fut, T>(body: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    HELD_LOCKS.scope(RefCell::new(HashSet::new()), body()).await
}
