//! Misfire detection and policy application: repairing a `Waiting` trigger
//! whose `next_fire_time` has drifted too far behind the wall clock.

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::model::{Calendar, MisfirePolicy, Trigger, TriggerSchedule};
use crate::schedule;

/// A trigger has misfired once its due time is more than `threshold` behind
/// `now`.
pub fn has_misfired(trigger: &Trigger, now: DateTime<Utc>, threshold: Duration) -> bool {
    match trigger.next_fire_time {
        Some(next) => next < now - threshold,
        None => false,
    }
}

/// Resolves `SmartPolicy` to a schedule-specific default. Simple triggers
/// with a single fire (`repeat_count == 0`) fire immediately rather than
/// rescheduling a fire time that will never recur; simple triggers with
/// further repeats pick up where they left off. Calendar-driven schedules
/// (cron, calendar-interval, daily-time-interval) just skip to the next
/// future occurrence.
pub fn resolve_smart_policy(schedule: &TriggerSchedule) -> MisfirePolicy {
    match schedule {
        TriggerSchedule::Simple { repeat_count: 0, .. } => MisfirePolicy::FireNow,
        TriggerSchedule::Simple { .. } => MisfirePolicy::RescheduleNowWithRemainingCount,
        TriggerSchedule::Cron { .. }
        | TriggerSchedule::CalendarInterval { .. }
        | TriggerSchedule::DailyTimeInterval { .. } => MisfirePolicy::DoNothing,
    }
}

/// Repairs a misfired trigger's `next_fire_time` (and, for simple triggers,
/// `repeat_count`) in place according to its (possibly smart-resolved)
/// misfire policy.
pub fn apply(trigger: &mut Trigger, now: DateTime<Utc>, calendar: Option<&Calendar>) -> Result<()> {
    let effective = match trigger.misfire_policy {
        MisfirePolicy::SmartPolicy => resolve_smart_policy(&trigger.schedule),
        other => other,
    };

    match effective {
        MisfirePolicy::SmartPolicy => unreachable!("resolved above"),
        MisfirePolicy::IgnoreMisfirePolicy => {
            // Leave next_fire_time untouched; the trigger fires as soon as
            // the loop notices it, using its already-stale due time.
        }
        MisfirePolicy::FireNow => {
            trigger.next_fire_time = Some(now);
        }
        MisfirePolicy::DoNothing => {
            trigger.next_fire_time = schedule::fire_time_after(trigger, now, calendar)?;
        }
        MisfirePolicy::RescheduleNextWithRemainingCount => {
            let missed = missed_simple_fires(trigger, now);
            trigger.next_fire_time = schedule::fire_time_after(trigger, now, calendar)?;
            decrement_repeat_count(trigger, missed);
        }
        MisfirePolicy::RescheduleNowWithExistingCount => {
            trigger.next_fire_time = Some(now);
        }
        MisfirePolicy::RescheduleNowWithRemainingCount => {
            let missed = missed_simple_fires(trigger, now);
            trigger.next_fire_time = Some(now);
            decrement_repeat_count(trigger, missed);
        }
    }
    Ok(())
}

/// For a simple trigger with a finite repeat count, the number of intervals
/// that have elapsed between its stale `next_fire_time` and `now`. Zero for
/// every other schedule variant or an indefinite repeat count.
fn missed_simple_fires(trigger: &Trigger, now: DateTime<Utc>) -> i32 {
    let TriggerSchedule::Simple { repeat_interval_ms, repeat_count } = &trigger.schedule else {
        return 0;
    };
    if *repeat_count < 0 || *repeat_interval_ms <= 0 {
        return 0;
    }
    let Some(next) = trigger.next_fire_time else { return 0 };
    let elapsed_ms = (now - next).num_milliseconds().max(0);
    (elapsed_ms / repeat_interval_ms) as i32
}

fn decrement_repeat_count(trigger: &mut Trigger, missed: i32) {
    if let TriggerSchedule::Simple { repeat_count, .. } = &mut trigger.schedule {
        if *repeat_count > 0 {
            *repeat_count = (*repeat_count - missed).max(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobKey, TriggerKey, TriggerState};
    use chrono::TimeZone;

    fn trigger_with(schedule: TriggerSchedule, next_fire_time: DateTime<Utc>) -> Trigger {
        Trigger::builder()
            .key(TriggerKey::of("t").unwrap())
            .job_key(JobKey::of("j").unwrap())
            .start_time(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
            .schedule(schedule)
            .state(TriggerState::Waiting)
            .build()
    }

    #[test]
    fn smart_policy_for_single_fire_simple_trigger_fires_now() {
        let policy = resolve_smart_policy(&TriggerSchedule::Simple { repeat_interval_ms: 1000, repeat_count: 0 });
        assert_eq!(policy, MisfirePolicy::FireNow);
    }

    #[test]
    fn smart_policy_for_cron_does_nothing() {
        let policy = resolve_smart_policy(&TriggerSchedule::Cron {
            expression: "0 0 0 * * ?".into(),
            time_zone: chrono_tz::UTC,
        });
        assert_eq!(policy, MisfirePolicy::DoNothing);
    }

    #[test]
    fn fire_now_policy_sets_next_fire_time_to_now() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut trigger = trigger_with(TriggerSchedule::Simple { repeat_interval_ms: 60_000, repeat_count: 0 }, start);
        trigger.next_fire_time = Some(start);
        trigger.misfire_policy = MisfirePolicy::FireNow;
        let now = start + Duration::hours(1);
        apply(&mut trigger, now, None).unwrap();
        assert_eq!(trigger.next_fire_time, Some(now));
    }

    #[test]
    fn reschedule_now_with_remaining_count_decrements_missed_fires() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut trigger =
            trigger_with(TriggerSchedule::Simple { repeat_interval_ms: 60_000, repeat_count: 10 }, start);
        trigger.next_fire_time = Some(start);
        trigger.misfire_policy = MisfirePolicy::RescheduleNowWithRemainingCount;
        let now = start + Duration::minutes(5);
        apply(&mut trigger, now, None).unwrap();
        assert_eq!(trigger.next_fire_time, Some(now));
        match trigger.schedule {
            TriggerSchedule::Simple { repeat_count, .. } => assert_eq!(repeat_count, 5),
            _ => unreachable!(),
        }
    }

    #[test]
    fn ignore_misfire_policy_leaves_next_fire_time_untouched() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut trigger = trigger_with(TriggerSchedule::Simple { repeat_interval_ms: 60_000, repeat_count: -1 }, start);
        trigger.next_fire_time = Some(start);
        trigger.misfire_policy = MisfirePolicy::IgnoreMisfirePolicy;
        apply(&mut trigger, start + Duration::hours(1), None).unwrap();
        assert_eq!(trigger.next_fire_time, Some(start));
    }

    #[test]
    fn has_misfired_respects_threshold() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut trigger = trigger_with(TriggerSchedule::Simple { repeat_interval_ms: 60_000, repeat_count: -1 }, start);
        trigger.next_fire_time = Some(start);
        let threshold = Duration::seconds(30);
        assert!(!has_misfired(&trigger, start + Duration::seconds(10), threshold));
        assert!(has_misfired(&trigger, start + Duration::seconds(60), threshold));
    }
}
