//! Per-trigger-type fire-time evaluators, unified behind `first_fire_time`
//! and `fire_time_after`, each wrapped with calendar exclusion filtering.

mod calendar_interval;
mod cron;
mod daily_time_interval;
mod simple;

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::model::{Calendar, Trigger, TriggerSchedule};

/// The first instant this trigger would fire at, ignoring any already-fired
/// history, subject to calendar exclusion.
pub fn first_fire_time(trigger: &Trigger, calendar: Option<&Calendar>) -> Result<Option<DateTime<Utc>>> {
    let just_before_start = trigger.start_time - Duration::nanoseconds(1);
    fire_time_after(trigger, just_before_start, calendar)
}

/// The next instant this trigger fires strictly after `after`, subject to
/// `trigger.end_time` and calendar exclusion. Returns `None` once the
/// schedule is exhausted or would fire past `end_time`.
pub fn fire_time_after(
    trigger: &Trigger,
    after: DateTime<Utc>,
    calendar: Option<&Calendar>,
) -> Result<Option<DateTime<Utc>>> {
    let mut cursor = after;
    loop {
        let candidate = raw_fire_time_after(trigger, cursor)?;
        let candidate = match candidate {
            Some(c) => c,
            None => return Ok(None),
        };
        if let Some(end) = trigger.end_time {
            if candidate > end {
                return Ok(None);
            }
        }
        match calendar {
            Some(cal) if !cal.is_time_included(candidate)? => {
                cursor = candidate;
                continue;
            }
            _ => return Ok(Some(candidate)),
        }
    }
}

fn raw_fire_time_after(trigger: &Trigger, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    Ok(match &trigger.schedule {
        TriggerSchedule::Simple { repeat_interval_ms, repeat_count } => {
            simple::fire_time_after(trigger.start_time, *repeat_interval_ms, *repeat_count, after)
        }
        TriggerSchedule::Cron { expression, time_zone } => {
            let schedule = cron::parse(expression)?;
            cron::fire_time_after(&schedule, *time_zone, after.max(trigger.start_time - Duration::nanoseconds(1)))
        }
        TriggerSchedule::CalendarInterval { interval, unit, time_zone } => {
            calendar_interval::fire_time_after(trigger.start_time, *interval, *unit, *time_zone, after)
        }
        TriggerSchedule::DailyTimeInterval {
            interval,
            unit,
            start_time_of_day,
            end_time_of_day,
            days_of_week,
            repeat_count,
            time_zone,
        } => daily_time_interval::fire_time_after(
            trigger.start_time,
            *interval,
            *unit,
            *start_time_of_day,
            *end_time_of_day,
            days_of_week,
            *repeat_count,
            *time_zone,
            after,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobKey, TriggerKey};
    use chrono::TimeZone;

    fn simple_trigger() -> Trigger {
        Trigger::builder()
            .key(TriggerKey::of("t").unwrap())
            .job_key(JobKey::of("j").unwrap())
            .start_time(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
            .schedule(TriggerSchedule::Simple { repeat_interval_ms: 60_000, repeat_count: -1 })
            .build()
    }

    #[test]
    fn first_fire_time_matches_start_time() {
        let trigger = simple_trigger();
        let next = first_fire_time(&trigger, None).unwrap();
        assert_eq!(next, Some(trigger.start_time));
    }

    #[test]
    fn end_time_bounds_simple_trigger() {
        let mut trigger = simple_trigger();
        trigger.end_time = Some(trigger.start_time + Duration::seconds(30));
        let next = fire_time_after(&trigger, trigger.start_time, None).unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn calendar_exclusion_skips_excluded_candidate() {
        use crate::model::{CalendarRule, TimeOfDay};

        let trigger = simple_trigger();
        // Excludes the whole first minute of the day, pushing the first
        // fire (which would otherwise land exactly at start_time) forward.
        let cal = Calendar::new(
            "skip-first-minute",
            CalendarRule::Daily {
                excluded_start: TimeOfDay::new(0, 0, 0).unwrap(),
                excluded_end: TimeOfDay::new(0, 1, 0).unwrap(),
            },
            chrono_tz::UTC,
        );
        let next = first_fire_time(&trigger, Some(&cal)).unwrap().unwrap();
        assert!(next > trigger.start_time);
        assert_eq!(next, trigger.start_time + Duration::minutes(1));
    }
}
