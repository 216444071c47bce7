use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;

use crate::model::{IntervalUnit, TimeOfDay, Weekday};

fn step_seconds(unit: IntervalUnit, interval: i32) -> Option<i64> {
    let secs = match unit {
        IntervalUnit::Second => interval as i64,
        IntervalUnit::Minute => interval as i64 * 60,
        IntervalUnit::Hour => interval as i64 * 3600,
        IntervalUnit::Day | IntervalUnit::Week | IntervalUnit::Month | IntervalUnit::Year => {
            return None
        }
    };
    if secs <= 0 {
        None
    } else {
        Some(secs)
    }
}

fn is_eligible(day: NaiveDate, days_of_week: &[Weekday]) -> bool {
    days_of_week.is_empty() || days_of_week.contains(&Weekday::from_chrono(day.weekday()))
}

/// Count eligible weekday occurrences in the half-open date range
/// `[from, to)`, exploiting the 7-day period of a weekday filter instead of
/// iterating every day.
fn count_eligible_days(from: NaiveDate, to: NaiveDate, days_of_week: &[Weekday]) -> i64 {
    if to <= from || days_of_week.is_empty() {
        return if to <= from { 0 } else { (to - from).num_days() };
    }
    let total_days = (to - from).num_days();
    let full_weeks = total_days / 7;
    let remainder = total_days % 7;
    let mut count = full_weeks * days_of_week.len() as i64;
    let mut day = from;
    for _ in 0..remainder {
        if is_eligible(day, days_of_week) {
            count += 1;
        }
        day = day.succ_opt().expect("date arithmetic in range");
    }
    count
}

/// The next instant, strictly after `after` and at/after `start`, in a
/// daily-time-interval series: steps of `interval * unit` within
/// `[start_tod, end_tod]`, on the given subset of weekdays (empty = every
/// day), bounded by an optional lifetime `repeat_count`.
#[allow(clippy::too_many_arguments)]
pub fn fire_time_after(
    start: DateTime<Utc>,
    interval: i32,
    unit: IntervalUnit,
    start_tod: TimeOfDay,
    end_tod: TimeOfDay,
    days_of_week: &[Weekday],
    repeat_count: Option<i32>,
    time_zone: Tz,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let step = step_seconds(unit, interval)?;
    let start_secs = start_tod.seconds_of_day() as i64;
    let end_secs = end_tod.seconds_of_day() as i64;
    if end_secs < start_secs {
        return None;
    }

    let anchor = if after < start { start - Duration::seconds(1) } else { after };
    let anchor_local = anchor.with_timezone(&time_zone);
    let start_date = start.with_timezone(&time_zone).date_naive();
    let mut day = anchor_local.date_naive();

    for _ in 0..(366 * 10) {
        if is_eligible(day, days_of_week) {
            let day_midnight_secs_of_anchor = if day == anchor_local.date_naive() {
                anchor_local.num_seconds_from_midnight() as i64
            } else {
                -1
            };

            let first_slot = if day_midnight_secs_of_anchor < start_secs {
                start_secs
            } else {
                let k = (day_midnight_secs_of_anchor - start_secs) / step + 1;
                start_secs + k * step
            };

            if first_slot <= end_secs {
                if let Some(limit) = repeat_count {
                    let days_before = count_eligible_days(start_date, day, days_of_week);
                    let slots_per_day = (end_secs - start_secs) / step + 1;
                    let slot_index_today = (first_slot - start_secs) / step;
                    let fired_so_far = days_before * slots_per_day + slot_index_today;
                    if fired_so_far > limit as i64 {
                        return None;
                    }
                }
                let candidate_naive = day.and_hms_opt(0, 0, 0).unwrap() + Duration::seconds(first_slot);
                let candidate = super::calendar_interval::localize(time_zone, candidate_naive);
                if candidate > after && candidate >= start {
                    return Some(candidate);
                }
            }
        }
        day = day.succ_opt()?;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn business_hours_trigger() -> (DateTime<Utc>, TimeOfDay, TimeOfDay) {
        let start = Utc.with_ymd_and_hms(2026, 8, 3, 0, 0, 0).unwrap(); // Monday
        (start, TimeOfDay::new(9, 0, 0).unwrap(), TimeOfDay::new(17, 0, 0).unwrap())
    }

    #[test]
    fn first_fire_is_start_of_window_on_eligible_day() {
        let (start, s_tod, e_tod) = business_hours_trigger();
        let weekdays = vec![Weekday::Monday, Weekday::Tuesday, Weekday::Wednesday, Weekday::Thursday, Weekday::Friday];
        let next = fire_time_after(start, 30, IntervalUnit::Minute, s_tod, e_tod, &weekdays, None, chrono_tz::UTC, start).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap());
    }

    #[test]
    fn skips_weekend_to_next_eligible_day() {
        let (start, s_tod, e_tod) = business_hours_trigger();
        let weekdays = vec![Weekday::Monday, Weekday::Tuesday, Weekday::Wednesday, Weekday::Thursday, Weekday::Friday];
        // Friday 2026-08-07 17:00 is the last slot of the week; next is Monday 09:00.
        let friday_close = Utc.with_ymd_and_hms(2026, 8, 7, 17, 0, 0).unwrap();
        let next = fire_time_after(start, 30, IntervalUnit::Minute, s_tod, e_tod, &weekdays, None, chrono_tz::UTC, friday_close).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 10, 9, 0, 0).unwrap());
    }

    #[test]
    fn stays_within_daily_window() {
        let (start, s_tod, e_tod) = business_hours_trigger();
        let weekdays = vec![Weekday::Monday];
        let near_close = Utc.with_ymd_and_hms(2026, 8, 3, 16, 45, 0).unwrap();
        let next = fire_time_after(start, 30, IntervalUnit::Minute, s_tod, e_tod, &weekdays, None, chrono_tz::UTC, near_close).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 3, 17, 0, 0).unwrap());
    }

    /// 72-minute steps within an 8:00-17:00 Mon-Fri window fit 8 slots a day
    /// (8:00, 9:12, 10:24, 11:36, 12:48, 14:00, 15:12, 16:24; the next slot
    /// at 17:36 falls outside the window). Starting from Saturday 2011-01-01,
    /// the first eligible day is Monday 2011-01-03, so the 48th fire is the
    /// 8th (last) slot of the 6th eligible weekday, Monday 2011-01-10.
    #[test]
    fn forty_eighth_fire_of_a_seventy_two_minute_business_hours_series() {
        let start = Utc.with_ymd_and_hms(2011, 1, 1, 0, 0, 0).unwrap();
        let s_tod = TimeOfDay::new(8, 0, 0).unwrap();
        let e_tod = TimeOfDay::new(17, 0, 0).unwrap();
        let weekdays =
            vec![Weekday::Monday, Weekday::Tuesday, Weekday::Wednesday, Weekday::Thursday, Weekday::Friday];

        let mut cursor = start - Duration::seconds(1);
        let mut fire = None;
        for i in 0..48 {
            fire = fire_time_after(start, 72, IntervalUnit::Minute, s_tod, e_tod, &weekdays, None, chrono_tz::UTC, cursor);
            let this_fire = fire.expect("series does not end within 48 fires");
            if i == 0 {
                assert_eq!(this_fire, Utc.with_ymd_and_hms(2011, 1, 3, 8, 0, 0).unwrap());
            }
            cursor = this_fire;
        }

        assert_eq!(fire.unwrap(), Utc.with_ymd_and_hms(2011, 1, 10, 16, 24, 0).unwrap());
    }
}
