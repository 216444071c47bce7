use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::model::IntervalUnit;

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next =
        chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1).expect("valid calendar month");
    let first_of_this =
        chrono::NaiveDate::from_ymd_opt(year, month, 1).expect("valid calendar month");
    (first_of_next - first_of_this).num_days() as u32
}

/// Add one calendar-interval step to a local (wall-clock) timestamp,
/// preserving day-of-month where possible and clamping to the last day of
/// the resulting month otherwise (e.g. Jan 31 + 1 month -> Feb 28).
fn add_unit(local: NaiveDateTime, unit: IntervalUnit, interval: i32) -> NaiveDateTime {
    match unit {
        IntervalUnit::Second => local + Duration::seconds(interval as i64),
        IntervalUnit::Minute => local + Duration::minutes(interval as i64),
        IntervalUnit::Hour => local + Duration::hours(interval as i64),
        IntervalUnit::Day => local + Duration::days(interval as i64),
        IntervalUnit::Week => local + Duration::weeks(interval as i64),
        IntervalUnit::Month => {
            let total_months = local.year() * 12 + (local.month() as i32 - 1) + interval;
            let year = total_months.div_euclid(12);
            let month = (total_months.rem_euclid(12) + 1) as u32;
            let day = local.day().min(days_in_month(year, month));
            local
                .with_day(1)
                .unwrap()
                .with_year(year)
                .unwrap()
                .with_month(month)
                .unwrap()
                .with_day(day)
                .unwrap()
        }
        IntervalUnit::Year => {
            let year = local.year() + interval;
            let day = local.day().min(days_in_month(year, local.month()));
            local.with_day(1).unwrap().with_year(year).unwrap().with_day(day).unwrap()
        }
    }
}

/// Resolve a wall-clock-ambiguous local time to a concrete instant: the
/// earlier offset on a DST fall-back (so a repeated local hour fires once,
/// at its first occurrence) and the first existing instant at or after a
/// spring-forward gap.
pub(super) fn localize(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _latest) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            // Spring-forward gap: walk forward in one-minute steps to the
            // first local time that does exist.
            let mut probe = local;
            for _ in 0..180 {
                probe += Duration::minutes(1);
                if let LocalResult::Single(dt) = tz.from_local_datetime(&probe) {
                    return dt.with_timezone(&Utc);
                }
            }
            // Unreachable in practice (DST gaps are under two hours); fall
            // back to UTC interpretation rather than panic.
            Utc.from_utc_datetime(&local)
        }
    }
}

/// The next instant, strictly after `after`, in the series `start, start +
/// interval, start + 2*interval, ...` evaluated as calendar arithmetic in
/// `time_zone`.
pub fn fire_time_after(
    start: DateTime<Utc>,
    interval: i32,
    unit: IntervalUnit,
    time_zone: Tz,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if interval <= 0 {
        return if after < start { Some(start) } else { None };
    }
    if after < start {
        return Some(start);
    }

    let mut local = start.with_timezone(&time_zone).naive_local();
    let mut candidate = start;
    // Bounded walk: each step advances the series by one interval. A tight
    // upper bound isn't knowable without doing the division up front, so
    // this caps at a generous iteration count rather than looping forever
    // on a pathological (after - start) span.
    for _ in 0..1_000_000 {
        local = add_unit(local, unit, interval);
        candidate = localize(time_zone, local);
        if candidate > after {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn steps_by_whole_days() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let next = fire_time_after(start, 1, IntervalUnit::Day, chrono_tz::UTC, start).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn month_arithmetic_clamps_to_last_day() {
        let start = Utc.with_ymd_and_hms(2026, 1, 31, 9, 0, 0).unwrap();
        let next = fire_time_after(start, 1, IntervalUnit::Month, chrono_tz::UTC, start).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 28, 9, 0, 0).unwrap());
    }

    #[test]
    fn monotonic_in_after() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let a = fire_time_after(start, 1, IntervalUnit::Hour, chrono_tz::UTC, start).unwrap();
        let b = fire_time_after(start, 1, IntervalUnit::Hour, chrono_tz::UTC, a).unwrap();
        assert!(a < b);
    }
}
