use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use cron::Schedule;

use crate::error::{QuartzError, Result};

/// A day-of-month/day-of-week directive (`L`, `W`, `#`) the underlying
/// field-by-field evaluator has no notion of. Stripped from the expression
/// before parsing and re-applied as a post-filter over its candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DaySpecial {
    /// `L` in the day-of-month field: the last day of the month.
    LastDayOfMonth,
    /// `LW`: the last weekday (Mon-Fri) of the month.
    LastWeekdayOfMonth,
    /// `15W`: the weekday nearest to the 15th, clamped to the month.
    NearestWeekday(u32),
    /// `6L`: the last occurrence of weekday `6` (Quartz numbering, 1=Sun..7=Sat) in the month.
    LastWeekdayOccurrence(u32),
    /// `6#3`: the third occurrence of weekday `6` in the month.
    NthWeekdayOccurrence(u32, u32),
}

/// A parsed 7-field cron expression, holding the day-of-month/day-of-week
/// directive separately when the expression uses one, since the `cron`
/// crate only understands `* , - /`.
pub struct CronSchedule {
    inner: Schedule,
    day_special: Option<DaySpecial>,
}

/// Parse a 7-field cron expression (`sec min hour dom mon dow year?`).
/// Rejects expressions the underlying evaluator cannot parse; field-range
/// validation (hour 0-23, dow 1-7, ...) is enforced by the parser itself.
/// `L`/`W`/`#` in the day-of-month or day-of-week field are handled here,
/// ahead of the underlying parser, by substituting a wildcard and
/// re-checking the directive against each candidate day.
pub fn parse(expression: &str) -> Result<CronSchedule> {
    let (rewritten, day_special) = extract_day_special(expression)?;
    let inner = Schedule::from_str(&rewritten)
        .map_err(|e| QuartzError::Validation(format!("invalid cron expression '{expression}': {e}")))?;
    Ok(CronSchedule { inner, day_special })
}

fn extract_day_special(expression: &str) -> Result<(String, Option<DaySpecial>)> {
    let mut fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() < 6 {
        return Err(QuartzError::Validation(format!(
            "invalid cron expression '{expression}': expected at least 6 fields"
        )));
    }

    let dom_special = parse_dom_special(fields[3])?;
    let dow_special = parse_dow_special(fields[5])?;
    if dom_special.is_some() && dow_special.is_some() {
        return Err(QuartzError::Validation(format!(
            "invalid cron expression '{expression}': day-of-month and day-of-week directives cannot combine"
        )));
    }

    match (dom_special, dow_special) {
        (Some(special), None) => {
            fields[3] = "*";
            Ok((fields.join(" "), Some(special)))
        }
        (None, Some(special)) => {
            fields[5] = "?";
            Ok((fields.join(" "), Some(special)))
        }
        (None, None) => Ok((expression.to_string(), None)),
        (Some(_), Some(_)) => unreachable!("rejected above"),
    }
}

fn parse_dom_special(field: &str) -> Result<Option<DaySpecial>> {
    if field.eq_ignore_ascii_case("L") {
        return Ok(Some(DaySpecial::LastDayOfMonth));
    }
    if field.eq_ignore_ascii_case("LW") {
        return Ok(Some(DaySpecial::LastWeekdayOfMonth));
    }
    if let Some(day) = field.strip_suffix(['W', 'w']) {
        let day: u32 = day
            .parse()
            .map_err(|_| QuartzError::Validation(format!("invalid nearest-weekday directive '{field}'")))?;
        return Ok(Some(DaySpecial::NearestWeekday(day)));
    }
    Ok(None)
}

fn parse_dow_special(field: &str) -> Result<Option<DaySpecial>> {
    if let Some(weekday) = field.strip_suffix(['L', 'l']) {
        if weekday.is_empty() || !weekday.chars().all(|c| c.is_ascii_digit()) {
            return Ok(None);
        }
        let weekday: u32 = weekday
            .parse()
            .map_err(|_| QuartzError::Validation(format!("invalid last-weekday-of-month directive '{field}'")))?;
        return Ok(Some(DaySpecial::LastWeekdayOccurrence(weekday)));
    }
    if let Some((weekday, nth)) = field.split_once('#') {
        let weekday: u32 = weekday
            .parse()
            .map_err(|_| QuartzError::Validation(format!("invalid nth-weekday directive '{field}'")))?;
        let nth: u32 = nth
            .parse()
            .map_err(|_| QuartzError::Validation(format!("invalid nth-weekday directive '{field}'")))?;
        return Ok(Some(DaySpecial::NthWeekdayOccurrence(weekday, nth)));
    }
    Ok(None)
}

/// Quartz's day-of-week numbering (1=Sunday .. 7=Saturday), distinct from
/// the underlying evaluator's own `,-/*` field which is left untouched when
/// no directive is present.
fn quartz_weekday_to_chrono(n: u32) -> Option<chrono::Weekday> {
    use chrono::Weekday::*;
    Some(match n % 7 {
        1 => Sun,
        2 => Mon,
        3 => Tue,
        4 => Wed,
        5 => Thu,
        6 => Fri,
        0 => Sat,
        _ => return None,
    })
}

fn last_day_of_month(date: NaiveDate) -> u32 {
    let (year, month) = (date.year(), date.month());
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).unwrap().pred_opt().unwrap().day()
}

/// The weekday nearest `target`, never crossing a month boundary: a
/// Saturday moves back to Friday (or forward to Monday if Friday would fall
/// in the previous month), a Sunday moves forward to Monday (or back to
/// Friday if Monday would fall in the next month).
fn nearest_weekday(target: NaiveDate) -> NaiveDate {
    use chrono::Weekday as Cw;
    match target.weekday() {
        Cw::Sat => {
            let prev = target.pred_opt().unwrap();
            if prev.month() == target.month() {
                prev
            } else {
                target.succ_opt().unwrap().succ_opt().unwrap()
            }
        }
        Cw::Sun => {
            let next = target.succ_opt().unwrap();
            if next.month() == target.month() {
                next
            } else {
                target.pred_opt().unwrap().pred_opt().unwrap()
            }
        }
        _ => target,
    }
}

fn day_matches(special: DaySpecial, date: NaiveDate) -> bool {
    let last_day = last_day_of_month(date);
    match special {
        DaySpecial::LastDayOfMonth => date.day() == last_day,
        DaySpecial::LastWeekdayOfMonth => date == nearest_weekday(date.with_day(last_day).unwrap()),
        DaySpecial::NearestWeekday(day) => {
            let clamped = day.clamp(1, last_day);
            date == nearest_weekday(date.with_day(clamped).unwrap())
        }
        DaySpecial::LastWeekdayOccurrence(weekday) => match quartz_weekday_to_chrono(weekday) {
            Some(w) => date.weekday() == w && date.day() + 7 > last_day,
            None => false,
        },
        DaySpecial::NthWeekdayOccurrence(weekday, nth) => match quartz_weekday_to_chrono(weekday) {
            Some(w) => date.weekday() == w && (date.day() - 1) / 7 + 1 == nth,
            None => false,
        },
    }
}

/// The next instant, strictly after `after`, matching `schedule` when
/// evaluated in `time_zone`. DST spring-forward transitions are handled by
/// the underlying evaluator landing on the first existing local instant at
/// or after the nominal one; fall-back does not duplicate a fire because
/// the search only ever advances forward from the last returned instant.
pub fn fire_time_after(
    schedule: &CronSchedule,
    time_zone: chrono_tz::Tz,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let Some(special) = schedule.day_special else {
        let after_local = after.with_timezone(&time_zone);
        return schedule.inner.after(&after_local).next().map(|dt| dt.with_timezone(&Utc));
    };

    let mut cursor = after;
    for _ in 0..10_000 {
        let cursor_local = cursor.with_timezone(&time_zone);
        let candidate = schedule.inner.after(&cursor_local).next()?.with_timezone(&Utc);
        if day_matches(special, candidate.with_timezone(&time_zone).date_naive()) {
            return Some(candidate);
        }
        cursor = candidate;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn rejects_malformed_expression() {
        assert!(parse("not a cron expression").is_err());
    }

    #[test]
    fn every_minute_advances_by_sixty_seconds() {
        let schedule = parse("0 * * * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 30).unwrap();
        let next = fire_time_after(&schedule, chrono_tz::UTC, start).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap());
    }

    #[test]
    fn monotonic_in_after() {
        let schedule = parse("0 0 * * * *").unwrap();
        let a = fire_time_after(&schedule, chrono_tz::UTC, Utc::now()).unwrap();
        let b = fire_time_after(&schedule, chrono_tz::UTC, Utc::now() + Duration::hours(1)).unwrap();
        assert!(a <= b);
    }

    #[test]
    fn midnight_daily_crosses_spring_forward_dst_in_vienna() {
        let vienna = chrono_tz::Europe::Vienna;
        let schedule = parse("0 0 0 * * ?").unwrap();

        let before = vienna.with_ymd_and_hms(2024, 3, 30, 23, 59, 59).unwrap().with_timezone(&Utc);
        let first = fire_time_after(&schedule, vienna, before).unwrap();
        assert_eq!(first, vienna.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap().with_timezone(&Utc));

        // Clocks spring forward on 2024-03-31, so the fire after that is
        // midnight local time under CEST (+02:00), one hour earlier in UTC
        // than it would be without the transition.
        let second = fire_time_after(&schedule, vienna, first).unwrap();
        assert_eq!(second, vienna.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap().with_timezone(&Utc));
    }

    #[test]
    fn last_day_of_month_directive_lands_on_the_28th_in_february() {
        let schedule = parse("0 0 12 L * ?").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let next = fire_time_after(&schedule, chrono_tz::UTC, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap());
    }

    #[test]
    fn nearest_weekday_directive_shifts_a_weekend_15th_back_to_friday() {
        // 2026-08-15 is a Saturday; the nearest weekday is Friday the 14th.
        let schedule = parse("0 0 9 15W * ?").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let next = fire_time_after(&schedule, chrono_tz::UTC, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 14, 9, 0, 0).unwrap());
    }

    #[test]
    fn nearest_weekday_directive_shifts_a_weekend_1st_forward_to_monday() {
        // 2026-08-01 is a Saturday; day-1 would cross into July, so it moves
        // forward to Monday the 3rd instead.
        let schedule = parse("0 0 9 1W * ?").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 7, 15, 0, 0, 0).unwrap();
        let next = fire_time_after(&schedule, chrono_tz::UTC, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap());
    }

    #[test]
    fn nth_weekday_directive_finds_the_third_friday() {
        // Quartz numbering: 6 = Friday. August 2026's Fridays are 7, 14, 21, 28.
        let schedule = parse("0 0 10 ? 8 6#3").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let next = fire_time_after(&schedule, chrono_tz::UTC, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 21, 10, 0, 0).unwrap());
    }

    #[test]
    fn last_weekday_occurrence_directive_finds_the_last_friday() {
        let schedule = parse("0 0 10 ? 8 6L").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let next = fire_time_after(&schedule, chrono_tz::UTC, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 28, 10, 0, 0).unwrap());
    }

    #[test]
    fn combining_day_of_month_and_day_of_week_directives_is_rejected() {
        assert!(parse("0 0 10 L * 6L").is_err());
    }
}
