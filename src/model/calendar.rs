//! Calendars: named exclusion rules that triggers can reference to skip
//! certain moments (holidays, weekends, maintenance windows).

use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use super::trigger::{TimeOfDay, Weekday};
use crate::error::{QuartzError, Result};

/// The exclusion logic a calendar applies, independent of any base calendar
/// it chains to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CalendarRule {
    /// Excludes a `(month, day)` every year, regardless of year.
    Annual { excluded_month_days: Vec<(u32, u32)> },
    /// Excludes specific calendar dates.
    Holiday { excluded_dates: Vec<NaiveDate> },
    /// Excludes entire days of the week.
    Weekly { excluded_days: Vec<Weekday> },
    /// Excludes specific days of the month (1-31).
    Monthly { excluded_days_of_month: Vec<u32> },
    /// Excludes a time-of-day range, every day. When `excluded_end` is
    /// earlier than `excluded_start` the range wraps past midnight.
    Daily { excluded_start: TimeOfDay, excluded_end: TimeOfDay },
    /// Excludes moments matching a 7-field cron expression.
    Cron { expression: String },
}

/// A named, possibly-chained exclusion rule. Triggers reference calendars
/// by name; the scheduler consults `is_time_included` before computing the
/// next fire time after a candidate moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calendar {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub rule: CalendarRule,
    /// A calendar this one refines further: a time must be included by the
    /// base calendar *and* not excluded by this one's own rule.
    #[serde(default)]
    pub base_calendar: Option<Box<Calendar>>,
    pub time_zone: chrono_tz::Tz,
}

impl Calendar {
    pub fn new(name: impl Into<String>, rule: CalendarRule, time_zone: chrono_tz::Tz) -> Self {
        Self { name: name.into(), description: None, rule, base_calendar: None, time_zone }
    }

    pub fn with_base(mut self, base: Calendar) -> Self {
        self.base_calendar = Some(Box::new(base));
        self
    }

    /// Whether `time` is *not* excluded by this calendar or any calendar it
    /// is chained to.
    pub fn is_time_included(&self, time: DateTime<Utc>) -> Result<bool> {
        if let Some(base) = &self.base_calendar {
            if !base.is_time_included(time)? {
                return Ok(false);
            }
        }
        Ok(!self.excludes(time)?)
    }

    /// The next instant at or after `time` included by this calendar and
    /// every calendar it is chained to. Used by callers that want to jump
    /// straight past an exclusion window rather than re-probe the schedule
    /// one raw candidate at a time.
    pub fn get_next_included_time(&self, time: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let mut candidate = time;
        for _ in 0..10_000 {
            if self.is_time_included(candidate)? {
                return Ok(candidate);
            }
            candidate = self.step_past_exclusion(candidate);
        }
        Ok(candidate)
    }

    fn step_past_exclusion(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        match &self.rule {
            CalendarRule::Daily { excluded_end, .. } => {
                let local = time.with_timezone(&self.time_zone);
                let midnight = local.date_naive().and_hms_opt(0, 0, 0).unwrap();
                let target = midnight + chrono::Duration::seconds(excluded_end.seconds_of_day() as i64);
                let target_utc = self.time_zone.from_local_datetime(&target).earliest().unwrap_or(local);
                if target_utc.with_timezone(&Utc) > time {
                    target_utc.with_timezone(&Utc)
                } else {
                    time + chrono::Duration::days(1)
                }
            }
            CalendarRule::Cron { .. } => time + chrono::Duration::minutes(1),
            _ => time + chrono::Duration::days(1),
        }
    }

    fn excludes(&self, time: DateTime<Utc>) -> Result<bool> {
        let local = time.with_timezone(&self.time_zone);
        Ok(match &self.rule {
            CalendarRule::Annual { excluded_month_days } => {
                excluded_month_days.contains(&(local.month(), local.day()))
            }
            CalendarRule::Holiday { excluded_dates } => excluded_dates.contains(&local.date_naive()),
            CalendarRule::Weekly { excluded_days } => {
                let today = Weekday::from_chrono(local.weekday());
                excluded_days.contains(&today)
            }
            CalendarRule::Monthly { excluded_days_of_month } => {
                excluded_days_of_month.contains(&local.day())
            }
            CalendarRule::Daily { excluded_start, excluded_end } => {
                let secs = local.num_seconds_from_midnight();
                let start = excluded_start.seconds_of_day();
                let end = excluded_end.seconds_of_day();
                if start <= end {
                    secs >= start && secs < end
                } else {
                    secs >= start || secs < end
                }
            }
            CalendarRule::Cron { expression } => {
                let schedule = Schedule::from_str(expression).map_err(|e| {
                    QuartzError::Validation(format!("invalid cron calendar expression: {e}"))
                })?;
                schedule.includes(local)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn holiday_calendar_excludes_exact_date() {
        let cal = Calendar::new(
            "holidays",
            CalendarRule::Holiday { excluded_dates: vec![NaiveDate::from_ymd_opt(2026, 12, 25).unwrap()] },
            chrono_tz::UTC,
        );
        let christmas = Utc.with_ymd_and_hms(2026, 12, 25, 10, 0, 0).unwrap();
        let boxing_day = Utc.with_ymd_and_hms(2026, 12, 26, 10, 0, 0).unwrap();
        assert!(!cal.is_time_included(christmas).unwrap());
        assert!(cal.is_time_included(boxing_day).unwrap());
    }

    #[test]
    fn weekly_calendar_excludes_weekends() {
        let cal = Calendar::new(
            "weekends",
            CalendarRule::Weekly { excluded_days: vec![Weekday::Saturday, Weekday::Sunday] },
            chrono_tz::UTC,
        );
        let saturday = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2026, 8, 3, 10, 0, 0).unwrap();
        assert!(!cal.is_time_included(saturday).unwrap());
        assert!(cal.is_time_included(monday).unwrap());
    }

    #[test]
    fn daily_calendar_handles_midnight_wraparound() {
        let cal = Calendar::new(
            "overnight-maintenance",
            CalendarRule::Daily {
                excluded_start: TimeOfDay::new(23, 0, 0).unwrap(),
                excluded_end: TimeOfDay::new(1, 0, 0).unwrap(),
            },
            chrono_tz::UTC,
        );
        let midnight_thirty = Utc.with_ymd_and_hms(2026, 8, 1, 0, 30, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        assert!(!cal.is_time_included(midnight_thirty).unwrap());
        assert!(cal.is_time_included(noon).unwrap());
    }

    #[test]
    fn chained_calendar_excludes_union_of_both() {
        let base = Calendar::new(
            "weekends",
            CalendarRule::Weekly { excluded_days: vec![Weekday::Saturday, Weekday::Sunday] },
            chrono_tz::UTC,
        );
        let combined = Calendar::new(
            "weekends-and-christmas",
            CalendarRule::Holiday { excluded_dates: vec![NaiveDate::from_ymd_opt(2026, 12, 25).unwrap()] },
            chrono_tz::UTC,
        )
        .with_base(base);

        let saturday = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        let christmas_weekday = Utc.with_ymd_and_hms(2026, 12, 25, 10, 0, 0).unwrap();
        let ordinary_tuesday = Utc.with_ymd_and_hms(2026, 8, 4, 10, 0, 0).unwrap();
        assert!(!combined.is_time_included(saturday).unwrap());
        assert!(!combined.is_time_included(christmas_weekday).unwrap());
        assert!(combined.is_time_included(ordinary_tuesday).unwrap());
    }
}
