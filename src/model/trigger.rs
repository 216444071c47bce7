//! `Trigger` — a time-based firing rule for a job, polymorphic over four
//! schedule variants (simple, cron, calendar-interval, daily-time-interval).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::job::JobDataMap;
use super::key::{JobKey, TriggerKey};
use crate::error::{QuartzError, Result};

/// Persisted trigger lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerState {
    #[default]
    Waiting,
    Acquired,
    Executing,
    Complete,
    Paused,
    PausedBlocked,
    /// The trigger's job is concurrent-execution-disallowed and another
    /// execution of it is already in flight.
    Blocked,
    Error,
}

/// How a misfired trigger's `next_fire_time` and repeat bookkeeping are
/// repaired. `SmartPolicy` is resolved to a schedule-variant-specific
/// default before being applied (see `crate::scheduler::misfire`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MisfirePolicy {
    #[default]
    SmartPolicy,
    FireNow,
    DoNothing,
    RescheduleNextWithRemainingCount,
    RescheduleNowWithExistingCount,
    RescheduleNowWithRemainingCount,
    IgnoreMisfirePolicy,
}

/// What the store should do with a trigger after a job execution completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionInstruction {
    Noop,
    ReExecuteJob,
    SetTriggerComplete,
    DeleteTrigger,
    SetAllJobTriggersComplete,
    SetTriggerError,
    SetAllJobTriggersError,
}

/// Calendar-arithmetic unit for calendar-interval and daily-time-interval
/// triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

/// `1 = Sunday .. 7 = Saturday`, the day-of-week convention used by daily
/// time interval triggers (distinct from `chrono::Weekday`, where Monday is 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Weekday {
    Sunday = 1,
    Monday = 2,
    Tuesday = 3,
    Wednesday = 4,
    Thursday = 5,
    Friday = 6,
    Saturday = 7,
}

impl Weekday {
    pub fn from_chrono(w: chrono::Weekday) -> Self {
        use chrono::Weekday as C;
        match w {
            C::Sun => Weekday::Sunday,
            C::Mon => Weekday::Monday,
            C::Tue => Weekday::Tuesday,
            C::Wed => Weekday::Wednesday,
            C::Thu => Weekday::Thursday,
            C::Fri => Weekday::Friday,
            C::Sat => Weekday::Saturday,
        }
    }

    pub fn to_chrono(self) -> chrono::Weekday {
        use chrono::Weekday as C;
        match self {
            Weekday::Sunday => C::Sun,
            Weekday::Monday => C::Mon,
            Weekday::Tuesday => C::Tue,
            Weekday::Wednesday => C::Wed,
            Weekday::Thursday => C::Thu,
            Weekday::Friday => C::Fri,
            Weekday::Saturday => C::Sat,
        }
    }
}

/// A wall-clock time of day, used by daily-time-interval triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8, second: u8) -> Result<Self> {
        if hour > 23 {
            return Err(QuartzError::Validation(format!("hour {hour} out of range [0,23]")));
        }
        if minute > 59 {
            return Err(QuartzError::Validation(format!("minute {minute} out of range [0,59]")));
        }
        if second > 59 {
            return Err(QuartzError::Validation(format!("second {second} out of range [0,59]")));
        }
        Ok(Self { hour, minute, second })
    }

    pub fn seconds_of_day(&self) -> u32 {
        self.hour as u32 * 3600 + self.minute as u32 * 60 + self.second as u32
    }
}

/// The per-variant schedule definition: how a trigger's next fire time
/// advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TriggerSchedule {
    Simple {
        repeat_interval_ms: i64,
        /// `-1` means indefinite.
        repeat_count: i32,
    },
    Cron {
        /// A 7-field expression over `(sec, min, hour, dom, mon, dow, year?)`.
        expression: String,
        time_zone: chrono_tz::Tz,
    },
    CalendarInterval {
        interval: i32,
        unit: IntervalUnit,
        time_zone: chrono_tz::Tz,
    },
    DailyTimeInterval {
        interval: i32,
        /// Must be `Second`, `Minute`, or `Hour`.
        unit: IntervalUnit,
        start_time_of_day: TimeOfDay,
        end_time_of_day: TimeOfDay,
        days_of_week: Vec<Weekday>,
        repeat_count: Option<i32>,
        time_zone: chrono_tz::Tz,
    },
}

impl TriggerSchedule {
    /// Single-character discriminator persisted in `triggers.trigger_type`,
    /// selecting which trigger-persistence delegate owns the auxiliary row.
    pub fn discriminator(&self) -> char {
        match self {
            TriggerSchedule::Simple { .. } => 'S',
            TriggerSchedule::Cron { .. } => 'C',
            TriggerSchedule::CalendarInterval { .. } => 'I',
            TriggerSchedule::DailyTimeInterval { .. } => 'D',
        }
    }
}

/// A stored trigger.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Trigger {
    pub key: TriggerKey,
    pub job_key: JobKey,

    #[builder(default, setter(strip_option))]
    pub description: Option<String>,

    #[builder(setter(!into))]
    pub start_time: DateTime<Utc>,

    #[builder(default, setter(strip_option))]
    pub end_time: Option<DateTime<Utc>>,

    #[builder(default = 5)]
    pub priority: i32,

    #[builder(default)]
    pub misfire_policy: MisfirePolicy,

    #[builder(default, setter(strip_option))]
    pub calendar_name: Option<String>,

    #[builder(default)]
    pub job_data_map: JobDataMap,

    #[builder(default, setter(strip_option))]
    pub next_fire_time: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub previous_fire_time: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub fire_instance_id: Option<String>,

    #[builder(default)]
    pub state: TriggerState,

    #[builder(setter(!into))]
    pub schedule: TriggerSchedule,
}

impl Trigger {
    /// Checks `start_time <= next_fire_time <= end_time` when set, and
    /// `previous_fire_time < next_fire_time`.
    pub fn validate(&self) -> Result<()> {
        if let Some(next) = self.next_fire_time {
            if next < self.start_time {
                return Err(QuartzError::Validation(format!(
                    "trigger {}: next_fire_time before start_time",
                    self.key
                )));
            }
            if let Some(end) = self.end_time {
                if next > end {
                    return Err(QuartzError::Validation(format!(
                        "trigger {}: next_fire_time after end_time",
                        self.key
                    )));
                }
            }
            if let Some(prev) = self.previous_fire_time {
                if prev >= next {
                    return Err(QuartzError::Validation(format!(
                        "trigger {}: previous_fire_time not before next_fire_time",
                        self.key
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn is_recurring_indefinitely(&self) -> bool {
        matches!(
            self.schedule,
            TriggerSchedule::Simple { repeat_count: -1, .. } | TriggerSchedule::Cron { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Trigger {
        Trigger::builder()
            .key(TriggerKey::of("t1").unwrap())
            .job_key(JobKey::of("j1").unwrap())
            .start_time(Utc::now())
            .schedule(TriggerSchedule::Simple { repeat_interval_ms: 1000, repeat_count: -1 })
            .build()
    }

    #[test]
    fn default_priority_is_five() {
        assert_eq!(base().priority, 5);
    }

    #[test]
    fn valid_without_next_fire_time() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn rejects_next_fire_time_before_start() {
        let mut t = base();
        t.next_fire_time = Some(t.start_time - chrono::Duration::seconds(1));
        assert!(t.validate().is_err());
    }

    #[test]
    fn rejects_previous_not_before_next() {
        let mut t = base();
        t.next_fire_time = Some(t.start_time + chrono::Duration::seconds(10));
        t.previous_fire_time = Some(t.start_time + chrono::Duration::seconds(10));
        assert!(t.validate().is_err());
    }

    #[test]
    fn weekday_roundtrips_through_chrono() {
        for w in [
            Weekday::Sunday,
            Weekday::Monday,
            Weekday::Tuesday,
            Weekday::Wednesday,
            Weekday::Thursday,
            Weekday::Friday,
            Weekday::Saturday,
        ] {
            assert_eq!(Weekday::from_chrono(w.to_chrono()), w);
        }
    }

    #[test]
    fn time_of_day_rejects_out_of_range_hour() {
        assert!(TimeOfDay::new(24, 0, 0).is_err());
    }
}
