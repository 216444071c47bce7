//! Trigger persistence delegates (§4.5): the extension point for storing
//! per-trigger-type properties in their own auxiliary table, keyed by the
//! single-character discriminator in `triggers.trigger_type`.

use async_trait::async_trait;
use sqlx::{Postgres, Row, Transaction};

use crate::error::{QuartzError, Result};
use crate::model::{IntervalUnit, TimeOfDay, TriggerSchedule, Weekday};

/// Storage for a trigger schedule's type-specific properties, separate
/// from the common `triggers` row.
#[async_trait]
pub trait TriggerPersistenceDelegate: Send + Sync {
    fn discriminator(&self) -> char;
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sched_name: &str,
        trigger_name: &str,
        trigger_group: &str,
        schedule: &TriggerSchedule,
    ) -> Result<()>;
    async fn delete(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sched_name: &str,
        trigger_name: &str,
        trigger_group: &str,
    ) -> Result<()>;
    async fn load(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sched_name: &str,
        trigger_name: &str,
        trigger_group: &str,
    ) -> Result<TriggerSchedule>;
}

fn store_err(e: sqlx::Error) -> QuartzError {
    QuartzError::StoreTransient(e.into())
}

fn interval_unit_to_str(unit: IntervalUnit) -> &'static str {
    match unit {
        IntervalUnit::Second => "SECOND",
        IntervalUnit::Minute => "MINUTE",
        IntervalUnit::Hour => "HOUR",
        IntervalUnit::Day => "DAY",
        IntervalUnit::Week => "WEEK",
        IntervalUnit::Month => "MONTH",
        IntervalUnit::Year => "YEAR",
    }
}

fn interval_unit_from_str(s: &str) -> Result<IntervalUnit> {
    Ok(match s {
        "SECOND" => IntervalUnit::Second,
        "MINUTE" => IntervalUnit::Minute,
        "HOUR" => IntervalUnit::Hour,
        "DAY" => IntervalUnit::Day,
        "WEEK" => IntervalUnit::Week,
        "MONTH" => IntervalUnit::Month,
        "YEAR" => IntervalUnit::Year,
        other => return Err(QuartzError::StoreFatal(anyhow::anyhow!("unknown interval unit '{other}'"))),
    })
}

pub struct SimpleTriggerDelegate;

#[async_trait]
impl TriggerPersistenceDelegate for SimpleTriggerDelegate {
    fn discriminator(&self) -> char {
        'S'
    }

    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sched_name: &str,
        trigger_name: &str,
        trigger_group: &str,
        schedule: &TriggerSchedule,
    ) -> Result<()> {
        let TriggerSchedule::Simple { repeat_interval_ms, repeat_count } = schedule else {
            return Err(QuartzError::StoreFatal(anyhow::anyhow!("not a simple schedule")));
        };
        sqlx::query(
            "INSERT INTO simple_triggers (sched_name, trigger_name, trigger_group, repeat_interval, repeat_count)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (sched_name, trigger_name, trigger_group)
             DO UPDATE SET repeat_interval = EXCLUDED.repeat_interval, repeat_count = EXCLUDED.repeat_count",
        )
        .bind(sched_name)
        .bind(trigger_name)
        .bind(trigger_group)
        .bind(repeat_interval_ms)
        .bind(repeat_count)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn delete(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sched_name: &str,
        trigger_name: &str,
        trigger_group: &str,
    ) -> Result<()> {
        sqlx::query("DELETE FROM simple_triggers WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3")
            .bind(sched_name)
            .bind(trigger_name)
            .bind(trigger_group)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn load(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sched_name: &str,
        trigger_name: &str,
        trigger_group: &str,
    ) -> Result<TriggerSchedule> {
        let row = sqlx::query(
            "SELECT repeat_interval, repeat_count FROM simple_triggers
             WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3",
        )
        .bind(sched_name)
        .bind(trigger_name)
        .bind(trigger_group)
        .fetch_one(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(TriggerSchedule::Simple {
            repeat_interval_ms: row.try_get("repeat_interval").map_err(store_err)?,
            repeat_count: row.try_get("repeat_count").map_err(store_err)?,
        })
    }
}

pub struct CronTriggerDelegate;

#[async_trait]
impl TriggerPersistenceDelegate for CronTriggerDelegate {
    fn discriminator(&self) -> char {
        'C'
    }

    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sched_name: &str,
        trigger_name: &str,
        trigger_group: &str,
        schedule: &TriggerSchedule,
    ) -> Result<()> {
        let TriggerSchedule::Cron { expression, time_zone } = schedule else {
            return Err(QuartzError::StoreFatal(anyhow::anyhow!("not a cron schedule")));
        };
        sqlx::query(
            "INSERT INTO cron_triggers (sched_name, trigger_name, trigger_group, cron_expression, time_zone_id)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (sched_name, trigger_name, trigger_group)
             DO UPDATE SET cron_expression = EXCLUDED.cron_expression, time_zone_id = EXCLUDED.time_zone_id",
        )
        .bind(sched_name)
        .bind(trigger_name)
        .bind(trigger_group)
        .bind(expression)
        .bind(time_zone.name())
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn delete(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sched_name: &str,
        trigger_name: &str,
        trigger_group: &str,
    ) -> Result<()> {
        sqlx::query("DELETE FROM cron_triggers WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3")
            .bind(sched_name)
            .bind(trigger_name)
            .bind(trigger_group)
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn load(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sched_name: &str,
        trigger_name: &str,
        trigger_group: &str,
    ) -> Result<TriggerSchedule> {
        let row = sqlx::query(
            "SELECT cron_expression, time_zone_id FROM cron_triggers
             WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3",
        )
        .bind(sched_name)
        .bind(trigger_name)
        .bind(trigger_group)
        .fetch_one(&mut **tx)
        .await
        .map_err(store_err)?;
        let expression: String = row.try_get("cron_expression").map_err(store_err)?;
        let tz_name: String = row.try_get("time_zone_id").map_err(store_err)?;
        let time_zone: chrono_tz::Tz = tz_name
            .parse()
            .map_err(|_| QuartzError::StoreFatal(anyhow::anyhow!("unknown time zone '{tz_name}'")))?;
        Ok(TriggerSchedule::Cron { expression, time_zone })
    }
}

pub struct CalendarIntervalTriggerDelegate;

#[async_trait]
impl TriggerPersistenceDelegate for CalendarIntervalTriggerDelegate {
    fn discriminator(&self) -> char {
        'I'
    }

    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sched_name: &str,
        trigger_name: &str,
        trigger_group: &str,
        schedule: &TriggerSchedule,
    ) -> Result<()> {
        let TriggerSchedule::CalendarInterval { interval, unit, time_zone } = schedule else {
            return Err(QuartzError::StoreFatal(anyhow::anyhow!("not a calendar-interval schedule")));
        };
        sqlx::query(
            "INSERT INTO calendar_interval_triggers
                (sched_name, trigger_name, trigger_group, repeat_interval, repeat_interval_unit, time_zone_id)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (sched_name, trigger_name, trigger_group)
             DO UPDATE SET repeat_interval = EXCLUDED.repeat_interval,
                           repeat_interval_unit = EXCLUDED.repeat_interval_unit,
                           time_zone_id = EXCLUDED.time_zone_id",
        )
        .bind(sched_name)
        .bind(trigger_name)
        .bind(trigger_group)
        .bind(interval)
        .bind(interval_unit_to_str(*unit))
        .bind(time_zone.name())
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn delete(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sched_name: &str,
        trigger_name: &str,
        trigger_group: &str,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM calendar_interval_triggers WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3",
        )
        .bind(sched_name)
        .bind(trigger_name)
        .bind(trigger_group)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn load(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sched_name: &str,
        trigger_name: &str,
        trigger_group: &str,
    ) -> Result<TriggerSchedule> {
        let row = sqlx::query(
            "SELECT repeat_interval, repeat_interval_unit, time_zone_id FROM calendar_interval_triggers
             WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3",
        )
        .bind(sched_name)
        .bind(trigger_name)
        .bind(trigger_group)
        .fetch_one(&mut **tx)
        .await
        .map_err(store_err)?;
        let unit_str: String = row.try_get("repeat_interval_unit").map_err(store_err)?;
        let tz_name: String = row.try_get("time_zone_id").map_err(store_err)?;
        let time_zone: chrono_tz::Tz = tz_name
            .parse()
            .map_err(|_| QuartzError::StoreFatal(anyhow::anyhow!("unknown time zone '{tz_name}'")))?;
        Ok(TriggerSchedule::CalendarInterval {
            interval: row.try_get("repeat_interval").map_err(store_err)?,
            unit: interval_unit_from_str(&unit_str)?,
            time_zone,
        })
    }
}

pub struct DailyTimeIntervalTriggerDelegate;

fn weekdays_to_csv(days: &[Weekday]) -> String {
    days.iter().map(|d| (*d as u8).to_string()).collect::<Vec<_>>().join(",")
}

fn weekdays_from_csv(csv: &str) -> Vec<Weekday> {
    csv.split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<u8>().ok())
        .filter_map(|n| match n {
            1 => Some(Weekday::Sunday),
            2 => Some(Weekday::Monday),
            3 => Some(Weekday::Tuesday),
            4 => Some(Weekday::Wednesday),
            5 => Some(Weekday::Thursday),
            6 => Some(Weekday::Friday),
            7 => Some(Weekday::Saturday),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl TriggerPersistenceDelegate for DailyTimeIntervalTriggerDelegate {
    fn discriminator(&self) -> char {
        'D'
    }

    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sched_name: &str,
        trigger_name: &str,
        trigger_group: &str,
        schedule: &TriggerSchedule,
    ) -> Result<()> {
        let TriggerSchedule::DailyTimeInterval {
            interval,
            unit,
            start_time_of_day,
            end_time_of_day,
            days_of_week,
            repeat_count,
            time_zone,
        } = schedule
        else {
            return Err(QuartzError::StoreFatal(anyhow::anyhow!("not a daily-time-interval schedule")));
        };
        sqlx::query(
            "INSERT INTO daily_time_interval_triggers
                (sched_name, trigger_name, trigger_group, repeat_interval, repeat_interval_unit,
                 start_time_of_day, end_time_of_day, days_of_week, repeat_count, time_zone_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (sched_name, trigger_name, trigger_group)
             DO UPDATE SET repeat_interval = EXCLUDED.repeat_interval,
                           repeat_interval_unit = EXCLUDED.repeat_interval_unit,
                           start_time_of_day = EXCLUDED.start_time_of_day,
                           end_time_of_day = EXCLUDED.end_time_of_day,
                           days_of_week = EXCLUDED.days_of_week,
                           repeat_count = EXCLUDED.repeat_count,
                           time_zone_id = EXCLUDED.time_zone_id",
        )
        .bind(sched_name)
        .bind(trigger_name)
        .bind(trigger_group)
        .bind(interval)
        .bind(interval_unit_to_str(*unit))
        .bind(start_time_of_day.seconds_of_day() as i32)
        .bind(end_time_of_day.seconds_of_day() as i32)
        .bind(weekdays_to_csv(days_of_week))
        .bind(*repeat_count)
        .bind(time_zone.name())
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn delete(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sched_name: &str,
        trigger_name: &str,
        trigger_group: &str,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM daily_time_interval_triggers WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3",
        )
        .bind(sched_name)
        .bind(trigger_name)
        .bind(trigger_group)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn load(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sched_name: &str,
        trigger_name: &str,
        trigger_group: &str,
    ) -> Result<TriggerSchedule> {
        let row = sqlx::query(
            "SELECT repeat_interval, repeat_interval_unit, start_time_of_day, end_time_of_day,
                    days_of_week, repeat_count, time_zone_id
             FROM daily_time_interval_triggers
             WHERE sched_name = $1 AND trigger_name = $2 AND trigger_group = $3",
        )
        .bind(sched_name)
        .bind(trigger_name)
        .bind(trigger_group)
        .fetch_one(&mut **tx)
        .await
        .map_err(store_err)?;

        let unit_str: String = row.try_get("repeat_interval_unit").map_err(store_err)?;
        let start_secs: i32 = row.try_get("start_time_of_day").map_err(store_err)?;
        let end_secs: i32 = row.try_get("end_time_of_day").map_err(store_err)?;
        let days_csv: String = row.try_get("days_of_week").map_err(store_err)?;
        let tz_name: String = row.try_get("time_zone_id").map_err(store_err)?;
        let time_zone: chrono_tz::Tz = tz_name
            .parse()
            .map_err(|_| QuartzError::StoreFatal(anyhow::anyhow!("unknown time zone '{tz_name}'")))?;

        Ok(TriggerSchedule::DailyTimeInterval {
            interval: row.try_get("repeat_interval").map_err(store_err)?,
            unit: interval_unit_from_str(&unit_str)?,
            start_time_of_day: seconds_to_time_of_day(start_secs as u32),
            end_time_of_day: seconds_to_time_of_day(end_secs as u32),
            days_of_week: weekdays_from_csv(&days_csv),
            repeat_count: row.try_get("repeat_count").map_err(store_err)?,
            time_zone,
        })
    }
}

fn seconds_to_time_of_day(total: u32) -> TimeOfDay {
    TimeOfDay::new((total / 3600) as u8, ((total % 3600) / 60) as u8, (total % 60) as u8)
        .expect("seconds_of_day round-trips within range")
}

/// Resolve the delegate for a persisted discriminator character.
pub fn delegate_for(discriminator: char) -> Result<Box<dyn TriggerPersistenceDelegate>> {
    Ok(match discriminator {
        'S' => Box::new(SimpleTriggerDelegate),
        'C' => Box::new(CronTriggerDelegate),
        'I' => Box::new(CalendarIntervalTriggerDelegate),
        'D' => Box::new(DailyTimeIntervalTriggerDelegate),
        other => return Err(QuartzError::StoreFatal(anyhow::anyhow!("no trigger delegate for type '{other}'"))),
    })
}

pub fn delegate_for_schedule(schedule: &TriggerSchedule) -> Box<dyn TriggerPersistenceDelegate> {
    delegate_for(schedule.discriminator()).expect("schedule discriminator always has a delegate")
}
