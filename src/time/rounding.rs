use chrono::{DateTime, Duration, Offset, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

fn floor_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    t - Duration::nanoseconds(t.timestamp_subsec_nanos() as i64)
}

fn floor_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    let t = floor_to_second(t);
    t - Duration::seconds(t.second() as i64)
}

fn floor_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let t = floor_to_minute(t);
    t - Duration::minutes(t.minute() as i64)
}

/// Floor to the start of the current second (drop sub-second precision).
pub fn even_second_before(t: DateTime<Utc>) -> DateTime<Utc> {
    floor_to_second(t)
}

/// Ceiling to the start of the next second, or `t` unchanged if it already
/// falls exactly on a second boundary.
pub fn even_second_after(t: DateTime<Utc>) -> DateTime<Utc> {
    let floored = floor_to_second(t);
    if floored == t {
        floored
    } else {
        floored + Duration::seconds(1)
    }
}

/// Floor to the start of the current minute.
pub fn even_minute_before(t: DateTime<Utc>) -> DateTime<Utc> {
    floor_to_minute(t)
}

/// Ceiling to the start of the next minute, or `t` unchanged if it already
/// falls exactly on a minute boundary.
pub fn even_minute_after(t: DateTime<Utc>) -> DateTime<Utc> {
    let floored = floor_to_minute(t);
    if floored == t {
        floored
    } else {
        floored + Duration::minutes(1)
    }
}

/// Floor to the start of the current hour.
pub fn even_hour_before(t: DateTime<Utc>) -> DateTime<Utc> {
    floor_to_hour(t)
}

/// Ceiling to the start of the next hour, or `t` unchanged if it already
/// falls exactly on an hour boundary.
pub fn even_hour_after(t: DateTime<Utc>) -> DateTime<Utc> {
    let floored = floor_to_hour(t);
    if floored == t {
        floored
    } else {
        floored + Duration::hours(1)
    }
}

/// The next moment, strictly after `t`, whose second is a multiple of
/// `base`. `base == 0` advances to the next minute boundary instead.
pub fn next_given_second_date(t: DateTime<Utc>, base: u32) -> DateTime<Utc> {
    let minute_start = floor_to_minute(t);
    if base == 0 || base >= 60 {
        return minute_start + Duration::minutes(1);
    }
    let candidate = (t.second() / base + 1) * base;
    if candidate >= 60 {
        minute_start + Duration::minutes(1)
    } else {
        minute_start + Duration::seconds(candidate as i64)
    }
}

/// The next moment, strictly after `t`, whose minute is a multiple of
/// `base` (seconds zeroed). `base == 0` advances to the next hour boundary
/// instead.
pub fn next_given_minute_date(t: DateTime<Utc>, base: u32) -> DateTime<Utc> {
    let hour_start = floor_to_hour(t);
    if base == 0 || base >= 60 {
        return hour_start + Duration::hours(1);
    }
    let candidate = (t.minute() / base + 1) * base;
    if candidate >= 60 {
        hour_start + Duration::hours(1)
    } else {
        hour_start + Duration::minutes(candidate as i64)
    }
}

/// Shift an instant by the difference between `src_zone`'s and
/// `dst_zone`'s UTC offset at that instant, preserving the wall-clock
/// reading a calendar-interval trigger computed under `src_zone` when it is
/// re-evaluated under `dst_zone` across a daylight-saving transition.
pub fn translate_time(d: DateTime<Utc>, src_zone: Tz, dst_zone: Tz) -> DateTime<Utc> {
    let src_offset = src_zone.from_utc_datetime(&d.naive_utc()).offset().fix().local_minus_utc();
    let dst_offset = dst_zone.from_utc_datetime(&d.naive_utc()).offset().fix().local_minus_utc();
    d + Duration::seconds((src_offset - dst_offset) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn even_second_before_is_idempotent() {
        let x = t(11, 17, 41) + Duration::milliseconds(250);
        let once = even_second_before(x);
        assert_eq!(even_second_before(once), once);
    }

    #[test]
    fn even_minute_before_is_idempotent() {
        let x = t(11, 17, 41);
        let once = even_minute_before(x);
        assert_eq!(even_minute_before(once), once);
    }

    #[test]
    fn even_hour_before_is_idempotent() {
        let x = t(11, 17, 41);
        let once = even_hour_before(x);
        assert_eq!(even_hour_before(once), once);
    }

    #[test]
    fn next_given_minute_rolls_past_hour_when_base_exceeded() {
        assert_eq!(next_given_minute_date(t(11, 52, 41), 17), t(12, 0, 0));
    }

    #[test]
    fn next_given_minute_base_zero_advances_to_next_hour() {
        assert_eq!(next_given_minute_date(t(11, 17, 41), 0), t(12, 0, 0));
    }

    #[test]
    fn next_given_minute_base_one_advances_to_next_minute() {
        assert_eq!(next_given_minute_date(t(11, 17, 41), 1), t(11, 18, 0));
    }
}
