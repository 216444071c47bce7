use chrono::{DateTime, Duration, Utc};

/// The next instant, strictly after `after`, produced by a simple trigger's
/// `start + k * interval` series for `k = 0..repeat_count` (`repeat_count ==
/// -1` meaning indefinite repeat). Returns `None` once the series is
/// exhausted.
pub fn fire_time_after(
    start: DateTime<Utc>,
    repeat_interval_ms: i64,
    repeat_count: i32,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if repeat_interval_ms <= 0 {
        return if after < start { Some(start) } else { None };
    }
    if after < start {
        return Some(start);
    }
    let elapsed_ms = (after - start).num_milliseconds();
    let k = elapsed_ms / repeat_interval_ms + 1;
    if repeat_count >= 0 && k > repeat_count as i64 {
        return None;
    }
    Some(start + Duration::milliseconds(k * repeat_interval_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(offset_secs)
    }

    #[test]
    fn first_fire_time_is_start_time() {
        let start = t(0);
        let next = fire_time_after(start, 1000, -1, start - Duration::seconds(1));
        assert_eq!(next, Some(start));
    }

    #[test]
    fn indefinite_repeat_never_exhausts() {
        let start = t(0);
        let next = fire_time_after(start, 1000, -1, start + Duration::seconds(5_000_000));
        assert!(next.is_some());
    }

    #[test]
    fn finite_repeat_exhausts_after_count() {
        let start = t(0);
        // repeat_count = 2: fires at k=0,1,2; after the k=2 fire, none remain.
        let last = start + Duration::milliseconds(2000);
        assert_eq!(fire_time_after(start, 1000, 2, last), None);
    }

    #[test]
    fn monotonic_in_after() {
        let start = t(0);
        let a = fire_time_after(start, 1000, -1, t(500)).unwrap();
        let b = fire_time_after(start, 1000, -1, t(1500)).unwrap();
        assert!(a <= b);
    }
}
