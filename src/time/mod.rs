//! Calendar-arithmetic helpers shared by the schedule evaluators: rounding
//! a timestamp to a unit boundary, and shifting wall-clock across zones.

mod rounding;

pub use rounding::{
    even_hour_after, even_hour_before, even_minute_after, even_minute_before, even_second_after,
    even_second_before, next_given_minute_date, next_given_second_date, translate_time,
};
