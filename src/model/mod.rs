//! Core domain types: keys, job details, triggers, calendars, and the
//! records the store layer persists for cluster coordination and recovery.

pub mod calendar;
pub mod fired_trigger;
pub mod job;
pub mod key;
pub mod scheduler_instance;
pub mod trigger;

pub use calendar::{Calendar, CalendarRule};
pub use fired_trigger::{FiredTrigger, FiredTriggerState};
pub use job::{JobCapabilities, JobDataMap, JobDetail};
pub use key::{GroupMatcher, JobKey, TriggerKey, DEFAULT_GROUP};
pub use scheduler_instance::SchedulerInstance;
pub use trigger::{
    CompletionInstruction, IntervalUnit, MisfirePolicy, TimeOfDay, Trigger, TriggerSchedule,
    TriggerState, Weekday,
};
