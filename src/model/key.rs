//! `JobKey` / `TriggerKey` — immutable `(name, group)` identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{QuartzError, Result};

/// The group new keys land in when no group is supplied.
pub const DEFAULT_GROUP: &str = "DEFAULT";

macro_rules! define_key {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name {
            pub name: String,
            pub group: String,
        }

        impl $name {
            /// Build a key, normalizing a missing/empty group to [`DEFAULT_GROUP`].
            ///
            /// Fails if `name` is empty — the empty string is forbidden.
            pub fn new(name: impl Into<String>, group: Option<impl Into<String>>) -> Result<Self> {
                let name = name.into();
                if name.is_empty() {
                    return Err(QuartzError::Validation(format!(
                        "{} name must not be empty",
                        stringify!($name)
                    )));
                }
                let group = match group {
                    Some(g) => {
                        let g = g.into();
                        if g.is_empty() {
                            DEFAULT_GROUP.to_string()
                        } else {
                            g
                        }
                    }
                    None => DEFAULT_GROUP.to_string(),
                };
                Ok(Self { name, group })
            }

            /// Build a key in the default group.
            pub fn of(name: impl Into<String>) -> Result<Self> {
                Self::new(name, None::<String>)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}.{}", self.group, self.name)
            }
        }
    };
}

define_key!(JobKey, "Identifies a stored `JobDetail` by `(name, group)`.");
define_key!(TriggerKey, "Identifies a stored `Trigger` by `(name, group)`.");

/// A matcher over a key's group, used by group-scoped store and listener
/// operations (`get_job_keys`, `pause_triggers`, listener matchers, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMatcher {
    Equals(String),
    StartsWith(String),
    EndsWith(String),
    Contains(String),
    Any,
}

impl GroupMatcher {
    pub fn matches(&self, group: &str) -> bool {
        match self {
            GroupMatcher::Equals(g) => group == g,
            GroupMatcher::StartsWith(p) => group.starts_with(p.as_str()),
            GroupMatcher::EndsWith(s) => group.ends_with(s.as_str()),
            GroupMatcher::Contains(s) => group.contains(s.as_str()),
            GroupMatcher::Any => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_is_rejected() {
        assert!(JobKey::new("", None::<String>).is_err());
    }

    #[test]
    fn missing_group_normalizes_to_default() {
        let key = JobKey::of("send-email").unwrap();
        assert_eq!(key.group, DEFAULT_GROUP);
    }

    #[test]
    fn empty_group_normalizes_to_default() {
        let key = JobKey::new("send-email", Some("")).unwrap();
        assert_eq!(key.group, DEFAULT_GROUP);
    }

    #[test]
    fn equality_is_structural() {
        let a = JobKey::new("x", Some("g")).unwrap();
        let b = JobKey::new("x", Some("g")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn group_matcher_variants() {
        assert!(GroupMatcher::Equals("GroupA".into()).matches("GroupA"));
        assert!(!GroupMatcher::Equals("GroupA".into()).matches("GroupB"));
        assert!(GroupMatcher::StartsWith("Group".into()).matches("GroupA"));
        assert!(GroupMatcher::EndsWith("A".into()).matches("GroupA"));
        assert!(GroupMatcher::Contains("oup".into()).matches("GroupA"));
        assert!(GroupMatcher::Any.matches("anything"));
    }
}
