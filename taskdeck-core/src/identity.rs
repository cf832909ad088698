//! Identity types for Taskdeck entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Duration in milliseconds for timeouts and notification lifetimes.
pub type DurationMs = u64;

/// Generate a new UUIDv7 identifier (timestamp-sortable).
///
/// Used for client-local identities such as pending mutations; server
/// entities carry whatever identifier the backend assigned.
pub fn new_local_id() -> Uuid {
    Uuid::now_v7()
}

/// Common behaviour of the string-backed entity identifiers.
pub trait EntityIdType: Clone + Eq + std::hash::Hash + fmt::Display {
    /// Borrow the raw identifier.
    fn as_str(&self) -> &str;
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }
        }

        impl EntityIdType for $name {
            fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a user account.
    UserId
);
string_id!(
    /// Identifier of a project.
    ProjectId
);
string_id!(
    /// Identifier of a task.
    TaskId
);
string_id!(
    /// Identifier of a task comment.
    CommentId
);
string_id!(
    /// Identifier of an activity feed record.
    ActivityId
);

// ============================================================================
// CLOCK
// ============================================================================

/// Source of wall-clock time.
///
/// Session expiry and cache timestamps read time through this trait so tests
/// can pin the clock instead of racing the system time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Timestamp;

    /// Current time as Unix epoch seconds.
    fn now_epoch_secs(&self) -> i64 {
        self.now().timestamp()
    }
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_id_is_v7() {
        let id = new_local_id();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_string_id_is_transparent() {
        let id = TaskId::new("t1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"t1\"");
        let parsed: TaskId = serde_json::from_str("\"t1\"").unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.as_str(), "t1");
        assert_eq!(id.to_string(), "t1");
    }
}
