use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Generates the string conversions shared by the text-backed enums stored in
/// SQLite columns.
macro_rules! text_enum {
    ($name:ident, $what:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::BadRequest(format!("Invalid {}: {other}", $what))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Superadmin,
    Admin,
    Teacher,
    Student,
    Parent,
    Demo,
}

text_enum!(Role, "role", {
    Superadmin => "superadmin",
    Admin => "admin",
    Teacher => "teacher",
    Student => "student",
    Parent => "parent",
    Demo => "demo",
});

impl Role {
    #[must_use]
    pub fn can_manage_people(&self) -> bool {
        matches!(self, Role::Superadmin | Role::Admin)
    }

    #[must_use]
    pub fn can_schedule(&self) -> bool {
        matches!(self, Role::Superadmin | Role::Admin | Role::Teacher)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Class,
    Exam,
    Holiday,
    Meeting,
    Announcement,
}

text_enum!(EventType, "event type", {
    Class => "class",
    Exam => "exam",
    Holiday => "holiday",
    Meeting => "meeting",
    Announcement => "announcement",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Present,
    Absent,
    Late,
    Excused,
}

text_enum!(RecordStatus, "attendance status", {
    Present => "present",
    Absent => "absent",
    Late => "late",
    Excused => "excused",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    #[default]
    All,
    Teachers,
    Students,
    Parents,
}

text_enum!(Audience, "target audience", {
    All => "all",
    Teachers => "teachers",
    Students => "students",
    Parents => "parents",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnouncementPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

text_enum!(AnnouncementPriority, "priority", {
    Low => "low",
    Medium => "medium",
    High => "high",
    Urgent => "urgent",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_text() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), *role);
        }
    }

    #[test]
    fn test_event_type_rejects_unknown() {
        let err = "party".parse::<EventType>().unwrap_err();
        assert!(matches!(err, Error::BadRequest(msg) if msg.contains("event type")));
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!("Present".parse::<RecordStatus>().unwrap(), RecordStatus::Present);
        assert_eq!(" LATE ".parse::<RecordStatus>().unwrap(), RecordStatus::Late);
    }

    #[test]
    fn test_role_capabilities() {
        assert!(Role::Admin.can_manage_people());
        assert!(!Role::Teacher.can_manage_people());
        assert!(Role::Teacher.can_schedule());
        assert!(!Role::Demo.can_schedule());
    }
}
