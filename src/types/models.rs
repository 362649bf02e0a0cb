use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AnnouncementPriority, Audience, EventType, RecordStatus, Role};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// Institution addresses are persisted as serialized JSON text. Rows written
/// by older clients may hold free text, which is passed through as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressField {
    Structured(Address),
    Raw(String),
}

impl AddressField {
    #[must_use]
    pub fn from_db_text(text: String) -> Self {
        match serde_json::from_str::<Address>(&text) {
            Ok(address) => AddressField::Structured(address),
            Err(e) => {
                tracing::warn!("Stored address is not structured, returning raw text: {e}");
                AddressField::Raw(text)
            }
        }
    }

    #[must_use]
    pub fn to_db_text(&self) -> String {
        match self {
            AddressField::Structured(address) => {
                serde_json::to_string(address).unwrap_or_default()
            }
            AddressField::Raw(text) => text.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Institution {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reg_number: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub institution_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<AddressField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub folder_name: String,
    pub institution_code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An institution together with the account that administers it.
#[derive(Debug, Clone, Serialize)]
pub struct InstitutionDetail {
    #[serde(flatten)]
    pub institution: Institution,
    pub admin_username: Option<String>,
    pub admin_name: Option<String>,
    pub admin_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewInstitution {
    pub name: String,
    pub reg_number: Option<String>,
    pub institution_type: Option<String>,
    pub address: Option<AddressField>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub folder_name: String,
    pub institution_code: String,
}

#[derive(Debug, Clone)]
pub struct InstitutionUpdate {
    pub name: String,
    pub reg_number: String,
    pub institution_type: String,
    pub address: Option<AddressField>,
    pub email: String,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub admin_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip)]
    pub password_hash: String,
    pub role: Role,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub institution_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub name: String,
    pub email: Option<String>,
    pub institution_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(skip)]
    pub token_hash: String,
    #[serde(skip)]
    pub token_lookup: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub department: String,
    #[serde(rename = "class")]
    pub class_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub status: String,
    pub institution_id: Option<i64>,
    pub photo_directory: Option<String>,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub id: String,
    pub name: String,
    pub department: String,
    pub class_label: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: String,
    pub institution_id: Option<i64>,
    pub photo_directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Teacher {
    pub id: String,
    pub name: String,
    pub department: String,
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub qualification: Option<String>,
    pub experience: Option<i64>,
    pub status: String,
    pub institution_id: Option<i64>,
    pub photo_directory: Option<String>,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTeacher {
    pub id: String,
    pub name: String,
    pub department: String,
    pub subject: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub qualification: Option<String>,
    pub experience: Option<i64>,
    pub status: String,
    pub institution_id: Option<i64>,
    pub photo_directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub date: String,
    pub time: String,
    pub student_id: String,
    pub student_name: String,
    pub department: String,
    pub status: RecordStatus,
    pub face_recognition: bool,
    pub institution_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// One attendance event waiting to be written.
///
/// `(date, time, student_id, department)` is the natural key: writing an
/// event whose key already exists replaces the stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAttendance {
    pub date: String,
    pub time: String,
    pub student_id: String,
    pub student_name: String,
    pub department: String,
    #[serde(default)]
    pub status: RecordStatus,
    pub face_recognition: bool,
    pub institution_id: Option<i64>,
}

impl NewAttendance {
    #[must_use]
    pub fn natural_key(&self) -> (&str, &str, &str, &str) {
        (&self.date, &self.time, &self.student_id, &self.department)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
    pub id: i64,
    pub name: String,
    pub department: String,
    pub teacher_id: Option<String>,
    pub room: Option<String>,
    pub schedule: Option<String>,
    pub capacity: Option<i64>,
    pub status: String,
    pub grade_level: Option<i64>,
    pub section: Option<String>,
    pub academic_year: Option<String>,
    pub grade_category: Option<String>,
    pub institution_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewClass {
    pub name: String,
    pub department: String,
    pub teacher_id: Option<String>,
    pub room: Option<String>,
    pub schedule: Option<String>,
    pub capacity: Option<i64>,
    pub grade_level: Option<i64>,
    pub section: Option<String>,
    pub academic_year: Option<String>,
    pub grade_category: Option<String>,
    pub institution_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub event_type: EventType,
    pub start_date: String,
    pub end_date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub class_id: Option<i64>,
    pub institution_id: Option<i64>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCalendarEvent {
    pub title: String,
    pub description: Option<String>,
    pub event_type: EventType,
    pub start_date: String,
    pub end_date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub class_id: Option<i64>,
    pub institution_id: Option<i64>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parent {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub student_ids: Vec<String>,
    pub institution_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub target_audience: Audience,
    pub priority: AnnouncementPriority,
    pub institution_id: Option<i64>,
    pub created_by: Option<i64>,
    pub is_published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAnnouncement {
    pub title: String,
    pub content: String,
    pub target_audience: Audience,
    pub priority: AnnouncementPriority,
    pub institution_id: Option<i64>,
    pub created_by: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoInfo {
    pub filename: String,
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_falls_back_to_raw_text() {
        let field = AddressField::from_db_text("12 Main St, Bamako".to_string());
        assert_eq!(field, AddressField::Raw("12 Main St, Bamako".to_string()));
    }

    #[test]
    fn test_address_parses_structured_text() {
        let field = AddressField::from_db_text(r#"{"city":"Bamako","country":"ML"}"#.to_string());
        let AddressField::Structured(address) = field else {
            panic!("expected structured address");
        };
        assert_eq!(address.city.as_deref(), Some("Bamako"));
        assert_eq!(address.street, None);
    }

    #[test]
    fn test_natural_key_ignores_name_and_status() {
        let a = NewAttendance {
            date: "2025-01-10".into(),
            time: "08:00:00".into(),
            student_id: "100".into(),
            student_name: "Ada Lovelace".into(),
            department: "CS".into(),
            status: RecordStatus::Present,
            face_recognition: true,
            institution_id: None,
        };
        let b = NewAttendance {
            student_name: "A. Lovelace".into(),
            status: RecordStatus::Late,
            ..a.clone()
        };
        assert_eq!(a.natural_key(), b.natural_key());
    }
}
