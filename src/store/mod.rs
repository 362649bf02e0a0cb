mod query;
mod schema;
mod sqlite;

pub use query::Query;
pub use schema::{MIGRATIONS, SCHEMA_VERSION};
pub use sqlite::SqliteStore;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::ingest::{BatchMode, BatchReport};
use crate::types::*;

#[derive(Debug, Clone, Default)]
pub struct PersonFilter {
    pub department: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AttendanceFilter {
    pub date: Option<String>,
    pub student_id: Option<String>,
    pub department: Option<String>,
    pub status: Option<RecordStatus>,
    pub limit: i64,
}

impl Default for AttendanceFilter {
    fn default() -> Self {
        Self {
            date: None,
            student_id: None,
            department: None,
            status: None,
            limit: 100,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassFilter {
    pub department: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GradeFilter {
    pub level: i64,
    pub academic_year: Option<String>,
    pub section: Option<String>,
}

/// Partial class update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ClassUpdate {
    pub name: Option<String>,
    pub department: Option<String>,
    pub teacher_id: Option<String>,
    pub room: Option<String>,
    pub schedule: Option<String>,
    pub capacity: Option<i64>,
    pub status: Option<String>,
    pub grade_level: Option<i64>,
    pub section: Option<String>,
    pub academic_year: Option<String>,
    pub grade_category: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub event_type: Option<EventType>,
    pub class_id: Option<i64>,
}

/// Full replacement of an event's editable fields.
#[derive(Debug, Clone)]
pub struct EventChanges {
    pub title: String,
    pub description: Option<String>,
    pub event_type: EventType,
    pub start_date: String,
    pub end_date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub class_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewParent {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub student_ids: Vec<String>,
    pub institution_id: Option<i64>,
}

/// Store defines the database interface.
///
/// Every list and aggregate takes a [`TenantScope`]; implementations must
/// apply it to the query even when no other filter is present.
pub trait Store: Send + Sync {
    /// Applies pending migrations.
    fn initialize(&self) -> Result<()>;
    fn schema_version(&self) -> Result<u32>;
    fn superadmin_exists(&self) -> Result<bool>;

    // Institution operations
    fn create_institution_with_admin(
        &self,
        institution: &NewInstitution,
        admin: &NewUser,
    ) -> Result<Institution>;
    fn institution_code_exists(&self, code: &str) -> Result<bool>;
    fn get_institution(&self, id: i64) -> Result<Option<Institution>>;
    fn get_institution_by_code(&self, code: &str) -> Result<Option<Institution>>;
    fn get_institution_detail(&self, id: i64) -> Result<Option<InstitutionDetail>>;
    fn list_institutions(&self) -> Result<Vec<Institution>>;
    fn update_institution(&self, id: i64, update: &InstitutionUpdate) -> Result<bool>;
    fn delete_institution(&self, id: i64) -> Result<bool>;
    fn system_stats(&self) -> Result<SystemStats>;

    // User and session operations
    fn create_user(&self, user: &NewUser) -> Result<User>;
    fn get_user(&self, id: i64) -> Result<Option<User>>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    fn username_exists(&self, username: &str) -> Result<bool>;
    fn create_session(&self, session: &Session) -> Result<()>;
    fn get_session_by_lookup(&self, lookup: &str) -> Result<Option<Session>>;
    fn touch_session(&self, id: &str) -> Result<()>;
    fn delete_session(&self, id: &str) -> Result<bool>;
    fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize>;

    // Student operations
    fn create_student(&self, student: &NewStudent, account: &NewUser) -> Result<Student>;
    fn student_exists(&self, id: &str) -> Result<bool>;
    fn get_student(&self, id: &str) -> Result<Option<Student>>;
    fn list_students(&self, filter: &PersonFilter, scope: &TenantScope) -> Result<Vec<Student>>;
    fn delete_student(&self, id: &str) -> Result<Option<Student>>;

    // Teacher operations
    fn create_teacher(&self, teacher: &NewTeacher, account: &NewUser) -> Result<Teacher>;
    fn teacher_exists(&self, id: &str) -> Result<bool>;
    fn get_teacher(&self, id: &str) -> Result<Option<Teacher>>;
    fn list_teachers(&self, filter: &PersonFilter, scope: &TenantScope) -> Result<Vec<Teacher>>;
    fn delete_teacher(&self, id: &str) -> Result<Option<Teacher>>;

    // Attendance operations
    fn insert_attendance(&self, records: &[NewAttendance], mode: BatchMode) -> Result<BatchReport>;
    fn list_attendance(
        &self,
        filter: &AttendanceFilter,
        scope: &TenantScope,
    ) -> Result<Vec<AttendanceRecord>>;
    fn attendance_stats(&self, scope: &TenantScope, today: NaiveDate) -> Result<AttendanceStats>;
    fn institution_stats(&self, institution_id: i64, today: NaiveDate) -> Result<InstitutionStats>;

    // Class operations
    fn create_class(&self, class: &NewClass) -> Result<Class>;
    fn get_class(&self, id: i64, scope: &TenantScope) -> Result<Option<Class>>;
    fn list_classes(&self, filter: &ClassFilter, scope: &TenantScope) -> Result<Vec<Class>>;
    fn list_classes_by_grade(&self, filter: &GradeFilter, scope: &TenantScope) -> Result<Vec<Class>>;
    fn update_class(&self, id: i64, update: &ClassUpdate, scope: &TenantScope) -> Result<Option<Class>>;
    fn archive_class(&self, id: i64, scope: &TenantScope) -> Result<bool>;

    // Calendar operations
    fn create_event(&self, event: &NewCalendarEvent) -> Result<CalendarEvent>;
    fn list_events(&self, filter: &EventFilter, scope: &TenantScope) -> Result<Vec<CalendarEvent>>;
    fn update_event(
        &self,
        id: i64,
        changes: &EventChanges,
        scope: &TenantScope,
    ) -> Result<Option<CalendarEvent>>;
    fn delete_event(&self, id: i64, scope: &TenantScope) -> Result<bool>;

    // Parent and announcement operations
    fn create_parent(&self, parent: &NewParent) -> Result<Parent>;
    fn list_parents(&self, scope: &TenantScope) -> Result<Vec<Parent>>;
    fn create_announcement(&self, announcement: &NewAnnouncement) -> Result<Announcement>;
    fn list_announcements(&self, scope: &TenantScope, now: DateTime<Utc>) -> Result<Vec<Announcement>>;

    fn close(&self) -> Result<()>;
}
