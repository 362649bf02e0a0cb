use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::Identity;
use crate::ingest::{BatchMode, RecordFailure};
use crate::types::AddressField;

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: Identity,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateInstitutionRequest {
    pub name: Option<String>,
    pub reg_number: Option<String>,
    #[serde(rename = "type")]
    pub institution_type: Option<String>,
    pub address: Option<AddressField>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub admin_name: Option<String>,
    pub admin_email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateInstitutionRequest {
    pub name: Option<String>,
    pub reg_number: Option<String>,
    #[serde(rename = "type")]
    pub institution_type: Option<String>,
    pub address: Option<AddressField>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub admin_email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AttendanceParams {
    pub date: Option<String>,
    pub student_id: Option<String>,
    pub department: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PublicAttendanceParams {
    pub limit: Option<i64>,
    pub institution_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadSummary {
    pub message: String,
    pub mode: BatchMode,
    pub count: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<RecordFailure>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub department: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GradeParams {
    pub academic_year: Option<String>,
    pub section: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateClassRequest {
    pub name: Option<String>,
    pub department: Option<String>,
    pub teacher_id: Option<String>,
    pub room: Option<String>,
    pub schedule: Option<String>,
    pub capacity: Option<i64>,
    pub grade_level: Option<i64>,
    pub section: Option<String>,
    pub academic_year: Option<String>,
    pub grade_category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateClassRequest {
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

#[derive(Debug, Default, Deserialize)]
pub struct EventParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub event_type: Option<String>,
    pub class_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EventRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub event_type: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub class_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateParentRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub student_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateAnnouncementRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub target_audience: Option<String>,
    pub priority: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
