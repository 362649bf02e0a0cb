//! Attendance ingestion: CSV uploads, single realtime events, and the batch
//! semantics shared by both.

mod upload;

pub use upload::{ParsedUpload, REQUIRED_COLUMNS, parse_attendance_csv};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{NewAttendance, RecordStatus};

/// How a batch reacts to a record the database refuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    /// One transaction; any failing record rolls back the whole batch.
    #[default]
    Atomic,
    /// Each record runs in its own savepoint; failures are reported and
    /// skipped while the rest of the batch commits.
    Isolated,
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchMode::Atomic => f.write_str("atomic"),
            BatchMode::Isolated => f.write_str("isolated"),
        }
    }
}

impl FromStr for BatchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "atomic" => Ok(BatchMode::Atomic),
            "isolated" => Ok(BatchMode::Isolated),
            other => Err(Error::BadRequest(format!("Invalid batch mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    /// Zero-based position in the submitted batch.
    pub index: usize,
    pub student_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub submitted: usize,
    pub inserted: usize,
    pub failed: Vec<RecordFailure>,
}

impl BatchReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.inserted == self.submitted
    }
}

/// Body of `POST /api/attendance/realtime`, as sent by the face-recognition
/// feed.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RealtimeEvent {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub dept: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_code: Option<String>,
}

impl RealtimeEvent {
    /// Validates required fields and builds the record to store.
    pub fn into_record(self, institution_id: Option<i64>) -> Result<NewAttendance> {
        let required = [&self.date, &self.time, &self.name, &self.id, &self.dept];
        if required.iter().any(|v| v.trim().is_empty()) {
            return Err(Error::BadRequest("Missing required fields".into()));
        }

        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => RecordStatus::default(),
            Some(s) => s.parse()?,
        };

        Ok(NewAttendance {
            date: self.date.trim().to_string(),
            time: self.time.trim().to_string(),
            student_id: self.id.trim().to_string(),
            student_name: self.name.trim().to_string(),
            department: self.dept.trim().to_string(),
            status,
            face_recognition: true,
            institution_id,
        })
    }
}
