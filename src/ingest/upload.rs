use std::collections::HashMap;
use std::io::Read;

use crate::error::Result;
use crate::types::{NewAttendance, RecordStatus};

pub const REQUIRED_COLUMNS: [&str; 5] = ["Date", "Time", "Name", "ID", "Dept"];

#[derive(Debug, Clone, Default)]
pub struct ParsedUpload {
    pub records: Vec<NewAttendance>,
    /// Rows dropped for missing fields, an unknown status or bytes that do
    /// not decode as UTF-8.
    pub skipped: usize,
}

/// Reads an attendance export. Header names match case-insensitively;
/// `Role` and `Status` columns are optional.
///
/// Rows lacking any required value, or that cannot be decoded, are dropped
/// rather than failing the upload. A file missing a required header
/// therefore yields no records. Only an unreadable header or an I/O error
/// fails the parse.
pub fn parse_attendance_csv<R: Read>(reader: R, institution_id: Option<i64>) -> Result<ParsedUpload> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns: HashMap<String, usize> = csv_reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim_start_matches('\u{feff}').to_ascii_lowercase(), i))
        .collect();

    let index = |name: &str| columns.get(&name.to_ascii_lowercase()).copied();
    let required: Vec<Option<usize>> = REQUIRED_COLUMNS.iter().map(|c| index(*c)).collect();
    let status_column = index("Status");

    let mut parsed = ParsedUpload::default();

    for row in csv_reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => return Err(e.into()),
            Err(e) => {
                tracing::debug!("Dropping undecodable attendance row: {e}");
                parsed.skipped += 1;
                continue;
            }
        };
        let values: Option<Vec<&str>> = required
            .iter()
            .map(|col| col.and_then(|i| row.get(i)).filter(|v| !v.is_empty()))
            .collect();

        let Some(values) = values else {
            parsed.skipped += 1;
            continue;
        };

        let status = match status_column.and_then(|i| row.get(i)).filter(|v| !v.is_empty()) {
            None => RecordStatus::default(),
            Some(raw) => match raw.parse() {
                Ok(status) => status,
                Err(_) => {
                    parsed.skipped += 1;
                    continue;
                }
            },
        };

        parsed.records.push(NewAttendance {
            date: values[0].to_string(),
            time: values[1].to_string(),
            student_name: values[2].to_string(),
            student_id: values[3].to_string(),
            department: values[4].to_string(),
            status,
            face_recognition: true,
            institution_id,
        });
    }

    if parsed.skipped > 0 {
        tracing::info!("Skipped {} malformed attendance rows", parsed.skipped);
    }

    Ok(parsed)
}
