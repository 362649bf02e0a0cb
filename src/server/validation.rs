use chrono::NaiveDate;
use rand::Rng;

use crate::server::response::ApiError;

/// Fails with a 400 naming every field that is absent or blank.
pub fn require_fields(fields: &[(&str, Option<&str>)]) -> Result<(), ApiError> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.is_none_or(|v| v.trim().is_empty()))
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

/// Trims `value` and drops it when nothing is left.
#[must_use]
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn validate_date(value: &str, field: &str) -> Result<(), ApiError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| ApiError::bad_request(format!("{field} must be a YYYY-MM-DD date")))
}

/// Upload folder for an institution: the name with non-alphanumerics
/// replaced by `_`, lowercased, suffixed with the lowercased code. Codes are
/// unique, so two names that sanitize alike still get separate folders.
#[must_use]
pub fn institution_folder_name(name: &str, code: &str) -> String {
    let base: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{base}_{}", code.to_ascii_lowercase())
}

/// First three ASCII letters of the name, uppercased, plus three random digits.
#[must_use]
pub fn institution_code(name: &str) -> String {
    let prefix: String = name
        .chars()
        .filter(char::is_ascii_alphabetic)
        .take(3)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let suffix = rand::thread_rng().gen_range(0..1000u32);
    format!("{prefix}{suffix:03}")
}
