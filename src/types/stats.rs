use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttendanceStats {
    pub today_attendance: i64,
    pub today_present: i64,
    pub week_attendance: i64,
    pub month_attendance: i64,
    pub total_students: i64,
    pub today_attendance_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstitutionStats {
    pub total_students: i64,
    pub total_teachers: i64,
    pub total_classes: i64,
    pub new_students_this_month: i64,
    pub new_teachers_this_month: i64,
    pub attendance_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstitutionTypeCount {
    #[serde(rename = "type")]
    pub institution_type: Option<String>,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_institutions: i64,
    pub total_students: i64,
    pub total_teachers: i64,
    pub system_admins: i64,
    pub institutions_by_type: Vec<InstitutionTypeCount>,
}

/// `present / total` as a percentage rounded to one decimal; zero when there
/// is nobody to attend.
#[must_use]
pub fn attendance_rate(present: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let rate = present as f64 / total as f64 * 100.0;
    (rate * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_rounds_to_one_decimal() {
        assert_eq!(attendance_rate(1, 3), 33.3);
        assert_eq!(attendance_rate(2, 3), 66.7);
        assert_eq!(attendance_rate(3, 3), 100.0);
    }

    #[test]
    fn test_rate_is_zero_without_students() {
        assert_eq!(attendance_rate(5, 0), 0.0);
        assert_eq!(attendance_rate(0, 0), 0.0);
    }
}
