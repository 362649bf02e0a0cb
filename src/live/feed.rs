use std::collections::{HashSet, VecDeque};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::types::AttendanceRecord;

pub const DEFAULT_CAPACITY: usize = 100;

type FeedKey = (String, String, String);

fn key(record: &AttendanceRecord) -> FeedKey {
    (
        record.date.clone(),
        record.time.clone(),
        record.student_id.clone(),
    )
}

/// The in-memory window a live dashboard renders, newest first.
#[derive(Debug, Clone)]
pub struct LiveFeed {
    records: VecDeque<AttendanceRecord>,
    capacity: usize,
}

impl Default for LiveFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LiveFeed {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Folds a newest-first fetch into the window and returns the records
    /// that were not already shown. A record is known when another one with
    /// the same date, time and student id is in the window.
    pub fn merge(&mut self, fetched: Vec<AttendanceRecord>) -> Vec<AttendanceRecord> {
        let mut seen: HashSet<FeedKey> = self.records.iter().map(key).collect();
        let fresh: Vec<AttendanceRecord> = fetched
            .into_iter()
            .filter(|record| seen.insert(key(record)))
            .collect();

        for record in fresh.iter().rev() {
            self.records.push_front(record.clone());
        }
        self.records.truncate(self.capacity);

        fresh
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttendanceRecord> {
        self.records.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// How fresh a record looks on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recency {
    New,
    Recent,
    Older,
}

impl Recency {
    /// Classifies by the record's own date and time; unparsable timestamps
    /// are `Older`.
    #[must_use]
    pub fn classify(record: &AttendanceRecord, now: NaiveDateTime) -> Self {
        let Some(at) = recorded_at(record) else {
            return Recency::Older;
        };
        let age = now - at;
        if age < TimeDelta::hours(1) {
            Recency::New
        } else if age < TimeDelta::hours(24) {
            Recency::Recent
        } else {
            Recency::Older
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Recency::New => "new",
            Recency::Recent => "recent",
            Recency::Older => "older",
        }
    }
}

/// The wall-clock moment a record describes.
#[must_use]
pub fn recorded_at(record: &AttendanceRecord) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(record.date.trim(), "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(record.time.trim(), "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(record.time.trim(), "%H:%M"))
        .ok()?;
    Some(date.and_time(time))
}

/// `Just now`, `5m ago`, `3h ago`, `2d ago`, or the date after a week.
#[must_use]
pub fn relative_time(at: NaiveDateTime, now: NaiveDateTime) -> String {
    let diff = now - at;
    let minutes = diff.num_minutes();
    if minutes < 1 {
        return "Just now".to_string();
    }
    if minutes < 60 {
        return format!("{minutes}m ago");
    }
    let hours = diff.num_hours();
    if hours < 24 {
        return format!("{hours}h ago");
    }
    let days = diff.num_days();
    if days < 7 {
        return format!("{days}d ago");
    }
    at.format("%Y-%m-%d").to_string()
}

/// Up to two initials for a name, `ST` when it has none.
#[must_use]
pub fn initials(name: &str) -> String {
    let letters: String = name
        .split_whitespace()
        .filter_map(|part| part.chars().next())
        .take(2)
        .flat_map(char::to_uppercase)
        .collect();
    if letters.is_empty() {
        "ST".to_string()
    } else {
        letters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::types::RecordStatus;

    fn record(date: &str, time: &str, id: &str) -> AttendanceRecord {
        AttendanceRecord {
            id: 0,
            date: date.to_string(),
            time: time.to_string(),
            student_id: id.to_string(),
            student_name: "Ada Lovelace".to_string(),
            department: "CS".to_string(),
            status: RecordStatus::Present,
            face_recognition: true,
            institution_id: None,
            created_at: Utc::now(),
        }
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_merge_returns_only_unseen_records() {
        let mut feed = LiveFeed::default();
        let first = feed.merge(vec![
            record("2025-01-10", "08:01:00", "101"),
            record("2025-01-10", "08:00:00", "100"),
        ]);
        assert_eq!(first.len(), 2);

        let second = feed.merge(vec![
            record("2025-01-10", "08:02:00", "102"),
            record("2025-01-10", "08:01:00", "101"),
            record("2025-01-10", "08:00:00", "100"),
        ]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].student_id, "102");

        let order: Vec<&str> = feed.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(order, vec!["102", "101", "100"]);
    }

    #[test]
    fn test_merge_key_ignores_department() {
        let mut feed = LiveFeed::default();
        feed.merge(vec![record("2025-01-10", "08:00:00", "100")]);

        let mut same_key = record("2025-01-10", "08:00:00", "100");
        same_key.department = "EE".to_string();
        assert!(feed.merge(vec![same_key]).is_empty());
        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn test_merge_caps_window() {
        let mut feed = LiveFeed::new(3);
        let batch = (0..5)
            .rev()
            .map(|i| record("2025-01-10", &format!("08:0{i}:00"), &i.to_string()))
            .collect();
        let fresh = feed.merge(batch);

        assert_eq!(fresh.len(), 5);
        assert_eq!(feed.len(), 3);
        let order: Vec<&str> = feed.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(order, vec!["4", "3", "2"]);
    }

    #[test]
    fn test_recency_boundaries() {
        let now = at("2025-01-10 12:00:00");
        let classify = |time: &str, date: &str| Recency::classify(&record(date, time, "1"), now);

        assert_eq!(classify("11:30:00", "2025-01-10"), Recency::New);
        assert_eq!(classify("11:00:00", "2025-01-10"), Recency::Recent);
        assert_eq!(classify("12:30:00", "2025-01-09"), Recency::Recent);
        assert_eq!(classify("12:00:00", "2025-01-09"), Recency::Older);
        assert_eq!(classify("garbage", "2025-01-10"), Recency::Older);
        assert_eq!(classify("08:00", "2025-01-10"), Recency::Recent);
    }

    #[test]
    fn test_relative_time() {
        let now = at("2025-01-10 12:00:00");
        assert_eq!(relative_time(at("2025-01-10 11:59:30"), now), "Just now");
        assert_eq!(relative_time(at("2025-01-10 11:55:00"), now), "5m ago");
        assert_eq!(relative_time(at("2025-01-10 09:00:00"), now), "3h ago");
        assert_eq!(relative_time(at("2025-01-08 12:00:00"), now), "2d ago");
        assert_eq!(relative_time(at("2024-12-01 08:00:00"), now), "2024-12-01");
    }

    #[test]
    fn test_initials() {
        assert_eq!(initials("Ada Lovelace"), "AL");
        assert_eq!(initials("grace brewster hopper"), "GB");
        assert_eq!(initials("   "), "ST");
    }
}
