use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::Context;
use serde::de::IgnoredAny;
use tracing::{error, info, warn};

use super::http_client::ApiClient;
use crate::ingest::{RealtimeEvent, parse_attendance_csv};
use crate::types::NewAttendance;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SyncOptions {
    pub url: String,
    pub csv: PathBuf,
    pub state: PathBuf,
    pub interval: Duration,
    pub institution_code: Option<String>,
    /// Run a single pass and exit.
    pub once: bool,
}

/// Keys of rows already delivered, persisted as a JSON array of strings.
#[derive(Debug, Default)]
pub struct SyncState {
    processed: BTreeSet<String>,
}

impl SyncState {
    /// Loads the state file. A missing or unreadable file starts empty.
    pub fn load(path: &Path) -> Self {
        let processed = match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<Vec<String>>(&text) {
                Ok(keys) => keys.into_iter().collect(),
                Err(e) => {
                    warn!("Ignoring unreadable state file {}: {e}", path.display());
                    BTreeSet::new()
                }
            },
            Err(_) => BTreeSet::new(),
        };
        Self { processed }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let keys: Vec<&String> = self.processed.iter().collect();
        fs::write(path, serde_json::to_vec(&keys)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.processed.contains(key)
    }

    pub fn mark(&mut self, key: String) {
        self.processed.insert(key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.processed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}

/// `Date_Time_ID`, the identity of a row in the recognition log.
#[must_use]
pub fn row_key(record: &NewAttendance) -> String {
    format!("{}_{}_{}", record.date, record.time, record.student_id)
}

/// Rows of the log that have not been delivered yet, in file order.
pub fn pending_rows(csv: &Path, state: &SyncState) -> anyhow::Result<Vec<NewAttendance>> {
    let file = File::open(csv).with_context(|| format!("Failed to open {}", csv.display()))?;
    let parsed = parse_attendance_csv(file, None)?;

    let mut seen = BTreeSet::new();
    Ok(parsed
        .records
        .into_iter()
        .filter(|record| {
            let key = row_key(record);
            !state.contains(&key) && seen.insert(key)
        })
        .collect())
}

fn to_event(record: &NewAttendance, institution_code: Option<&str>) -> RealtimeEvent {
    RealtimeEvent {
        date: record.date.clone(),
        time: record.time.clone(),
        name: record.student_name.clone(),
        id: record.student_id.clone(),
        dept: record.department.clone(),
        role: None,
        status: Some(record.status.as_str().to_string()),
        institution_code: institution_code.map(str::to_string),
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub found: usize,
    pub sent: usize,
}

/// One pass: posts every pending row and records the ones the server
/// accepted. Rows that failed stay pending for the next pass.
pub async fn sync_once(
    client: &ApiClient,
    options: &SyncOptions,
    state: &mut SyncState,
) -> anyhow::Result<SyncSummary> {
    let rows = pending_rows(&options.csv, state)?;
    let mut summary = SyncSummary {
        found: rows.len(),
        sent: 0,
    };
    if rows.is_empty() {
        return Ok(summary);
    }
    info!("Found {} new attendance records", rows.len());

    for row in &rows {
        let event = to_event(row, options.institution_code.as_deref());
        match client
            .post::<IgnoredAny, _>("/attendance/realtime", &event)
            .await
        {
            Ok(_) => {
                state.mark(row_key(row));
                summary.sent += 1;
            }
            Err(e) => error!("Failed to send attendance for {}: {e:#}", row.student_id),
        }
    }

    info!("Sync completed: {}/{} records sent", summary.sent, summary.found);
    state.save(&options.state)?;
    Ok(summary)
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Follows the recognition log until Ctrl-C, re-reading it whenever it
/// changes.
pub async fn run_sync(options: SyncOptions) -> anyhow::Result<()> {
    let client = ApiClient::new(&options.url, REQUEST_TIMEOUT)?;
    client
        .health()
        .await
        .with_context(|| format!("Cannot reach server at {}", options.url))?;

    let mut state = SyncState::load(&options.state);
    info!(
        "Following {} ({} rows already processed)",
        options.csv.display(),
        state.len()
    );

    if options.once {
        let summary = sync_once(&client, &options, &mut state).await?;
        println!("Sent {}/{} new records", summary.sent, summary.found);
        return Ok(());
    }

    let mut last_seen: Option<SystemTime> = None;
    let mut ticker = tokio::time::interval(options.interval);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let Some(mtime) = modified(&options.csv) else {
                    warn!("Waiting for {} to appear", options.csv.display());
                    continue;
                };
                if last_seen.is_some_and(|seen| mtime <= seen) {
                    continue;
                }
                match sync_once(&client, &options, &mut state).await {
                    Ok(summary) if summary.sent < summary.found => {
                        // Retry the failures on the next tick.
                    }
                    Ok(_) => last_seen = Some(mtime),
                    Err(e) => error!("Sync pass failed: {e:#}"),
                }
            }
        }
    }

    state.save(&options.state)?;
    info!("Attendance sync stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LOG: &str = "Date,Time,Name,ID,Dept\n\
        2025-01-10,08:00:00,Ada Lovelace,S100,CS\n\
        2025-01-10,08:01:00,Alan Turing,S101,CS\n\
        2025-01-10,08:00:00,Ada Lovelace,S100,CS\n";

    #[test]
    fn test_pending_rows_skip_processed_and_repeated_keys() {
        let dir = TempDir::new().unwrap();
        let csv = dir.path().join("log.csv");
        fs::write(&csv, LOG).unwrap();

        let mut state = SyncState::default();
        let rows = pending_rows(&csv, &state).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(row_key(&rows[0]), "2025-01-10_08:00:00_S100");

        state.mark(row_key(&rows[0]));
        let rows = pending_rows(&csv, &state).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_id, "S101");
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/state.json");

        let mut state = SyncState::default();
        state.mark("2025-01-10_08:00:00_S100".to_string());
        state.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, r#"["2025-01-10_08:00:00_S100"]"#);
        assert!(SyncState::load(&path).contains("2025-01-10_08:00:00_S100"));
    }

    #[test]
    fn test_corrupt_state_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json").unwrap();

        assert!(SyncState::load(&path).is_empty());
    }
}
