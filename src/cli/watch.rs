use std::time::Duration;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::http_client::ApiClient;
use crate::live::{
    DEFAULT_CAPACITY, HttpFeedSource, PollEvent, Poller, PollerConfig, PollerState, Recency,
    initials, recorded_at, relative_time,
};
use crate::types::AttendanceRecord;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WatchOptions {
    pub url: String,
    pub interval: Duration,
    pub institution_code: Option<String>,
}

/// Polls the public attendance feed and prints it until Ctrl-C.
/// Pressing Enter fetches immediately.
pub async fn run_watch(options: WatchOptions) -> anyhow::Result<()> {
    let client = ApiClient::new(&options.url, REQUEST_TIMEOUT)?;
    let source = HttpFeedSource::new(client, DEFAULT_CAPACITY, options.institution_code.clone());
    let config = PollerConfig {
        interval: options.interval,
        ..PollerConfig::default()
    };

    let (handle, mut events) = Poller::new(source, config).start().await;
    if handle.state() == PollerState::Unavailable {
        anyhow::bail!(
            "Attendance feed at {} is unavailable. Is the server running?",
            options.url
        );
    }

    println!(
        "Watching {} every {}s (Enter to refresh, Ctrl-C to quit)",
        options.url,
        options.interval.as_secs()
    );

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(event) => render(&event),
                None => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(_)) => {
                    handle.refresh_now();
                }
                _ => stdin_open = false,
            },
        }
    }

    handle.stop().await;
    println!("Stopped.");
    Ok(())
}

fn render(event: &PollEvent) {
    match event {
        PollEvent::Updated { fresh, window } => {
            if fresh.is_empty() && !window.is_empty() {
                return;
            }
            let now = Local::now().naive_local();
            println!();
            println!(
                "{} records ({} new) at {}",
                window.len(),
                fresh.len(),
                now.format("%H:%M:%S")
            );
            for record in window {
                println!("{}", render_row(record, now));
            }
        }
        PollEvent::FetchFailed { error, retry_in } => {
            eprintln!("Fetch failed: {error} (retrying in {}s)", retry_in.as_secs());
        }
    }
}

fn render_row(record: &AttendanceRecord, now: chrono::NaiveDateTime) -> String {
    let marker = match Recency::classify(record, now) {
        Recency::New => "*",
        Recency::Recent => "+",
        Recency::Older => " ",
    };
    let when = recorded_at(record)
        .map(|at| relative_time(at, now))
        .unwrap_or_else(|| format!("{} {}", record.date, record.time));
    format!(
        "{marker} [{:<2}] {:<24} {:<10} {:<12} {:<8} {when}",
        initials(&record.student_name),
        record.student_name,
        record.student_id,
        record.department,
        record.status.as_str(),
    )
}
