use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use super::feed::{DEFAULT_CAPACITY, LiveFeed};
use crate::error::Result;
use crate::types::AttendanceRecord;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Where a dashboard gets its records from.
pub trait FeedSource: Send + Sync + 'static {
    /// Cheap reachability check made once before polling starts.
    fn probe(&self) -> impl Future<Output = Result<()>> + Send;

    /// Latest records, newest first.
    fn fetch(&self) -> impl Future<Output = Result<Vec<AttendanceRecord>>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Stopped,
    /// The probe failed; no timer was started.
    Unavailable,
}

#[derive(Debug, Clone)]
pub enum PollEvent {
    Updated {
        fresh: Vec<AttendanceRecord>,
        window: Vec<AttendanceRecord>,
    },
    FetchFailed {
        error: String,
        retry_in: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_backoff: Duration,
    pub capacity: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_backoff: MAX_BACKOFF,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl PollerConfig {
    /// Delay before the next scheduled fetch after `failures` consecutive
    /// failed fetches: the interval, doubled per failure, capped.
    #[must_use]
    pub fn delay_after(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.min(16));
        self.interval
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff.max(self.interval))
    }
}

pub struct Poller<S> {
    source: Arc<S>,
    config: PollerConfig,
}

impl<S: FeedSource> Poller<S> {
    pub fn new(source: S, config: PollerConfig) -> Self {
        Self {
            source: Arc::new(source),
            config,
        }
    }

    /// Probes the source and, when it answers, starts the polling task.
    ///
    /// An unreachable source leaves the handle in [`PollerState::Unavailable`]
    /// with no task running.
    pub async fn start(self) -> (PollerHandle, mpsc::UnboundedReceiver<PollEvent>) {
        let (state_tx, state_rx) = watch::channel(PollerState::Idle);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let task = match self.source.probe().await {
            Ok(()) => {
                state_tx.send_replace(PollerState::Polling);
                let worker = Worker {
                    source: self.source,
                    config: self.config,
                    events: events_tx,
                    cancel: cancel.clone(),
                };
                Some(tokio::spawn(worker.run(refresh_rx, state_tx)))
            }
            Err(e) => {
                tracing::warn!("Live feed unavailable, not polling: {e}");
                state_tx.send_replace(PollerState::Unavailable);
                None
            }
        };

        let handle = PollerHandle {
            state: state_rx,
            refresh: refresh_tx,
            cancel,
            task,
        };
        (handle, events_rx)
    }
}

/// Controls a running poller. Dropping the handle stops the timer.
pub struct PollerHandle {
    state: watch::Receiver<PollerState>,
    refresh: mpsc::Sender<()>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    #[must_use]
    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Requests one out-of-band fetch. The scheduled timer is not moved.
    /// Returns false when the poller is not running or a refresh is already
    /// pending.
    pub fn refresh_now(&self) -> bool {
        self.state() == PollerState::Polling && self.refresh.try_send(()).is_ok()
    }

    /// Cancels the timer and waits for the polling task to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Live feed task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker<S> {
    source: Arc<S>,
    config: PollerConfig,
    events: mpsc::UnboundedSender<PollEvent>,
    cancel: CancellationToken,
}

impl<S: FeedSource> Worker<S> {
    async fn run(self, mut refresh: mpsc::Receiver<()>, state: watch::Sender<PollerState>) {
        let mut feed = LiveFeed::new(self.config.capacity);
        let mut failures: u32 = 0;
        let mut next_tick = Instant::now();

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = sleep_until(next_tick) => {
                    let Some(ok) = self.poll_once(&mut feed, failures).await else {
                        break;
                    };
                    failures = if ok { 0 } else { failures.saturating_add(1) };
                    next_tick = Instant::now() + self.config.delay_after(failures);
                }
                Some(()) = refresh.recv() => {
                    if self.poll_once(&mut feed, failures).await.is_none() {
                        break;
                    }
                }
            }
        }

        state.send_replace(PollerState::Stopped);
        tracing::debug!("Live feed poller stopped");
    }

    /// One fetch. `None` means the poller was cancelled mid-fetch.
    async fn poll_once(&self, feed: &mut LiveFeed, failures: u32) -> Option<bool> {
        let fetched = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return None,
            fetched = self.source.fetch() => fetched,
        };

        let event = match fetched {
            Ok(records) => {
                let fresh = feed.merge(records);
                PollEvent::Updated {
                    fresh,
                    window: feed.iter().cloned().collect(),
                }
            }
            Err(e) => {
                let retry_in = self.config.delay_after(failures.saturating_add(1));
                tracing::warn!("Live feed fetch failed, retrying in {retry_in:?}: {e}");
                PollEvent::FetchFailed {
                    error: e.to_string(),
                    retry_in,
                }
            }
        };

        let ok = matches!(event, PollEvent::Updated { .. });
        // A consumer that went away is not an error for the timer.
        let _ = self.events.send(event);
        Some(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use crate::error::Error;
    use crate::types::RecordStatus;

    #[derive(Default)]
    struct FakeSource {
        reachable: bool,
        failing: bool,
        fetches: Arc<AtomicUsize>,
        records: Mutex<Vec<AttendanceRecord>>,
    }

    impl FakeSource {
        fn reachable() -> Self {
            Self {
                reachable: true,
                ..Self::default()
            }
        }
    }

    impl FeedSource for FakeSource {
        async fn probe(&self) -> Result<()> {
            if self.reachable {
                Ok(())
            } else {
                Err(Error::Internal("connection refused".into()))
            }
        }

        async fn fetch(&self) -> Result<Vec<AttendanceRecord>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                return Err(Error::Internal("503".into()));
            }
            Ok(self.records.lock().unwrap().clone())
        }
    }

    fn record(id: &str) -> AttendanceRecord {
        AttendanceRecord {
            id: 1,
            date: "2025-01-10".to_string(),
            time: "08:00:00".to_string(),
            student_id: id.to_string(),
            student_name: "Ada Lovelace".to_string(),
            department: "CS".to_string(),
            status: RecordStatus::Present,
            face_recognition: true,
            institution_id: None,
            created_at: Utc::now(),
        }
    }

    async fn start(source: FakeSource) -> (PollerHandle, mpsc::UnboundedReceiver<PollEvent>) {
        Poller::new(source, PollerConfig::default()).start().await
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = PollerConfig::default();
        assert_eq!(config.delay_after(0), Duration::from_secs(5));
        assert_eq!(config.delay_after(1), Duration::from_secs(10));
        assert_eq!(config.delay_after(3), Duration::from_secs(40));
        assert_eq!(config.delay_after(4), Duration::from_secs(60));
        assert_eq!(config.delay_after(30), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_source_never_polls() {
        let source = FakeSource::default();
        let fetches = Arc::clone(&source.fetches);
        let (handle, _events) = start(source).await;

        assert_eq!(handle.state(), PollerState::Unavailable);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
        assert!(!handle.refresh_now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_fixed_interval() {
        let source = FakeSource::reachable();
        let fetches = Arc::clone(&source.fetches);
        let (handle, _events) = start(source).await;
        assert_eq!(handle.state(), PollerState::Polling);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_back_off() {
        let source = FakeSource {
            failing: true,
            ..FakeSource::reachable()
        };
        let fetches = Arc::clone(&source.fetches);
        let (_handle, mut events) = start(source).await;

        // Fetches at 0s, 10s and 30s.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 3);

        match events.recv().await {
            Some(PollEvent::FetchFailed { retry_in, .. }) => {
                assert_eq!(retry_in, Duration::from_secs(10));
            }
            other => panic!("expected a failure event, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_now_keeps_schedule() {
        let source = FakeSource::reachable();
        let fetches = Arc::clone(&source.fetches);
        let (handle, _events) = start(source).await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(handle.refresh_now());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 2);

        // The scheduled fetch still lands at 5s.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_report_only_new_records() {
        let source = FakeSource::reachable();
        *source.records.lock().unwrap() = vec![record("100")];
        let (_handle, mut events) = start(source).await;

        let Some(PollEvent::Updated { fresh, window }) = events.recv().await else {
            panic!("expected an update");
        };
        assert_eq!(fresh.len(), 1);
        assert_eq!(window.len(), 1);

        let Some(PollEvent::Updated { fresh, window }) = events.recv().await else {
            panic!("expected an update");
        };
        assert!(fresh.is_empty());
        assert_eq!(window.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timer() {
        let source = FakeSource::reachable();
        let fetches = Arc::clone(&source.fetches);
        let (handle, _events) = start(source).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_timer() {
        let source = FakeSource::reachable();
        let fetches = Arc::clone(&source.fetches);
        let (handle, mut events) = start(source).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(handle);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // The worker exits and drops its sender.
        assert!(events.recv().await.is_some());
        assert!(events.recv().await.is_none());
    }
}
