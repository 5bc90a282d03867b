//! Ingestion engine: one-time backfill from the stored cursor, then periodic tail polling until stopped
// Indexer module - remote feed to delegation log
use crate::constants;
use crate::delegation::{normalize_batch, split_stale, Delegation, DelegationResponse};
use crate::error::{FetchError, StoreError};
use crate::store::DelegationStore;
use crate::tzkt::DelegationFeed;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

// ============================================================================
// Indexer Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Delay between two tail polls
    pub poll_interval: Duration,
    /// Page size of a tail poll
    pub poll_max_size: usize,
    /// Page size while catching up on history
    pub backfill_page_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            poll_interval: constants::default_poll_interval(),
            poll_max_size: constants::DEFAULT_POLL_MAX_SIZE,
            backfill_page_size: constants::BACKFILL_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerPhase {
    Backfill,
    Tailing,
    Stopped,
}

impl IndexerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexerPhase::Backfill => "backfill",
            IndexerPhase::Tailing => "tailing",
            IndexerPhase::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub pages: usize,
    pub fetched: usize,
    pub committed: usize,
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing newer than the cursor
    Empty,
    /// That many records were committed
    Committed(usize),
    /// Fetch or commit failed; the cursor did not move
    Failed,
    /// A stop request arrived while waiting for the remote
    Interrupted,
}

// ============================================================================
// Indexer Events
// ============================================================================

#[derive(Debug, Clone)]
pub enum IndexerEvent {
    BackfillStarted {
        cursor: String,
    },
    BackfillPage {
        count: usize,
        latest: String,
    },
    BackfillComplete {
        summary: BackfillSummary,
        duration_ms: u64,
    },
    BatchCommitted {
        count: usize,
        cursor: String,
    },
    NoNewDelegations {
        cursor: String,
    },
    StaleDropped {
        count: usize,
        cursor: String,
    },
    /// The newest fetched timestamp does not fit the fixed-width cursor; polls cannot advance
    InvalidCursor {
        timestamp: String,
        cursor: String,
    },
    Error {
        error: String,
    },
    Stopped {
        cursor: String,
    },
}

// ============================================================================
// Indexer Logger Trait
// ============================================================================

/// Receives indexer progress; passed in through [`Indexer::with_logger`]
pub trait IndexerLogger: Send + Sync {
    fn on_backfill_start(&self, cursor: &str);

    fn on_backfill_page(&self, count: usize, latest: &str);

    fn on_backfill_complete(&self, summary: &BackfillSummary, duration_ms: u64);

    fn on_batch_committed(&self, count: usize, cursor: &str);

    fn on_no_new_delegations(&self, cursor: &str);

    fn on_stale_dropped(&self, count: usize, cursor: &str);

    fn on_invalid_cursor(&self, timestamp: &str, cursor: &str);

    fn on_error(&self, error: &str);

    fn on_stopped(&self, cursor: &str);
}

/// Logger writing through the `log` facade
pub struct ServerLogger {
    interval: Duration,
}

impl ServerLogger {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl IndexerLogger for ServerLogger {
    fn on_backfill_start(&self, cursor: &str) {
        log::info!("[Indexer] Retrieving delegations since {}", cursor);
    }

    fn on_backfill_page(&self, count: usize, latest: &str) {
        log::info!(
            "[Indexer] >> {} past delegations retrieved, current timestamp: {}",
            count,
            latest
        );
    }

    fn on_backfill_complete(&self, summary: &BackfillSummary, duration_ms: u64) {
        if summary.interrupted {
            log::info!(
                "[Indexer] Backfill interrupted after {} pages ({} delegations saved)",
                summary.pages,
                summary.committed
            );
        } else {
            log::info!(
                "[Indexer] ✓ Backfill complete: {} delegations in {} pages ({}ms)",
                summary.committed,
                summary.pages,
                duration_ms
            );
        }
        log::info!(
            "[Indexer] Now polling for new delegations (interval: {:?})...",
            self.interval
        );
    }

    fn on_batch_committed(&self, count: usize, cursor: &str) {
        log::info!("[Indexer] ✓ {} new delegations | cursor: {}", count, cursor);
    }

    fn on_no_new_delegations(&self, cursor: &str) {
        log::debug!("[Indexer] No new delegations since {}", cursor);
    }

    fn on_stale_dropped(&self, count: usize, cursor: &str) {
        log::warn!(
            "[Indexer] Dropped {} delegations older than cursor {}",
            count,
            cursor
        );
    }

    fn on_invalid_cursor(&self, timestamp: &str, cursor: &str) {
        log::error!(
            "[Indexer] Remote timestamp {:?} cannot be stored as a cursor; stuck at {}",
            timestamp,
            cursor
        );
    }

    fn on_error(&self, error: &str) {
        log::warn!("[Indexer] {}", error);
    }

    fn on_stopped(&self, cursor: &str) {
        log::info!("[Indexer] Stopped at cursor {}", cursor);
    }
}

/// Logger that discards everything
pub struct NoopLogger;

impl IndexerLogger for NoopLogger {
    fn on_backfill_start(&self, _cursor: &str) {}

    fn on_backfill_page(&self, _count: usize, _latest: &str) {}

    fn on_backfill_complete(&self, _summary: &BackfillSummary, _duration_ms: u64) {}

    fn on_batch_committed(&self, _count: usize, _cursor: &str) {}

    fn on_no_new_delegations(&self, _cursor: &str) {}

    fn on_stale_dropped(&self, _count: usize, _cursor: &str) {}

    fn on_invalid_cursor(&self, _timestamp: &str, _cursor: &str) {}

    fn on_error(&self, _error: &str) {}

    fn on_stopped(&self, _cursor: &str) {}
}

// ============================================================================
// Stop Signal
// ============================================================================

struct StopSignal(Option<watch::Receiver<bool>>);

impl StopSignal {
    fn never() -> Self {
        Self(None)
    }

    fn is_set(&self) -> bool {
        self.0.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once a stop has been requested; never resolves otherwise
    async fn requested(&mut self) {
        if let Some(rx) = self.0.as_mut() {
            let stopped = rx.wait_for(|stop| *stop).await.is_ok();
            if stopped {
                return;
            }
        }
        // No sender left, so nobody can ask us to stop
        std::future::pending::<()>().await
    }
}

// ============================================================================
// Indexer
// ============================================================================

pub struct Indexer<S: DelegationStore + ?Sized + 'static, F: DelegationFeed> {
    store: Arc<S>,
    feed: F,
    config: IndexerConfig,
    cursor: String,
    phase: watch::Sender<IndexerPhase>,
    logger: Box<dyn IndexerLogger>,
    event_callback: Option<Box<dyn Fn(&IndexerEvent) + Send + Sync>>,
}

impl<S: DelegationStore + ?Sized + 'static, F: DelegationFeed> Indexer<S, F> {
    pub fn new(store: Arc<S>, feed: F, config: IndexerConfig) -> Self {
        let cursor = store.cursor();
        let (phase, _) = watch::channel(IndexerPhase::Backfill);
        Self {
            store,
            feed,
            config,
            cursor,
            phase,
            logger: Box::new(NoopLogger),
            event_callback: None,
        }
    }

    /// Set a logger for indexer events
    pub fn with_logger<L>(mut self, logger: L) -> Self
    where
        L: IndexerLogger + 'static,
    {
        self.logger = Box::new(logger);
        self
    }

    /// Set a custom event callback (for advanced use cases)
    pub fn with_callback<C>(mut self, callback: C) -> Self
    where
        C: Fn(&IndexerEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(Box::new(callback));
        self
    }

    /// Timestamp of the newest committed delegation
    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    pub fn phase(&self) -> IndexerPhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions from another task
    pub fn subscribe_phase(&self) -> watch::Receiver<IndexerPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: IndexerPhase) {
        self.phase.send_replace(phase);
    }

    fn handle_event(&self, event: IndexerEvent) {
        if let Some(callback) = &self.event_callback {
            callback(&event);
        }

        match &event {
            IndexerEvent::BackfillStarted { cursor } => self.logger.on_backfill_start(cursor),
            IndexerEvent::BackfillPage { count, latest } => {
                self.logger.on_backfill_page(*count, latest)
            }
            IndexerEvent::BackfillComplete {
                summary,
                duration_ms,
            } => self.logger.on_backfill_complete(summary, *duration_ms),
            IndexerEvent::BatchCommitted { count, cursor } => {
                self.logger.on_batch_committed(*count, cursor)
            }
            IndexerEvent::NoNewDelegations { cursor } => self.logger.on_no_new_delegations(cursor),
            IndexerEvent::StaleDropped { count, cursor } => {
                self.logger.on_stale_dropped(*count, cursor)
            }
            IndexerEvent::InvalidCursor { timestamp, cursor } => {
                self.logger.on_invalid_cursor(timestamp, cursor)
            }
            IndexerEvent::Error { error } => self.logger.on_error(error),
            IndexerEvent::Stopped { cursor } => self.logger.on_stopped(cursor),
        }
    }

    /// Catch up on history, then switch to tailing
    ///
    /// Fetch errors end the catch-up early; what was fetched so far is still
    /// committed. A commit failure is returned and leaves the cursor unchanged.
    pub async fn backfill(&mut self) -> Result<BackfillSummary, StoreError> {
        self.run_backfill(&mut StopSignal::never()).await
    }

    /// Like [`Indexer::backfill`], but a pending fetch is abandoned once `shutdown` turns true
    pub async fn backfill_until_stopped(
        &mut self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<BackfillSummary, StoreError> {
        self.run_backfill(&mut StopSignal(Some(shutdown))).await
    }

    /// One tail poll: fetch what is newer than the cursor and commit it
    pub async fn poll_once(&mut self) -> PollOutcome {
        self.poll(&mut StopSignal::never()).await
    }

    /// Backfill, then poll every `poll_interval` until `shutdown` turns true
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) {
        let mut stop = StopSignal(Some(shutdown));

        if let Err(e) = self.run_backfill(&mut stop).await {
            self.report_commit_error(e, "could not save past delegations");
            // Nothing was committed; the tail polls pick up from the old cursor
            self.set_phase(IndexerPhase::Tailing);
        }

        while !stop.is_set() {
            tokio::select! {
                biased;
                _ = stop.requested() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if self.poll(&mut stop).await == PollOutcome::Interrupted {
                break;
            }
        }

        self.set_phase(IndexerPhase::Stopped);
        self.handle_event(IndexerEvent::Stopped {
            cursor: self.cursor.clone(),
        });
    }

    async fn run_backfill(&mut self, stop: &mut StopSignal) -> Result<BackfillSummary, StoreError> {
        self.set_phase(IndexerPhase::Backfill);
        let start = Instant::now();
        let page_size = self.config.backfill_page_size;

        self.handle_event(IndexerEvent::BackfillStarted {
            cursor: self.cursor.clone(),
        });

        let mut after = self.cursor.clone();
        let mut fetched: Vec<DelegationResponse> = Vec::new();
        let mut summary = BackfillSummary::default();

        loop {
            let page = tokio::select! {
                biased;
                _ = stop.requested() => {
                    summary.interrupted = true;
                    break;
                }
                page = self.feed.fetch(&after, page_size) => page,
            };
            summary.pages += 1;

            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    self.handle_event(IndexerEvent::Error {
                        error: format!(
                            "history polling: could not poll delegations after {}: {}",
                            after, e
                        ),
                    });
                    break;
                }
            };

            let count = page.len();
            let latest = latest_timestamp(&page);
            fetched.extend(page);

            let Some(latest) = latest else {
                break;
            };
            self.handle_event(IndexerEvent::BackfillPage {
                count,
                latest: latest.clone(),
            });

            if count < page_size {
                break;
            }
            if latest <= after {
                self.handle_event(IndexerEvent::Error {
                    error: format!("history polling: remote did not move past {}", after),
                });
                break;
            }
            after = latest;
        }

        summary.fetched = fetched.len();

        if fetched.is_empty() {
            self.handle_event(IndexerEvent::NoNewDelegations {
                cursor: self.cursor.clone(),
            });
        } else {
            // Runs to completion even when a stop is pending
            summary.committed = self.commit(normalize_batch(fetched)).await?;
        }

        if !summary.interrupted {
            self.set_phase(IndexerPhase::Tailing);
        }

        self.handle_event(IndexerEvent::BackfillComplete {
            summary: summary.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
        });

        Ok(summary)
    }

    async fn poll(&mut self, stop: &mut StopSignal) -> PollOutcome {
        let page = tokio::select! {
            biased;
            _ = stop.requested() => return PollOutcome::Interrupted,
            page = self.feed.fetch(&self.cursor, self.config.poll_max_size) => page,
        };

        let page = match page {
            Ok(page) => page,
            Err(e) => {
                self.report_fetch_error(&e);
                return PollOutcome::Failed;
            }
        };

        if page.is_empty() {
            self.handle_event(IndexerEvent::NoNewDelegations {
                cursor: self.cursor.clone(),
            });
            return PollOutcome::Empty;
        }

        match self.commit(normalize_batch(page)).await {
            Ok(0) => PollOutcome::Empty,
            Ok(count) => PollOutcome::Committed(count),
            Err(e) => {
                let context = format!("could not add delegations after {} to the log", self.cursor);
                self.report_commit_error(e, &context);
                PollOutcome::Failed
            }
        }
    }

    fn report_commit_error(&self, e: StoreError, context: &str) {
        match e {
            StoreError::InvalidTimestamp(timestamp) => {
                self.handle_event(IndexerEvent::InvalidCursor {
                    timestamp,
                    cursor: self.cursor.clone(),
                })
            }
            e => self.handle_event(IndexerEvent::Error {
                error: format!("{}: {}", context, e),
            }),
        }
    }

    fn report_fetch_error(&self, e: &FetchError) {
        self.handle_event(IndexerEvent::Error {
            error: format!(
                "could not poll delegations after {}: {}",
                self.cursor, e
            ),
        });
    }

    /// Drops records older than the cursor, persists the rest, advances the cursor
    async fn commit(&mut self, batch: Vec<Delegation>) -> Result<usize, StoreError> {
        let (batch, stale) = split_stale(batch, &self.cursor);
        if !stale.is_empty() {
            self.handle_event(IndexerEvent::StaleDropped {
                count: stale.len(),
                cursor: self.cursor.clone(),
            });
        }

        let Some(newest) = batch.first().map(|d| d.timestamp.clone()) else {
            return Ok(0);
        };
        let count = batch.len();

        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.append_newest_batch(&batch))
            .await
            .map_err(|e| StoreError::persistence(format!("commit task failed: {}", e)))??;

        self.cursor = newest;
        self.handle_event(IndexerEvent::BatchCommitted {
            count,
            cursor: self.cursor.clone(),
        });
        Ok(count)
    }
}

fn latest_timestamp(page: &[DelegationResponse]) -> Option<String> {
    page.iter().map(|d| d.timestamp.as_str()).max().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileLog, MemoryStore};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::mpsc as std_mpsc;

    #[derive(Default)]
    struct FakeFeed {
        pages: Mutex<VecDeque<Result<Vec<DelegationResponse>, FetchError>>>,
        calls: Mutex<Vec<(String, usize)>>,
        hang: bool,
    }

    impl FakeFeed {
        fn with_pages(pages: Vec<Result<Vec<DelegationResponse>, FetchError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                ..Default::default()
            }
        }

        fn hanging() -> Self {
            Self {
                hang: true,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(String, usize)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DelegationFeed for FakeFeed {
        async fn fetch(
            &self,
            after: &str,
            limit: usize,
        ) -> Result<Vec<DelegationResponse>, FetchError> {
            self.calls.lock().unwrap().push((after.to_string(), limit));
            if self.hang {
                std::future::pending::<()>().await;
            }
            let next = self.pages.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    #[async_trait]
    impl DelegationFeed for Arc<FakeFeed> {
        async fn fetch(
            &self,
            after: &str,
            limit: usize,
        ) -> Result<Vec<DelegationResponse>, FetchError> {
            self.as_ref().fetch(after, limit).await
        }
    }

    fn resp(ts: &str, amount: u64, sender: &str, level: u64) -> DelegationResponse {
        DelegationResponse::new(ts, amount, sender, level)
    }

    fn page(start_level: u64, count: usize) -> Vec<DelegationResponse> {
        (0..count as u64)
            .map(|i| {
                let level = start_level + i;
                resp(&format!("2024-01-01T00:{:02}:{:02}Z", level / 60, level % 60), 1, "tz1", level)
            })
            .collect()
    }

    fn indexer(
        store: Arc<MemoryStore>,
        feed: FakeFeed,
        config: IndexerConfig,
    ) -> Indexer<MemoryStore, FakeFeed> {
        Indexer::new(store, feed, config)
    }

    #[tokio::test]
    async fn test_poll_no_delegations() {
        let store = Arc::new(MemoryStore::new());
        let mut indexer = indexer(store.clone(), FakeFeed::default(), IndexerConfig::default());

        assert_eq!(indexer.poll_once().await, PollOutcome::Empty);
        assert!(store.batches().is_empty());
        assert_eq!(indexer.cursor(), constants::ZERO_TIMESTAMP);
        assert_eq!(store.cursor(), constants::ZERO_TIMESTAMP);
    }

    #[tokio::test]
    async fn test_poll_single_delegation() {
        let store = Arc::new(MemoryStore::new());
        let feed = FakeFeed::with_pages(vec![Ok(vec![resp("2024", 1, "bob", 1)])]);
        let mut indexer = indexer(store.clone(), feed, IndexerConfig::default());

        assert_eq!(indexer.poll_once().await, PollOutcome::Committed(1));
        assert_eq!(store.batches(), vec![vec![Delegation::new("2024", 1, "bob", 1)]]);
        assert_eq!(indexer.cursor(), "2024");
    }

    #[tokio::test]
    async fn test_poll_several_delegations_are_reversed() {
        let store = Arc::new(MemoryStore::new());
        let feed = FakeFeed::with_pages(vec![Ok(vec![
            resp("2023", 1, "Alice", 1),
            resp("2023", 1, "Bob", 2),
            resp("2024", 1, "bob", 3),
        ])]);
        let mut indexer = indexer(store.clone(), feed, IndexerConfig::default());

        indexer.poll_once().await;

        assert_eq!(
            store.batches(),
            vec![vec![
                Delegation::new("2024", 1, "bob", 3),
                Delegation::new("2023", 1, "Bob", 2),
                Delegation::new("2023", 1, "Alice", 1),
            ]]
        );
        assert_eq!(indexer.cursor(), "2024");
    }

    #[tokio::test]
    async fn test_poll_uses_cursor_and_tail_page_size() {
        let store = Arc::new(MemoryStore::with_records(vec![Delegation::new(
            "2024-01-01T00:00:00Z",
            1,
            "a",
            1,
        )]));
        let feed = Arc::new(FakeFeed::default());
        let config = IndexerConfig {
            poll_max_size: 42,
            ..Default::default()
        };
        let mut indexer = Indexer::new(store, Arc::clone(&feed), config);

        indexer.poll_once().await;
        assert_eq!(feed.calls(), vec![("2024-01-01T00:00:00Z".to_string(), 42)]);
    }

    #[tokio::test]
    async fn test_backfill_terminates_after_short_page() {
        let store = Arc::new(MemoryStore::new());
        let feed = Arc::new(FakeFeed::with_pages(vec![
            Ok(page(0, 3)),
            Ok(page(3, 3)),
            Ok(page(6, 3)),
            Ok(page(9, 2)),
        ]));
        let config = IndexerConfig {
            backfill_page_size: 3,
            ..Default::default()
        };
        let mut indexer = Indexer::new(store.clone(), Arc::clone(&feed), config);

        let summary = indexer.backfill().await.unwrap();

        assert_eq!(feed.calls().len(), 4);
        assert_eq!(summary.pages, 4);
        assert_eq!(summary.fetched, 11);
        assert_eq!(summary.committed, 11);
        assert!(!summary.interrupted);
        assert_eq!(indexer.phase(), IndexerPhase::Tailing);

        // The whole history lands in a single newest-first commit
        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        let levels: Vec<u64> = batches[0].iter().map(|d| d.level).collect();
        assert_eq!(levels, (0..11).rev().collect::<Vec<u64>>());
        assert_eq!(indexer.cursor(), batches[0][0].timestamp);

        // Each page starts after the latest timestamp of the previous one
        let calls = feed.calls();
        assert_eq!(calls[0].0, constants::ZERO_TIMESTAMP);
        assert_eq!(calls[1].0, page(2, 1)[0].timestamp);
        assert!(calls.iter().all(|(_, limit)| *limit == 3));
    }

    #[tokio::test]
    async fn test_backfill_fetch_error_keeps_partial_history() {
        let store = Arc::new(MemoryStore::new());
        let feed = Arc::new(FakeFeed::with_pages(vec![
            Ok(page(0, 2)),
            Err(FetchError::Status(502)),
        ]));
        let config = IndexerConfig {
            backfill_page_size: 2,
            ..Default::default()
        };
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_clone = Arc::clone(&errors);
        let mut indexer = Indexer::new(store.clone(), Arc::clone(&feed), config).with_callback(
            move |event| {
                if let IndexerEvent::Error { error } = event {
                    errors_clone.lock().unwrap().push(error.clone());
                }
            },
        );

        let summary = indexer.backfill().await.unwrap();

        assert_eq!(feed.calls().len(), 2);
        assert_eq!(summary.committed, 2);
        assert_eq!(store.records().len(), 2);
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert_eq!(indexer.phase(), IndexerPhase::Tailing);
    }

    #[tokio::test]
    async fn test_backfill_empty_history() {
        let store = Arc::new(MemoryStore::new());
        let mut indexer = indexer(store.clone(), FakeFeed::default(), IndexerConfig::default());

        let summary = indexer.backfill().await.unwrap();

        assert_eq!(summary.pages, 1);
        assert_eq!(summary.committed, 0);
        assert!(store.batches().is_empty());
        assert_eq!(indexer.phase(), IndexerPhase::Tailing);
    }

    #[tokio::test]
    async fn test_backfill_stops_when_remote_does_not_advance() {
        let store = Arc::new(MemoryStore::new());
        let stuck = vec![resp("2024-01-01T00:00:00Z", 1, "a", 1); 2];
        let feed = Arc::new(FakeFeed::with_pages(vec![
            Ok(stuck.clone()),
            Ok(stuck.clone()),
            Ok(stuck),
        ]));
        let config = IndexerConfig {
            backfill_page_size: 2,
            ..Default::default()
        };
        let mut indexer = Indexer::new(store, Arc::clone(&feed), config);

        indexer.backfill().await.unwrap();
        assert_eq!(feed.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_is_retried_from_same_cursor() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_writes(true);
        let feed = Arc::new(FakeFeed::with_pages(vec![
            Ok(vec![resp("2024-02-02T00:00:00Z", 1, "a", 1)]),
            Ok(vec![resp("2024-02-02T00:00:00Z", 1, "a", 1)]),
        ]));
        let mut indexer = Indexer::new(store.clone(), Arc::clone(&feed), IndexerConfig::default());

        assert_eq!(indexer.poll_once().await, PollOutcome::Failed);
        assert_eq!(indexer.cursor(), constants::ZERO_TIMESTAMP);

        store.set_fail_writes(false);
        assert_eq!(indexer.poll_once().await, PollOutcome::Committed(1));

        let calls = feed.calls();
        assert_eq!(calls[0].0, calls[1].0);
        assert_eq!(indexer.cursor(), "2024-02-02T00:00:00Z");
    }

    #[tokio::test]
    async fn test_fetch_failure_is_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        let feed = FakeFeed::with_pages(vec![
            Err(FetchError::Transport("connection reset".into())),
            Ok(vec![resp("2024-02-02T00:00:00Z", 1, "a", 1)]),
        ]);
        let mut indexer = indexer(store.clone(), feed, IndexerConfig::default());

        assert_eq!(indexer.poll_once().await, PollOutcome::Failed);
        assert!(store.batches().is_empty());
        assert_eq!(indexer.poll_once().await, PollOutcome::Committed(1));
    }

    #[tokio::test]
    async fn test_records_older_than_cursor_are_dropped() {
        let store = Arc::new(MemoryStore::with_records(vec![Delegation::new(
            "2024-06-01T00:00:00Z",
            1,
            "a",
            1,
        )]));
        let feed = FakeFeed::with_pages(vec![Ok(vec![
            resp("2024-05-01T00:00:00Z", 1, "old", 2),
            resp("2024-06-01T00:00:00Z", 1, "same", 3),
            resp("2024-07-01T00:00:00Z", 1, "new", 4),
        ])]);
        let mut indexer = indexer(store.clone(), feed, IndexerConfig::default());

        assert_eq!(indexer.poll_once().await, PollOutcome::Committed(2));
        let senders: Vec<String> = store.batches()[0].iter().map(|d| d.sender.clone()).collect();
        assert_eq!(senders, vec!["new", "same"]);
        assert_eq!(indexer.cursor(), "2024-07-01T00:00:00Z");
    }

    #[tokio::test]
    async fn test_run_stops_during_sleep() {
        let store = Arc::new(MemoryStore::new());
        let config = IndexerConfig {
            poll_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let indexer = indexer(store.clone(), FakeFeed::default(), config);
        let mut phase = indexer.subscribe_phase();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(indexer.run(rx));
        phase
            .wait_for(|p| *p == IndexerPhase::Tailing)
            .await
            .unwrap();

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("indexer should stop promptly")
            .unwrap();
        assert_eq!(*phase.borrow(), IndexerPhase::Stopped);
    }

    #[tokio::test]
    async fn test_run_interrupts_pending_fetch() {
        let store = Arc::new(MemoryStore::new());
        let indexer = indexer(store.clone(), FakeFeed::hanging(), IndexerConfig::default());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(indexer.run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("indexer should stop promptly")
            .unwrap();
        assert!(store.batches().is_empty());
    }

    #[tokio::test]
    async fn test_run_backfills_then_tails() {
        let store = Arc::new(MemoryStore::new());
        let feed = FakeFeed::with_pages(vec![
            Ok(vec![resp("2024-01-01T00:00:00Z", 1, "a", 1)]),
            Ok(Vec::new()),
            Ok(vec![resp("2024-01-02T00:00:00Z", 1, "b", 2)]),
        ]);
        let config = IndexerConfig {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let indexer = indexer(store.clone(), feed, config);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(indexer.run(rx));

        tokio::time::timeout(Duration::from_secs(2), async {
            while store.batches().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("tail poll should commit");

        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(store.cursor(), "2024-01-02T00:00:00Z");
        let levels: Vec<u64> = store.records().iter().map(|d| d.level).collect();
        assert_eq!(levels, vec![2, 1]);
    }

    /// Blocks every commit until the test releases it
    struct GatedStore {
        inner: MemoryStore,
        entered: Mutex<std_mpsc::Sender<()>>,
        release: Mutex<std_mpsc::Receiver<()>>,
    }

    impl DelegationStore for GatedStore {
        fn cursor(&self) -> String {
            self.inner.cursor()
        }

        fn append_newest_batch(&self, batch: &[Delegation]) -> Result<(), StoreError> {
            if batch.is_empty() {
                return Ok(());
            }
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            self.inner.append_newest_batch(batch)
        }

        fn read_all(&self) -> Result<Vec<u8>, StoreError> {
            self.inner.read_all()
        }

        fn close(&self) {
            self.inner.close()
        }
    }

    #[tokio::test]
    async fn test_commit_in_flight_finishes_before_stop() {
        let (entered_tx, entered_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let feed = FakeFeed::with_pages(vec![
            Ok(Vec::new()),
            Ok(vec![resp("2024-03-03T00:00:00Z", 1, "a", 1)]),
        ]);
        let config = IndexerConfig {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let indexer = Indexer::new(Arc::clone(&store), feed, config);
        let mut phase = indexer.subscribe_phase();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(indexer.run(rx));

        // The tail poll is now inside append_newest_batch
        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .unwrap();
        tx.send(true).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        assert_eq!(store.cursor(), constants::ZERO_TIMESTAMP);

        release_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("indexer should stop once the commit is done")
            .unwrap();

        assert_eq!(store.cursor(), "2024-03-03T00:00:00Z");
        assert_eq!(store.inner.batches().len(), 1);
        assert_eq!(*phase.borrow_and_update(), IndexerPhase::Stopped);
    }

    #[tokio::test]
    async fn test_unstorable_timestamp_is_reported_as_invalid_cursor() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = Arc::new(FileLog::open_or_initialize(tmp.path().join("db")).unwrap());
        let feed = FakeFeed::with_pages(vec![
            Ok(vec![resp("2024-01-01T00:00:00.5Z", 1, "a", 1)]),
            Err(FetchError::Status(500)),
        ]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let mut indexer = Indexer::new(Arc::clone(&store), feed, IndexerConfig::default())
            .with_callback(move |event| events_clone.lock().unwrap().push(event.clone()));

        assert_eq!(indexer.poll_once().await, PollOutcome::Failed);
        assert_eq!(indexer.poll_once().await, PollOutcome::Failed);

        let events = events.lock().unwrap();
        let invalid: Vec<&IndexerEvent> = events
            .iter()
            .filter(|e| matches!(e, IndexerEvent::InvalidCursor { .. }))
            .collect();
        assert_eq!(invalid.len(), 1);
        match invalid[0] {
            IndexerEvent::InvalidCursor { timestamp, cursor } => {
                assert_eq!(timestamp, "2024-01-01T00:00:00.5Z");
                assert_eq!(cursor, constants::ZERO_TIMESTAMP);
            }
            _ => unreachable!(),
        }
        // A plain fetch failure stays a generic error
        assert!(
            events
                .iter()
                .any(|e| matches!(e, IndexerEvent::Error { .. }))
        );
        assert_eq!(store.cursor(), constants::ZERO_TIMESTAMP);
    }
}
