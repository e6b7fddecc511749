//! Bounded-concurrency, rate-limited request queue with retries
//!
//! The queue owns the crawl frontier. `run` is the single dispatcher: it hands
//! items to a process function in tasks of their own, at most `concurrency` at a
//! time, and never starts a batch sooner than `rate_limit` after the previous one.
//!
//! # Retry Logic
//!
//! | Condition | Action |
//! |-----------|--------|
//! | Retryable error, `attempts <= max_retries` | Back off `retry_delay * 2^(attempts-1)`, requeue at the front |
//! | Retryable error, retries used up | Permanent failure |
//! | Any other error | Permanent failure |
//!
//! `attempts` counts dispatches, so an item that fails twice and then succeeds
//! finishes with `attempts == 3`.

use crate::discovery::PageKind;
use crate::state::ItemState;
use crate::url::canonicalize;
use crate::CrawlError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, trace, warn};

/// Window used for throughput statistics
const STATS_WINDOW: Duration = Duration::from_secs(60);

/// Errors that know whether the failed work is worth retrying
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for CrawlError {
    fn is_retryable(&self) -> bool {
        CrawlError::is_retryable(self)
    }
}

/// A unit of work in the queue
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// Canonical URL; at most one active item exists per URL
    pub url: String,

    /// What the enqueuer expects the page to be
    pub kind: PageKind,

    /// Free-form data carried along with the item
    pub metadata: Map<String, Value>,

    /// Number of times the item has been dispatched
    pub attempts: u32,

    pub enqueued_at: Instant,
}

/// Queue tuning
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of items processed at once
    pub concurrency: usize,

    /// Minimum interval between dispatch batches
    pub rate_limit: Duration,

    /// Retries allowed after the first attempt
    pub max_retries: u32,

    /// Base delay for exponential backoff
    pub retry_delay: Duration,
}

impl QueueConfig {
    /// Builds queue settings from the `[crawler]` section
    pub fn from_crawler_config(config: &crate::config::CrawlerConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1) as usize,
            rate_limit: Duration::from_millis(config.rate_limit_ms),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Snapshot of queue progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QueueStatus {
    /// Items waiting for dispatch, including those backing off
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    /// Items ever accepted
    pub total: usize,
    /// Items finished during the last minute
    pub requests_per_minute: usize,
    /// Mean processing time of the items finished during the last minute
    pub average_request_time_ms: u64,
}

/// A permanently failed item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueFailure {
    pub url: String,
    pub error: String,
    pub attempts: u32,
}

/// Outcome of a `run`
#[derive(Debug)]
pub struct QueueRunResult<R> {
    pub completed: usize,
    pub failed: usize,
    /// Results of successful items in completion order
    pub results: Vec<R>,
    pub errors: Vec<QueueFailure>,
    pub duration: Duration,
    /// Items left undispatched because the deadline passed
    pub unprocessed: usize,
}

/// Callback receiving progress snapshots; must not block
pub type StatusObserver = Arc<dyn Fn(QueueStatus) + Send + Sync>;

struct Processed<R, E> {
    item: QueueItem,
    result: Result<R, E>,
    elapsed: Duration,
}

#[derive(Default)]
struct Inner {
    frontier: VecDeque<QueueItem>,
    states: HashMap<String, ItemState>,
    backing_off: usize,
    running: usize,
    completed: usize,
    failed: usize,
    total: usize,
    last_dispatch: Option<Instant>,
    recent: VecDeque<(Instant, Duration)>,
}

impl Inner {
    /// Applies a state change, dropping the entry once it is terminal
    fn transition(&mut self, url: &str, next: ItemState) {
        let Some(current) = self.states.get(url).copied() else {
            warn!("No queue entry for {}", url);
            return;
        };

        match current.transition(next) {
            Ok(state) if state.is_terminal() => {
                self.states.remove(url);
            }
            Ok(state) => {
                self.states.insert(url.to_string(), state);
            }
            Err(e) => warn!("{} for {}", e, url),
        }
    }

    fn record_finish(&mut self, now: Instant, elapsed: Duration) {
        self.recent.push_back((now, elapsed));
        self.prune(now);
    }

    fn prune(&mut self, now: Instant) {
        while let Some((at, _)) = self.recent.front() {
            if now.duration_since(*at) > STATS_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn status(&mut self) -> QueueStatus {
        self.prune(Instant::now());

        let requests = self.recent.len();
        let average = if requests == 0 {
            0
        } else {
            let total: Duration = self.recent.iter().map(|(_, elapsed)| *elapsed).sum();
            (total.as_millis() / requests as u128) as u64
        };

        QueueStatus {
            queued: self.frontier.len() + self.backing_off,
            running: self.running,
            completed: self.completed,
            failed: self.failed,
            total: self.total,
            requests_per_minute: requests,
            average_request_time_ms: average,
        }
    }
}

/// The crawl frontier and its dispatcher
pub struct RequestQueue {
    config: QueueConfig,
    inner: Mutex<Inner>,
    notify: Notify,
    observer: Option<StatusObserver>,
}

impl RequestQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            observer: None,
        }
    }

    /// Installs a progress observer
    pub fn with_observer(mut self, observer: StatusObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Adds a URL to the back of the frontier
    ///
    /// Returns false if an item with the same canonical URL is already queued,
    /// running, or backing off.
    pub fn enqueue(&self, url: &str, kind: PageKind, metadata: Map<String, Value>) -> bool {
        let url = canonicalize(url);
        {
            let mut inner = self.lock();
            if inner.states.contains_key(&url) {
                trace!("Already queued: {}", url);
                return false;
            }

            inner.states.insert(url.clone(), ItemState::Queued);
            inner.total += 1;
            inner.frontier.push_back(QueueItem {
                url,
                kind,
                metadata,
                attempts: 0,
                enqueued_at: Instant::now(),
            });
        }

        self.notify.notify_one();
        self.emit();
        true
    }

    /// Enqueues several URLs, returning how many were accepted
    pub fn add_all<I, S>(&self, urls: I, kind: PageKind) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        urls.into_iter()
            .filter(|url| self.enqueue(url.as_ref(), kind, Map::new()))
            .count()
    }

    /// Number of items waiting for dispatch, including those backing off
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.frontier.len() + inner.backing_off
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current progress snapshot
    pub fn status(&self) -> QueueStatus {
        self.lock().status()
    }

    /// Processes items until the frontier is empty and nothing is in flight
    pub async fn run<F, Fut, R, E>(&self, process: F) -> QueueRunResult<R>
    where
        F: Fn(QueueItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Send + 'static,
        E: Retryable + Display + Send + 'static,
    {
        self.run_until(process, None).await
    }

    /// Like `run`, but stops dispatching once `deadline` passes
    ///
    /// Items already running are awaited; items still queued or backing off
    /// are counted in `unprocessed`.
    pub async fn run_until<F, Fut, R, E>(
        &self,
        process: F,
        deadline: Option<Instant>,
    ) -> QueueRunResult<R>
    where
        F: Fn(QueueItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Send + 'static,
        E: Retryable + Display + Send + 'static,
    {
        let process = Arc::new(process);
        let started = Instant::now();
        let mut running: JoinSet<Processed<R, E>> = JoinSet::new();
        let mut in_flight: HashMap<Id, (String, u32)> = HashMap::new();
        let mut backoff: JoinSet<QueueItem> = JoinSet::new();
        let mut results = Vec::new();
        let mut errors = Vec::new();

        loop {
            let now = Instant::now();
            let accepting = deadline.map_or(true, |d| now < d);

            let mut next_dispatch = None;
            if accepting {
                next_dispatch = self.dispatch(&mut running, &mut in_flight, &process, now);
            } else if !backoff.is_empty() {
                debug!("Deadline passed; dropping {} backing-off items", backoff.len());
                backoff.abort_all();
                while backoff.join_next().await.is_some() {}
            }

            if running.is_empty() && backoff.is_empty() && (!accepting || self.frontier_is_empty())
            {
                break;
            }

            tokio::select! {
                Some(joined) = running.join_next_with_id() => match joined {
                    Ok((id, processed)) => {
                        in_flight.remove(&id);
                        self.handle_processed(processed, &mut backoff, &mut results, &mut errors);
                    }
                    Err(e) => {
                        let lost = in_flight.remove(&e.id());
                        self.handle_lost(lost, e, &mut errors);
                    }
                },
                Some(joined) = backoff.join_next() => {
                    if let Ok(item) = joined {
                        self.requeue(item);
                    }
                }
                _ = self.notify.notified() => {}
                _ = sleep_until(next_dispatch.unwrap_or(now)), if next_dispatch.is_some() => {}
                _ = sleep_until(deadline.unwrap_or(now)), if accepting && deadline.is_some() => {}
            }
        }

        let (completed, failed, unprocessed) = {
            let inner = self.lock();
            (inner.completed, inner.failed, inner.frontier.len() + inner.backing_off)
        };

        QueueRunResult {
            completed,
            failed,
            results,
            errors,
            duration: started.elapsed(),
            unprocessed,
        }
    }

    /// Starts as many items as free slots allow
    ///
    /// Returns the instant the rate limit next allows a batch when it is
    /// what holds dispatch back.
    fn dispatch<F, Fut, R, E>(
        &self,
        running: &mut JoinSet<Processed<R, E>>,
        in_flight: &mut HashMap<Id, (String, u32)>,
        process: &Arc<F>,
        now: Instant,
    ) -> Option<Instant>
    where
        F: Fn(QueueItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
    {
        let batch = {
            let mut inner = self.lock();
            if inner.frontier.is_empty() || inner.running >= self.config.concurrency {
                return None;
            }

            if let Some(last) = inner.last_dispatch {
                let ready_at = last + self.config.rate_limit;
                if now < ready_at {
                    return Some(ready_at);
                }
            }

            let mut batch = Vec::new();
            while inner.running < self.config.concurrency {
                let Some(mut item) = inner.frontier.pop_front() else {
                    break;
                };
                item.attempts += 1;
                inner.transition(&item.url, ItemState::Running);
                inner.running += 1;
                batch.push(item);
            }
            inner.last_dispatch = Some(now);
            batch
        };

        trace!("Dispatching {} items", batch.len());
        for item in batch {
            let process = Arc::clone(process);
            let key = (item.url.clone(), item.attempts);
            let handle = running.spawn(async move {
                let begun = Instant::now();
                let result = process(item.clone()).await;
                Processed {
                    item,
                    result,
                    elapsed: begun.elapsed(),
                }
            });
            in_flight.insert(handle.id(), key);
        }

        None
    }

    /// Records a task that panicked or was cancelled as a permanent failure
    ///
    /// Its URL leaves the queue, so it may be enqueued again later.
    fn handle_lost(
        &self,
        lost: Option<(String, u32)>,
        e: JoinError,
        errors: &mut Vec<QueueFailure>,
    ) {
        {
            let mut inner = self.lock();
            inner.running = inner.running.saturating_sub(1);
            inner.failed += 1;

            match lost {
                Some((url, attempts)) => {
                    error!("Queue task for {} failed: {}", url, e);
                    inner.transition(&url, ItemState::Failed);
                    errors.push(QueueFailure {
                        url,
                        error: e.to_string(),
                        attempts,
                    });
                }
                None => error!("Queue task failed: {}", e),
            }
        }

        self.emit();
    }

    fn handle_processed<R, E>(
        &self,
        processed: Processed<R, E>,
        backoff: &mut JoinSet<QueueItem>,
        results: &mut Vec<R>,
        errors: &mut Vec<QueueFailure>,
    ) where
        E: Retryable + Display,
    {
        let Processed {
            item,
            result,
            elapsed,
        } = processed;

        {
            let mut inner = self.lock();
            inner.running = inner.running.saturating_sub(1);
            inner.record_finish(Instant::now(), elapsed);

            match &result {
                Ok(_) => {
                    inner.completed += 1;
                    inner.transition(&item.url, ItemState::Completed);
                }
                Err(e) if e.is_retryable() && item.attempts <= self.config.max_retries => {
                    inner.backing_off += 1;
                    inner.transition(&item.url, ItemState::Backoff);
                }
                Err(_) => {
                    inner.failed += 1;
                    inner.transition(&item.url, ItemState::Failed);
                }
            }
        }

        match result {
            Ok(value) => results.push(value),
            Err(e) if e.is_retryable() && item.attempts <= self.config.max_retries => {
                let delay = backoff_delay(self.config.retry_delay, item.attempts);
                warn!(
                    "Attempt {} for {} failed ({}); retrying in {:?}",
                    item.attempts, item.url, e, delay
                );
                backoff.spawn(async move {
                    sleep(delay).await;
                    item
                });
            }
            Err(e) => {
                warn!(
                    "Giving up on {} after {} attempt(s): {}",
                    item.url, item.attempts, e
                );
                errors.push(QueueFailure {
                    url: item.url,
                    error: e.to_string(),
                    attempts: item.attempts,
                });
            }
        }

        self.emit();
    }

    /// Puts a backed-off item at the front of the frontier
    fn requeue(&self, item: QueueItem) {
        {
            let mut inner = self.lock();
            inner.backing_off = inner.backing_off.saturating_sub(1);
            inner.transition(&item.url, ItemState::Queued);
            inner.frontier.push_front(item);
        }
        self.emit();
    }

    fn frontier_is_empty(&self) -> bool {
        self.lock().frontier.is_empty()
    }

    /// Sends a status snapshot to the observer, outside the lock
    fn emit(&self) {
        if let Some(observer) = &self.observer {
            let status = self.status();
            observer(status);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Delay before retry number `attempts`: `base * 2^(attempts-1)`
pub fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}
