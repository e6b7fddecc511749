//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the per-page policy that drives a crawl:
//! - Claiming pages against the page and vehicle budgets
//! - Fetching through the session, escalating to the renderer when needed
//! - Classifying pages and branching on the result
//! - Extracting vehicles from detail pages, deduplicated by VIN
//! - Expanding listing pages into detail and pagination links
//! - Assembling the final `CrawlResult`

use super::queue::{QueueConfig, QueueItem, QueueStatus, RequestQueue, StatusObserver};
use super::render::{PageRenderer, RenderOptions, RenderPolicy};
use super::session::{RequestOptions, Session};
use crate::config::{validate, Config, RenderMode};
use crate::discovery::{PageKind, UrlDiscoverer};
use crate::extract::VehicleExtractor;
use crate::output::{CrawlResult, CrawlStats, PageOutcome, PageStatus, SkipReason};
use crate::state::{CrawlState, VinDecision, VisitDecision};
use crate::url::{canonicalize, parse_canonical};
use crate::{CrawlError, Result};
use scraper::Html;
use serde::Serialize;
use serde_json::Map;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use url::Url;

/// Progress snapshot delivered to the progress callback
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlProgress {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub pages_crawled: u32,
    pub vdp_pages: u32,
    pub srp_pages: u32,
    pub vehicles_found: usize,
}

/// Synchronous progress callback; must not block
pub type ProgressCallback = Arc<dyn Fn(CrawlProgress) + Send + Sync>;

/// Crawls one dealership site per `crawl` call
pub struct Crawler {
    config: Config,
    discoverer: Arc<UrlDiscoverer>,
    render_policy: Arc<RenderPolicy>,
    extractor: Arc<dyn VehicleExtractor>,
    renderer: Option<Arc<dyn PageRenderer>>,
    progress: Option<ProgressCallback>,
}

/// HTML ready for classification
struct FetchedPage {
    html: String,
    /// URL after redirects; links are resolved against it
    final_url: String,
}

/// Whether a discovered link made it into the queue
enum Claim {
    Added,
    AlreadyDiscovered,
    NoBudget,
}

/// Everything one crawl's workers share
struct CrawlContext {
    config: Config,
    source: String,
    discoverer: Arc<UrlDiscoverer>,
    render_policy: Arc<RenderPolicy>,
    extractor: Arc<dyn VehicleExtractor>,
    renderer: Option<Arc<dyn PageRenderer>>,
    session: Session,
    state: Arc<Mutex<CrawlState>>,
    queue: Arc<RequestQueue>,
}

impl Crawler {
    /// Creates a crawler
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration; validated here
    /// * `extractor` - Turns vehicle detail pages into records
    ///
    /// # Returns
    ///
    /// * `Ok(Crawler)` - Ready to crawl
    /// * `Err(CrawlError::Config)` - Invalid configuration
    pub fn new(config: &Config, extractor: Arc<dyn VehicleExtractor>) -> Result<Self> {
        validate(config)?;

        Ok(Self {
            config: config.clone(),
            discoverer: Arc::new(UrlDiscoverer::new(&config.discovery)?),
            render_policy: Arc::new(RenderPolicy::new(&config.render)?),
            extractor,
            renderer: None,
            progress: None,
        })
    }

    /// Enables browser rendering through `renderer`
    ///
    /// Ignored when the render mode is `never`.
    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Installs a progress callback
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Crawls from `start_url` until the frontier is exhausted or a budget is used up
    ///
    /// Vehicles are stamped with `source_name`. Individual page failures never
    /// abort the crawl; they are reported in `CrawlResult::errors`.
    ///
    /// # Errors
    ///
    /// Fails only if `start_url` is not an absolute http(s) URL or the HTTP
    /// session cannot be built.
    pub async fn crawl(&self, start_url: &str, source_name: &str) -> Result<CrawlResult> {
        self.run(start_url, source_name, None).await
    }

    /// Like `crawl`, but dispatches nothing new once `deadline` has passed
    ///
    /// Pages already being processed are awaited.
    pub async fn crawl_with_deadline(
        &self,
        start_url: &str,
        source_name: &str,
        deadline: Instant,
    ) -> Result<CrawlResult> {
        self.run(start_url, source_name, Some(deadline)).await
    }

    async fn run(
        &self,
        start_url: &str,
        source_name: &str,
        deadline: Option<Instant>,
    ) -> Result<CrawlResult> {
        let start = parse_canonical(start_url)?;
        let crawler_config = &self.config.crawler;

        tracing::info!(
            "Starting crawl of {} for '{}' (max {} pages, {} vehicles, concurrency {})",
            start,
            source_name,
            crawler_config.max_pages,
            crawler_config.max_vehicles,
            crawler_config.concurrency
        );

        let state = Arc::new(Mutex::new(CrawlState::new(
            crawler_config.max_pages,
            crawler_config.max_vehicles,
        )));

        let mut queue = RequestQueue::new(QueueConfig::from_crawler_config(crawler_config));
        if let Some(progress) = &self.progress {
            queue = queue.with_observer(progress_observer(Arc::clone(&state), Arc::clone(progress)));
        }
        let queue = Arc::new(queue);

        let renderer = match self.config.render.mode {
            RenderMode::Never => None,
            _ => self.renderer.clone(),
        };

        let context = Arc::new(CrawlContext {
            config: self.config.clone(),
            source: source_name.to_string(),
            discoverer: Arc::clone(&self.discoverer),
            render_policy: Arc::clone(&self.render_policy),
            extractor: Arc::clone(&self.extractor),
            renderer,
            session: Session::new(&self.config.session)?,
            state: Arc::clone(&state),
            queue: Arc::clone(&queue),
        });

        let seed = start.to_string();
        lock(&state).mark_discovered(&seed);
        queue.enqueue(&seed, PageKind::Srp, Map::new());

        let worker = Arc::clone(&context);
        let run = queue
            .run_until(
                move |item: QueueItem| {
                    let context = Arc::clone(&worker);
                    async move { context.process(item).await }
                },
                deadline,
            )
            .await;

        let mut outcomes = run.results;
        let vehicles: Vec<_> = outcomes
            .iter_mut()
            .filter_map(|outcome| outcome.vehicle.take())
            .collect();

        let stats = {
            let state = lock(&state);
            CrawlStats {
                pages_crawled: state.pages_crawled,
                vdp_pages: state.vdp_pages,
                srp_pages: state.srp_pages,
                total_vehicles: vehicles.len(),
                errors: run.errors.len(),
                duration_ms: run.duration.as_millis() as u64,
            }
        };

        if run.unprocessed > 0 {
            tracing::warn!("Deadline reached with {} pages still queued", run.unprocessed);
        }

        tracing::info!(
            "Crawl of {} finished: {} pages ({} detail, {} listing), {} vehicles, {} errors in {}ms",
            start,
            stats.pages_crawled,
            stats.vdp_pages,
            stats.srp_pages,
            stats.total_vehicles,
            stats.errors,
            stats.duration_ms
        );

        Ok(CrawlResult {
            vehicles,
            stats,
            errors: run.errors,
            outcomes,
        })
    }
}

impl CrawlContext {
    /// Processes one dequeued page
    ///
    /// Fetch errors are returned so the queue can retry them; everything
    /// after a successful fetch becomes a `PageOutcome`.
    async fn process(&self, item: QueueItem) -> Result<PageOutcome> {
        let QueueItem { url, attempts, .. } = item;

        let decision = lock(&self.state).begin_visit(&url);
        match decision {
            VisitDecision::Visit => {}
            VisitDecision::AlreadyVisited => {
                tracing::debug!("Skipping {}: already visited", url);
                return Ok(PageOutcome::skipped(url, SkipReason::AlreadyVisited));
            }
            VisitDecision::LimitReached => {
                tracing::debug!("Skipping {}: limit reached", url);
                return Ok(PageOutcome::skipped(url, SkipReason::LimitReached));
            }
        }

        let page = match self.fetch_page(&url).await {
            Ok(page) => page,
            Err(e) => {
                // Only a retry gives the visit back; permanent failures stay counted
                if self.will_retry(&e, attempts) {
                    lock(&self.state).abandon_visit(&url);
                }
                return Err(e);
            }
        };

        Ok(self.handle_page(&url, &page))
    }

    /// Mirrors the queue's retry decision for a failed attempt
    fn will_retry(&self, error: &CrawlError, attempts: u32) -> bool {
        error.is_retryable() && attempts <= self.config.crawler.max_retries
    }

    /// Fetches a page, escalating to the renderer when the policy asks for it
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage> {
        let mode = self.config.render.mode;

        if let Some(renderer) = &self.renderer {
            let render_first = mode == RenderMode::Always
                || self.render_policy.needs_browser_rendering(url, None);

            if render_first {
                match self.render(renderer.as_ref(), url).await {
                    Ok(page) => return Ok(page),
                    Err(e @ CrawlError::HttpStatus { .. }) => return Err(e),
                    Err(e) => tracing::warn!("{}; falling back to plain HTTP", e),
                }
            }
        }

        let response = self.session.request(url, &RequestOptions::default()).await?;
        if response.status >= 400 {
            return Err(CrawlError::HttpStatus {
                url: url.to_string(),
                status: response.status,
            });
        }

        let page = FetchedPage {
            html: response.body,
            final_url: response.final_url,
        };

        if let (Some(renderer), RenderMode::Auto) = (&self.renderer, mode) {
            if self.render_policy.needs_browser_rendering(url, Some(&page.html)) {
                match self.render(renderer.as_ref(), url).await {
                    Ok(rendered) => return Ok(rendered),
                    Err(e) => tracing::warn!("{}; using the HTTP response", e),
                }
            }
        }

        Ok(page)
    }

    async fn render(&self, renderer: &dyn PageRenderer, url: &str) -> Result<FetchedPage> {
        let parsed = Url::parse(url)?;

        let mut headers = self.session.headers();
        if let Some(cookie) = self.session.cookie_header() {
            headers.insert("Cookie".to_string(), cookie);
        }
        let options = RenderOptions::from_config(&self.config.render, headers);

        let rendered = renderer.render(&parsed, &options).await?;
        if rendered.status >= 400 {
            return Err(CrawlError::HttpStatus {
                url: url.to_string(),
                status: rendered.status,
            });
        }

        tracing::debug!("Rendered {} ({} bytes)", url, rendered.html.len());
        Ok(FetchedPage {
            html: rendered.html,
            final_url: url.to_string(),
        })
    }

    /// Classifies a fetched page and applies the matching policy
    ///
    /// Runs synchronously: the parsed document never crosses an await point.
    fn handle_page(&self, url: &str, page: &FetchedPage) -> PageOutcome {
        let base = match Url::parse(&page.final_url).or_else(|_| Url::parse(url)) {
            Ok(base) => base,
            Err(e) => {
                let error = CrawlError::Discovery {
                    url: url.to_string(),
                    message: e.to_string(),
                };
                tracing::warn!("{}", error);
                let mut outcome = PageOutcome::new(url, PageStatus::Error);
                outcome.error = Some(error.to_string());
                return outcome;
            }
        };

        let document = Html::parse_document(&page.html);
        let kind = self.discoverer.classify_page(&document, &base);
        lock(&self.state).record_page_kind(kind);
        tracing::debug!("{} classified as {}", url, kind);

        match kind {
            PageKind::Vdp => self.handle_detail_page(url, &document, &base),
            PageKind::Srp => self.handle_listing_page(url, &document, &base),
            PageKind::Unknown => {
                PageOutcome::new(url, PageStatus::UnknownType).with_kind(PageKind::Unknown)
            }
        }
    }

    fn handle_detail_page(&self, url: &str, document: &Html, base: &Url) -> PageOutcome {
        let Some(mut vehicle) = self.extractor.extract_vehicle(document, base) else {
            tracing::debug!("No vehicle data on {}", url);
            return PageOutcome::new(url, PageStatus::NoVehicleData).with_kind(PageKind::Vdp);
        };

        let decision = lock(&self.state).record_vin(&vehicle.vin);
        let status = match decision {
            VinDecision::Recorded => PageStatus::Success,
            VinDecision::Duplicate => PageStatus::Duplicate,
            VinDecision::AtCapacity => PageStatus::Skipped(SkipReason::MaxVehicles),
        };

        let mut outcome = PageOutcome::new(url, status).with_kind(PageKind::Vdp);
        outcome.vin = Some(vehicle.vin.clone());

        if decision == VinDecision::Recorded {
            tracing::debug!("Found vehicle {} on {}", vehicle.vin, url);
            vehicle.source = Some(self.source.clone());
            outcome.vehicle = Some(vehicle);
        }

        outcome
    }

    fn handle_listing_page(&self, url: &str, document: &Html, base: &Url) -> PageOutcome {
        let detail_links = self.discoverer.discover_detail_links(document, base);
        let pagination = self.discoverer.discover_pagination(document, base);

        let mut outcome = PageOutcome::new(url, PageStatus::Success).with_kind(PageKind::Srp);
        outcome.links_found = detail_links.len()
            + pagination.all_pages.len()
            + usize::from(pagination.next_url.is_some());

        for link in &detail_links {
            match self.claim(link, PageKind::Vdp) {
                Claim::Added => outcome.links_added += 1,
                Claim::AlreadyDiscovered => {}
                Claim::NoBudget => break,
            }
        }

        let listing_pages = pagination.next_url.iter().chain(pagination.all_pages.iter());
        for link in listing_pages {
            match self.claim(link, PageKind::Srp) {
                Claim::Added => outcome.links_added += 1,
                Claim::AlreadyDiscovered => {}
                Claim::NoBudget => break,
            }
        }

        tracing::debug!(
            "{}: {} detail links, {} listing pages, {} enqueued",
            url,
            detail_links.len(),
            pagination.all_pages.len(),
            outcome.links_added
        );

        outcome
    }

    /// Enqueues a link if it is new and the page budget has room for it
    ///
    /// The state lock is released before enqueueing; the queue's observer takes it.
    fn claim(&self, link: &str, kind: PageKind) -> Claim {
        let link = canonicalize(link);
        let queued = self.queue.len();
        {
            let mut state = lock(&self.state);
            if state.is_discovered(&link) {
                return Claim::AlreadyDiscovered;
            }
            if !state.has_page_budget(queued) {
                return Claim::NoBudget;
            }
            state.mark_discovered(&link);
        }

        if self.queue.enqueue(&link, kind, Map::new()) {
            Claim::Added
        } else {
            Claim::AlreadyDiscovered
        }
    }
}

/// Turns queue status snapshots into crawl progress reports
fn progress_observer(state: Arc<Mutex<CrawlState>>, progress: ProgressCallback) -> StatusObserver {
    Arc::new(move |status: QueueStatus| {
        let snapshot = {
            let state = lock(&state);
            CrawlProgress {
                queued: status.queued,
                running: status.running,
                completed: status.completed,
                failed: status.failed,
                pages_crawled: state.pages_crawled,
                vdp_pages: state.vdp_pages,
                srp_pages: state.srp_pages,
                vehicles_found: state.vehicles_found(),
            }
        };
        progress(snapshot);
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
