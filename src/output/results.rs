use crate::crawler::QueueFailure;
use crate::discovery::PageKind;
use crate::extract::VehicleRecord;
use crate::Result;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;

/// Why a dequeued page was not fetched or its vehicle not kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyVisited,
    LimitReached,
    MaxVehicles,
}

/// Result of processing one queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// A new vehicle was extracted, or a listing page was expanded
    Success,
    /// The vehicle's VIN was already collected from another page
    Duplicate,
    Skipped(SkipReason),
    UnknownType,
    NoVehicleData,
    Error,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Duplicate => "duplicate",
            Self::Skipped(SkipReason::AlreadyVisited) => "skipped (already visited)",
            Self::Skipped(SkipReason::LimitReached) => "skipped (limit reached)",
            Self::Skipped(SkipReason::MaxVehicles) => "skipped (max vehicles)",
            Self::UnknownType => "unknown type",
            Self::NoVehicleData => "no vehicle data",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one page
#[derive(Debug, Clone, Serialize)]
pub struct PageOutcome {
    pub url: String,
    pub status: PageStatus,

    /// Classification, when the page was fetched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<PageKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vin: Option<String>,

    /// The kept vehicle; moved into `CrawlResult::vehicles` when the crawl ends
    #[serde(skip)]
    pub vehicle: Option<VehicleRecord>,

    /// Detail and pagination links found on a listing page
    pub links_found: usize,

    /// Links that were new and fit the page budget
    pub links_added: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageOutcome {
    /// Creates an outcome with the given status and nothing else filled in
    pub fn new(url: impl Into<String>, status: PageStatus) -> Self {
        Self {
            url: url.into(),
            status,
            kind: None,
            vin: None,
            vehicle: None,
            links_found: 0,
            links_added: 0,
            error: None,
        }
    }

    pub fn skipped(url: impl Into<String>, reason: SkipReason) -> Self {
        Self::new(url, PageStatus::Skipped(reason))
    }

    pub fn with_kind(mut self, kind: PageKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Aggregate counters for a finished crawl
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    pub pages_crawled: u32,
    pub vdp_pages: u32,
    pub srp_pages: u32,
    pub total_vehicles: usize,
    /// Permanently failed queue items
    pub errors: usize,
    pub duration_ms: u64,
}

/// Everything a crawl produced
#[derive(Debug, Clone, Serialize)]
pub struct CrawlResult {
    /// Unique vehicles, in the order they were found
    pub vehicles: Vec<VehicleRecord>,
    pub stats: CrawlStats,
    pub errors: Vec<QueueFailure>,
    pub outcomes: Vec<PageOutcome>,
}

impl CrawlResult {
    /// Counts outcomes with the given status
    pub fn count_status(&self, status: PageStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Writes the result as pretty-printed JSON
///
/// # Errors
///
/// Returns `CrawlError::Json` or `CrawlError::Io` if serialization or the write fails.
pub fn write_results(result: &CrawlResult, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    fs::write(path, json)?;
    Ok(())
}
