use crate::discovery::PageKind;
use std::collections::HashSet;

/// Outcome of asking to visit a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitDecision {
    /// The page may be fetched; it has been marked visited and counted
    Visit,
    /// The page was fetched earlier in this crawl
    AlreadyVisited,
    /// The page or vehicle budget is exhausted
    LimitReached,
}

/// Outcome of recording an extracted vehicle's VIN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VinDecision {
    /// New VIN, now recorded
    Recorded,
    /// VIN was already recorded by another page
    Duplicate,
    /// The vehicle budget is exhausted
    AtCapacity,
}

/// Tracks the state of a single crawl run
///
/// Owned by the coordinator behind one mutex. Every check-and-update that an
/// invariant depends on (page budget, VIN budget) is a single method here so
/// that it happens inside one critical section.
#[derive(Debug, Clone)]
pub struct CrawlState {
    /// Number of pages fetched (or being fetched)
    pub pages_crawled: u32,

    /// Number of pages classified as vehicle detail pages
    pub vdp_pages: u32,

    /// Number of pages classified as search results pages
    pub srp_pages: u32,

    max_pages: u32,
    max_vehicles: u32,

    /// URLs that have been fetched
    visited_urls: HashSet<String>,

    /// URLs that have ever been enqueued
    discovered_urls: HashSet<String>,

    /// VINs of the vehicles kept so far
    vehicle_vins: HashSet<String>,
}

impl CrawlState {
    /// Creates an empty state with the given budgets
    pub fn new(max_pages: u32, max_vehicles: u32) -> Self {
        Self {
            pages_crawled: 0,
            vdp_pages: 0,
            srp_pages: 0,
            max_pages,
            max_vehicles,
            visited_urls: HashSet::new(),
            discovered_urls: HashSet::new(),
            vehicle_vins: HashSet::new(),
        }
    }

    /// Returns true once either the page or the vehicle budget is used up
    pub fn limits_reached(&self) -> bool {
        self.pages_crawled >= self.max_pages || self.vehicles_found() >= self.max_vehicles as usize
    }

    /// Decides whether `url` may be fetched, claiming it if so
    pub fn begin_visit(&mut self, url: &str) -> VisitDecision {
        if self.visited_urls.contains(url) {
            return VisitDecision::AlreadyVisited;
        }

        if self.limits_reached() {
            return VisitDecision::LimitReached;
        }

        self.visited_urls.insert(url.to_string());
        self.pages_crawled += 1;
        VisitDecision::Visit
    }

    /// Releases a visit claimed by `begin_visit` whose fetch failed
    ///
    /// The queue may retry the item, and the retry must not be skipped as
    /// already visited nor count twice against the page budget.
    pub fn abandon_visit(&mut self, url: &str) {
        if self.visited_urls.remove(url) {
            self.pages_crawled = self.pages_crawled.saturating_sub(1);
        }
    }

    /// Counts a fetched page by its classification
    pub fn record_page_kind(&mut self, kind: PageKind) {
        match kind {
            PageKind::Vdp => self.vdp_pages += 1,
            PageKind::Srp => self.srp_pages += 1,
            PageKind::Unknown => {}
        }
    }

    /// Marks a URL as discovered; returns false if it already was
    pub fn mark_discovered(&mut self, url: &str) -> bool {
        self.discovered_urls.insert(url.to_string())
    }

    /// Returns true if the URL has been enqueued before
    pub fn is_discovered(&self, url: &str) -> bool {
        self.discovered_urls.contains(url)
    }

    /// Returns true if one more page fits the budget given `queued` waiting items
    pub fn has_page_budget(&self, queued: usize) -> bool {
        (self.pages_crawled as usize + queued) < self.max_pages as usize
    }

    /// Records a VIN, enforcing uniqueness and the vehicle budget
    pub fn record_vin(&mut self, vin: &str) -> VinDecision {
        if self.vehicle_vins.contains(vin) {
            return VinDecision::Duplicate;
        }

        if self.vehicles_found() >= self.max_vehicles as usize {
            return VinDecision::AtCapacity;
        }

        self.vehicle_vins.insert(vin.to_string());
        VinDecision::Recorded
    }

    /// Returns the number of distinct vehicles kept
    pub fn vehicles_found(&self) -> usize {
        self.vehicle_vins.len()
    }
}
