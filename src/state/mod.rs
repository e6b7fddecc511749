//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `ItemState`: lifecycle of a single queue item (queued, running, backoff, ...)
//! - `CrawlState`: per-run counters, visited/discovered URL sets and the VIN set

mod crawl_state;
mod item_state;

// Re-export main types
pub use crawl_state::{CrawlState, VinDecision, VisitDecision};
pub use item_state::ItemState;
