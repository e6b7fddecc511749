//! Output module for crawl results
//!
//! This module handles:
//! - The result types a crawl returns (`CrawlResult`, `PageOutcome`, ...)
//! - Writing results as JSON
//! - Printing a statistics summary

mod results;
pub mod stats;

pub use results::{write_results, CrawlResult, CrawlStats, PageOutcome, PageStatus, SkipReason};
pub use stats::{outcome_counts, print_statistics};
