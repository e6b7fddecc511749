//! Human-readable crawl statistics

use super::{CrawlResult, PageStatus};
use std::collections::BTreeMap;

/// Counts outcomes per status, keyed by the status' display name
pub fn outcome_counts(result: &CrawlResult) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for outcome in &result.outcomes {
        *counts.entry(outcome.status.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `result` - The finished crawl to summarize
pub fn print_statistics(result: &CrawlResult) {
    let stats = &result.stats;

    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Pages crawled: {}", stats.pages_crawled);
    println!("  Detail pages: {}", stats.vdp_pages);
    println!("  Listing pages: {}", stats.srp_pages);
    println!("  Vehicles found: {}", stats.total_vehicles);
    println!("  Duration: {:.1}s", stats.duration_ms as f64 / 1000.0);
    println!();

    println!("Pages by Outcome:");
    // Sort outcomes by count (descending)
    let mut counts: Vec<_> = outcome_counts(result).into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let total = result.outcomes.len();
    for (status, count) in counts {
        let percentage = if total > 0 {
            (count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!();

    if !result.errors.is_empty() {
        println!("Failed Pages ({}):", result.errors.len());
        for failure in &result.errors {
            println!(
                "  - {} after {} attempt(s): {}",
                failure.url, failure.attempts, failure.error
            );
        }
        println!();
    }

    let vehicle_pages = result.count_status(PageStatus::Success)
        + result.count_status(PageStatus::Duplicate)
        + result.count_status(PageStatus::NoVehicleData);
    let yield_rate = if stats.vdp_pages > 0 {
        (stats.total_vehicles as f64 / stats.vdp_pages as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Vehicle Yield: {:.1}% ({} vehicles / {} detail pages, {} with a verdict)",
        yield_rate, stats.total_vehicles, stats.vdp_pages, vehicle_pages
    );
}
