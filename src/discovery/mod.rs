//! Page classification and link discovery
//!
//! The `UrlDiscoverer` works on an already-parsed `scraper::Html` document:
//! - `classify_page` decides whether a page lists vehicles (SRP) or describes one (VDP)
//! - `discover_detail_links` finds links to vehicle detail pages
//! - `discover_pagination` finds the next page and any numbered pages
//!
//! Every selector, pattern and threshold comes from `DiscoveryConfig` and is
//! compiled once in `UrlDiscoverer::new`.

mod classify;
mod links;
mod structured;

use crate::config::{
    compile_pattern, compile_patterns, compile_selector, compile_selectors, DiscoveryConfig,
};
use crate::ConfigResult;
use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use links::Pagination;
pub use structured::{find_typed_object, json_ld_values};

/// The role a page plays in a dealership site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    /// Vehicle detail page
    Vdp,
    /// Search results (listing) page
    Srp,
    #[default]
    Unknown,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vdp => "vdp",
            Self::Srp => "srp",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies dealership pages and extracts the links worth following
///
/// Holds no per-page state; a single instance is shared by every worker of a crawl.
#[derive(Debug)]
pub struct UrlDiscoverer {
    detail_link_selectors: Vec<Selector>,
    next_page_selectors: Vec<Selector>,
    page_number_selectors: Vec<Selector>,
    detail_path_patterns: Vec<Regex>,
    vin_pattern: Regex,
    pagination_patterns: Vec<Regex>,
    vdp_indicators: Vec<String>,
    vehicle_card_selector: Selector,
    detail_link_count_selector: Selector,
    structured_data_types: Vec<String>,
    vdp_indicator_threshold: usize,
    card_threshold: usize,
    link_threshold: usize,
    body: Selector,
    anchors: Selector,
    json_ld: Selector,
}

impl UrlDiscoverer {
    /// Compiles the discovery configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidSelector` or `ConfigError::InvalidPattern`
    /// for the first entry that fails to compile.
    pub fn new(config: &DiscoveryConfig) -> ConfigResult<Self> {
        Ok(Self {
            detail_link_selectors: compile_selectors(&config.detail_link_selectors)?,
            next_page_selectors: compile_selectors(&config.next_page_selectors)?,
            page_number_selectors: compile_selectors(&config.page_number_selectors)?,
            detail_path_patterns: compile_patterns(&config.detail_path_patterns)?,
            vin_pattern: compile_pattern(&config.vin_pattern)?,
            pagination_patterns: compile_patterns(&config.pagination_patterns)?,
            vdp_indicators: config
                .vdp_indicators
                .iter()
                .map(|phrase| phrase.to_lowercase())
                .collect(),
            vehicle_card_selector: compile_selector(&config.vehicle_card_selector)?,
            detail_link_count_selector: compile_selector(&config.detail_link_count_selector)?,
            structured_data_types: config.structured_data_types.clone(),
            vdp_indicator_threshold: config.vdp_indicator_threshold,
            card_threshold: config.card_threshold,
            link_threshold: config.link_threshold,
            body: compile_selector("body")?,
            anchors: compile_selector("a[href]")?,
            json_ld: compile_selector(r#"script[type="application/ld+json"]"#)?,
        })
    }
}
