use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Main configuration structure for a crawl
///
/// Every section is optional in the TOML file; missing sections and keys fall
/// back to the defaults below.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub session: SessionConfig,
    pub render: RenderConfig,
    pub discovery: DiscoveryConfig,
    pub output: OutputConfig,
}

/// Crawl limits and queue behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Maximum number of pages fetched in one crawl
    pub max_pages: u32,

    /// Maximum number of distinct vehicles (by VIN) kept in one crawl
    pub max_vehicles: u32,

    /// Maximum number of items processed concurrently
    pub concurrency: u32,

    /// Minimum time between dispatch batches (milliseconds)
    pub rate_limit_ms: u64,

    /// Maximum number of retries for a transient failure
    pub max_retries: u32,

    /// Base delay for exponential retry backoff (milliseconds)
    pub retry_delay_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_pages: 50,
            max_vehicles: 500,
            concurrency: 3,
            rate_limit_ms: 1500,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// HTTP identity used for every request of a crawl run
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SessionConfig {
    /// User-Agent override; a desktop browser string is used when unset
    pub user_agent: Option<String>,

    /// Per-request timeout (milliseconds)
    pub timeout_ms: u64,

    /// Maximum number of redirects followed per request
    pub max_redirects: usize,

    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_ms: 30_000,
            max_redirects: 5,
            headers: BTreeMap::new(),
        }
    }
}

/// When to hand a page to the browser renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Render only when the render policy says the page needs it
    #[default]
    Auto,
    /// Render every page
    Always,
    /// Never render, even if a renderer is configured
    Never,
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "unknown render mode '{}', expected auto, always or never",
                other
            )),
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Always => "always",
            Self::Never => "never",
        };
        f.write_str(s)
    }
}

/// Browser rendering policy and renderer endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RenderConfig {
    pub mode: RenderMode,

    /// Base URL of a Browserless-compatible service; rendering is disabled when unset
    pub endpoint: Option<String>,

    /// API token for the rendering service
    pub token: Option<String>,

    /// Navigation timeout for a rendered page (milliseconds)
    pub timeout_ms: u64,

    /// Time to let client-side scripts populate the page after load (milliseconds)
    pub settle_ms: u64,

    /// Selector whose matches must disappear before the page is captured
    pub wait_for_selector_absent: Option<String>,

    /// How long to wait for `wait_for_selector_absent` (milliseconds)
    pub skeleton_timeout_ms: u64,

    /// Pages with fewer visible characters than this are treated as script-only shells
    pub min_content_chars: usize,

    /// URL regexes that indicate a client-side app
    pub url_patterns: Vec<String>,

    /// HTML regexes for empty app roots and hydration payloads
    pub html_markers: Vec<String>,

    /// HTML regexes for skeleton loaders and inventory widget bundles
    pub skeleton_markers: Vec<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            mode: RenderMode::Auto,
            endpoint: None,
            token: None,
            timeout_ms: 30_000,
            settle_ms: 15_000,
            wait_for_selector_absent: Some(r#".skeleton, [class*="skeleton"]"#.to_string()),
            skeleton_timeout_ms: 5_000,
            min_content_chars: 500,
            url_patterns: strings(&[
                r"(?i)react|angular|vue|next\.js|nuxt\.js",
                r"(?i)app\.|spa\.|client-side",
                r"#/|#!",
            ]),
            html_markers: strings(&[
                r#"(?i)<div id="root"></div>"#,
                r#"(?i)<div id="app"></div>"#,
                r"(?i)<div\s+ng-app",
                r"(?i)data-reactroot",
                r"(?i)__NEXT_DATA__",
                r"(?i)window\.__NUXT__",
            ]),
            skeleton_markers: strings(&[
                r"(?i)skeleton",
                r"(?i)WasabiBundle",
                r"(?i)dealeron\.js",
                r"(?i)dlron\.us",
                r"(?i)wasabi",
            ]),
        }
    }
}

/// Heuristics used to classify pages and discover links
///
/// Selector lists are waterfalls: they are tried in order and the first one
/// that matches anything wins.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DiscoveryConfig {
    /// Selectors that commonly wrap links to vehicle detail pages
    pub detail_link_selectors: Vec<String>,

    /// Selectors for the "next page" control
    pub next_page_selectors: Vec<String>,

    /// Selectors for numbered page links
    pub page_number_selectors: Vec<String>,

    /// URL regexes identifying detail pages
    pub detail_path_patterns: Vec<String>,

    /// Regex for a VIN-shaped token inside a URL
    pub vin_pattern: String,

    /// URL regexes identifying paginated listing links
    pub pagination_patterns: Vec<String>,

    /// Lowercase phrases whose presence in body text suggests a detail page
    pub vdp_indicators: Vec<String>,

    /// Selector counting vehicle cards on a listing page
    pub vehicle_card_selector: String,

    /// Selector counting links that look like detail links
    pub detail_link_count_selector: String,

    /// JSON-LD `@type` values that describe a single vehicle
    pub structured_data_types: Vec<String>,

    /// Indicator phrases needed to call a page a detail page outright
    pub vdp_indicator_threshold: usize,

    /// Vehicle cards needed to call a page a listing page
    pub card_threshold: usize,

    /// Detail links needed to call a page a listing page
    pub link_threshold: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            detail_link_selectors: strings(&[
                r#"a[href*="/vehicle/"]"#,
                r#"a[href*="/vin/"]"#,
                r#"a[href*="/inventory/"]"#,
                r#"a[href*="/details/"]"#,
                r#"a[href*="/car/"]"#,
                "a.vehicle-link",
                "a.detail-link",
                "a.inventory-item",
                r#"a[class*="vehicle"]"#,
                r#"a[class*="detail"]"#,
                r#"a[class*="listing"]"#,
            ]),
            next_page_selectors: strings(&[
                "a.next",
                "a.pagination-next",
                r#"a[rel="next"]"#,
                r#"a[class*="next"]"#,
                r#"[aria-label="next"]"#,
            ]),
            page_number_selectors: strings(&[
                ".page-link",
                ".pagination a",
                ".pagination-link",
                r#"a[class*="page"]"#,
                r#"[class*="pagination"] a"#,
            ]),
            detail_path_patterns: strings(&[
                r"(?i)/vehicle/?",
                r"(?i)/vin/?",
                r"(?i)/inventory/[^/]+",
                r"(?i)/details/?",
                r"(?i)/car/?",
                r"(?i)/vehicle-details/?",
                r"(?i)/stock/?",
                r"(?i)/item/?",
            ]),
            vin_pattern: r"(?i)[A-HJ-NPR-Z0-9]{17}".to_string(),
            pagination_patterns: strings(&[
                r"(?i)\?page=(\d+)",
                r"(?i)/page/(\d+)",
                r"(?i)/p/(\d+)",
                r"(?i)/page-(\d+)",
            ]),
            vdp_indicators: strings(&[
                "vin",
                "vehicle identification number",
                "stock number",
                "vehicle details",
            ]),
            vehicle_card_selector: r#".vehicle, .car-card, .inventory-item, .vehicle-item, [class*="vehicle"], [class*="inventory"], [class*="listing"]"#.to_string(),
            detail_link_count_selector: r#"a[href*="/vehicle/"], a[href*="/vin/"], a[href*="/details/"], a[href*="/car/"]"#.to_string(),
            structured_data_types: strings(&["Car", "Vehicle"]),
            vdp_indicator_threshold: 3,
            card_threshold: 3,
            link_threshold: 3,
        }
    }
}

/// Where crawl results are written by the command-line tool
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path of the JSON results file; results are only summarized when unset
    pub results_path: Option<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
