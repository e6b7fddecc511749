//! Browser rendering: when to escalate and how
//!
//! `RenderPolicy` decides from a URL and (optionally) its raw HTML whether a
//! page only shows its inventory after client-side scripts run. Pages that do
//! are handed to a `PageRenderer`; `BrowserlessRenderer` drives a
//! Browserless-compatible `/content` endpoint.

use crate::config::{compile_pattern, compile_patterns, RenderConfig};
use crate::{ConfigResult, CrawlError, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Decides whether a page needs full browser rendering
#[derive(Debug)]
pub struct RenderPolicy {
    url_patterns: Vec<Regex>,
    html_markers: Vec<Regex>,
    skeleton_markers: Vec<Regex>,
    min_content_chars: usize,
    script_blocks: Regex,
    style_blocks: Regex,
}

impl RenderPolicy {
    /// Compiles the policy's patterns
    pub fn new(config: &RenderConfig) -> ConfigResult<Self> {
        Ok(Self {
            url_patterns: compile_patterns(&config.url_patterns)?,
            html_markers: compile_patterns(&config.html_markers)?,
            skeleton_markers: compile_patterns(&config.skeleton_markers)?,
            min_content_chars: config.min_content_chars,
            script_blocks: compile_pattern(r"(?is)<script[^>]*>.*?</script>")?,
            style_blocks: compile_pattern(r"(?is)<style[^>]*>.*?</style>")?,
        })
    }

    /// Returns true if the page should be fetched through a browser
    ///
    /// Checks, in order, stopping at the first hit:
    /// 1. the URL looks like a client-side app or uses hash routing
    /// 2. the HTML has an empty app root, a hydration payload, or a skeleton loader
    /// 3. the HTML without scripts, styles and whitespace is shorter than `min_content_chars`
    ///
    /// Without HTML only the URL check applies.
    pub fn needs_browser_rendering(&self, url: &str, html: Option<&str>) -> bool {
        if self.url_patterns.iter().any(|p| p.is_match(url)) {
            debug!("{} matches a client-side app URL pattern", url);
            return true;
        }

        let Some(html) = html else {
            return false;
        };

        if let Some(marker) = self.html_markers.iter().find(|p| p.is_match(html)) {
            debug!("{} contains framework marker {}", url, marker.as_str());
            return true;
        }

        if let Some(marker) = self.skeleton_markers.iter().find(|p| p.is_match(html)) {
            debug!("{} contains skeleton marker {}", url, marker.as_str());
            return true;
        }

        let content_chars = self.content_length(html);
        if content_chars < self.min_content_chars {
            debug!("{} has only {} content characters", url, content_chars);
            return true;
        }

        false
    }

    /// Length of the HTML once script and style blocks and all whitespace are removed
    fn content_length(&self, html: &str) -> usize {
        let without_scripts = self.script_blocks.replace_all(html, "");
        let without_styles = self.style_blocks.replace_all(&without_scripts, "");
        without_styles.chars().filter(|c| !c.is_whitespace()).count()
    }
}

/// How a renderer should load a page
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Extra headers sent with the page request
    pub headers: BTreeMap<String, String>,

    /// Navigation timeout
    pub timeout: Duration,

    /// Time to let scripts populate the page after the DOM is ready
    pub settle: Duration,

    /// Wait until nothing matches this selector (best effort)
    pub wait_for_selector_absent: Option<String>,

    /// Upper bound on the `wait_for_selector_absent` wait
    pub selector_timeout: Duration,
}

impl RenderOptions {
    /// Builds options from configuration plus the session's headers
    pub fn from_config(config: &RenderConfig, headers: BTreeMap<String, String>) -> Self {
        Self {
            headers,
            timeout: Duration::from_millis(config.timeout_ms),
            settle: Duration::from_millis(config.settle_ms),
            wait_for_selector_absent: config.wait_for_selector_absent.clone(),
            selector_timeout: Duration::from_millis(config.skeleton_timeout_ms),
        }
    }
}

/// HTML captured by a browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub html: String,
    /// Status of the main document response
    pub status: u16,
}

/// Loads a page in a real browser and returns the resulting DOM
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &Url, options: &RenderOptions) -> Result<RenderedPage>;
}

/// Renders pages through a Browserless-compatible `/content` endpoint
pub struct BrowserlessRenderer {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentRequest<'a> {
    url: &'a str,
    goto_options: GotoOptions,
    wait_for_timeout: u64,
    #[serde(skip_serializing_if = "no_headers")]
    set_extra_http_headers: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for_function: Option<WaitForFunction>,
    best_attempt: bool,
}

fn no_headers(headers: &&BTreeMap<String, String>) -> bool {
    headers.is_empty()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GotoOptions {
    wait_until: &'static str,
    timeout: u64,
}

#[derive(Debug, Serialize)]
struct WaitForFunction {
    #[serde(rename = "fn")]
    function: String,
    timeout: u64,
}

/// Header carrying the status of the rendered document
const RESPONSE_CODE_HEADER: &str = "x-response-code";

impl BrowserlessRenderer {
    /// Creates a renderer for the service at `base_url`
    ///
    /// `request_timeout` bounds the whole render call, waits included.
    pub fn new(base_url: &str, token: Option<&str>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    /// Creates a renderer from the `[render]` section, if an endpoint is configured
    pub fn from_config(config: &RenderConfig) -> Result<Option<Self>> {
        let Some(endpoint) = &config.endpoint else {
            return Ok(None);
        };

        // Navigation, settle time and selector wait all happen inside one call
        let budget = config.timeout_ms + config.settle_ms + config.skeleton_timeout_ms + 10_000;
        Self::new(endpoint, config.token.as_deref(), Duration::from_millis(budget)).map(Some)
    }

    fn content_endpoint(&self) -> String {
        match &self.token {
            Some(token) => format!("{}/content?token={}", self.base_url, token),
            None => format!("{}/content", self.base_url),
        }
    }
}

#[async_trait]
impl PageRenderer for BrowserlessRenderer {
    async fn render(&self, url: &Url, options: &RenderOptions) -> Result<RenderedPage> {
        let render_error = |message: String| CrawlError::Render {
            url: url.to_string(),
            message,
        };

        let wait_for_function = options.wait_for_selector_absent.as_ref().map(|selector| {
            WaitForFunction {
                function: skeleton_wait_script(selector),
                timeout: options.selector_timeout.as_millis() as u64,
            }
        });

        let request = ContentRequest {
            url: url.as_str(),
            goto_options: GotoOptions {
                wait_until: "domcontentloaded",
                timeout: options.timeout.as_millis() as u64,
            },
            wait_for_timeout: options.settle.as_millis() as u64,
            set_extra_http_headers: &options.headers,
            wait_for_function,
            best_attempt: true,
        };

        debug!("Rendering {} via {}", url, self.base_url);
        let response = self
            .client
            .post(self.content_endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| render_error(e.to_string()))?;

        let service_status = response.status();
        if !service_status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("Renderer returned {} for {}", service_status, url);
            return Err(render_error(format!(
                "renderer returned {}: {}",
                service_status.as_u16(),
                message
            )));
        }

        let status = response
            .headers()
            .get(RESPONSE_CODE_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u16>().ok())
            .unwrap_or(200);

        let html = response
            .text()
            .await
            .map_err(|e| render_error(e.to_string()))?;

        Ok(RenderedPage { html, status })
    }
}

/// Page function that resolves once no element matches `selector`,
/// or the page already carries a lot of text
fn skeleton_wait_script(selector: &str) -> String {
    let quoted = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "() => document.querySelectorAll({}).length === 0 || document.body.textContent.length > 5000",
        quoted
    )
}
