use crate::config::types::{Config, CrawlerConfig, DiscoveryConfig, RenderConfig, SessionConfig};
use crate::ConfigError;
use regex::Regex;
use reqwest::header::{HeaderName, HeaderValue};
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_session_config(&config.session)?;
    validate_render_config(&config.render)?;
    validate_discovery_config(&config.discovery)?;
    Ok(())
}

/// Validates crawl limits
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(
            "max_pages must be >= 1".to_string(),
        ));
    }

    if config.max_vehicles < 1 {
        return Err(ConfigError::Validation(
            "max_vehicles must be >= 1".to_string(),
        ));
    }

    if config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 10, got {}",
            config.max_retries
        )));
    }

    Ok(())
}

/// Validates session identity settings
fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "session timeout_ms must be > 0".to_string(),
        ));
    }

    if let Some(user_agent) = &config.user_agent {
        if user_agent.trim().is_empty() {
            return Err(ConfigError::Validation(
                "user_agent cannot be empty".to_string(),
            ));
        }
    }

    for (name, value) in &config.headers {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ConfigError::Validation(format!("Invalid header name '{}': {}", name, e)))?;
        HeaderValue::from_str(value).map_err(|e| {
            ConfigError::Validation(format!("Invalid value for header '{}': {}", name, e))
        })?;
    }

    Ok(())
}

/// Validates the renderer endpoint and render policy patterns
fn validate_render_config(config: &RenderConfig) -> Result<(), ConfigError> {
    if let Some(endpoint) = &config.endpoint {
        let url = Url::parse(endpoint)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid render endpoint: {}", e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Render endpoint '{}' must use http or https",
                endpoint
            )));
        }
    }

    if let Some(selector) = &config.wait_for_selector_absent {
        validate_selector(selector)?;
    }

    validate_patterns(&config.url_patterns)?;
    validate_patterns(&config.html_markers)?;
    validate_patterns(&config.skeleton_markers)?;

    Ok(())
}

/// Validates selector waterfalls, patterns, and thresholds
fn validate_discovery_config(config: &DiscoveryConfig) -> Result<(), ConfigError> {
    if config.detail_link_selectors.is_empty() {
        return Err(ConfigError::Validation(
            "detail_link_selectors must contain at least one selector".to_string(),
        ));
    }

    for selector in config
        .detail_link_selectors
        .iter()
        .chain(&config.next_page_selectors)
        .chain(&config.page_number_selectors)
    {
        validate_selector(selector)?;
    }
    validate_selector(&config.vehicle_card_selector)?;
    validate_selector(&config.detail_link_count_selector)?;

    validate_patterns(&config.detail_path_patterns)?;
    validate_patterns(&config.pagination_patterns)?;
    validate_pattern(&config.vin_pattern)?;

    for (name, value) in [
        ("vdp_indicator_threshold", config.vdp_indicator_threshold),
        ("card_threshold", config.card_threshold),
        ("link_threshold", config.link_threshold),
    ] {
        if value < 1 {
            return Err(ConfigError::Validation(format!("{} must be >= 1", name)));
        }
    }

    Ok(())
}

fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    compile_selector(selector).map(|_| ())
}

fn validate_patterns(patterns: &[String]) -> Result<(), ConfigError> {
    patterns.iter().try_for_each(|p| validate_pattern(p))
}

fn validate_pattern(pattern: &str) -> Result<(), ConfigError> {
    compile_pattern(pattern).map(|_| ())
}

/// Parses a CSS selector, mapping failures to `ConfigError::InvalidSelector`
pub fn compile_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector)
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", selector, e)))
}

/// Compiles a regex, mapping failures to `ConfigError::InvalidPattern`
pub fn compile_pattern(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", pattern, e)))
}

/// Compiles every selector in a list, preserving order
pub fn compile_selectors(selectors: &[String]) -> Result<Vec<Selector>, ConfigError> {
    selectors.iter().map(|s| compile_selector(s)).collect()
}

/// Compiles every regex in a list, preserving order
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns.iter().map(|p| compile_pattern(p)).collect()
}
