//! Dealer-Crawler: a dealership inventory crawler
//!
//! This crate walks dealership websites starting from a seed URL, telling
//! search-results pages (SRPs) apart from vehicle-detail pages (VDPs), following
//! detail and pagination links from SRPs and extracting vehicle records from VDPs
//! until the page or vehicle budget runs out.

pub mod config;
pub mod crawler;
pub mod discovery;
pub mod extract;
pub mod output;
pub mod state;
pub mod url;

use std::fmt;
use thiserror::Error;

/// Main error type for crawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error for {url} ({kind}): {message}")]
    Network {
        url: String,
        kind: NetworkErrorKind,
        message: String,
    },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Browser render failed for {url}: {message}")]
    Render { url: String, message: String },

    #[error("Discovery failed for {url}: {message}")]
    Discovery { url: String, message: String },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::ItemState,
        to: state::ItemState,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrawlError {
    /// Returns true if the failure is transient and the item should be retried
    ///
    /// | Condition | Retryable |
    /// |-----------|-----------|
    /// | Connection reset/refused, timeout, DNS failure | yes |
    /// | HTTP 5xx, 429, 408 | yes |
    /// | Any other HTTP 4xx | no |
    /// | Render, discovery, config, parse errors | no |
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { kind, .. } => kind.is_transient(),
            Self::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Returns the HTTP status code attached to this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Returns true for HTTP statuses worth retrying (5xx, 429, 408)
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429 || status == 408
}

/// Network-level failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkErrorKind {
    /// The request or connection timed out
    Timeout,
    /// The remote host refused the connection
    ConnectionRefused,
    /// The connection was reset or aborted mid-request
    ConnectionReset,
    /// The host name could not be resolved
    Dns,
    /// Anything else reported by the transport (TLS, body decoding, ...)
    Other,
}

impl NetworkErrorKind {
    /// Returns true for the failure kinds that are expected to clear up on retry
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::ConnectionRefused => "connection refused",
            Self::ConnectionReset => "connection reset",
            Self::Dns => "dns failure",
            Self::Other => "transport error",
        };
        f.write_str(s)
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid CSS selector: {0}")]
    InvalidSelector(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlProgress, Crawler};
pub use discovery::{PageKind, UrlDiscoverer};
pub use extract::{JsonLdExtractor, VehicleExtractor, VehicleRecord};
pub use output::{CrawlResult, CrawlStats};
pub use url::canonicalize;

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> CrawlError {
        CrawlError::HttpStatus {
            url: "https://dealer.test/".to_string(),
            status,
        }
    }

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(http(500).is_retryable());
        assert!(http(503).is_retryable());
        assert!(http(429).is_retryable());
        assert!(http(408).is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        assert!(!http(404).is_retryable());
        assert!(!http(403).is_retryable());
        assert!(!http(400).is_retryable());
    }

    #[test]
    fn test_network_errors() {
        for kind in [
            NetworkErrorKind::Timeout,
            NetworkErrorKind::ConnectionRefused,
            NetworkErrorKind::ConnectionReset,
            NetworkErrorKind::Dns,
        ] {
            let err = CrawlError::Network {
                url: "https://dealer.test/".to_string(),
                kind,
                message: "boom".to_string(),
            };
            assert!(err.is_retryable(), "{kind} should be retryable");
        }

        let other = CrawlError::Network {
            url: "https://dealer.test/".to_string(),
            kind: NetworkErrorKind::Other,
            message: "bad certificate".to_string(),
        };
        assert!(!other.is_retryable());
    }

    #[test]
    fn test_render_errors_are_permanent() {
        let err = CrawlError::Render {
            url: "https://dealer.test/".to_string(),
            message: "browser crashed".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.status_code(), None);
        assert_eq!(http(404).status_code(), Some(404));
    }
}
