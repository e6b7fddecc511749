//! Vehicle record extraction
//!
//! The crawler hands every vehicle detail page to a `VehicleExtractor`.
//! `JsonLdExtractor` is the built-in implementation; site-specific extractors
//! can be injected through `Crawler::new`.

mod jsonld;

use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

pub use jsonld::JsonLdExtractor;

/// A vehicle extracted from a detail page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    /// 17-character vehicle identification number, uppercase
    pub vin: String,

    /// URL of the page the vehicle was extracted from
    pub url: String,

    /// Name of the crawl source, stamped by the crawler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Extractor-specific fields, passed through unmodified
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl VehicleRecord {
    /// Creates a record with no extra fields
    pub fn new(vin: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            vin: vin.into(),
            url: url.into(),
            source: None,
            fields: Map::new(),
        }
    }

    /// Adds a field, returning the record for chaining
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }
}

/// Extracts a vehicle record from a parsed detail page
///
/// Implementations must be cheap to share across tasks; they are called from
/// synchronous code and must not block on I/O.
pub trait VehicleExtractor: Send + Sync {
    /// Returns the vehicle described by `document`, or None if the page has no usable data
    fn extract_vehicle(&self, document: &Html, url: &Url) -> Option<VehicleRecord>;
}

/// Normalizes a VIN candidate, returning None unless it has exactly 17 characters
pub fn normalize_vin(raw: &str) -> Option<String> {
    let vin = raw.trim().to_ascii_uppercase();
    if vin.len() == 17 && vin.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(vin)
    } else {
        None
    }
}
