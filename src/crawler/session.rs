//! HTTP session with a persistent cookie jar
//!
//! A `Session` makes a crawl look like one continuous browsing session:
//! - browser-like default headers, overridable per session and per request
//! - cookies collected from every `Set-Cookie` header and replayed on later requests
//! - bounded redirect following
//! - network failures classified into `NetworkErrorKind`
//!
//! Non-2xx responses are returned as normal responses; deciding what a status
//! means is left to the caller.

use crate::config::SessionConfig;
use crate::{CrawlError, NetworkErrorKind, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, SET_COOKIE};
use reqwest::{redirect::Policy, Client};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

/// User agent sent when none is configured
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Pool used by `Session::rotate_user_agent`
pub const USER_AGENTS: [&str; 4] = [
    DEFAULT_USER_AGENT,
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// Headers every request carries unless the session or request overrides them
const FALLBACK_HEADERS: [(&str, &str); 4] = [
    ("User-Agent", DEFAULT_USER_AGENT),
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    ),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Upgrade-Insecure-Requests", "1"),
];

/// Per-request overrides
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Headers that take precedence over the session's headers
    pub headers: BTreeMap<String, String>,

    /// Timeout for this request instead of the session's
    pub timeout: Option<Duration>,
}

/// A fully read HTTP response
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
    /// URL after following redirects
    pub final_url: String,
}

impl Response {
    /// Returns true for 2xx statuses
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// An HTTP identity shared by every fetch of one crawl
pub struct Session {
    client: Client,
    headers: Mutex<BTreeMap<String, String>>,
    cookies: Mutex<BTreeMap<String, String>>,
}

impl Session {
    /// Builds a session from configuration
    ///
    /// # Errors
    ///
    /// Returns `CrawlError::Reqwest` if the HTTP client cannot be built.
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(Policy::limited(config.max_redirects))
            .gzip(true)
            .brotli(true)
            .build()?;

        let mut headers = config.headers.clone();
        if let Some(user_agent) = &config.user_agent {
            headers.retain(|name, _| !name.eq_ignore_ascii_case("user-agent"));
            headers.insert("User-Agent".to_string(), user_agent.clone());
        }

        Ok(Self {
            client,
            headers: Mutex::new(headers),
            cookies: Mutex::new(BTreeMap::new()),
        })
    }

    /// Sends a GET request with the session's headers and cookies
    ///
    /// Cookies set by the response are stored before returning. The body is
    /// read fully; a failure while reading it is reported as a network error.
    ///
    /// # Errors
    ///
    /// Returns `CrawlError::Network` for transport failures and
    /// `CrawlError::InvalidHeader` for header names or values that are not valid HTTP.
    pub async fn request(&self, url: &str, options: &RequestOptions) -> Result<Response> {
        let headers = self.build_headers(&options.headers)?;

        let mut builder = self.client.get(url).headers(headers);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        trace!("GET {}", url);
        let response = builder
            .send()
            .await
            .map_err(|e| classify_error(url, &e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response.headers().clone();

        self.store_cookies(
            headers
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok()),
        );

        let body = response
            .text()
            .await
            .map_err(|e| classify_error(url, &e))?;

        debug!("{} {} ({} bytes)", status, final_url, body.len());

        Ok(Response {
            status,
            headers,
            body,
            final_url,
        })
    }

    /// Merges headers into the session's defaults
    pub fn set_headers<I, K, V>(&self, headers: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut current = lock(&self.headers);
        for (name, value) in headers {
            let name = name.into();
            current.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
            current.insert(name, value.into());
        }
    }

    /// Returns the session's effective headers, fallbacks included, as name/value pairs
    pub fn headers(&self) -> BTreeMap<String, String> {
        let mut merged: BTreeMap<String, String> = FALLBACK_HEADERS
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        for (name, value) in lock(&self.headers).iter() {
            merged.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
            merged.insert(name.clone(), value.clone());
        }
        merged
    }

    /// Stores a cookie, replacing any cookie with the same name
    pub fn set_cookie(&self, name: &str, value: &str) {
        lock(&self.cookies).insert(name.to_string(), value.to_string());
    }

    /// Returns the value of a stored cookie
    pub fn cookie(&self, name: &str) -> Option<String> {
        lock(&self.cookies).get(name).cloned()
    }

    /// Removes every stored cookie
    pub fn clear_cookies(&self) {
        lock(&self.cookies).clear();
    }

    /// Returns the number of stored cookies
    pub fn cookie_count(&self) -> usize {
        lock(&self.cookies).len()
    }

    /// Formats the jar as a `Cookie` header value, sorted by name
    ///
    /// Returns None when the jar is empty.
    pub fn cookie_header(&self) -> Option<String> {
        let cookies = lock(&self.cookies);
        if cookies.is_empty() {
            return None;
        }

        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Switches to a random user agent from `USER_AGENTS`
    pub fn rotate_user_agent(&self) -> &'static str {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(DEFAULT_USER_AGENT);
        self.set_headers([("User-Agent", user_agent)]);
        user_agent
    }

    /// Applies a batch of `Set-Cookie` header values to the jar
    pub fn store_cookies<'a, I>(&self, set_cookie_headers: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let now = Utc::now();
        let mut cookies = lock(&self.cookies);

        for header in set_cookie_headers {
            match parse_set_cookie(header, now) {
                Some(SetCookie::Store { name, value }) => {
                    trace!("Storing cookie {}", name);
                    cookies.insert(name, value);
                }
                Some(SetCookie::Remove { name }) => {
                    trace!("Removing expired cookie {}", name);
                    cookies.remove(&name);
                }
                None => {}
            }
        }
    }

    /// Builds the header map: request headers over session headers over fallbacks
    fn build_headers(&self, request_headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();

        for (name, value) in FALLBACK_HEADERS {
            insert_header(&mut map, name, value)?;
        }
        for (name, value) in lock(&self.headers).iter() {
            insert_header(&mut map, name, value)?;
        }
        for (name, value) in request_headers {
            insert_header(&mut map, name, value)?;
        }

        if let Some(cookie_header) = self.cookie_header() {
            let value = HeaderValue::from_str(&cookie_header).map_err(|e| CrawlError::InvalidHeader {
                name: COOKIE.to_string(),
                message: e.to_string(),
            })?;
            map.insert(COOKIE, value);
        }

        Ok(map)
    }
}

fn insert_header(map: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let invalid = |message: String| CrawlError::InvalidHeader {
        name: name.to_string(),
        message,
    };

    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
    map.insert(header_name, header_value);
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a single `Set-Cookie` header asks the jar to do
#[derive(Debug, Clone, PartialEq, Eq)]
enum SetCookie {
    Store { name: String, value: String },
    Remove { name: String },
}

/// Parses `name=value; attr; attr=value`
///
/// An `Expires` date in the past, or a `Max-Age` of zero or less, turns the
/// header into a removal. Unparseable dates are ignored.
fn parse_set_cookie(header: &str, now: DateTime<Utc>) -> Option<SetCookie> {
    let mut parts = header.split(';').map(str::trim);
    let pair = parts.next()?;
    let (name, value) = match pair.split_once('=') {
        Some((name, value)) => (name.trim(), value.trim()),
        None => (pair, ""),
    };

    if name.is_empty() {
        return None;
    }

    let mut expired = false;
    for attribute in parts {
        let (key, attr_value) = attribute.split_once('=').unwrap_or((attribute, ""));
        let attr_value = attr_value.trim();

        if key.trim().eq_ignore_ascii_case("expires") {
            if let Some(expires) = parse_cookie_date(attr_value) {
                expired |= expires < now;
            }
        } else if key.trim().eq_ignore_ascii_case("max-age") {
            if let Ok(max_age) = attr_value.parse::<i64>() {
                expired |= max_age <= 0;
            }
        }
    }

    let name = name.to_string();
    if expired {
        Some(SetCookie::Remove { name })
    } else {
        Some(SetCookie::Store {
            name,
            value: value.to_string(),
        })
    }
}

/// Parses RFC 1123 dates and the older `Wdy, DD-Mon-YYYY HH:MM:SS GMT` form
fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%a, %d-%b-%Y %H:%M:%S GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Maps a reqwest failure onto `CrawlError::Network`
fn classify_error(url: &str, error: &reqwest::Error) -> CrawlError {
    CrawlError::Network {
        url: url.to_string(),
        kind: network_error_kind(error),
        message: error.to_string(),
    }
}

fn network_error_kind(error: &reqwest::Error) -> NetworkErrorKind {
    if error.is_timeout() {
        return NetworkErrorKind::Timeout;
    }

    // Walk the source chain for the underlying I/O error
    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(cause) = source {
        if let Some(io_error) = cause.downcast_ref::<std::io::Error>() {
            match io_error.kind() {
                std::io::ErrorKind::TimedOut => return NetworkErrorKind::Timeout,
                std::io::ErrorKind::ConnectionRefused => return NetworkErrorKind::ConnectionRefused,
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof => return NetworkErrorKind::ConnectionReset,
                _ => {}
            }
        }

        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return NetworkErrorKind::Dns;
        }

        source = cause.source();
    }

    if error.is_connect() {
        NetworkErrorKind::ConnectionRefused
    } else {
        NetworkErrorKind::Other
    }
}
