use crate::{UrlError, UrlResult};
use url::Url;

/// Canonicalizes a URL string for deduplication
///
/// # Canonicalization Steps
///
/// 1. Parse the URL; unparseable input is returned unchanged
/// 2. Remove the fragment (everything after #)
/// 3. Sort query parameters by key (stable, so repeated keys keep their order)
/// 4. Remove an empty query string (trailing ?)
///
/// The result is idempotent: canonicalizing a canonical URL returns it as-is.
///
/// # Examples
///
/// ```
/// use dealer_crawler::url::canonicalize;
///
/// assert_eq!(
///     canonicalize("https://dealer.example.com/used?make=ford&body=truck#photos"),
///     "https://dealer.example.com/used?body=truck&make=ford"
/// );
/// ```
pub fn canonicalize(url_str: &str) -> String {
    match Url::parse(url_str) {
        Ok(url) => canonicalize_url(&url).into(),
        Err(_) => url_str.to_string(),
    }
}

/// Canonicalizes an already-parsed URL
pub fn canonicalize_url(url: &Url) -> Url {
    let mut url = url.clone();

    url.set_fragment(None);

    if url.query().is_some() {
        let params = sorted_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    url
}

/// Parses a URL, requiring an http or https scheme, and canonicalizes it
pub fn parse_canonical(url_str: &str) -> UrlResult<Url> {
    let url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().is_none() {
        return Err(UrlError::Malformed(format!("Missing host in {}", url_str)));
    }

    Ok(canonicalize_url(&url))
}

/// Returns the query parameters sorted by key
fn sorted_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort_by(|a, b| a.0.cmp(&b.0));

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_fragment() {
        assert_eq!(
            canonicalize("https://dealer.test/vehicle/1#photos"),
            "https://dealer.test/vehicle/1"
        );
    }

    #[test]
    fn test_sort_query_params() {
        assert_eq!(
            canonicalize("https://x/a?b=2&a=1"),
            canonicalize("https://x/a?a=1&b=2#frag")
        );
        assert_eq!(canonicalize("https://x/a?b=2&a=1"), "https://x/a?a=1&b=2");
    }

    #[test]
    fn test_repeated_keys_keep_relative_order() {
        assert_eq!(
            canonicalize("https://dealer.test/used?make=ford&year=2020&make=ram"),
            "https://dealer.test/used?make=ford&make=ram&year=2020"
        );
    }

    #[test]
    fn test_empty_query_removed() {
        assert_eq!(canonicalize("https://dealer.test/used?"), "https://dealer.test/used");
    }

    #[test]
    fn test_path_untouched() {
        assert_eq!(
            canonicalize("https://dealer.test/Inventory/Used/"),
            "https://dealer.test/Inventory/Used/"
        );
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "https://dealer.test/used?make=ford&body=truck#top",
            "https://dealer.test/search?q=f+150&page=2",
            "https://dealer.test/search?q=a%20b&z=%2F",
            "https://dealer.test/?",
            "https://dealer.test",
            "http://dealer.test:8080/vehicle/1HGCM82633A004352",
            "not a url",
        ];

        for input in inputs {
            let once = canonicalize(input);
            let twice = canonicalize(&once);
            assert_eq!(once, twice, "not idempotent for {}", input);
        }
    }

    #[test]
    fn test_unparseable_returned_unchanged() {
        assert_eq!(canonicalize("/relative/path"), "/relative/path");
    }

    #[test]
    fn test_parse_canonical() {
        let url = parse_canonical(" https://dealer.test/used?b=1&a=2#x ").unwrap();
        assert_eq!(url.as_str(), "https://dealer.test/used?a=2&b=1");

        assert!(matches!(
            parse_canonical("ftp://dealer.test/file"),
            Err(UrlError::InvalidScheme(_))
        ));
        assert!(matches!(parse_canonical("not a url"), Err(UrlError::Parse(_))));
    }
}
