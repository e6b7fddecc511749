use super::UrlDiscoverer;
use crate::url::{canonicalize_url, resolve_link};
use scraper::{Html, Selector};
use serde::Serialize;
use std::collections::HashSet;
use url::Url;

/// Pagination links found on a listing page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Pagination {
    /// Target of the "next page" control, if any
    pub next_url: Option<String>,

    /// Every other listing page linked from this one, canonicalized, first-seen order
    pub all_pages: Vec<String>,
}

impl UrlDiscoverer {
    /// Finds links to vehicle detail pages
    ///
    /// Tries `detail_link_selectors` in order and uses only the first selector
    /// that yields at least one detail link. Links are resolved against `base_url`,
    /// filtered with `is_detail_link`, canonicalized and deduplicated in
    /// first-seen order.
    pub fn discover_detail_links(&self, document: &Html, base_url: &Url) -> Vec<String> {
        for selector in &self.detail_link_selectors {
            let mut seen = HashSet::new();
            let links: Vec<String> = document
                .select(selector)
                .filter_map(|element| element.value().attr("href"))
                .filter_map(|href| resolve_link(href, base_url))
                .filter(|url| self.is_detail_link(url))
                .map(|url| canonicalize_url(&url).to_string())
                .filter(|url| seen.insert(url.clone()))
                .collect();

            if !links.is_empty() {
                return links;
            }
        }

        Vec::new()
    }

    /// Returns true if the URL looks like a vehicle detail page
    ///
    /// Only the path and query are inspected so host names never match.
    pub fn is_detail_link(&self, url: &Url) -> bool {
        let target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        self.detail_path_patterns
            .iter()
            .any(|pattern| pattern.is_match(&target))
            || self.vin_pattern.is_match(&target)
    }

    /// Finds the next page link and every numbered page link
    pub fn discover_pagination(&self, document: &Html, base_url: &Url) -> Pagination {
        let next_url = self.find_next_page(document, base_url);

        let mut seen = HashSet::new();
        let mut all_pages = Vec::new();
        let mut push = |url: Url| {
            let canonical = canonicalize_url(&url).to_string();
            if seen.insert(canonical.clone()) {
                all_pages.push(canonical);
            }
        };

        for selector in &self.page_number_selectors {
            let found: Vec<Url> = hrefs(document, selector)
                .filter_map(|href| resolve_link(href, base_url))
                .collect();

            if !found.is_empty() {
                found.into_iter().for_each(&mut push);
                break;
            }
        }

        for href in hrefs(document, &self.anchors) {
            if self.pagination_patterns.iter().any(|p| p.is_match(href)) {
                if let Some(url) = resolve_link(href, base_url) {
                    push(url);
                }
            }
        }

        Pagination {
            next_url,
            all_pages,
        }
    }

    /// First usable href of the first "next" selector that has one
    ///
    /// Disabled controls (no href, or `#`) fall through to the next selector.
    fn find_next_page(&self, document: &Html, base_url: &Url) -> Option<String> {
        self.next_page_selectors
            .iter()
            .find_map(|selector| {
                hrefs(document, selector).find_map(|href| resolve_link(href, base_url))
            })
            .map(|url| canonicalize_url(&url).to_string())
    }
}

fn hrefs<'a>(document: &'a Html, selector: &'a Selector) -> impl Iterator<Item = &'a str> + 'a {
    document
        .select(selector)
        .filter_map(|element| element.value().attr("href"))
}
