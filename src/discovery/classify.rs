use super::structured::{find_typed_object, json_ld_values};
use super::{PageKind, UrlDiscoverer};
use scraper::Html;
use tracing::trace;
use url::Url;

impl UrlDiscoverer {
    /// Classifies a page as a vehicle detail page, a listing page, or neither
    ///
    /// # Decision order
    ///
    /// 1. Enough indicator phrases, or vehicle structured data on a page
    ///    with few vehicle cards: `Vdp`
    /// 2. Enough vehicle cards or detail links: `Srp`
    /// 3. Vehicle structured data at all: `Vdp`
    /// 4. Otherwise `Unknown`
    pub fn classify_page(&self, document: &Html, url: &Url) -> PageKind {
        let indicators = self.count_indicators(document);
        let cards = document.select(&self.vehicle_card_selector).count();
        let detail_links = document.select(&self.detail_link_count_selector).count();
        let structured = self.has_structured_vehicle(document);

        trace!(
            "Classifying {}: indicators={} cards={} detail_links={} structured={}",
            url,
            indicators,
            cards,
            detail_links,
            structured
        );

        if indicators >= self.vdp_indicator_threshold || (structured && cards < self.card_threshold)
        {
            return PageKind::Vdp;
        }

        if cards >= self.card_threshold || detail_links >= self.link_threshold {
            return PageKind::Srp;
        }

        if structured {
            return PageKind::Vdp;
        }

        PageKind::Unknown
    }

    /// Returns true if any JSON-LD block describes a vehicle
    pub fn has_structured_vehicle(&self, document: &Html) -> bool {
        json_ld_values(document, &self.json_ld)
            .iter()
            .any(|value| find_typed_object(value, &self.structured_data_types).is_some())
    }

    /// Counts the distinct indicator phrases present in the body text
    fn count_indicators(&self, document: &Html) -> usize {
        let text = document
            .select(&self.body)
            .flat_map(|body| body.text())
            .collect::<String>()
            .to_lowercase();

        self.vdp_indicators
            .iter()
            .filter(|phrase| text.contains(phrase.as_str()))
            .count()
    }
}
