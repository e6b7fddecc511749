//! Integration tests for the crawler
//!
//! These tests use wiremock to stand up a fake dealership site and run
//! the full crawl cycle end-to-end.

use dealer_crawler::config::{Config, RenderMode};
use dealer_crawler::crawler::{CrawlProgress, Crawler};
use dealer_crawler::output::{write_results, PageStatus, SkipReason};
use dealer_crawler::JsonLdExtractor;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VIN_A: &str = "1HGCM82633A004352";
const VIN_B: &str = "1FTEW1EP5KFA12345";
const VIN_C: &str = "2T1BURHE0JC012345";

/// Creates a fast test configuration with plain HTTP fetching only
fn test_config(max_pages: u32, max_vehicles: u32) -> Config {
    let mut config = Config::default();
    config.crawler.max_pages = max_pages;
    config.crawler.max_vehicles = max_vehicles;
    config.crawler.concurrency = 2;
    config.crawler.rate_limit_ms = 0;
    config.crawler.max_retries = 2;
    config.crawler.retry_delay_ms = 10;
    config.session.timeout_ms = 5_000;
    config.render.mode = RenderMode::Never;
    config
}

fn crawler(config: &Config) -> Crawler {
    Crawler::new(config, Arc::new(JsonLdExtractor::default())).expect("Failed to create crawler")
}

/// Listing page linking to the given detail paths, plus an optional next page
fn listing_page(detail_paths: &[&str], next: Option<&str>) -> String {
    let links: String = detail_paths
        .iter()
        .map(|p| format!(r#"<li><a href="{}">Pre-owned sedan</a></li>"#, p))
        .collect();
    let next = next
        .map(|href| format!(r#"<a class="next" href="{}">Next</a>"#, href))
        .unwrap_or_default();

    format!(
        r#"<html><head><title>Used Cars</title></head><body>
        <h1>Used Cars</h1><ul>{}</ul>{}</body></html>"#,
        links, next
    )
}

/// Detail page carrying schema.org Car data
fn detail_page(vin: &str, model: &str) -> String {
    format!(
        r#"<html><head><title>{model}</title>
        <script type="application/ld+json">
        {{"@context": "https://schema.org", "@type": "Car",
          "vehicleIdentificationNumber": "{vin}",
          "manufacturer": {{"name": "Honda"}}, "model": "{model}",
          "vehicleModelDate": "2021",
          "offers": {{"@type": "Offer", "price": 21500}}}}
        </script></head>
        <body><h1>2021 Honda {model}</h1><p>Call us today.</p></body></html>"#
    )
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("content-type", "text/html")
}

async fn mount_page(server: &MockServer, page_path: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(html(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_listing_with_five_vehicles_and_next_page() {
    let server = MockServer::start().await;

    let details: Vec<String> = (1..=5).map(|n| format!("/vehicle/{}", n)).collect();
    let detail_refs: Vec<&str> = details.iter().map(String::as_str).collect();

    // Page 2 is matched by query first so the seed mock does not shadow it
    Mock::given(method("GET"))
        .and(path("/used-inventory"))
        .and(query_param("page", "2"))
        .respond_with(html(
            "<html><body><h1>Used Cars</h1><p>No more results.</p></body></html>".to_string(),
        ))
        .expect(1)
        .mount(&server)
        .await;
    mount_page(
        &server,
        "/used-inventory",
        listing_page(&detail_refs, Some("/used-inventory?page=2")),
    )
    .await;
    for n in 1..=5 {
        let vin = format!("1HGCM82633A00{:04}", n);
        Mock::given(method("GET"))
            .and(path(format!("/vehicle/{}", n)))
            .respond_with(html(detail_page(&vin, "Accord")))
            .expect(1)
            .mount(&server)
            .await;
    }

    let config = test_config(10, 100);
    let start = format!("{}/used-inventory", server.uri());
    let result = crawler(&config)
        .crawl(&start, "Main Street Motors")
        .await
        .expect("Crawl failed");

    assert_eq!(result.vehicles.len(), 5);
    assert_eq!(result.stats.pages_crawled, 7);
    assert_eq!(result.stats.vdp_pages, 5);
    assert_eq!(result.stats.srp_pages, 1);
    assert_eq!(result.stats.total_vehicles, 5);
    assert!(result.errors.is_empty());
    assert_eq!(result.count_status(PageStatus::Success), 6);
    assert_eq!(result.count_status(PageStatus::UnknownType), 1);

    for vehicle in &result.vehicles {
        assert_eq!(vehicle.source.as_deref(), Some("Main Street Motors"));
        assert_eq!(vehicle.fields["make"], "Honda");
        assert!(vehicle.url.contains("/vehicle/"));
    }

    let seed = result
        .outcomes
        .iter()
        .find(|o| o.url.ends_with("/used-inventory"))
        .expect("Seed outcome missing");
    assert_eq!(seed.links_added, 6);
}

#[tokio::test]
async fn test_page_budget_limits_enqueued_links() {
    let server = MockServer::start().await;

    let details: Vec<String> = (1..=5).map(|n| format!("/vehicle/{}", n)).collect();
    let detail_refs: Vec<&str> = details.iter().map(String::as_str).collect();
    mount_page(
        &server,
        "/used-inventory",
        listing_page(&detail_refs, Some("/used-inventory?page=2")),
    )
    .await;
    for n in 1..=5 {
        let vin = format!("1HGCM82633A00{:04}", n);
        mount_page(&server, &format!("/vehicle/{}", n), detail_page(&vin, "Civic")).await;
    }

    let config = test_config(3, 100);
    let start = format!("{}/used-inventory", server.uri());
    let result = crawler(&config).crawl(&start, "Budget").await.unwrap();

    assert!(result.stats.pages_crawled <= 3);
    assert_eq!(result.vehicles.len(), 2);
}

#[tokio::test]
async fn test_duplicate_vin_is_kept_once() {
    let server = MockServer::start().await;

    mount_page(
        &server,
        "/used-inventory",
        listing_page(&["/vehicle/a", "/vehicle/b", "/vehicle/c"], None),
    )
    .await;
    mount_page(&server, "/vehicle/a", detail_page(VIN_A, "Accord")).await;
    mount_page(&server, "/vehicle/b", detail_page(VIN_A, "Accord")).await;
    mount_page(&server, "/vehicle/c", detail_page(VIN_B, "Pilot")).await;

    let config = test_config(10, 100);
    let start = format!("{}/used-inventory", server.uri());
    let result = crawler(&config).crawl(&start, "Dupes").await.unwrap();

    assert_eq!(result.vehicles.len(), 2);
    assert_eq!(result.count_status(PageStatus::Duplicate), 1);

    let mut vins: Vec<&str> = result.vehicles.iter().map(|v| v.vin.as_str()).collect();
    vins.sort_unstable();
    assert_eq!(vins, vec![VIN_B, VIN_A]);
}

#[tokio::test]
async fn test_max_vehicles_keeps_one() {
    let server = MockServer::start().await;

    mount_page(
        &server,
        "/used-inventory",
        listing_page(&["/vehicle/a", "/vehicle/b", "/vehicle/c"], None),
    )
    .await;
    mount_page(&server, "/vehicle/a", detail_page(VIN_A, "Accord")).await;
    mount_page(&server, "/vehicle/b", detail_page(VIN_B, "Pilot")).await;
    mount_page(&server, "/vehicle/c", detail_page(VIN_C, "Camry")).await;

    let mut config = test_config(10, 1);
    config.crawler.concurrency = 1;
    let start = format!("{}/used-inventory", server.uri());
    let result = crawler(&config).crawl(&start, "Capped").await.unwrap();

    assert_eq!(result.vehicles.len(), 1);
    assert_eq!(result.vehicles[0].vin, VIN_A);
    assert_eq!(
        result.count_status(PageStatus::Skipped(SkipReason::LimitReached)),
        2
    );
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;

    mount_page(
        &server,
        "/used-inventory",
        listing_page(&["/vehicle/a", "/vehicle/b", "/vehicle/gone"], None),
    )
    .await;
    mount_page(&server, "/vehicle/a", detail_page(VIN_A, "Accord")).await;
    mount_page(&server, "/vehicle/b", detail_page(VIN_B, "Pilot")).await;
    Mock::given(method("GET"))
        .and(path("/vehicle/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(10, 100);
    let start = format!("{}/used-inventory", server.uri());
    let result = crawler(&config).crawl(&start, "Missing").await.unwrap();

    assert_eq!(result.vehicles.len(), 2);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].url.ends_with("/vehicle/gone"));
    assert_eq!(result.errors[0].attempts, 1);
    assert!(result.errors[0].error.contains("404"));
    assert_eq!(result.stats.errors, 1);
    // A permanently failed page still counts as crawled
    assert_eq!(result.stats.pages_crawled, 4);
}

/// Listing page recognized by its vehicle cards, linking one detail page and a next page
fn card_listing_page(detail_path: &str, next: &str) -> String {
    format!(
        r#"<html><body><h1>Used Cars</h1>
        <div class="car-card"><a href="{}">Pre-owned sedan</a></div>
        <div class="car-card">Coming soon</div>
        <div class="car-card">Coming soon</div>
        <a class="next" href="{}">Next</a>
        </body></html>"#,
        detail_path, next
    )
}

#[tokio::test]
async fn test_failed_pages_use_up_the_page_budget() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/used-inventory"))
        .and(query_param("page", "2"))
        .respond_with(html(card_listing_page(
            "/vehicle/gone-2",
            "/used-inventory?page=3",
        )))
        .mount(&server)
        .await;
    mount_page(
        &server,
        "/used-inventory",
        card_listing_page("/vehicle/gone-1", "/used-inventory?page=2"),
    )
    .await;
    for gone in ["/vehicle/gone-1", "/vehicle/gone-2"] {
        Mock::given(method("GET"))
            .and(path(gone))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
    }

    let mut config = test_config(3, 100);
    config.crawler.concurrency = 1;
    let start = format!("{}/used-inventory", server.uri());
    let result = crawler(&config).crawl(&start, "Budget").await.unwrap();

    let fetched = server.received_requests().await.unwrap().len();
    assert_eq!(fetched, 3);
    assert_eq!(result.stats.pages_crawled, 3);
    assert_eq!(result.stats.srp_pages, 2);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].url.ends_with("/vehicle/gone-1"));
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;

    mount_page(
        &server,
        "/used-inventory",
        listing_page(&["/vehicle/a", "/vehicle/b", "/vehicle/flaky"], None),
    )
    .await;
    mount_page(&server, "/vehicle/a", detail_page(VIN_A, "Accord")).await;
    mount_page(&server, "/vehicle/b", detail_page(VIN_B, "Pilot")).await;
    Mock::given(method("GET"))
        .and(path("/vehicle/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    mount_page(&server, "/vehicle/flaky", detail_page(VIN_C, "Camry")).await;

    let config = test_config(10, 100);
    let start = format!("{}/used-inventory", server.uri());
    let result = crawler(&config).crawl(&start, "Flaky").await.unwrap();

    assert!(result.errors.is_empty());
    assert_eq!(result.vehicles.len(), 3);
    assert!(result.vehicles.iter().any(|v| v.vin == VIN_C));
    assert_eq!(result.stats.pages_crawled, 4);
}

#[tokio::test]
async fn test_session_cookies_are_replayed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/used-inventory"))
        .respond_with(
            html(listing_page(&["/vehicle/a", "/vehicle/b", "/vehicle/c"], None))
                .insert_header("set-cookie", "dealer_session=abc123; Path=/"),
        )
        .mount(&server)
        .await;
    for (page, vin) in [("/vehicle/a", VIN_A), ("/vehicle/b", VIN_B), ("/vehicle/c", VIN_C)] {
        Mock::given(method("GET"))
            .and(path(page))
            .and(header("cookie", "dealer_session=abc123"))
            .respond_with(html(detail_page(vin, "Accord")))
            .expect(1)
            .mount(&server)
            .await;
    }

    let config = test_config(10, 100);
    let start = format!("{}/used-inventory", server.uri());
    let result = crawler(&config).crawl(&start, "Cookies").await.unwrap();

    assert_eq!(result.vehicles.len(), 3);
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn test_progress_reports_and_results_file() {
    let server = MockServer::start().await;

    mount_page(
        &server,
        "/used-inventory",
        listing_page(&["/vehicle/a", "/vehicle/b", "/vehicle/c"], None),
    )
    .await;
    mount_page(&server, "/vehicle/a", detail_page(VIN_A, "Accord")).await;
    mount_page(&server, "/vehicle/b", detail_page(VIN_B, "Pilot")).await;
    mount_page(&server, "/vehicle/c", detail_page(VIN_C, "Camry")).await;

    let seen: Arc<Mutex<Vec<CrawlProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let config = test_config(10, 100);
    let start = format!("{}/used-inventory", server.uri());
    let result = crawler(&config)
        .with_progress(Arc::new(move |progress: CrawlProgress| sink.lock().unwrap().push(progress)))
        .crawl(&start, "Progress")
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert_eq!(seen.iter().map(|p| p.vehicles_found).max(), Some(3));
    assert_eq!(seen.iter().map(|p| p.pages_crawled).max(), Some(4));
    let last = seen.last().unwrap();
    assert_eq!(last.queued + last.running, 0);
    assert_eq!(last.completed, 4);

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.json");
    write_results(&result, &output).unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(written["vehicles"].as_array().unwrap().len(), 3);
    assert_eq!(written["stats"]["pages_crawled"], 4);
}
