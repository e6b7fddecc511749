//! Dealer-Crawler main entry point
//!
//! This is the command-line interface for the dealership inventory crawler.

use clap::Parser;
use dealer_crawler::config::{load_config_with_hash, validate, Config, RenderMode};
use dealer_crawler::crawler::{BrowserlessRenderer, CrawlProgress, Crawler};
use dealer_crawler::output::{print_statistics, write_results};
use dealer_crawler::JsonLdExtractor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Dealer-Crawler: a dealership inventory crawler
///
/// Dealer-Crawler walks a dealership website from its inventory page,
/// follows listing pagination and vehicle detail links, and collects one
/// record per distinct VIN.
#[derive(Parser, Debug)]
#[command(name = "dealer-crawler")]
#[command(version = "1.0.0")]
#[command(about = "A dealership inventory crawler", long_about = None)]
struct Cli {
    /// Inventory page to start from
    #[arg(value_name = "START_URL")]
    start_url: String,

    /// Path to TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Source name stamped on every vehicle (defaults to the start URL's host)
    #[arg(short, long)]
    source: Option<String>,

    /// Override the maximum number of pages fetched
    #[arg(long)]
    max_pages: Option<u32>,

    /// Override the maximum number of vehicles kept
    #[arg(long)]
    max_vehicles: Option<u32>,

    /// Override the number of concurrent requests
    #[arg(long)]
    concurrency: Option<u32>,

    /// Browser rendering mode: auto, always or never
    #[arg(long, value_name = "MODE")]
    render: Option<RenderMode>,

    /// Write the crawl result as JSON to this file
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            match load_config_with_hash(path) {
                Ok((cfg, hash)) => {
                    tracing::info!("Configuration loaded successfully (hash: {})", hash);
                    cfg
                }
                Err(e) => {
                    tracing::error!("Failed to load configuration: {}", e);
                    return Err(e.into());
                }
            }
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            Config::default()
        }
    };

    apply_overrides(&mut config, &cli);
    validate(&config)?;

    if cli.dry_run {
        handle_dry_run(&config, &cli);
        return Ok(());
    }

    handle_crawl(config, &cli).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("dealer_crawler=info,warn"),
            1 => EnvFilter::new("dealer_crawler=debug,info"),
            2 => EnvFilter::new("dealer_crawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Applies command-line overrides on top of the loaded configuration
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(max_pages) = cli.max_pages {
        config.crawler.max_pages = max_pages;
    }
    if let Some(max_vehicles) = cli.max_vehicles {
        config.crawler.max_vehicles = max_vehicles;
    }
    if let Some(concurrency) = cli.concurrency {
        config.crawler.concurrency = concurrency;
    }
    if let Some(mode) = cli.render {
        config.render.mode = mode;
    }
    if let Some(output) = &cli.output {
        config.output.results_path = Some(output.display().to_string());
    }
}

/// Name stamped on vehicles when `--source` is not given
fn source_name(cli: &Cli) -> String {
    cli.source.clone().unwrap_or_else(|| {
        url::Url::parse(&cli.start_url)
            .ok()
            .and_then(|url| url.host_str().map(String::from))
            .unwrap_or_else(|| cli.start_url.clone())
    })
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, cli: &Cli) {
    println!("=== Dealer-Crawler Dry Run ===\n");

    println!("Start URL: {}", cli.start_url);
    println!("Source: {}", source_name(cli));

    println!("\nCrawler Configuration:");
    println!("  Max pages: {}", config.crawler.max_pages);
    println!("  Max vehicles: {}", config.crawler.max_vehicles);
    println!("  Concurrency: {}", config.crawler.concurrency);
    println!("  Rate limit: {}ms", config.crawler.rate_limit_ms);
    println!(
        "  Retries: {} (base delay {}ms)",
        config.crawler.max_retries, config.crawler.retry_delay_ms
    );

    println!("\nSession:");
    println!(
        "  User agent: {}",
        config.session.user_agent.as_deref().unwrap_or("(browser default)")
    );
    println!("  Timeout: {}ms", config.session.timeout_ms);
    println!("  Extra headers: {}", config.session.headers.len());

    println!("\nRendering:");
    println!("  Mode: {}", config.render.mode);
    println!(
        "  Endpoint: {}",
        config.render.endpoint.as_deref().unwrap_or("(none)")
    );

    println!("\nOutput:");
    println!(
        "  Results: {}",
        config.output.results_path.as_deref().unwrap_or("(summary only)")
    );

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let source = source_name(cli);

    let mut crawler = Crawler::new(&config, Arc::new(JsonLdExtractor::default()))?;
    if config.render.mode != RenderMode::Never {
        match BrowserlessRenderer::from_config(&config.render)? {
            Some(renderer) => {
                tracing::info!("Browser rendering enabled ({} mode)", config.render.mode);
                crawler = crawler.with_renderer(Arc::new(renderer));
            }
            None => tracing::info!("No render endpoint configured; using plain HTTP only"),
        }
    }

    let crawler = crawler.with_progress(Arc::new(|progress: CrawlProgress| {
        tracing::trace!(
            "Progress: {} queued, {} running, {} pages, {} vehicles",
            progress.queued,
            progress.running,
            progress.pages_crawled,
            progress.vehicles_found
        );
    }));

    let result = crawler.crawl(&cli.start_url, &source).await?;

    if let Some(path) = &config.output.results_path {
        write_results(&result, Path::new(path))?;
        tracing::info!("Results written to: {}", path);
    }

    if !cli.quiet {
        print_statistics(&result);
    }

    Ok(())
}
