//! Crawler module for page fetching and crawl orchestration
//!
//! This module contains the core crawling logic, including:
//! - An HTTP session with a cookie jar and header management
//! - The browser-render policy and a Browserless renderer client
//! - A deduplicating request queue with concurrency, rate limiting and retries
//! - Overall crawl coordination

mod coordinator;
mod queue;
mod render;
mod session;

pub use coordinator::{CrawlProgress, Crawler, ProgressCallback};
pub use queue::{
    backoff_delay, QueueConfig, QueueFailure, QueueItem, QueueRunResult, QueueStatus,
    RequestQueue, Retryable, StatusObserver,
};
pub use render::{
    BrowserlessRenderer, PageRenderer, RenderOptions, RenderPolicy, RenderedPage,
};
pub use session::{RequestOptions, Response, Session};
