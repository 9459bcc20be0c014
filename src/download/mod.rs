//! Rate-limited, resumable document downloads.
//!
//! This module turns discovered links into files on disk and a durable
//! manifest of per-link outcomes.
//!
//! # Features
//!
//! - Streaming downloads staged through `.part` files, renamed on completion
//! - Bounded concurrency with per-host request spacing
//! - Exponential backoff retries, honoring Retry-After on 429 responses
//! - Skip-if-exists resume: files already on disk are never refetched
//! - Cooperative cancellation that leaves in-flight links retryable
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use harvester::discover::DocumentLink;
//! use harvester::download::{DownloadEngine, HttpClient, RateLimiter, RetryPolicy};
//! use harvester::shutdown::Shutdown;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let links = vec![DocumentLink::new(
//!     "https://example.gov/files/report.pdf",
//!     1,
//!     "report.pdf",
//! )];
//! let rate_limiter = Arc::new(RateLimiter::new(Duration::from_millis(1000)));
//! let engine = DownloadEngine::new(4, RetryPolicy::default(), rate_limiter)?;
//! let (records, stats) = engine
//!     .process_links(
//!         &links,
//!         &HttpClient::new(),
//!         Path::new("./data/pdfs"),
//!         &Shutdown::never(),
//!         None,
//!     )
//!     .await?;
//! println!("succeeded: {}, failed: {}", stats.succeeded(), stats.failed());
//! # let _ = records;
//! # Ok(())
//! # }
//! ```

mod client;
mod engine;
mod error;
pub mod rate_limiter;
mod record;
mod retry;

pub use client::HttpClient;
pub use engine::{
    DEFAULT_CONCURRENCY, DownloadEngine, DownloadStats, EngineError, destination_path,
};
pub use error::DownloadError;
pub use rate_limiter::{RateLimiter, extract_host, parse_retry_after};
pub use record::{DownloadManifest, DownloadRecord, DownloadStatus};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
