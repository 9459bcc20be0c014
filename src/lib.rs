//! Harvester Core Library
//!
//! This library builds a searchable text corpus from document datasets
//! published as listing pages of PDF links. The pipeline has three durable
//! stages, each resumable on its own:
//!
//! # Architecture
//!
//! - [`discover`] - Listing page crawling and link collection
//! - [`download`] - Rate-limited, resumable document downloads
//! - [`extract`] - Per-page text extraction from downloaded documents
//! - [`corpus`] - Incremental assembly of the final corpus artifact
//! - [`pipeline`] - Stage orchestration over the artifact files
//!
//! Supporting modules:
//! - [`artifact`] - Atomic JSON artifact reads and writes
//! - [`shutdown`] - Cooperative cancellation for in-flight work

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod artifact;
pub mod corpus;
pub mod discover;
pub mod download;
pub mod extract;
pub mod pipeline;
pub mod shutdown;

// Re-export commonly used types
pub use corpus::{CorpusSnapshot, MergeSummary};
pub use discover::{Discoverer, DiscoveryError, DocumentLink, merge_links};
pub use download::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DownloadEngine, DownloadManifest, DownloadRecord,
    DownloadStats, DownloadStatus, EngineError, FailureType, HttpClient, RateLimiter,
    RetryDecision, RetryPolicy, classify_error,
};
pub use extract::{ExtractedDocument, ExtractionError, Extractor};
pub use pipeline::{PipelineConfig, PipelineError};
pub use shutdown::{Shutdown, ShutdownHandle};
