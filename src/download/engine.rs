//! Concurrent download engine with retry, resume, and cancellation support.
//!
//! The engine takes a batch of [`DocumentLink`]s and produces one
//! [`DownloadRecord`] per link. Concurrency is bounded by a semaphore, one
//! Tokio task per link; per-host spacing is enforced by the shared
//! [`RateLimiter`] before every attempt, including retries.
//!
//! # Resume
//!
//! A link whose destination file already exists and is non-empty is skipped
//! without any network traffic, which is what makes a rerun of an interrupted
//! batch cheap. The destination path is fully determined by the link
//! (`dataset-{n}/{filename}` under the output root), so reruns converge on
//! the same files.
//!
//! # Cancellation
//!
//! Workers check the [`Shutdown`] signal before each attempt and while
//! sleeping between retries. A cancelled worker reports its link as Pending
//! so the next run picks it up again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use indicatif::ProgressBar;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::rate_limiter::{RateLimiter, parse_retry_after};
use super::record::DownloadRecord;
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::{DownloadError, HttpClient};
use crate::discover::DocumentLink;
use crate::shutdown::Shutdown;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Error type for download engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Statistics from one download batch run.
///
/// Uses atomic counters so concurrent download tasks can update them without
/// locking.
#[derive(Debug, Default)]
pub struct DownloadStats {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    retried: AtomicUsize,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of links whose document ended up on disk this run.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Number of links that exhausted retries or failed permanently.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Number of links skipped because their file was already on disk.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Number of retry attempts made across the batch.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Total number of links that reached a terminal state this run.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded() + self.failed()
    }

    fn increment_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }
}

/// Concurrent download engine.
///
/// # Concurrency Model
///
/// - Each link runs in its own Tokio task
/// - A semaphore permit is acquired before spawning each task
/// - Permits are released automatically when tasks complete (RAII)
///
/// # Retry Behavior
///
/// - Transient errors (network issues, 408/5xx) retry with exponential backoff
/// - 429 responses retry honoring the Retry-After header when present
/// - Local file system errors retry at most once
/// - Permanent errors (404, wrong content type) fail immediately
#[derive(Debug)]
pub struct DownloadEngine {
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
    /// Configured concurrency limit.
    concurrency: usize,
    /// Retry policy for failed downloads.
    retry_policy: RetryPolicy,
    /// Per-host rate limiter.
    rate_limiter: Arc<RateLimiter>,
}

impl DownloadEngine {
    /// Creates a new download engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `concurrency` is
    /// outside 1-100.
    #[instrument(level = "debug", skip(retry_policy, rate_limiter))]
    pub fn new(
        concurrency: usize,
        retry_policy: RetryPolicy,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_retries = retry_policy.max_attempts(),
            rate_limit_ms = rate_limiter.interval().as_millis(),
            rate_limit_disabled = rate_limiter.is_disabled(),
            "creating download engine"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            retry_policy,
            rate_limiter,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Downloads a batch of links concurrently.
    ///
    /// Returns one record per input link, in input order, plus batch
    /// statistics. Individual download failures do NOT cause this method to
    /// error; they surface as Failed records.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SemaphoreClosed`] if the semaphore is closed,
    /// which indicates a bug rather than an operational failure.
    #[instrument(skip_all, fields(links = links.len(), output_root = %output_root.display()))]
    pub async fn process_links(
        &self,
        links: &[DocumentLink],
        client: &HttpClient,
        output_root: &Path,
        shutdown: &Shutdown,
        progress: Option<&ProgressBar>,
    ) -> Result<(Vec<DownloadRecord>, DownloadStats), EngineError> {
        let stats = Arc::new(DownloadStats::new());
        let mut handles = Vec::with_capacity(links.len());

        info!(links = links.len(), "starting download batch");

        for (position, link) in links.iter().enumerate() {
            // Stop spawning new work once cancellation is requested; links
            // not spawned stay Pending via the fallback below.
            if shutdown.is_cancelled() {
                break;
            }

            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| EngineError::SemaphoreClosed)?;

            let link = link.clone();
            let client = client.clone();
            let stats = Arc::clone(&stats);
            let output_root = output_root.to_path_buf();
            let retry_policy = self.retry_policy.clone();
            let rate_limiter = Arc::clone(&self.rate_limiter);
            let shutdown = shutdown.clone();
            let progress = progress.cloned();

            handles.push(tokio::spawn(async move {
                // Permit is dropped when this block exits (RAII).
                let _permit = permit;

                let record = download_link(
                    &client,
                    link,
                    &output_root,
                    &retry_policy,
                    &stats,
                    &rate_limiter,
                    shutdown,
                )
                .await;

                if let Some(bar) = progress {
                    bar.inc(1);
                }

                (position, record)
            }));
        }

        debug!(
            task_count = handles.len(),
            "waiting for downloads to complete"
        );

        // Collect task results back into input order. Links that never got a
        // task (cancelled before spawning) fall back to a Pending record.
        let mut slots: Vec<Option<DownloadRecord>> = (0..links.len()).map(|_| None).collect();
        for handle in handles {
            match handle.await {
                Ok((position, record)) => slots[position] = Some(record),
                Err(e) => warn!(error = %e, "download task panicked"),
            }
        }
        let records: Vec<DownloadRecord> = slots
            .into_iter()
            .zip(links)
            .map(|(slot, link)| slot.unwrap_or_else(|| DownloadRecord::pending(link.clone())))
            .collect();

        info!(
            succeeded = stats.succeeded(),
            failed = stats.failed(),
            skipped = stats.skipped(),
            retried = stats.retried(),
            "download batch complete"
        );

        let stats = Arc::try_unwrap(stats).unwrap_or_else(|arc_stats| {
            // All tasks are joined, so this branch should be unreachable.
            let fresh = DownloadStats::new();
            fresh
                .succeeded
                .store(arc_stats.succeeded(), Ordering::SeqCst);
            fresh.failed.store(arc_stats.failed(), Ordering::SeqCst);
            fresh.skipped.store(arc_stats.skipped(), Ordering::SeqCst);
            fresh.retried.store(arc_stats.retried(), Ordering::SeqCst);
            fresh
        });

        Ok((records, stats))
    }
}

/// Destination file for a link: `dataset-{n}/{filename}` under the output
/// root.
#[must_use]
pub fn destination_path(output_root: &Path, link: &DocumentLink) -> PathBuf {
    output_root
        .join(format!("dataset-{}", link.dataset))
        .join(&link.filename)
}

/// Extracts and applies the Retry-After delay from a rate-limited error.
///
/// When the error carries a parseable Retry-After header the delay is
/// recorded with the rate limiter for the link's host and returned, so the
/// retry sleep honors the server's request instead of the backoff schedule.
async fn extract_retry_after_delay(
    error: &DownloadError,
    url: &str,
    rate_limiter: &RateLimiter,
) -> Option<Duration> {
    let retry_after_header = match error {
        DownloadError::HttpStatus { retry_after, .. } => retry_after.as_ref()?,
        _ => return None,
    };

    let delay = parse_retry_after(retry_after_header)?;
    rate_limiter.record_server_delay(url, delay).await;

    debug!(
        url = %url,
        retry_after = %retry_after_header,
        delay_ms = delay.as_millis(),
        "using Retry-After header delay"
    );

    Some(delay)
}

/// Processes one link to a terminal record, or Pending when cancelled.
///
/// Checks for an existing non-empty destination file first; a hit is
/// recorded as Succeeded with zero attempts and no request is made.
#[instrument(skip_all, fields(id = %link.id, url = %link.url))]
async fn download_link(
    client: &HttpClient,
    link: DocumentLink,
    output_root: &Path,
    policy: &RetryPolicy,
    stats: &DownloadStats,
    rate_limiter: &RateLimiter,
    mut shutdown: Shutdown,
) -> DownloadRecord {
    let dest = destination_path(output_root, &link);

    if let Ok(metadata) = tokio::fs::metadata(&dest).await {
        if metadata.is_file() && metadata.len() > 0 {
            debug!(path = %dest.display(), "file already on disk, skipping");
            stats.increment_skipped();
            return DownloadRecord::pending(link).succeeded(dest, 0);
        }
    }

    let mut attempt = 0u32;

    loop {
        if shutdown.is_cancelled() {
            debug!("cancelled before attempt, leaving pending");
            let mut record = DownloadRecord::pending(link);
            record.attempts = attempt;
            return record;
        }

        attempt += 1;
        debug!(attempt, "attempting download");

        rate_limiter.acquire(&link.url).await;

        match client.fetch_to_path(&link.url, &dest).await {
            Ok(bytes) => {
                info!(path = %dest.display(), bytes, attempts = attempt, "download complete");
                stats.increment_succeeded();
                return DownloadRecord::pending(link).succeeded(dest, attempt);
            }
            Err(e) => {
                let failure_type = classify_error(&e);

                let retry_after_delay = if failure_type == FailureType::RateLimited {
                    extract_retry_after_delay(&e, &link.url, rate_limiter).await
                } else {
                    None
                };

                match policy.should_retry(failure_type, attempt) {
                    RetryDecision::Retry {
                        delay: backoff_delay,
                        attempt: next_attempt,
                    } => {
                        let delay = retry_after_delay.unwrap_or(backoff_delay);
                        info!(
                            attempt = next_attempt,
                            max_attempts = policy.max_attempts(),
                            delay_ms = delay.as_millis(),
                            using_retry_after = retry_after_delay.is_some(),
                            error = %e,
                            "retrying download"
                        );
                        stats.increment_retried();

                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = shutdown.cancelled() => {
                                debug!("cancelled during backoff, leaving pending");
                                let mut record = DownloadRecord::pending(link);
                                record.attempts = attempt;
                                return record;
                            }
                        }
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        warn!(error = %e, attempts = attempt, %reason, "download failed");
                        stats.increment_failed();
                        return DownloadRecord::pending(link).failed(e.to_string(), attempt);
                    }
                }
            }
        }
    }
}
