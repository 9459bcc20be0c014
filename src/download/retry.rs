//! Retry logic with exponential backoff for transient download failures.
//!
//! When a fetch fails, the error is classified into a [`FailureType`]:
//!
//! - [`FailureType::Transient`] - temporary, may succeed on retry
//! - [`FailureType::RateLimited`] - server pushback (429), retried with backoff
//! - [`FailureType::LocalIo`] - local file system failure, retried once
//! - [`FailureType::Permanent`] - retrying cannot help
//!
//! [`RetryPolicy`] turns a classification plus attempt count into a
//! [`RetryDecision`], calculating exponential backoff delays with jitter.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Default maximum attempts (including the initial attempt).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Local IO failures get exactly one retry, regardless of the configured cap.
const LOCAL_IO_MAX_ATTEMPTS: u32 = 2;

/// Classification of a download failure, used to decide retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, 5xx server errors, connection reset.
    Transient,

    /// Server rate limiting (HTTP 429). Retried with backoff, honoring
    /// Retry-After when the server provides one.
    RateLimited,

    /// Local file system failure (cannot create directory, write, rename).
    /// Retried at most once; a second failure is recorded as final.
    LocalIo,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, malformed URL, non-PDF response.
    Permanent,
}

/// Decision on whether to retry a failed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so the first retry
        /// is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// Delays follow `min(base_delay * multiplier^attempt, max_delay) + jitter`,
/// so with defaults the waits are approximately 1s, 2s before the attempt cap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy with custom settings.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy with a custom attempt cap and default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the configured attempt cap.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether a failed download should be retried.
    ///
    /// `attempt` is the attempt number that just failed (1-indexed).
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        let cap = match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::LocalIo => self.max_attempts.min(LOCAL_IO_MAX_ATTEMPTS),
            FailureType::Transient | FailureType::RateLimited => self.max_attempts,
        };

        if attempt >= cap {
            debug!(attempt, cap, "attempt cap reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({cap}) exhausted"),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the backoff delay for a retry, with jitter.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt is 1-indexed; attempt 1 retries after 1x base.
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let capped = Duration::from_millis(capped_ms as u64);
        capped + calculate_jitter()
    }
}

/// Random jitter between 0 and [`MAX_JITTER`], to avoid thundering herds
/// when many downloads fail and retry together.
fn calculate_jitter() -> Duration {
    let mut rng = rand::thread_rng();
    #[allow(clippy::cast_possible_truncation)]
    let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}

/// Classifies a download error for retry decisions.
///
/// HTTP statuses: 408 and all 5xx are Transient, 429 is RateLimited, every
/// other 4xx is Permanent. Timeouts and non-TLS network errors are Transient;
/// TLS failures, malformed URLs, and non-PDF responses are Permanent. Local
/// IO failures are LocalIo (retried once).
#[instrument]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),

        DownloadError::Timeout { .. } => FailureType::Transient,

        DownloadError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }

        DownloadError::Io { .. } => FailureType::LocalIo,

        DownloadError::InvalidUrl { .. } | DownloadError::NotPdf { .. } => FailureType::Permanent,
    }
}

/// Classifies an HTTP status code into a failure type.
fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        // Anything else is unexpected, treat as permanent.
        _ => FailureType::Permanent,
    }
}

/// Checks whether a reqwest error is a TLS/certificate failure.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}
