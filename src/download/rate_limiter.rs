//! Per-host rate limiting for outbound requests.
//!
//! Every worker funnels through one shared [`RateLimiter`], so the request
//! rate per host stays bounded regardless of how many workers run
//! concurrently. Hosts are independent: requests to different hosts never
//! wait on each other.
//!
//! # Ordering
//!
//! Callers waiting on the same host are granted permits first-come
//! first-served: the per-host state sits behind a fair async mutex and each
//! caller holds it across its wait, so no later arrival can jump the queue.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use harvester::download::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(Duration::from_secs(1)));
//!
//! // First request to a host proceeds immediately.
//! limiter.acquire("https://example.com/A.pdf").await;
//! // Second request to the same host waits out the interval.
//! limiter.acquire("https://example.com/B.pdf").await;
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Maximum Retry-After value honored (1 hour), to bound server-mandated waits.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Enforces a minimum interval between requests to the same host.
///
/// Designed to be wrapped in `Arc` and shared across spawned tasks. Per-host
/// state lives in a `DashMap`; the map entry is cloned out as an `Arc` before
/// awaiting so no shard lock is held across an await point.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum spacing between requests to one host.
    interval: Duration,

    /// Whether limiting is disabled (interval of zero).
    disabled: bool,

    /// Per-host pacing state.
    hosts: DashMap<String, Arc<HostState>>,
}

/// Pacing state for a single host.
#[derive(Debug)]
struct HostState {
    /// Earliest instant the next request to this host may start.
    /// `None` until the first request, which proceeds immediately.
    next_allowed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter with the given minimum inter-request interval.
    /// A zero interval disables limiting.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            disabled: interval.is_zero(),
            hosts: DashMap::new(),
        }
    }

    /// Creates a disabled limiter that applies no delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured minimum interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Suspends until a request to the URL's host is permitted, then claims
    /// the next slot.
    ///
    /// The first request to any host proceeds immediately.
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }

        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        let state = self.host_state(&host);

        // The mutex is held across the wait: tokio's Mutex is fair, which is
        // what gives same-host callers FCFS ordering.
        let mut next_allowed = state.next_allowed.lock().await;
        if let Some(at) = *next_allowed {
            let now = Instant::now();
            if at > now {
                let wait = at - now;
                debug!(host = %host, wait_ms = wait.as_millis(), "waiting for rate limit slot");
                tokio::time::sleep_until(at).await;
            }
        } else {
            debug!(host = %host, "first request to host");
        }
        *next_allowed = Some(Instant::now() + self.interval);
    }

    /// Records a server-mandated delay (Retry-After) so the next `acquire`
    /// for this host waits it out.
    #[instrument(skip(self), fields(host))]
    pub async fn record_server_delay(&self, url: &str, delay: Duration) {
        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        let delay = delay.min(MAX_RETRY_AFTER);
        let state = self.host_state(&host);

        let mut next_allowed = state.next_allowed.lock().await;
        let mandated = Instant::now() + delay;
        let effective = match *next_allowed {
            Some(at) if at > mandated => at,
            _ => mandated,
        };
        *next_allowed = Some(effective);

        if delay >= Duration::from_secs(30) {
            warn!(host = %host, delay_secs = delay.as_secs(), "long server-mandated delay");
        } else {
            debug!(host = %host, delay_ms = delay.as_millis(), "recorded server delay");
        }
    }

    /// Gets or creates the host entry, cloning the Arc out so the DashMap
    /// shard lock is released before any await.
    fn host_state(&self, host: &str) -> Arc<HostState> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(HostState {
                    next_allowed: Mutex::new(None),
                })
            })
            .clone()
    }
}

/// Extracts the host from a URL.
///
/// Returns "unknown" for malformed URLs, so even those are still rate
/// limited as a group.
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports both RFC 7231 forms: integer seconds and HTTP-date. Returns
/// `None` if the value cannot be parsed; caps excessive values at 1 hour.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    let datetime = httpdate::parse_http_date(header_value).ok()?;
    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
        // A date in the past means no further wait.
        Err(_) => Some(Duration::ZERO),
    }
}
