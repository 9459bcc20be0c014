//! Error types for link discovery.

use thiserror::Error;

/// Errors that can occur while discovering document links.
///
/// Discovery errors are scoped to a single dataset: the orchestrator logs
/// them and moves on, so one unreachable listing never aborts the others.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The configured base URL is not a valid absolute URL.
    #[error("invalid base URL: {url}")]
    InvalidBaseUrl {
        /// The offending URL string.
        url: String,
    },

    /// The listing page could not be fetched at the network level.
    #[error("listing unreachable at {url}: {source}")]
    Unreachable {
        /// The listing URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The listing page returned a non-success HTTP status.
    #[error("HTTP {status} fetching listing {url}")]
    HttpStatus {
        /// The listing URL that failed.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
}

impl DiscoveryError {
    /// Creates an invalid base URL error.
    pub fn invalid_base_url(url: impl Into<String>) -> Self {
        Self::InvalidBaseUrl { url: url.into() }
    }

    /// Creates an unreachable-listing error.
    pub fn unreachable(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Unreachable {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display() {
        let error = DiscoveryError::http_status("https://example.com/data-set-3-files", 503);
        let msg = error.to_string();
        assert!(msg.contains("503"), "Expected status in: {msg}");
        assert!(msg.contains("data-set-3-files"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_invalid_base_url_display() {
        let error = DiscoveryError::invalid_base_url("not a url");
        assert!(error.to_string().contains("not a url"));
    }
}
