//! HTTP client wrapper for fetching documents to disk.
//!
//! Bodies are streamed, never buffered whole: chunks go through a `BufWriter`
//! into a `.part` staging file that is renamed to the final destination only
//! after the stream completes, so an observer never sees a partially written
//! document and an interrupted fetch leaves nothing behind.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};
use url::Url;

use super::error::DownloadError;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes, large scanned documents are common).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// HTTP client for streaming document downloads.
///
/// Create once and reuse across fetches to benefit from connection pooling.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with default timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static configuration,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the supplied
    /// configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Fetches `url` and writes the body to exactly `dest`.
    ///
    /// The destination is fully determined by the caller (dataset directory +
    /// source filename), which is what makes reruns idempotent. Parent
    /// directories are created as needed. Returns the number of bytes
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] for malformed URLs,
    /// [`DownloadError::Timeout`]/[`DownloadError::Network`] for request
    /// failures, [`DownloadError::HttpStatus`] for non-success responses
    /// (carrying Retry-After when present), [`DownloadError::NotPdf`] when
    /// the server sends an explicit non-PDF Content-Type, and
    /// [`DownloadError::Io`] for file system failures.
    #[instrument(skip(self), fields(url = %url, dest = %dest.display()))]
    pub async fn fetch_to_path(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        debug!("starting fetch");

        // Reject malformed URLs before touching the network.
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        // Some servers answer a document URL with an HTML interstitial and
        // status 200. An explicit non-PDF Content-Type is a permanent
        // failure; a missing header is accepted.
        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !content_type.contains("application/pdf")
                && !content_type.contains("application/octet-stream")
            {
                return Err(DownloadError::not_pdf(url, content_type));
            }
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent.to_path_buf(), e))?;
        }

        let staging = staging_path(dest);
        let file = File::create(&staging)
            .await
            .map_err(|e| DownloadError::io(staging.clone(), e))?;

        let stream_result = stream_to_file(file, response, url, &staging).await;
        if stream_result.is_err() {
            // Never leave a half-written staging file around.
            let _ = tokio::fs::remove_file(&staging).await;
        }
        let bytes_written = stream_result?;

        tokio::fs::rename(&staging, dest)
            .await
            .map_err(|e| DownloadError::io(dest.to_path_buf(), e))?;

        info!(bytes = bytes_written, "fetch complete");
        Ok(bytes_written)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Staging path beside the destination: `<filename>.part` in the same
/// directory, so the final rename never crosses file systems.
fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map_or_else(
        || std::ffi::OsString::from("download"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".part");
    dest.with_file_name(name)
}

/// Streams the response body to the file, returning bytes written.
async fn stream_to_file(
    file: File,
    response: reqwest::Response,
    url: &str,
    path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(path.to_path_buf(), e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(path.to_path_buf(), e))?;

    Ok(bytes_written)
}
