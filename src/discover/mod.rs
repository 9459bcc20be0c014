//! Link discovery: turn dataset listing pages into [`DocumentLink`] records.
//!
//! Each numbered dataset has one or more HTML listing pages enumerating its
//! documents. Discovery fetches those pages through a [`ListingFetcher`]
//! capability (so tests inject fixtures instead of a network), extracts PDF
//! links with the pure parser in [`parse`], follows pagination, and unions the
//! results into a deduplicated, insertion-ordered link set.
//!
//! Discovery is safe to re-run: merging with a previous link artifact only
//! ever grows the set, so the artifact is monotone across runs.

mod error;
pub mod parse;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use error::DiscoveryError;
pub use parse::parse_links;

/// Connect timeout for listing page fetches.
const LISTING_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall timeout for a single listing page fetch.
const LISTING_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Safety cap on pagination depth per dataset.
const MAX_LISTING_PAGES: u32 = 200;

/// A reference to one remotely hosted document.
///
/// `id` is stable and scoped by dataset (`"<dataset>/<filename-stem>"`), so
/// the same filename appearing in two datasets yields two distinct documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLink {
    /// Stable identifier, unique across the union of all datasets.
    pub id: String,
    /// Absolute URL of the document.
    pub url: String,
    /// Dataset number the link was discovered in.
    pub dataset: u32,
    /// Filename as it appears in the source link.
    pub filename: String,
}

impl DocumentLink {
    /// Creates a link with its id derived from `(dataset, filename)`.
    #[must_use]
    pub fn new(url: impl Into<String>, dataset: u32, filename: &str) -> Self {
        Self {
            id: format!("{dataset}/{}", filename_stem(filename)),
            url: url.into(),
            dataset,
            filename: filename.to_string(),
        }
    }
}

/// Strips a trailing `.pdf` extension, case-insensitively.
///
/// A bare `.pdf` with no stem is kept as-is. The boundary check keeps the
/// slice safe for arbitrary callers; a multibyte tail cannot be `.pdf`.
fn filename_stem(filename: &str) -> &str {
    match filename.len().checked_sub(4) {
        Some(cut)
            if cut > 0
                && filename.is_char_boundary(cut)
                && filename[cut..].eq_ignore_ascii_case(".pdf") =>
        {
            &filename[..cut]
        }
        _ => filename,
    }
}

/// Capability interface over the HTML fetch, so parsing stays testable
/// without a network.
#[async_trait]
pub trait ListingFetcher: Send + Sync {
    /// Fetches the raw HTML of a listing page.
    async fn fetch_listing(&self, url: &str) -> Result<String, DiscoveryError>;
}

/// Production [`ListingFetcher`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpListingFetcher {
    client: reqwest::Client,
}

impl HttpListingFetcher {
    /// Creates a fetcher with conservative timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static configuration,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(LISTING_CONNECT_TIMEOUT)
            .timeout(LISTING_FETCH_TIMEOUT)
            .gzip(true)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }
}

impl Default for HttpListingFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ListingFetcher for HttpListingFetcher {
    async fn fetch_listing(&self, url: &str) -> Result<String, DiscoveryError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DiscoveryError::unreachable(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::http_status(url, status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| DiscoveryError::unreachable(url, e))
    }
}

/// Result of discovering a range of datasets.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    /// Union of links across all datasets, deduplicated by id,
    /// in discovery order.
    pub links: Vec<DocumentLink>,
    /// Datasets whose listing could not be fetched, with the cause.
    pub failed: Vec<(u32, DiscoveryError)>,
}

/// Crawls dataset listing pages and collects document links.
pub struct Discoverer {
    fetcher: Arc<dyn ListingFetcher>,
    base: Url,
}

impl Discoverer {
    /// Creates a discoverer for the given base origin.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidBaseUrl`] if `base_url` is not an
    /// absolute URL.
    pub fn new(fetcher: Arc<dyn ListingFetcher>, base_url: &str) -> Result<Self, DiscoveryError> {
        let base =
            Url::parse(base_url).map_err(|_| DiscoveryError::invalid_base_url(base_url))?;
        Ok(Self { fetcher, base })
    }

    /// Builds the listing URL for a dataset page. Page 0 is the bare listing;
    /// later pages use the `?page=N` query the source site paginates with.
    fn listing_url(&self, dataset: u32, page: u32) -> String {
        let base = self.base.as_str().trim_end_matches('/');
        if page == 0 {
            format!("{base}/data-set-{dataset}-files")
        } else {
            format!("{base}/data-set-{dataset}-files?page={page}")
        }
    }

    /// Discovers all links in one dataset, following pagination until a page
    /// contributes nothing new.
    ///
    /// # Errors
    ///
    /// Returns an error only if the first listing page cannot be fetched; a
    /// failure on a later page logs a warning and returns what was found.
    #[instrument(skip(self))]
    pub async fn discover_dataset(&self, dataset: u32) -> Result<Vec<DocumentLink>, DiscoveryError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut links = Vec::new();

        for page in 0..MAX_LISTING_PAGES {
            let url = self.listing_url(dataset, page);
            let html = match self.fetcher.fetch_listing(&url).await {
                Ok(html) => html,
                Err(e) if page == 0 => return Err(e),
                Err(e) => {
                    warn!(dataset, page, error = %e, "pagination stopped early");
                    break;
                }
            };

            let page_links = parse_links(&html, &self.base, dataset);
            let mut added = 0_usize;
            for link in page_links {
                if seen.insert(link.id.clone()) {
                    links.push(link);
                    added += 1;
                }
            }

            debug!(dataset, page, added, total = links.len(), "listing page parsed");

            // An empty page, or one that only repeats known links, ends the
            // pagination walk.
            if added == 0 {
                break;
            }
        }

        info!(dataset, count = links.len(), "dataset discovered");
        Ok(links)
    }

    /// Discovers an inclusive range of datasets, unioning the results.
    ///
    /// A dataset that fails contributes zero links and is reported in
    /// [`DiscoveryOutcome::failed`]; it never aborts the other datasets.
    #[instrument(skip(self))]
    pub async fn discover_range(&self, first: u32, last: u32) -> DiscoveryOutcome {
        let mut outcome = DiscoveryOutcome::default();
        let mut seen: HashSet<String> = HashSet::new();

        for dataset in first..=last {
            match self.discover_dataset(dataset).await {
                Ok(links) => {
                    for link in links {
                        if seen.insert(link.id.clone()) {
                            outcome.links.push(link);
                        }
                    }
                }
                Err(e) => {
                    warn!(dataset, error = %e, "dataset discovery failed");
                    outcome.failed.push((dataset, e));
                }
            }
        }

        info!(
            links = outcome.links.len(),
            failed_datasets = outcome.failed.len(),
            "discovery complete"
        );
        outcome
    }
}

/// Merges newly discovered links into an existing link set.
///
/// Existing entries keep their position; genuinely new ids are appended in
/// discovery order. Returns the merged set and the number of additions, so
/// re-discovery grows the artifact monotonically.
#[must_use]
pub fn merge_links(
    existing: Vec<DocumentLink>,
    discovered: Vec<DocumentLink>,
) -> (Vec<DocumentLink>, usize) {
    let mut seen: HashSet<String> = existing.iter().map(|l| l.id.clone()).collect();
    let mut merged = existing;
    let mut added = 0;

    for link in discovered {
        if seen.insert(link.id.clone()) {
            merged.push(link);
            added += 1;
        }
    }

    (merged, added)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct FixtureFetcher {
        pages: std::collections::HashMap<String, String>,
    }

    #[async_trait]
    impl ListingFetcher for FixtureFetcher {
        async fn fetch_listing(&self, url: &str) -> Result<String, DiscoveryError> {
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| DiscoveryError::http_status(url, 404))
        }
    }

    fn discoverer(pages: &[(&str, &str)]) -> Discoverer {
        let fetcher = FixtureFetcher {
            pages: pages
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        };
        Discoverer::new(Arc::new(fetcher), "https://docs.example.gov/disclosures").unwrap()
    }

    #[test]
    fn test_document_link_id_scoped_by_dataset() {
        let a = DocumentLink::new("https://x/doc.pdf", 1, "doc.pdf");
        let b = DocumentLink::new("https://x/doc.pdf", 2, "doc.pdf");
        assert_eq!(a.id, "1/doc");
        assert_eq!(b.id, "2/doc");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_filename_stem_case_insensitive() {
        assert_eq!(filename_stem("DOC-1.pdf"), "DOC-1");
        assert_eq!(filename_stem("DOC-1.PDF"), "DOC-1");
        assert_eq!(filename_stem("noext"), "noext");
        assert_eq!(filename_stem(".pdf"), ".pdf");
    }

    #[test]
    fn test_filename_stem_multibyte_tail_is_left_alone() {
        // Names whose last four bytes split a character must not panic.
        assert_eq!(filename_stem("résumé"), "résumé");
        assert_eq!(filename_stem("文書"), "文書");
        assert_eq!(filename_stem("报告.pdf"), "报告");
        assert_eq!(filename_stem("ab€"), "ab€");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let fetcher = FixtureFetcher {
            pages: std::collections::HashMap::new(),
        };
        let result = Discoverer::new(Arc::new(fetcher), "not a url");
        assert!(matches!(result, Err(DiscoveryError::InvalidBaseUrl { .. })));
    }

    #[test]
    fn test_listing_url_layout() {
        let d = discoverer(&[]);
        assert_eq!(
            d.listing_url(7, 0),
            "https://docs.example.gov/disclosures/data-set-7-files"
        );
        assert_eq!(
            d.listing_url(7, 2),
            "https://docs.example.gov/disclosures/data-set-7-files?page=2"
        );
    }

    #[tokio::test]
    async fn test_discover_dataset_single_page() {
        let d = discoverer(&[(
            "https://docs.example.gov/disclosures/data-set-1-files",
            r#"<a href="/files/A.pdf">A</a> <a href="/files/B.pdf">B</a>"#,
        )]);
        let links = d.discover_dataset(1).await.unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].id, "1/A");
        assert_eq!(links[1].id, "1/B");
    }

    #[tokio::test]
    async fn test_discover_dataset_follows_pagination() {
        let d = discoverer(&[
            (
                "https://docs.example.gov/disclosures/data-set-1-files",
                r#"<a href="/files/A.pdf">A</a>"#,
            ),
            (
                "https://docs.example.gov/disclosures/data-set-1-files?page=1",
                r#"<a href="/files/B.pdf">B</a>"#,
            ),
            (
                "https://docs.example.gov/disclosures/data-set-1-files?page=2",
                // Repeats page-1 content only: pagination stops here.
                r#"<a href="/files/B.pdf">B</a>"#,
            ),
        ]);
        let links = d.discover_dataset(1).await.unwrap();
        assert_eq!(links.len(), 2);
    }

    #[tokio::test]
    async fn test_discover_dataset_first_page_failure_is_error() {
        let d = discoverer(&[]);
        let result = d.discover_dataset(9).await;
        assert!(matches!(result, Err(DiscoveryError::HttpStatus { .. })));
    }

    #[tokio::test]
    async fn test_discover_range_isolates_failures() {
        let d = discoverer(&[
            (
                "https://docs.example.gov/disclosures/data-set-1-files",
                r#"<a href="/files/A.pdf">A</a>"#,
            ),
            // dataset 2 has no fixture: fetch fails
            (
                "https://docs.example.gov/disclosures/data-set-3-files",
                r#"<a href="/files/C.pdf">C</a>"#,
            ),
        ]);
        let outcome = d.discover_range(1, 3).await;
        assert_eq!(outcome.links.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, 2);
    }

    #[tokio::test]
    async fn test_discover_range_rerun_is_idempotent() {
        let d = discoverer(&[(
            "https://docs.example.gov/disclosures/data-set-1-files",
            r#"<a href="/files/A.pdf">A</a> <a href="/files/B.pdf">B</a>"#,
        )]);
        let first = d.discover_range(1, 1).await;
        let second = d.discover_range(1, 1).await;
        assert_eq!(first.links, second.links);
    }

    #[test]
    fn test_merge_links_grows_monotonically() {
        let existing = vec![DocumentLink::new("https://x/A.pdf", 1, "A.pdf")];
        let discovered = vec![
            DocumentLink::new("https://x/A.pdf", 1, "A.pdf"),
            DocumentLink::new("https://x/B.pdf", 1, "B.pdf"),
        ];
        let (merged, added) = merge_links(existing, discovered);
        assert_eq!(merged.len(), 2);
        assert_eq!(added, 1);
        assert_eq!(merged[0].id, "1/A");
        assert_eq!(merged[1].id, "1/B");
    }

    #[test]
    fn test_merge_links_unchanged_when_no_new() {
        let existing = vec![
            DocumentLink::new("https://x/A.pdf", 1, "A.pdf"),
            DocumentLink::new("https://x/B.pdf", 1, "B.pdf"),
        ];
        let (merged, added) = merge_links(existing.clone(), existing.clone());
        assert_eq!(merged, existing);
        assert_eq!(added, 0);
    }
}
