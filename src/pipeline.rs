//! Stage orchestration over durable artifacts.
//!
//! Each stage reads its input artifact, does its work, and atomically
//! rewrites its output artifact:
//!
//! - discovery:  listing pages  -> `links.json`
//! - download:   `links.json`   -> `downloads.json` + files under `pdfs/`
//! - extraction: `downloads.json` -> `corpus.json`
//!
//! Stages can run individually or chained; every artifact write is a merge
//! into what the previous run left behind, which is what makes the whole
//! pipeline resumable.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, instrument, warn};

use crate::artifact::{self, ArtifactError};
use crate::corpus::{CorpusSnapshot, MergeSummary};
use crate::discover::{
    Discoverer, DiscoveryError, DocumentLink, HttpListingFetcher, merge_links,
};
use crate::download::{
    DownloadEngine, DownloadManifest, DownloadRecord, DownloadStatus, EngineError, HttpClient,
    RateLimiter, RetryPolicy,
};
use crate::extract::{DEFAULT_EXTRACT_TIMEOUT_SECS, ExtractionError, Extractor};
use crate::shutdown::Shutdown;

/// Default listing origin for the DOJ disclosure datasets.
pub const DEFAULT_BASE_URL: &str = "https://www.justice.gov/epstein/doj-disclosures";

/// Default first and last dataset numbers published by the source site.
pub const DEFAULT_DATASETS: (u32, u32) = (1, 12);

/// Default per-host request spacing in milliseconds.
pub const DEFAULT_RATE_LIMIT_MS: u64 = 1000;

/// Error type for pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Link discovery failed outright.
    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// The download engine could not be constructed or run.
    #[error("download engine error: {0}")]
    Engine(#[from] EngineError),

    /// The extractor could not be constructed.
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// An artifact could not be read or written.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// A stage was run before the stage that produces its input.
    #[error("missing artifact {}: {hint}", path.display())]
    MissingArtifact {
        /// The artifact that was expected.
        path: PathBuf,
        /// Which stage to run first.
        hint: String,
    },
}

/// Settings shared by all pipeline stages.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Listing origin the dataset pages live under.
    pub base_url: String,
    /// Inclusive range of dataset numbers to process.
    pub datasets: (u32, u32),
    /// Directory holding all artifacts and downloaded files.
    pub data_dir: PathBuf,
    /// Maximum concurrent downloads and extractions.
    pub concurrency: usize,
    /// Maximum download attempts per link.
    pub max_retries: u32,
    /// Minimum spacing between requests to the same host, in milliseconds.
    pub rate_limit_ms: u64,
    /// Cap on how many pending links the download stage attempts this run.
    pub download_limit: Option<usize>,
    /// Whether to render progress bars.
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            datasets: DEFAULT_DATASETS,
            data_dir: PathBuf::from("./data"),
            concurrency: crate::download::DEFAULT_CONCURRENCY,
            max_retries: crate::download::DEFAULT_MAX_RETRIES,
            rate_limit_ms: DEFAULT_RATE_LIMIT_MS,
            download_limit: None,
            show_progress: false,
        }
    }
}

impl PipelineConfig {
    /// Path of the discovery artifact.
    #[must_use]
    pub fn links_path(&self) -> PathBuf {
        self.data_dir.join("links.json")
    }

    /// Path of the download manifest artifact.
    #[must_use]
    pub fn downloads_path(&self) -> PathBuf {
        self.data_dir.join("downloads.json")
    }

    /// Path of the assembled corpus artifact.
    #[must_use]
    pub fn corpus_path(&self) -> PathBuf {
        self.data_dir.join("corpus.json")
    }

    /// Root directory for downloaded files, one subdirectory per dataset.
    #[must_use]
    pub fn pdfs_dir(&self) -> PathBuf {
        self.data_dir.join("pdfs")
    }
}

/// Outcome of the discovery stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoverySummary {
    /// Links in the artifact after the merge.
    pub total: usize,
    /// Links that were new this run.
    pub added: usize,
    /// Datasets whose listing could not be fetched.
    pub failed_datasets: usize,
}

/// Outcome of the download stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadSummary {
    /// Links whose file landed on disk this run.
    pub succeeded: usize,
    /// Links that exhausted retries or failed permanently.
    pub failed: usize,
    /// Links skipped because their file was already on disk.
    pub skipped: usize,
    /// Retry attempts made across the batch.
    pub retried: usize,
    /// Links still pending after this run (cancelled or capped by a limit).
    pub pending: usize,
}

/// Outcome of the extraction stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractionSummary {
    /// Documents whose text was extracted this run.
    pub extracted: usize,
    /// Documents that failed to parse.
    pub failed: usize,
    /// How the batch folded into the corpus.
    pub merge: MergeSummary,
    /// Documents in the corpus after the merge.
    pub corpus_size: usize,
}

/// Combined outcome of a full pipeline run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    /// Discovery stage outcome.
    pub discovery: DiscoverySummary,
    /// Download stage outcome.
    pub download: DownloadSummary,
    /// Extraction stage outcome.
    pub extraction: ExtractionSummary,
}

/// Crawls the configured dataset listings and merges new links into
/// `links.json`.
///
/// A dataset whose listing cannot be fetched is reported in the summary but
/// never discards links found in the other datasets, and never shrinks the
/// existing artifact.
///
/// # Errors
///
/// Returns an error if the base URL is invalid or the artifact cannot be
/// read or written.
#[instrument(skip(config), fields(datasets = ?config.datasets))]
pub async fn run_discovery(config: &PipelineConfig) -> Result<DiscoverySummary, PipelineError> {
    let discoverer = Discoverer::new(Arc::new(HttpListingFetcher::new()), &config.base_url)?;
    let (first, last) = config.datasets;
    let outcome = discoverer.discover_range(first, last).await;

    let existing = load_links_or_empty(&config.links_path())?;
    let (merged, added) = merge_links(existing, outcome.links);
    artifact::write_json_atomic(&config.links_path(), &merged)?;

    let summary = DiscoverySummary {
        total: merged.len(),
        added,
        failed_datasets: outcome.failed.len(),
    };
    info!(
        total = summary.total,
        added = summary.added,
        failed_datasets = summary.failed_datasets,
        "discovery stage complete"
    );
    Ok(summary)
}

/// Downloads every link in `links.json` that does not yet have its file,
/// updating `downloads.json`.
///
/// # Errors
///
/// Returns [`PipelineError::MissingArtifact`] if discovery has not run yet,
/// or an error if artifacts cannot be read or written. Individual download
/// failures land in the manifest, not here.
#[instrument(skip(config, shutdown))]
pub async fn run_download(
    config: &PipelineConfig,
    shutdown: &Shutdown,
) -> Result<DownloadSummary, PipelineError> {
    let links_path = config.links_path();
    if !links_path.exists() {
        return Err(PipelineError::MissingArtifact {
            path: links_path,
            hint: "run the discover stage first".to_string(),
        });
    }
    let links: Vec<DocumentLink> = artifact::read_json(&links_path)?;
    let mut manifest = DownloadManifest::load(&config.downloads_path())?;

    // Every known link gets a manifest entry, attempted or not.
    for link in &links {
        if manifest.get(&link.id).is_none() {
            manifest.upsert(DownloadRecord::pending(link.clone()));
        }
    }

    let mut pending: Vec<DocumentLink> = links
        .into_iter()
        .filter(|link| !is_settled(&manifest, link))
        .collect();
    if let Some(limit) = config.download_limit {
        pending.truncate(limit);
    }

    info!(
        pending = pending.len(),
        already_settled = manifest.count(DownloadStatus::Succeeded),
        "starting download stage"
    );

    let rate_limiter = Arc::new(RateLimiter::new(Duration::from_millis(config.rate_limit_ms)));
    let policy = RetryPolicy::with_max_attempts(config.max_retries);
    let engine = DownloadEngine::new(config.concurrency, policy, rate_limiter)?;
    let client = HttpClient::new();

    let progress = batch_bar(config.show_progress, pending.len() as u64, "downloading");
    let (records, stats) = engine
        .process_links(
            &pending,
            &client,
            &config.pdfs_dir(),
            shutdown,
            progress.as_ref(),
        )
        .await?;
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    for record in records {
        manifest.upsert(record);
    }
    manifest.store(&config.downloads_path())?;

    let summary = DownloadSummary {
        succeeded: stats.succeeded(),
        failed: stats.failed(),
        skipped: stats.skipped(),
        retried: stats.retried(),
        pending: manifest.count(DownloadStatus::Pending),
    };
    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped = summary.skipped,
        pending = summary.pending,
        "download stage complete"
    );
    Ok(summary)
}

/// Extracts text from every downloaded document and merges the results into
/// `corpus.json`.
///
/// All downloaded documents are re-extracted each run; the corpus merge
/// classifies unchanged content and leaves those entries untouched, so the
/// output stays stable across repeat runs.
///
/// # Errors
///
/// Returns [`PipelineError::MissingArtifact`] if the download stage has not
/// run yet, or an error if artifacts cannot be read or written.
#[instrument(skip(config, shutdown))]
pub async fn run_extraction(
    config: &PipelineConfig,
    shutdown: &Shutdown,
) -> Result<ExtractionSummary, PipelineError> {
    let downloads_path = config.downloads_path();
    if !downloads_path.exists() {
        return Err(PipelineError::MissingArtifact {
            path: downloads_path,
            hint: "run the download stage first".to_string(),
        });
    }
    let manifest = DownloadManifest::load(&downloads_path)?;

    let extractor = Extractor::new(
        config.concurrency,
        Duration::from_secs(DEFAULT_EXTRACT_TIMEOUT_SECS),
    )?;

    let downloaded = manifest.count(DownloadStatus::Succeeded);
    let progress = batch_bar(config.show_progress, downloaded as u64, "extracting");
    let (documents, stats) = extractor
        .process_records(manifest.records(), shutdown, progress.as_ref())
        .await;
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    let mut corpus = CorpusSnapshot::load(&config.corpus_path())?;
    let merge = corpus.merge(documents);
    corpus.store(&config.corpus_path())?;

    let summary = ExtractionSummary {
        extracted: stats.extracted(),
        failed: stats.failed(),
        merge,
        corpus_size: corpus.len(),
    };
    info!(
        extracted = summary.extracted,
        failed = summary.failed,
        added = merge.added,
        updated = merge.updated,
        unchanged = merge.unchanged,
        corpus_size = summary.corpus_size,
        "extraction stage complete"
    );
    Ok(summary)
}

/// Runs discovery, download, and extraction in sequence.
///
/// Cancellation between stages stops the chain; artifacts written by the
/// stages that did run are kept.
///
/// # Errors
///
/// Returns the first stage error encountered.
pub async fn run_all(
    config: &PipelineConfig,
    shutdown: &Shutdown,
) -> Result<RunSummary, PipelineError> {
    let discovery = run_discovery(config).await?;

    if shutdown.is_cancelled() {
        warn!("cancelled after discovery, stopping");
        return Ok(RunSummary {
            discovery,
            ..RunSummary::default()
        });
    }
    let download = run_download(config, shutdown).await?;

    if shutdown.is_cancelled() {
        warn!("cancelled after download, stopping");
        return Ok(RunSummary {
            discovery,
            download,
            ..RunSummary::default()
        });
    }
    let extraction = run_extraction(config, shutdown).await?;

    Ok(RunSummary {
        discovery,
        download,
        extraction,
    })
}

/// Whether a link already has its file and needs no work this run.
///
/// The file must exist and be non-empty; a zero-byte leftover from an
/// interrupted write goes back into the batch for a refetch.
fn is_settled(manifest: &DownloadManifest, link: &DocumentLink) -> bool {
    manifest.get(&link.id).is_some_and(|record| {
        record.status == DownloadStatus::Succeeded
            && record.local_path.as_deref().is_some_and(|path| {
                std::fs::metadata(path).is_ok_and(|metadata| metadata.len() > 0)
            })
    })
}

fn load_links_or_empty(path: &Path) -> Result<Vec<DocumentLink>, ArtifactError> {
    match artifact::read_json(path) {
        Ok(links) => Ok(links),
        Err(ArtifactError::Missing { .. }) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

fn batch_bar(show: bool, total: u64, message: &'static str) -> Option<ProgressBar> {
    if !show || total == 0 {
        return None;
    }
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message(message);
    Some(bar)
}
