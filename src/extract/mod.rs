//! Per-page text extraction from downloaded documents.
//!
//! Parsing happens off the async runtime on the blocking thread pool, with a
//! per-document time budget so one pathological file cannot stall a batch.
//! A document that fails to parse is reported and skipped; a page that fails
//! to parse inside an otherwise readable document contributes empty text but
//! still counts toward the page total, so page numbering stays aligned with
//! the source file.

mod error;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use lopdf::Document;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

pub use error::ExtractionError;

use crate::download::{DownloadRecord, DownloadStatus};
use crate::shutdown::Shutdown;

/// Default per-document extraction budget.
pub const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 60;

/// Info-dictionary fields surfaced as document metadata.
const METADATA_FIELDS: [(&[u8], &str); 5] = [
    (b"Title", "title"),
    (b"Author", "author"),
    (b"Subject", "subject"),
    (b"Creator", "creator"),
    (b"Producer", "producer"),
];

/// One fully processed document, as it appears in the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    /// Stable identifier, shared with the link and download record.
    pub id: String,
    /// Source filename.
    pub filename: String,
    /// Dataset number the document came from.
    pub dataset: u32,
    /// Full text, pages joined by blank lines.
    pub text: String,
    /// Number of pages in the source document.
    pub pages: usize,
    /// Document metadata (title, author, and similar), where present.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// When extraction produced this record.
    pub processed_at: DateTime<Utc>,
}

/// Parsed content of one document, before corpus identity is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfContent {
    /// Full text, pages joined by blank lines.
    pub text: String,
    /// Number of pages.
    pub pages: usize,
    /// Info-dictionary metadata, where present.
    pub metadata: BTreeMap<String, String>,
}

/// Extracts text, page count, and metadata from a document's raw bytes.
///
/// Pure and synchronous; callers that hold an async runtime should go
/// through [`extract_file`], which moves this onto the blocking pool.
/// `path` is used for error context only.
///
/// # Errors
///
/// Returns [`ExtractionError::CorruptInput`] when the document cannot be
/// parsed, is encrypted, or contains no pages. A single unreadable page is
/// not an error; it yields empty text for that page.
pub fn extract_from_bytes(bytes: &[u8], path: &Path) -> Result<PdfContent, ExtractionError> {
    let doc =
        Document::load_mem(bytes).map_err(|e| ExtractionError::corrupt(path, e.to_string()))?;

    if doc.is_encrypted() {
        return Err(ExtractionError::corrupt(path, "document is encrypted"));
    }

    let page_ids: Vec<u32> = doc.get_pages().into_keys().collect();
    if page_ids.is_empty() {
        return Err(ExtractionError::corrupt(path, "document has no pages"));
    }
    let mut page_texts = Vec::with_capacity(page_ids.len());

    for page_num in &page_ids {
        match doc.extract_text(&[*page_num]) {
            Ok(text) => page_texts.push(text.trim().to_string()),
            Err(e) => {
                debug!(page = page_num, error = %e, "page failed to parse, keeping it empty");
                page_texts.push(String::new());
            }
        }
    }

    Ok(PdfContent {
        text: page_texts.join("\n\n").trim().to_string(),
        pages: page_ids.len(),
        metadata: extract_metadata(&doc),
    })
}

/// Reads the Info dictionary into a flat metadata map, best effort.
///
/// Absent dictionaries, dangling references, and non-string values all
/// yield an empty or partial map rather than an error.
fn extract_metadata(doc: &Document) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();

    let Ok(info_ref) = doc.trailer.get(b"Info") else {
        return metadata;
    };
    let Ok(info_id) = info_ref.as_reference() else {
        return metadata;
    };
    let Ok(info_obj) = doc.get_object(info_id) else {
        return metadata;
    };
    let Ok(dict) = info_obj.as_dict() else {
        return metadata;
    };

    for (key, name) in METADATA_FIELDS {
        if let Ok(value) = dict.get(key) {
            if let Ok(bytes) = value.as_str() {
                let text = String::from_utf8_lossy(bytes).trim().to_string();
                if !text.is_empty() {
                    metadata.insert(name.to_string(), text);
                }
            }
        }
    }

    metadata
}

/// Reads and parses one document within a time budget.
///
/// Parsing runs on the blocking thread pool so a large document does not
/// stall the async runtime.
///
/// # Errors
///
/// Returns [`ExtractionError::Io`] if the file cannot be read,
/// [`ExtractionError::Timeout`] if the budget elapses, and
/// [`ExtractionError::CorruptInput`] if parsing fails.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn extract_file(path: &Path, budget: Duration) -> Result<PdfContent, ExtractionError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ExtractionError::io(path, e))?;

    let owned_path = path.to_path_buf();
    let parse = tokio::task::spawn_blocking(move || {
        let result = extract_from_bytes(&bytes, &owned_path);
        (result, owned_path)
    });

    match tokio::time::timeout(budget, parse).await {
        Ok(Ok((result, _))) => result,
        Ok(Err(join_error)) => Err(ExtractionError::corrupt(
            path,
            format!("extraction task failed: {join_error}"),
        )),
        Err(_) => Err(ExtractionError::timeout(path, budget.as_secs())),
    }
}

/// Statistics from one extraction batch run.
#[derive(Debug, Default)]
pub struct ExtractionStats {
    extracted: AtomicUsize,
    failed: AtomicUsize,
}

impl ExtractionStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents successfully extracted.
    #[must_use]
    pub fn extracted(&self) -> usize {
        self.extracted.load(Ordering::SeqCst)
    }

    /// Number of documents that failed to extract.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    fn increment_extracted(&self) {
        self.extracted.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Concurrent extraction over a batch of downloaded documents.
///
/// Mirrors the download engine's shape: one task per document, a semaphore
/// bounding how many run at once, cooperative cancellation between
/// documents. Failed documents are logged and skipped; the batch never
/// aborts for one bad file.
#[derive(Debug)]
pub struct Extractor {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    budget: Duration,
}

impl Extractor {
    /// Creates an extractor with the given concurrency and per-document
    /// budget.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::InvalidConcurrency`] if `concurrency` is
    /// outside 1-100.
    pub fn new(concurrency: usize, budget: Duration) -> Result<Self, ExtractionError> {
        if !(1..=100).contains(&concurrency) {
            return Err(ExtractionError::InvalidConcurrency { value: concurrency });
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            budget,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Extracts every record that has a downloaded file on disk.
    ///
    /// Records that are not Succeeded, or whose file path is missing, are
    /// skipped silently (the download stage already reported them). Output
    /// comes back in input order, minus failures.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn process_records(
        &self,
        records: &[DownloadRecord],
        shutdown: &Shutdown,
        progress: Option<&ProgressBar>,
    ) -> (Vec<ExtractedDocument>, ExtractionStats) {
        let stats = Arc::new(ExtractionStats::new());
        let mut handles = Vec::new();

        info!(records = records.len(), "starting extraction batch");

        for (position, record) in records.iter().enumerate() {
            if shutdown.is_cancelled() {
                break;
            }

            if record.status != DownloadStatus::Succeeded {
                continue;
            }
            let Some(path) = record.local_path.clone() else {
                warn!(id = %record.link.id, "succeeded record has no file path, skipping");
                continue;
            };

            let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                break;
            };

            let link = record.link.clone();
            let stats = Arc::clone(&stats);
            let budget = self.budget;
            let progress = progress.cloned();

            handles.push(tokio::spawn(async move {
                let _permit = permit;

                let outcome = match extract_file(&path, budget).await {
                    Ok(content) => {
                        debug!(id = %link.id, pages = content.pages, "extracted document");
                        stats.increment_extracted();
                        Some(ExtractedDocument {
                            id: link.id,
                            filename: link.filename,
                            dataset: link.dataset,
                            text: content.text,
                            pages: content.pages,
                            metadata: content.metadata,
                            processed_at: Utc::now(),
                        })
                    }
                    Err(e) => {
                        warn!(id = %link.id, error = %e, "extraction failed, skipping document");
                        stats.increment_failed();
                        None
                    }
                };

                if let Some(bar) = progress {
                    bar.inc(1);
                }

                (position, outcome)
            }));
        }

        let mut results: Vec<(usize, ExtractedDocument)> = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((position, Some(doc))) => results.push((position, doc)),
                Ok((_, None)) => {}
                Err(e) => warn!(error = %e, "extraction task panicked"),
            }
        }
        results.sort_by_key(|(position, _)| *position);

        info!(
            extracted = stats.extracted(),
            failed = stats.failed(),
            "extraction batch complete"
        );

        let documents = results.into_iter().map(|(_, doc)| doc).collect();
        let stats = Arc::try_unwrap(stats).unwrap_or_else(|arc_stats| {
            let fresh = ExtractionStats::new();
            fresh
                .extracted
                .store(arc_stats.extracted(), Ordering::SeqCst);
            fresh.failed.store(arc_stats.failed(), Ordering::SeqCst);
            fresh
        });

        (documents, stats)
    }
}

/// Builds a minimal one-page-per-string document for tests.
#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) fn fixture_pdf(pages: &[&str]) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{Object, Stream, dictionary};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for page_text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*page_text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let kid_count = i64::try_from(kids.len()).unwrap();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => kid_count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::discover::DocumentLink;

    fn record_for(dir: &Path, dataset: u32, filename: &str, pages: &[&str]) -> DownloadRecord {
        let dest = dir.join(format!("dataset-{dataset}")).join(filename);
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, fixture_pdf(pages)).unwrap();

        let link = DocumentLink::new(
            format!("https://docs.example.gov/files/{filename}"),
            dataset,
            filename,
        );
        DownloadRecord::pending(link).succeeded(dest, 1)
    }

    #[test]
    fn test_extract_from_bytes_single_page() {
        let bytes = fixture_pdf(&["Exhibit 14 deposition transcript"]);
        let content = extract_from_bytes(&bytes, Path::new("A.pdf")).unwrap();
        assert_eq!(content.pages, 1);
        assert!(content.text.contains("Exhibit 14 deposition transcript"));
    }

    #[test]
    fn test_extract_from_bytes_counts_all_pages() {
        let bytes = fixture_pdf(&["first page", "second page", "third page"]);
        let content = extract_from_bytes(&bytes, Path::new("B.pdf")).unwrap();
        assert_eq!(content.pages, 3);
        assert!(content.text.contains("first page"));
        assert!(content.text.contains("third page"));
    }

    #[test]
    fn test_extract_from_bytes_is_deterministic() {
        let bytes = fixture_pdf(&["alpha", "beta"]);
        let first = extract_from_bytes(&bytes, Path::new("C.pdf")).unwrap();
        let second = extract_from_bytes(&bytes, Path::new("C.pdf")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_extract_from_bytes_rejects_garbage() {
        let err = extract_from_bytes(b"this is not a document", Path::new("bad.pdf")).unwrap_err();
        assert!(matches!(err, ExtractionError::CorruptInput { .. }));
    }

    #[test]
    fn test_extract_from_bytes_rejects_zero_page_document() {
        let bytes = fixture_pdf(&[]);
        let err = extract_from_bytes(&bytes, Path::new("empty.pdf")).unwrap_err();
        assert!(matches!(err, ExtractionError::CorruptInput { .. }));
        assert!(err.to_string().contains("no pages"));
    }

    #[tokio::test]
    async fn test_extract_file_zero_budget_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.pdf");
        let pages: Vec<String> = (0..50).map(|n| format!("page {n} body text")).collect();
        let page_refs: Vec<&str> = pages.iter().map(String::as_str).collect();
        std::fs::write(&path, fixture_pdf(&page_refs)).unwrap();

        let err = extract_file(&path, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Timeout { budget_secs: 0, .. }));
    }

    #[tokio::test]
    async fn test_extract_file_missing_is_io_error() {
        let err = extract_file(Path::new("/nonexistent/A.pdf"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Io { .. }));
    }

    #[tokio::test]
    async fn test_extract_file_reads_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, fixture_pdf(&["flight log entry"])).unwrap();

        let content = extract_file(&path, Duration::from_secs(30)).await.unwrap();
        assert_eq!(content.pages, 1);
        assert!(content.text.contains("flight log entry"));
    }

    #[test]
    fn test_extractor_rejects_invalid_concurrency() {
        let err = Extractor::new(0, Duration::from_secs(60)).unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::InvalidConcurrency { value: 0 }
        ));
        assert!(Extractor::new(101, Duration::from_secs(60)).is_err());
    }

    #[tokio::test]
    async fn test_process_records_extracts_succeeded_only() {
        let dir = tempfile::tempdir().unwrap();
        let good = record_for(dir.path(), 1, "A.pdf", &["contents of A"]);
        let failed = DownloadRecord::pending(DocumentLink::new(
            "https://docs.example.gov/files/B.pdf",
            1,
            "B.pdf",
        ))
        .failed("HTTP 404", 3);

        let extractor = Extractor::new(2, Duration::from_secs(30)).unwrap();
        let (documents, stats) = extractor
            .process_records(&[good, failed], &Shutdown::never(), None)
            .await;

        assert_eq!(stats.extracted(), 1);
        assert_eq!(stats.failed(), 0);
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].id, "1/A");
        assert_eq!(documents[0].dataset, 1);
        assert_eq!(documents[0].pages, 1);
        assert!(documents[0].text.contains("contents of A"));
    }

    #[tokio::test]
    async fn test_process_records_skips_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let good = record_for(dir.path(), 1, "A.pdf", &["contents of A"]);

        let bad_path = dir.path().join("dataset-1/broken.pdf");
        std::fs::write(&bad_path, b"not a document").unwrap();
        let bad = DownloadRecord::pending(DocumentLink::new(
            "https://docs.example.gov/files/broken.pdf",
            1,
            "broken.pdf",
        ))
        .succeeded(bad_path, 1);

        let extractor = Extractor::new(2, Duration::from_secs(30)).unwrap();
        let (documents, stats) = extractor
            .process_records(&[bad, good], &Shutdown::never(), None)
            .await;

        assert_eq!(stats.extracted(), 1);
        assert_eq!(stats.failed(), 1);
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].id, "1/A");
    }

    #[tokio::test]
    async fn test_process_records_preserves_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let records: Vec<DownloadRecord> = (0..6)
            .map(|i| {
                record_for(
                    dir.path(),
                    1,
                    &format!("doc-{i}.pdf"),
                    &[&format!("text {i}")],
                )
            })
            .collect();

        let extractor = Extractor::new(4, Duration::from_secs(30)).unwrap();
        let (documents, _) = extractor
            .process_records(&records, &Shutdown::never(), None)
            .await;

        let ids: Vec<&str> = documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1/doc-0", "1/doc-1", "1/doc-2", "1/doc-3", "1/doc-4", "1/doc-5"]);
    }

    #[tokio::test]
    async fn test_process_records_cancelled_extracts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let record = record_for(dir.path(), 1, "A.pdf", &["contents"]);

        let (handle, shutdown) = crate::shutdown::channel();
        handle.trigger();

        let extractor = Extractor::new(1, Duration::from_secs(30)).unwrap();
        let (documents, stats) = extractor.process_records(&[record], &shutdown, None).await;

        assert!(documents.is_empty());
        assert_eq!(stats.extracted(), 0);
    }

    #[test]
    fn test_extracted_document_serde_round_trip() {
        let doc = ExtractedDocument {
            id: "1/A".to_string(),
            filename: "A.pdf".to_string(),
            dataset: 1,
            text: "page one\n\npage two".to_string(),
            pages: 2,
            metadata: BTreeMap::from([("title".to_string(), "Exhibit A".to_string())]),
            processed_at: Utc::now(),
        };
        let json = serde_json::to_string(&doc).unwrap();
        let back: ExtractedDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_metadata_absent_for_fixture() {
        // Fixture documents carry no Info dictionary.
        let bytes = fixture_pdf(&["plain"]);
        let content = extract_from_bytes(&bytes, Path::new("plain.pdf")).unwrap();
        assert!(content.metadata.is_empty());
    }

    #[test]
    fn test_record_for_helper_writes_under_dataset_dir() {
        let dir = tempfile::tempdir().unwrap();
        let record = record_for(dir.path(), 4, "X.pdf", &["x"]);
        assert_eq!(
            record.local_path,
            Some(PathBuf::from(dir.path().join("dataset-4/X.pdf")))
        );
    }
}
