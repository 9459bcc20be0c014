//! Incremental corpus assembly.
//!
//! The corpus (`corpus.json`) is the pipeline's final artifact: one entry
//! per document id, insertion-ordered, written atomically. Assembly is a
//! merge, not a rebuild: rerunning the pipeline folds newly extracted
//! documents into the existing corpus, so documents from earlier runs
//! survive even when their source files are no longer around.
//!
//! A re-extracted document whose text and page count are unchanged keeps its
//! existing entry untouched, including `processed_at`, which keeps repeat
//! runs byte-stable.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, instrument};

use crate::artifact::{self, ArtifactError};
use crate::extract::ExtractedDocument;

/// Outcome counts from one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Documents whose id was not in the corpus before.
    pub added: usize,
    /// Documents whose content changed since the last run.
    pub updated: usize,
    /// Documents identical to their existing entry.
    pub unchanged: usize,
}

impl MergeSummary {
    /// Total number of documents considered.
    #[must_use]
    pub fn total(&self) -> usize {
        self.added + self.updated + self.unchanged
    }
}

/// The assembled corpus: insertion-ordered documents keyed by id.
#[derive(Debug, Default)]
pub struct CorpusSnapshot {
    documents: Vec<ExtractedDocument>,
    index: HashMap<String, usize>,
}

impl CorpusSnapshot {
    /// Creates an empty corpus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the corpus from disk; a missing file yields an empty corpus
    /// (first run).
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        match artifact::read_json::<Vec<ExtractedDocument>>(path) {
            Ok(documents) => {
                let mut corpus = Self::new();
                for document in documents {
                    corpus.insert(document);
                }
                debug!(documents = corpus.len(), "loaded existing corpus");
                Ok(corpus)
            }
            Err(ArtifactError::Missing { .. }) => Ok(Self::new()),
            Err(e) => Err(e),
        }
    }

    /// Atomically writes the corpus to disk.
    ///
    /// # Errors
    ///
    /// Returns an error on serialization or file system failure.
    pub fn store(&self, path: &Path) -> Result<(), ArtifactError> {
        artifact::write_json_atomic(path, &self.documents)
    }

    /// Folds a batch of extracted documents into the corpus.
    ///
    /// New ids append in input order. Known ids are classified: an entry
    /// with identical text and page count is left completely untouched,
    /// anything else is replaced in place.
    #[instrument(skip_all, fields(incoming = documents.len(), existing = self.len()))]
    pub fn merge(&mut self, documents: Vec<ExtractedDocument>) -> MergeSummary {
        let mut summary = MergeSummary::default();

        for document in documents {
            match self.index.get(&document.id) {
                Some(&position) => {
                    let existing = &self.documents[position];
                    if existing.text == document.text && existing.pages == document.pages {
                        summary.unchanged += 1;
                    } else {
                        debug!(id = %document.id, "document content changed, replacing entry");
                        self.documents[position] = document;
                        summary.updated += 1;
                    }
                }
                None => {
                    self.insert(document);
                    summary.added += 1;
                }
            }
        }

        info!(
            added = summary.added,
            updated = summary.updated,
            unchanged = summary.unchanged,
            corpus_size = self.len(),
            "merge complete"
        );
        summary
    }

    /// Appends a document, indexing it by id. Caller guarantees the id is
    /// not already present.
    fn insert(&mut self, document: ExtractedDocument) {
        self.index
            .insert(document.id.clone(), self.documents.len());
        self.documents.push(document);
    }

    /// Looks up a document by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ExtractedDocument> {
        self.index.get(id).map(|&position| &self.documents[position])
    }

    /// All documents in insertion order.
    #[must_use]
    pub fn documents(&self) -> &[ExtractedDocument] {
        &self.documents
    }

    /// Number of documents in the corpus.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the corpus is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;

    fn doc(id_stem: &str, text: &str, pages: usize) -> ExtractedDocument {
        ExtractedDocument {
            id: format!("1/{id_stem}"),
            filename: format!("{id_stem}.pdf"),
            dataset: 1,
            text: text.to_string(),
            pages,
            metadata: BTreeMap::new(),
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn test_merge_adds_new_documents_in_order() {
        let mut corpus = CorpusSnapshot::new();
        let summary = corpus.merge(vec![doc("A", "text a", 1), doc("B", "text b", 2)]);

        assert_eq!(summary.added, 2);
        assert_eq!(summary.total(), 2);
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.documents()[0].id, "1/A");
        assert_eq!(corpus.documents()[1].id, "1/B");
    }

    #[test]
    fn test_merge_unchanged_keeps_original_entry() {
        let mut corpus = CorpusSnapshot::new();
        let original = doc("A", "stable text", 3);
        let original_processed_at = original.processed_at;
        corpus.merge(vec![original]);

        // Same content extracted later: the old entry survives whole.
        let mut rerun = doc("A", "stable text", 3);
        rerun.processed_at = Utc::now();
        let summary = corpus.merge(vec![rerun]);

        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.added, 0);
        assert_eq!(corpus.len(), 1);
        assert_eq!(
            corpus.get("1/A").unwrap().processed_at,
            original_processed_at
        );
    }

    #[test]
    fn test_merge_updated_replaces_in_place() {
        let mut corpus = CorpusSnapshot::new();
        corpus.merge(vec![doc("A", "old text", 1), doc("B", "text b", 1)]);

        let summary = corpus.merge(vec![doc("A", "revised text", 2)]);

        assert_eq!(summary.updated, 1);
        assert_eq!(corpus.len(), 2, "update must not duplicate");
        assert_eq!(corpus.get("1/A").unwrap().text, "revised text");
        assert_eq!(corpus.get("1/A").unwrap().pages, 2);
        // Position in the corpus is stable across updates.
        assert_eq!(corpus.documents()[0].id, "1/A");
    }

    #[test]
    fn test_merge_is_additive_across_runs() {
        let mut corpus = CorpusSnapshot::new();
        corpus.merge(vec![doc("A", "a", 1), doc("B", "b", 1)]);
        corpus.merge(vec![doc("C", "c", 1)]);

        assert_eq!(corpus.len(), 3);
        assert!(corpus.get("1/A").is_some());
        assert!(corpus.get("1/C").is_some());
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = CorpusSnapshot::load(&dir.path().join("corpus.json")).unwrap();
        assert!(corpus.is_empty());
    }

    #[test]
    fn test_store_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");

        let mut corpus = CorpusSnapshot::new();
        corpus.merge(vec![doc("A", "text a", 1), doc("B", "text b", 2)]);
        corpus.store(&path).unwrap();

        let loaded = CorpusSnapshot::load(&path).unwrap();
        assert_eq!(loaded.documents(), corpus.documents());
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = CorpusSnapshot::load(&path).unwrap_err();
        assert!(matches!(err, ArtifactError::Malformed { .. }));
    }
}
