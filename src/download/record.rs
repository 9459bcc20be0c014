//! Per-link download outcomes and the durable download manifest.
//!
//! The manifest (`downloads.json`) is the download stage's artifact: one
//! record per link, keyed by link id, insertion-ordered. Rerunning the stage
//! upserts records, so terminal outcomes survive across invocations and a
//! Succeeded record with its file on disk is never fetched again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifact::{self, ArtifactError};
use crate::discover::DocumentLink;

/// Lifecycle state of one link's download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Not yet attempted, or abandoned mid-flight (retryable on resume).
    Pending,
    /// The document is on disk at `local_path`. Terminal.
    Succeeded,
    /// All attempts exhausted or the failure was permanent. Terminal.
    Failed,
}

/// Outcome of downloading one [`DocumentLink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// The link this record tracks.
    pub link: DocumentLink,
    /// Current status.
    pub status: DownloadStatus,
    /// Where the document was written, once Succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    /// Number of fetch attempts made so far.
    pub attempts: u32,
    /// The last error observed, retained across runs for Failed records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl DownloadRecord {
    /// Creates a fresh Pending record for a link.
    #[must_use]
    pub fn pending(link: DocumentLink) -> Self {
        Self {
            link,
            status: DownloadStatus::Pending,
            local_path: None,
            attempts: 0,
            last_error: None,
        }
    }

    /// Marks the record Succeeded with the document's final path.
    #[must_use]
    pub fn succeeded(mut self, path: PathBuf, attempts: u32) -> Self {
        self.status = DownloadStatus::Succeeded;
        self.local_path = Some(path);
        self.attempts = attempts;
        self.last_error = None;
        self
    }

    /// Marks the record Failed, retaining the final error.
    #[must_use]
    pub fn failed(mut self, error: impl Into<String>, attempts: u32) -> Self {
        self.status = DownloadStatus::Failed;
        self.local_path = None;
        self.attempts = attempts;
        self.last_error = Some(error.into());
        self
    }
}

/// The download stage's durable artifact: insertion-ordered records keyed
/// by link id.
#[derive(Debug, Default)]
pub struct DownloadManifest {
    records: Vec<DownloadRecord>,
    index: HashMap<String, usize>,
}

impl DownloadManifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the manifest from disk; a missing file yields an empty manifest
    /// (first run).
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        match artifact::read_json::<Vec<DownloadRecord>>(path) {
            Ok(records) => {
                let mut manifest = Self::new();
                for record in records {
                    manifest.upsert(record);
                }
                Ok(manifest)
            }
            Err(ArtifactError::Missing { .. }) => Ok(Self::new()),
            Err(e) => Err(e),
        }
    }

    /// Atomically writes the manifest to disk.
    ///
    /// # Errors
    ///
    /// Returns an error on serialization or file system failure.
    pub fn store(&self, path: &Path) -> Result<(), ArtifactError> {
        artifact::write_json_atomic(path, &self.records)
    }

    /// Inserts or replaces the record for its link id. New ids append in
    /// insertion order; known ids are overwritten in place.
    pub fn upsert(&mut self, record: DownloadRecord) {
        match self.index.get(&record.link.id) {
            Some(&position) => self.records[position] = record,
            None => {
                self.index.insert(record.link.id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Looks up the record for a link id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&DownloadRecord> {
        self.index.get(id).map(|&position| &self.records[position])
    }

    /// All records in insertion order.
    #[must_use]
    pub fn records(&self) -> &[DownloadRecord] {
        &self.records
    }

    /// Records currently in the given status.
    pub fn with_status(&self, status: DownloadStatus) -> impl Iterator<Item = &DownloadRecord> {
        self.records.iter().filter(move |r| r.status == status)
    }

    /// Number of records in the given status.
    #[must_use]
    pub fn count(&self, status: DownloadStatus) -> usize {
        self.with_status(status).count()
    }

    /// Number of records tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the manifest is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
