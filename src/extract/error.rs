//! Error types for text extraction.

use std::path::PathBuf;

/// Error type for extraction operations.
///
/// Constructors carry full context so call sites stay terse. No `From` impls
/// here: conversions pick which variant applies, and that choice needs the
/// path.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// The document could not be parsed at all (malformed, truncated, or
    /// encrypted).
    #[error("cannot extract text from {}: {reason}", path.display())]
    CorruptInput {
        /// The file that failed to parse.
        path: PathBuf,
        /// What went wrong, from the parser.
        reason: String,
    },

    /// Extraction exceeded its per-document time budget.
    #[error("extraction of {} exceeded {budget_secs}s budget", path.display())]
    Timeout {
        /// The file being processed.
        path: PathBuf,
        /// The budget that was exceeded, in seconds.
        budget_secs: u64,
    },

    /// The file could not be read from disk.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid concurrency value provided.
    #[error("invalid concurrency value {value}: must be between 1 and 100")]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },
}

impl ExtractionError {
    /// Creates a `CorruptInput` error.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(path: impl Into<PathBuf>, budget_secs: u64) -> Self {
        Self::Timeout {
            path: path.into(),
            budget_secs,
        }
    }

    /// Creates an `Io` error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
