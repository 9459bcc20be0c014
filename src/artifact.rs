//! Durable JSON artifact persistence shared by all pipeline stages.
//!
//! Every stage commits its output as a JSON document on disk (`links.json`,
//! `downloads.json`, `corpus.json`). Writes are staged to a sibling temp file
//! and renamed into place, so an observer never reads a partially written
//! artifact and a crash mid-write leaves the previous good copy intact.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

/// Suffix appended to the target filename while a write is staged.
const STAGING_SUFFIX: &str = ".tmp";

/// Errors from reading or writing a JSON artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The artifact does not exist. Usually means the producing stage
    /// has not been run yet.
    #[error("artifact not found: {}", path.display())]
    Missing {
        /// Path that was expected to exist.
        path: PathBuf,
    },

    /// File system failure while reading or writing.
    #[error("IO error on artifact {}: {source}", path.display())]
    Io {
        /// The artifact path involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The artifact exists but is not valid JSON for the expected shape.
    #[error("malformed artifact {}: {source}", path.display())]
    Malformed {
        /// The artifact path involved.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Reads and deserializes a JSON artifact.
///
/// # Errors
///
/// Returns [`ArtifactError::Missing`] if the file does not exist,
/// [`ArtifactError::Io`] on read failure, and [`ArtifactError::Malformed`]
/// if the contents do not deserialize.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::Missing {
            path: path.to_path_buf(),
        });
    }
    let bytes = fs::read(path).map_err(|e| ArtifactError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| ArtifactError::Malformed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Serializes `value` and atomically replaces the artifact at `path`.
///
/// The JSON is written to `<path>.tmp` first, flushed, then renamed over the
/// target. Parent directories are created as needed.
///
/// # Errors
///
/// Returns [`ArtifactError::Io`] on any file system failure and
/// [`ArtifactError::Malformed`] if serialization fails.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ArtifactError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let json = serde_json::to_vec_pretty(value).map_err(|e| ArtifactError::Malformed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let staging = staging_path(path);
    fs::write(&staging, &json).map_err(|e| ArtifactError::Io {
        path: staging.clone(),
        source: e,
    })?;
    fs::rename(&staging, path).map_err(|e| ArtifactError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    debug!(path = %path.display(), bytes = json.len(), "artifact committed");
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map_or_else(
        || std::ffi::OsString::from("artifact"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(STAGING_SUFFIX);
    path.with_file_name(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let value = Sample {
            name: "alpha".to_string(),
            count: 3,
        };

        write_json_atomic(&path, &value).unwrap();
        let loaded: Sample = read_json(&path).unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn test_write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/sample.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_write_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        write_json_atomic(&path, &42u32).unwrap();
        assert!(!staging_path(&path).exists());
    }

    #[test]
    fn test_write_replaces_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        write_json_atomic(&path, &1u32).unwrap();
        write_json_atomic(&path, &2u32).unwrap();
        let loaded: u32 = read_json(&path).unwrap();
        assert_eq!(loaded, 2);
    }

    #[test]
    fn test_read_missing_is_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = read_json::<u32>(&path).unwrap_err();
        assert!(matches!(err, ArtifactError::Missing { .. }));
    }

    #[test]
    fn test_read_malformed_is_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, b"not json at all").unwrap();
        let err = read_json::<u32>(&path).unwrap_err();
        assert!(matches!(err, ArtifactError::Malformed { .. }));
    }
}
