use std::path::PathBuf;

use thiserror::Error;
use tracking::VaultError;

/// Failures reading or writing persisted state.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The file could not be read or written.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file content is not valid JSON of the expected shape.
    #[error("Malformed file {path}: {source}")]
    Json {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// The file was written by an incompatible version.
    #[error("Unsupported snapshot version {found} in {path}")]
    UnsupportedVersion {
        /// File involved.
        path: PathBuf,
        /// Version found in the file.
        found: u32,
    },

    /// The vault key is not 32 base64-encoded bytes.
    #[error("Invalid vault key: {reason}")]
    InvalidKey {
        /// What was wrong with it.
        reason: String,
    },
}

impl From<StorageError> for VaultError {
    fn from(error: StorageError) -> Self {
        VaultError::Storage {
            message: error.to_string(),
        }
    }
}
