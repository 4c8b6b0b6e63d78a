//! On-disk form of the tracking store.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tracking::Tracking;

use crate::{atomic_write, StorageError};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// `{ "version": 1, "trackings": [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    /// Format version.
    pub version: u32,
    /// Every tracking, markers included.
    pub trackings: Vec<Tracking>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    trackings: &'a [Tracking],
}

impl TrackingSnapshot {
    /// Reads the trackings stored at `path`. A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Vec<Tracking>, StorageError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No tracking snapshot found, starting empty");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(StorageError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let snapshot: TrackingSnapshot =
            serde_json::from_slice(&bytes).map_err(|source| StorageError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StorageError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: snapshot.version,
            });
        }
        debug!(path = %path.display(), trackings = snapshot.trackings.len(), "Tracking snapshot loaded");
        Ok(snapshot.trackings)
    }

    /// Atomically replaces the snapshot at `path`.
    pub fn save(path: &Path, trackings: &[Tracking]) -> Result<(), StorageError> {
        let body = serde_json::to_vec_pretty(&SnapshotRef {
            version: SNAPSHOT_VERSION,
            trackings,
        })
        .map_err(|source| StorageError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        atomic_write(path, &body, None).map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), trackings = trackings.len(), "Tracking snapshot saved");
        Ok(())
    }
}
