//! JSON change feed used to seed the cache.

use super::SyncBatch;

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read a `SyncBatch` from a JSON file.
pub fn load_sync_file<P: AsRef<Path>>(path: P) -> Result<SyncBatch, FeedError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let batch: SyncBatch = serde_json::from_str(&text)?;

    tracing::debug!(
        "Feed: loaded {} maintenance rows from {}",
        batch.maintenances.len(),
        path.as_ref().display()
    );
    Ok(batch)
}
