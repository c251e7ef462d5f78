//! Freshness decisions: is the local mirror of a node behind the remote?

use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::debug;

use notemirror_common::Result;
use notemirror_graph::RemoteNode;

/// Outcome of comparing a mirror entry with its remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// No metadata file: the node was never mirrored (or never completed).
    Missing,
    /// The remote node changed after the metadata file was written.
    Stale,
    /// The metadata file is strictly newer than the remote modification.
    Fresh,
}

impl Freshness {
    /// Whether the node has to be synchronized.
    pub fn needs_sync(&self) -> bool {
        !matches!(self, Freshness::Fresh)
    }
}

/// Compare the mtime of `metadata_path` with the node's modification time.
///
/// A node without any timestamp can never be proven fresh.
pub async fn check(metadata_path: &Path, node: &RemoteNode) -> Result<Freshness> {
    let local = match fs::metadata(metadata_path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Freshness::Missing),
        Err(e) => return Err(e.into()),
    };
    let local_modified: DateTime<Utc> = local.modified()?.into();

    let freshness = match node.modified_at() {
        Some(remote_modified) if local_modified > remote_modified => Freshness::Fresh,
        _ => Freshness::Stale,
    };

    debug!(
        "{} '{}': local {} vs remote {:?} -> {:?}",
        metadata_path.display(),
        node.name(),
        local_modified,
        node.modified_at(),
        freshness
    );
    Ok(freshness)
}

/// Whether the node needs a sync; unreadable metadata counts as stale.
pub async fn is_stale(metadata_path: &Path, node: &RemoteNode) -> bool {
    match check(metadata_path, node).await {
        Ok(freshness) => freshness.needs_sync(),
        Err(e) => {
            debug!("Cannot read {}: {}", metadata_path.display(), e);
            true
        }
    }
}
