//! Mirror maintenance: find and remove files no metadata entry accounts for.
//!
//! Page directories accumulate stale resources when pages change and a killed
//! run can leave temporary files behind. The synchronizer never deletes those;
//! purging is an explicit maintenance step.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use notemirror_common::{Error, NodeKind, Result};

use crate::mirror::LocalMirrorEntry;

/// Files referenced by the mirror under a root.
#[derive(Debug, Default)]
pub struct ReferencedFiles {
    /// Metadata, content and resource files of every readable entry.
    pub files: HashSet<PathBuf>,
    /// Directories whose metadata could not be read; left alone entirely.
    pub protected: Vec<PathBuf>,
}

impl ReferencedFiles {
    /// Whether purging must keep `path`.
    pub fn keeps(&self, path: &Path) -> bool {
        self.files.contains(path) || self.protected.iter().any(|dir| path.starts_with(dir))
    }
}

/// What a purge removed, or would remove in a dry run.
#[derive(Debug, Default)]
pub struct PurgeReport {
    pub dry_run: bool,
    pub files: Vec<PathBuf>,
    pub bytes: u64,
    pub dirs: Vec<PathBuf>,
}

/// Collect every file referenced by a metadata file under `root`.
pub fn referenced_files(root: &Path) -> Result<ReferencedFiles> {
    if !root.is_dir() {
        return Err(Error::InvalidInput(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut referenced = ReferencedFiles::default();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        if NodeKind::from_metadata_file_name(&name).is_none() {
            continue;
        }

        let path = entry.path();
        let Some(dir) = path.parent() else {
            continue;
        };

        match fs::read_to_string(path)
            .map_err(Error::from)
            .and_then(|json| LocalMirrorEntry::from_json(&json))
        {
            Ok(mirror_entry) => referenced.files.extend(mirror_entry.referenced_files(dir)),
            Err(e) => {
                warn!("Keeping {} untouched: {}: {}", dir.display(), path.display(), e);
                referenced.files.insert(path.to_path_buf());
                referenced.protected.push(dir.to_path_buf());
            }
        }
    }

    debug!(
        "{} files referenced under {}",
        referenced.files.len(),
        root.display()
    );
    Ok(referenced)
}

/// Remove every unreferenced file under `root`, then the directories left
/// empty. The root itself is never removed.
pub fn purge(root: &Path, dry_run: bool) -> Result<PurgeReport> {
    let referenced = referenced_files(root)?;
    let mut report = PurgeReport {
        dry_run,
        ..PurgeReport::default()
    };

    let orphans: Vec<(PathBuf, u64)> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && !referenced.keeps(e.path()))
        .map(|e| {
            let size = e.metadata().map(|m| m.len()).unwrap_or(0);
            (e.into_path(), size)
        })
        .collect();

    for (path, size) in orphans {
        if dry_run {
            info!("Would remove {}", path.display());
        } else {
            fs::remove_file(&path)?;
            debug!("Removed {}", path.display());
        }
        report.bytes += size;
        report.files.push(path);
    }

    if !dry_run {
        for entry in WalkDir::new(root)
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
        {
            let is_empty = fs::read_dir(entry.path())
                .map(|mut it| it.next().is_none())
                .unwrap_or(false);
            if is_empty {
                fs::remove_dir(entry.path())?;
                report.dirs.push(entry.into_path());
            }
        }
    }

    info!(
        "Purge of {}: {} files ({} bytes), {} directories{}",
        root.display(),
        report.files.len(),
        report.bytes,
        report.dirs.len(),
        if dry_run { " (dry run)" } else { "" }
    );
    Ok(report)
}
