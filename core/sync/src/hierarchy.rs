//! Page placement: rebuild the nested page tree from a flat, leveled listing.
//!
//! The remote API returns a section's pages as one flat list where each page
//! carries an `order` and a nesting `level`. Walking that list in order with a
//! stack of "current directory per level" recovers the tree shown in the
//! native application: a page at level L lives under the nearest page seen
//! before it at a lower level.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use notemirror_common::{sanitize_name, Error, Result};
use notemirror_graph::RemoteNode;

/// Deepest page level that can be placed.
pub const MAX_PAGE_LEVEL: u32 = 3;

const LEVEL_SLOTS: usize = MAX_PAGE_LEVEL as usize + 1;

/// Directory assigned to one page, or the reason it has none.
#[derive(Debug)]
pub struct PagePlacement {
    pub page: RemoteNode,
    pub dir: Result<PathBuf>,
}

/// Directory name of a page: its order, a space, and its title.
///
/// `position` (1-based, after sorting) stands in for a missing order.
pub fn page_dir_name(page: &RemoteNode, position: usize) -> String {
    let order = page
        .order
        .map(|o| o.to_string())
        .unwrap_or_else(|| position.to_string());
    sanitize_name(&format!("{} {}", order, page.name()))
}

/// Place every page of a section under `section_dir`.
///
/// Pages are stable-sorted by ascending order first; pages without an order
/// follow the ordered ones in listing order. The result follows that sorted
/// order. A page whose level has no ancestor gets an
/// `Error::MalformedHierarchy` and leaves the level stack untouched, so later
/// pages are placed as if it were absent.
pub fn place(mut pages: Vec<RemoteNode>, section_dir: &Path) -> Vec<PagePlacement> {
    pages.sort_by_key(|p| p.order.unwrap_or(i64::MAX));

    let mut level_dirs: [Option<PathBuf>; LEVEL_SLOTS] = Default::default();
    let mut siblings = SiblingDirs::new();
    let mut placements = Vec::with_capacity(pages.len());

    for (index, page) in pages.into_iter().enumerate() {
        let level = page.page_level() as usize;

        let dir = parent_dir(level, &level_dirs, section_dir, &page).map(|parent| {
            let dir = siblings.claim(&parent, &page_dir_name(&page, index + 1));
            level_dirs[level] = Some(dir.clone());
            for deeper in level_dirs.iter_mut().skip(level + 1) {
                *deeper = None;
            }
            dir
        });

        placements.push(PagePlacement { page, dir });
    }

    placements
}

fn parent_dir(
    level: usize,
    level_dirs: &[Option<PathBuf>; LEVEL_SLOTS],
    section_dir: &Path,
    page: &RemoteNode,
) -> Result<PathBuf> {
    if level == 0 {
        return Ok(section_dir.to_path_buf());
    }
    if level >= LEVEL_SLOTS {
        return Err(Error::MalformedHierarchy(format!(
            "page '{}' has level {}, deeper than the supported {}",
            page.name(),
            level,
            MAX_PAGE_LEVEL
        )));
    }

    level_dirs[..level]
        .iter()
        .rev()
        .find_map(|dir| dir.clone())
        .ok_or_else(|| {
            Error::MalformedHierarchy(format!(
                "page '{}' has level {} but no preceding page at a lower level",
                page.name(),
                level
            ))
        })
}

/// Hands out distinct directories to the children of one parent.
///
/// Names are compared case-insensitively, so two siblings never share a
/// directory on case-folding filesystems either. A name already handed out
/// gets the first free `" (n)"` suffix, starting at 2.
#[derive(Debug, Default)]
pub struct SiblingDirs {
    taken: HashSet<String>,
}

impl SiblingDirs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `parent/name`, or the first free numbered variant of it.
    pub fn claim(&mut self, parent: &Path, name: &str) -> PathBuf {
        let mut candidate = parent.join(name);
        let mut n = 2;
        while !self.taken.insert(candidate.to_string_lossy().to_lowercase()) {
            candidate = parent.join(format!("{} ({})", name, n));
            n += 1;
        }
        candidate
    }
}
