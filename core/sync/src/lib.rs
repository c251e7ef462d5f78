//! notemirror sync engine
//!
//! This module mirrors a remote notebook hierarchy onto a local directory tree:
//! - Freshness checks against metadata file mtimes, skipping whole subtrees
//! - Page placement rebuilding nested pages from their order and level
//! - Resource localization for embedded images and attachments
//! - Concurrent, cancellable traversal with per-node failure isolation
//! - Maintenance purge of files no metadata entry references

pub mod engine;
pub mod filter;
pub mod freshness;
pub mod hierarchy;
pub mod mirror;
pub mod purge;
pub mod report;
pub mod rewriter;

// Re-export main types
pub use engine::{SyncConfig, SyncEngine};
pub use filter::{NameFilter, SyncFilters};
pub use freshness::{is_stale, Freshness};
pub use hierarchy::{place, PagePlacement, SiblingDirs, MAX_PAGE_LEVEL};
pub use mirror::{LocalMirrorEntry, ResourceKind, ResourceRef, CONTENT_FILE};
pub use purge::{purge, referenced_files, PurgeReport, ReferencedFiles};
pub use report::{FailureRecord, NodeReport, SyncReport, SyncStats};
pub use rewriter::{ResourceRewriter, RewriteOutcome};
