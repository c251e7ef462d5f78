//! Tree synchronizer that mirrors the remote hierarchy onto disk.
//!
//! ```text
//! notebook      -> sections + section groups -> recurse -> notebook.json
//! section group -> sections + section groups -> recurse -> group.json
//! section       -> pages (leveled) -> placement  -> recurse -> section.json
//! page          -> content -> resources -> main.html + page.json
//! ```
//!
//! A container's metadata file is written last and only when its whole
//! subtree was mirrored, so its mtime can serve as the freshness mark for
//! everything beneath it.

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use notemirror_common::{sanitize_name, AccessToken, Error, NodeKind, Result};
use notemirror_graph::{
    BackoffConfig, Fetcher, GraphClient, Listing, RemoteNode, ReqwestTransport, DEFAULT_API_BASE,
};

use crate::filter::SyncFilters;
use crate::freshness;
use crate::hierarchy::{self, PagePlacement, SiblingDirs};
use crate::mirror::{self, LocalMirrorEntry, CONTENT_FILE};
use crate::report::{NodeReport, SyncReport};
use crate::rewriter::ResourceRewriter;

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Notebook API base URL.
    pub api_base: String,
    /// Directory the notebooks are mirrored into.
    pub output_root: PathBuf,
    /// Glob over notebook names.
    pub notebook_filter: Option<String>,
    /// Glob over section names.
    pub section_filter: Option<String>,
    /// Glob over page titles.
    pub page_filter: Option<String>,
    /// Ignore freshness and rebuild the selected subtrees.
    pub force: bool,
    /// Sibling nodes synchronized concurrently per level.
    pub max_parallel_nodes: usize,
    /// Requests in flight across the whole run.
    pub max_in_flight: usize,
    /// Bound on every single request, e.g. `"30s"`.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Rate-limit backoff schedule.
    pub backoff: BackoffConfig,
    /// Drop absolute positioning from page content.
    pub flatten_layout: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            output_root: PathBuf::from("notebooks"),
            notebook_filter: None,
            section_filter: None,
            page_filter: None,
            force: false,
            max_parallel_nodes: 4,
            max_in_flight: 4,
            request_timeout: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
            flatten_layout: false,
        }
    }
}

impl SyncConfig {
    /// Set the mirror root.
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    /// Set the API base URL.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Only mirror notebooks matching `pattern`.
    pub fn with_notebook_filter(mut self, pattern: impl Into<String>) -> Self {
        self.notebook_filter = Some(pattern.into());
        self
    }

    /// Only mirror sections matching `pattern`.
    pub fn with_section_filter(mut self, pattern: impl Into<String>) -> Self {
        self.section_filter = Some(pattern.into());
        self
    }

    /// Only mirror pages matching `pattern`.
    pub fn with_page_filter(mut self, pattern: impl Into<String>) -> Self {
        self.page_filter = Some(pattern.into());
        self
    }

    /// Enable or disable forced resync.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Set the per-level sibling concurrency.
    pub fn with_max_parallel_nodes(mut self, n: usize) -> Self {
        self.max_parallel_nodes = n;
        self
    }

    /// Set the global in-flight request bound.
    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n;
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the rate-limit backoff.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enable or disable layout flattening.
    pub fn with_flatten_layout(mut self, flatten: bool) -> Self {
        self.flatten_layout = flatten;
        self
    }

    /// Compile the name filters.
    pub fn filters(&self) -> Result<SyncFilters> {
        SyncFilters::new(
            self.notebook_filter.as_deref(),
            self.section_filter.as_deref(),
            self.page_filter.as_deref(),
        )
    }
}

/// Child of a notebook or section group.
enum Child {
    Group(RemoteNode),
    Section(RemoteNode),
}

impl Child {
    fn node(&self) -> &RemoteNode {
        match self {
            Child::Group(node) | Child::Section(node) => node,
        }
    }
}

/// Main sync engine.
pub struct SyncEngine {
    client: GraphClient,
    rewriter: ResourceRewriter,
    filters: SyncFilters,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl SyncEngine {
    /// Create an engine talking through `client`.
    ///
    /// # Errors
    /// `Error::InvalidInput` when a name filter is not a valid glob.
    pub fn new(client: GraphClient, config: SyncConfig) -> Result<Self> {
        let filters = config.filters()?;
        let rewriter = ResourceRewriter::new(client.clone())?;

        Ok(Self {
            client,
            rewriter,
            filters,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Create an engine on the production HTTP transport.
    pub fn connect(token: AccessToken, config: SyncConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout)?;
        let fetcher = Fetcher::new(
            Arc::new(transport),
            token,
            config.backoff,
            config.max_in_flight,
        );
        let client = GraphClient::new(fetcher, config.api_base.clone());
        Self::new(client, config)
    }

    /// Engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Root of the cancellation tree; cancelling it stops the whole run.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// List every notebook without mirroring anything.
    pub async fn catalog(&self) -> Result<Listing> {
        self.client.list_notebooks(&self.cancel).await
    }

    /// Mirror every selected notebook into the output root.
    ///
    /// Node failures are reported, never returned; the error case is limited
    /// to an unusable output root.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let start = Instant::now();
        let root = self.config.output_root.clone();
        fs::create_dir_all(&root).await?;

        info!("Starting sync into {}", root.display());

        let listing = match self.client.list_notebooks(&self.cancel).await {
            Ok(listing) => listing,
            Err(e) => {
                log_failure(NodeKind::Notebook, "notebook catalog", &e);
                let report = NodeReport::from_error(NodeKind::Notebook, "notebook catalog", &e);
                return Ok(self.finish(0, report, start));
            }
        };

        let mut report = NodeReport::default();
        if !listing.complete {
            warn!("Notebook catalog is incomplete");
            report.mark_partial();
        }

        // Directories are claimed before filtering so a filtered run maps
        // every notebook to the same place as a full one.
        let mut siblings = SiblingDirs::new();
        let notebooks: Vec<(RemoteNode, PathBuf)> = listing
            .items
            .into_iter()
            .map(|notebook| {
                let dir = siblings.claim(&root, &sanitize_name(notebook.name()));
                (notebook, dir)
            })
            .filter(|(notebook, _)| {
                let keep = self.filters.notebook.matches(notebook.name());
                if !keep {
                    debug!("Notebook '{}' filtered out", notebook.name());
                }
                keep
            })
            .collect();
        let selected = notebooks.len();

        let results: Vec<NodeReport> = stream::iter(notebooks)
            .map(|(notebook, dir)| {
                self.sync_container(NodeKind::Notebook, notebook, dir, self.cancel.child_token())
            })
            .buffer_unordered(self.parallelism())
            .collect()
            .await;

        for result in results {
            report.merge(result);
        }

        Ok(self.finish(selected, report, start))
    }

    fn finish(&self, notebooks: usize, root: NodeReport, start: Instant) -> SyncReport {
        let report = SyncReport::new(notebooks, root, self.cancel.is_cancelled(), start.elapsed());
        if report.is_success() {
            info!("Sync completed: {}", report.summary());
        } else {
            warn!("Sync finished with problems: {}", report.summary());
        }
        report
    }

    fn parallelism(&self) -> usize {
        self.config.max_parallel_nodes.max(1)
    }

    /// Synchronize a notebook or section group and everything beneath it
    /// into `dir`.
    fn sync_container(
        &self,
        kind: NodeKind,
        node: RemoteNode,
        dir: PathBuf,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, NodeReport> {
        async move {
            let name = node.name().to_string();

            match self.prepare(kind, &node, &dir, &cancel).await {
                Ok(Some(report)) => return report,
                Ok(None) => {}
                Err(e) => return failed(kind, &name, &e),
            }

            let (children, listing_complete) = match self.list_children(kind, &node, &cancel).await
            {
                Ok(children) => children,
                Err(e) => return failed(kind, &name, &e),
            };

            let mut report = NodeReport::default();
            if !listing_complete {
                warn!("{} '{}': child listing incomplete", kind, name);
                report.mark_partial();
            }

            let mut siblings = SiblingDirs::new();
            let mut selected = Vec::with_capacity(children.len());
            for child in children {
                let child_dir = siblings.claim(&dir, &sanitize_name(child.node().name()));
                match child {
                    Child::Section(section) if !self.filters.section.matches(section.name()) => {
                        debug!("Section '{}' filtered out", section.name());
                        report.mark_partial();
                    }
                    child => selected.push((child, child_dir)),
                }
            }

            let results: Vec<NodeReport> = stream::iter(selected)
                .map(|(child, child_dir)| match child {
                    Child::Group(group) => self.sync_container(
                        NodeKind::SectionGroup,
                        group,
                        child_dir,
                        cancel.child_token(),
                    ),
                    Child::Section(section) => self
                        .sync_section(section, child_dir, cancel.child_token())
                        .boxed(),
                })
                .buffer_unordered(self.parallelism())
                .collect()
                .await;

            for result in results {
                report.merge(result);
            }

            self.record(kind, node, &name, &dir, report, &cancel).await
        }
        .boxed()
    }

    /// Synchronize a section into `dir`: list, place and mirror its pages.
    async fn sync_section(
        &self,
        node: RemoteNode,
        dir: PathBuf,
        cancel: CancellationToken,
    ) -> NodeReport {
        let kind = NodeKind::Section;
        let name = node.name().to_string();

        match self.prepare(kind, &node, &dir, &cancel).await {
            Ok(Some(report)) => return report,
            Ok(None) => {}
            Err(e) => return failed(kind, &name, &e),
        }

        let listing = match self.client.list_pages(&node, &cancel).await {
            Ok(listing) => listing,
            Err(e) => return failed(kind, &name, &e),
        };

        let mut report = NodeReport::default();
        if !listing.complete {
            warn!("Section '{}': page listing incomplete", name);
            report.mark_partial();
        }

        let mut selected = Vec::with_capacity(listing.items.len());
        for PagePlacement { page, dir: page_dir } in hierarchy::place(listing.items, &dir) {
            if !self.filters.page.matches(page.name()) {
                debug!("Page '{}' filtered out", page.name());
                report.mark_partial();
                continue;
            }
            match page_dir {
                Ok(page_dir) => selected.push((page, page_dir)),
                Err(e) => report.merge(failed(NodeKind::Page, page.name(), &e)),
            }
        }

        let results: Vec<NodeReport> = stream::iter(selected)
            .map(|(page, page_dir)| self.sync_page(page, page_dir, cancel.child_token()))
            .buffer_unordered(self.parallelism())
            .collect()
            .await;

        for result in results {
            report.merge(result);
        }

        self.record(kind, node, &name, &dir, report, &cancel).await
    }

    /// Synchronize one page into its placed directory.
    async fn sync_page(&self, page: RemoteNode, dir: PathBuf, cancel: CancellationToken) -> NodeReport {
        let kind = NodeKind::Page;
        let name = page.name().to_string();

        match self.prepare(kind, &page, &dir, &cancel).await {
            Ok(Some(report)) => return report,
            Ok(None) => {}
            Err(e) => return failed(kind, &name, &e),
        }

        match self.mirror_page(page, &dir, &cancel).await {
            Ok(report) => report,
            Err(e) => failed(kind, &name, &e),
        }
    }

    async fn mirror_page(
        &self,
        page: RemoteNode,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<NodeReport> {
        let mut html = self.client.page_content(&page, cancel).await?;
        if self.config.flatten_layout {
            html = self.rewriter.strip_absolute_layout(&html);
        }

        let outcome = self.rewriter.rewrite(&html, dir, cancel).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        mirror::write_atomic(&dir.join(CONTENT_FILE), outcome.html.as_bytes()).await?;
        mirror::write_entry(dir, &LocalMirrorEntry::page(page, outcome.resources)).await?;
        debug!(
            "Wrote page {} ({} resources fetched, {} reused, {} failed)",
            dir.display(),
            outcome.fetched,
            outcome.reused,
            outcome.failed
        );

        let mut report = NodeReport::written();
        report.stats.resources_fetched = outcome.fetched;
        report.stats.resources_reused = outcome.reused;
        report.stats.resources_failed = outcome.failed;
        Ok(report)
    }

    /// Decide whether a node needs work and make its directory ready.
    ///
    /// Returns a finished report when the node is skipped.
    async fn prepare(
        &self,
        kind: NodeKind,
        node: &RemoteNode,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<NodeReport>> {
        if cancel.is_cancelled() {
            return Ok(Some(NodeReport::cancelled()));
        }

        if self.config.force {
            // Pages share their directory with nested child pages, and
            // filtered runs must not lose what they do not revisit.
            if kind.is_container() && !self.filters.is_restrictive() && fs::try_exists(dir).await?
            {
                info!("Removing {} for forced resync", dir.display());
                fs::remove_dir_all(dir).await?;
            }
        } else {
            let metadata = mirror::metadata_path(dir, kind);
            if !freshness::is_stale(&metadata, node).await {
                debug!("{} '{}' is up to date", kind, node.name());
                return Ok(Some(NodeReport::fresh()));
            }
        }

        fs::create_dir_all(dir).await?;
        Ok(None)
    }

    async fn list_children(
        &self,
        kind: NodeKind,
        node: &RemoteNode,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Child>, bool)> {
        let collection = match kind {
            NodeKind::Notebook => "notebooks",
            _ => "sectionGroups",
        };

        let sections = self.client.list_sections(node, collection, cancel).await?;
        let groups = self.client.list_section_groups(node, collection, cancel).await?;
        let complete = sections.complete && groups.complete;

        let children = groups
            .items
            .into_iter()
            .map(Child::Group)
            .chain(sections.items.into_iter().map(Child::Section))
            .collect();
        Ok((children, complete))
    }

    /// Write a container's metadata once its subtree is complete.
    async fn record(
        &self,
        kind: NodeKind,
        node: RemoteNode,
        name: &str,
        dir: &Path,
        mut report: NodeReport,
        cancel: &CancellationToken,
    ) -> NodeReport {
        if cancel.is_cancelled() {
            report.mark_partial();
            return report;
        }
        if !report.complete {
            debug!("{} '{}' not recorded: subtree incomplete", kind, name);
            return report;
        }

        match mirror::write_entry(dir, &LocalMirrorEntry::container(kind, node)).await {
            Ok(path) => {
                debug!("Recorded {}", path.display());
                report.stats.nodes_written += 1;
            }
            Err(e) => report.merge(failed(kind, name, &e)),
        }
        report
    }
}

fn log_failure(kind: NodeKind, name: &str, error: &Error) {
    match error {
        Error::Cancelled => debug!("{} '{}' cancelled", kind, name),
        e if e.is_transient() => warn!("{} '{}' unavailable, skipped this run: {}", kind, name, e),
        e => error!("{} '{}' failed: {}", kind, name, e),
    }
}

fn failed(kind: NodeKind, name: &str, error: &Error) -> NodeReport {
    log_failure(kind, name, error);
    NodeReport::from_error(kind, name, error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.backoff.initial_delay, Duration::from_secs(20));
        assert!(!config.force);
        assert!(config.filters().unwrap().notebook.is_any());
    }

    #[test]
    fn test_config_builder() {
        let config = SyncConfig::default()
            .with_output_root("/tmp/mirror")
            .with_notebook_filter("Work*")
            .with_force(true)
            .with_max_parallel_nodes(8)
            .with_max_in_flight(2)
            .with_flatten_layout(true);

        assert_eq!(config.output_root, PathBuf::from("/tmp/mirror"));
        assert_eq!(config.notebook_filter.as_deref(), Some("Work*"));
        assert!(config.force);
        assert_eq!(config.max_parallel_nodes, 8);
        assert_eq!(config.max_in_flight, 2);
        assert!(config.flatten_layout);
    }

    #[test]
    fn test_config_partial_json() {
        let config: SyncConfig =
            serde_json::from_str(r#"{ "output_root": "/data/notes", "page_filter": "*todo*" }"#)
                .unwrap();
        assert_eq!(config.output_root, PathBuf::from("/data/notes"));
        assert_eq!(config.page_filter.as_deref(), Some("*todo*"));
        assert_eq!(config.max_in_flight, SyncConfig::default().max_in_flight);
    }

    #[test]
    fn test_config_durations_in_json() {
        let config: SyncConfig = serde_json::from_str(
            r#"{ "request_timeout": "30s", "backoff": { "initial_delay": "1s" } }"#,
        )
        .unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.backoff.initial_delay, Duration::from_secs(1));
        assert_eq!(config.backoff.max_delay, Duration::from_secs(60));

        let round_trip: SyncConfig =
            serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(round_trip, config);
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let config = SyncConfig::default().with_section_filter("[");
        let client = GraphClient::new(
            Fetcher::new(
                Arc::new(notemirror_graph::MemoryTransport::new()),
                AccessToken::new("t").unwrap(),
                BackoffConfig::default(),
                1,
            ),
            "https://graph.test",
        );
        assert!(matches!(
            SyncEngine::new(client, config),
            Err(Error::InvalidInput(_))
        ));
    }
}
