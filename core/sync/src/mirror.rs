//! On-disk mirror entries and atomic file writes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use notemirror_common::{Error, NodeKind, Result};
use notemirror_graph::RemoteNode;

/// Page content file name.
pub const CONTENT_FILE: &str = "main.html";

/// Kind of resource embedded in page content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Image,
    Attachment,
}

impl ResourceKind {
    /// Subdirectory of the page directory holding resources of this kind.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ResourceKind::Image => "images",
            ResourceKind::Attachment => "attachments",
        }
    }
}

/// A resource localized under a page directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// URL the resource was referenced by.
    pub remote_url: String,
    /// Path relative to the page directory, `/`-separated.
    pub local_path: String,
    /// Image or attachment.
    pub kind: ResourceKind,
}

/// Metadata file content for one mirrored node.
///
/// The file's modification time is the freshness signal; the entry itself
/// carries no sync timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMirrorEntry {
    /// Node kind.
    pub kind: NodeKind,
    /// Remote object as last fetched.
    pub node: RemoteNode,
    /// Content file of a page, relative to its directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_file: Option<String>,
    /// Resources localized for a page.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceRef>,
}

impl LocalMirrorEntry {
    /// Entry for a notebook, section group or section.
    pub fn container(kind: NodeKind, node: RemoteNode) -> Self {
        Self {
            kind,
            node,
            content_file: None,
            resources: Vec::new(),
        }
    }

    /// Entry for a page and the resources it references locally.
    pub fn page(node: RemoteNode, resources: Vec<ResourceRef>) -> Self {
        Self {
            kind: NodeKind::Page,
            node,
            content_file: Some(CONTENT_FILE.to_string()),
            resources,
        }
    }

    /// Files in `dir` this entry accounts for, its own metadata file included.
    pub fn referenced_files(&self, dir: &Path) -> Vec<PathBuf> {
        let mut files = vec![metadata_path(dir, self.kind)];
        if let Some(content) = &self.content_file {
            files.push(dir.join(content));
        }
        for resource in &self.resources {
            files.push(resource.local_path.split('/').fold(dir.to_path_buf(), |p, c| p.join(c)));
        }
        files
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Metadata file path of a node of `kind` stored in `dir`.
pub fn metadata_path(dir: &Path, kind: NodeKind) -> PathBuf {
    dir.join(kind.metadata_file_name())
}

/// Write `entry` as the metadata file of `dir`.
pub async fn write_entry(dir: &Path, entry: &LocalMirrorEntry) -> Result<PathBuf> {
    let path = metadata_path(dir, entry.kind);
    write_atomic(&path, entry.to_json()?.as_bytes()).await?;
    Ok(path)
}

/// Read a metadata file.
pub async fn read_entry(path: &Path) -> Result<LocalMirrorEntry> {
    let content = fs::read_to_string(path).await?;
    LocalMirrorEntry::from_json(&content)
}

/// Write `data` to `path` through a temporary sibling and a rename.
///
/// Readers see either the previous file or the complete new one.
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        Error::InvalidInput(format!("{} has no parent directory", path.display()))
    })?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("{} has no file name", path.display())))?;

    let tmp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
    fs::write(&tmp, data).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(Error::Io(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn page_node() -> RemoteNode {
        let mut node = RemoteNode::new("p1", "");
        node.display_name = None;
        node.title = Some("Groceries".to_string());
        node.order = Some(2);
        node
    }

    #[tokio::test]
    async fn test_entry_round_trip() {
        let dir = TempDir::new().unwrap();
        let entry = LocalMirrorEntry::page(
            page_node(),
            vec![ResourceRef {
                remote_url: "https://graph.test/resources/r1/$value".to_string(),
                local_path: "images/r1.png".to_string(),
                kind: ResourceKind::Image,
            }],
        );

        let path = write_entry(dir.path(), &entry).await.unwrap();
        assert_eq!(path, dir.path().join("page.json"));

        let restored = read_entry(&path).await.unwrap();
        assert_eq!(restored.kind, NodeKind::Page);
        assert_eq!(restored.node, entry.node);
        assert_eq!(restored.resources, entry.resources);
        assert_eq!(restored.content_file.as_deref(), Some(CONTENT_FILE));
    }

    #[test]
    fn test_referenced_files() {
        let dir = Path::new("/mirror/Notebook/Section/1 Page");
        let entry = LocalMirrorEntry::page(
            page_node(),
            vec![ResourceRef {
                remote_url: "u".to_string(),
                local_path: "attachments/report.pdf".to_string(),
                kind: ResourceKind::Attachment,
            }],
        );

        let files = entry.referenced_files(dir);
        assert_eq!(
            files,
            vec![
                dir.join("page.json"),
                dir.join("main.html"),
                dir.join("attachments").join("report.pdf"),
            ]
        );

        let section = LocalMirrorEntry::container(NodeKind::Section, RemoteNode::new("s", "S"));
        assert_eq!(section.referenced_files(dir), vec![dir.join("section.json")]);
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.html");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }
}
