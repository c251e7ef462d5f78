//! Remote hierarchy objects as returned by the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One notebook, section group, section or page.
///
/// The kind is not carried by the JSON itself; it follows from the listing
/// the object came from. Fields the mirror does not interpret are kept in
/// `extra` so the metadata file holds everything the server sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteNode {
    /// Opaque identifier.
    pub id: String,
    /// Name of notebooks, section groups and sections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Name of pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date_time: Option<DateTime<Utc>>,
    /// Last modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_date_time: Option<DateTime<Utc>>,
    /// Listing URL of child sections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sections_url: Option<String>,
    /// Listing URL of child section groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_groups_url: Option<String>,
    /// Listing URL of a section's pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages_url: Option<String>,
    /// URL of a page's HTML content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    /// Position of a page within its section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    /// Nesting depth of a page within its section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    /// Every other field, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RemoteNode {
    /// Create a node with only an identifier and a name.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: Some(display_name.into()),
            title: None,
            created_date_time: None,
            last_modified_date_time: None,
            sections_url: None,
            section_groups_url: None,
            pages_url: None,
            content_url: None,
            order: None,
            level: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Display name, falling back to the page title, then to the identifier.
    pub fn name(&self) -> &str {
        [self.display_name.as_deref(), self.title.as_deref()]
            .into_iter()
            .flatten()
            .find(|name| !name.trim().is_empty())
            .unwrap_or(&self.id)
    }

    /// Last modification time, falling back to the creation time.
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.last_modified_date_time.or(self.created_date_time)
    }

    /// Nesting level of a page; absent means top level.
    pub fn page_level(&self) -> u32 {
        self.level.unwrap_or(0)
    }
}

/// Result of listing a collection.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Objects in server order.
    pub items: Vec<RemoteNode>,
    /// False when a transient failure cut the pagination short.
    pub complete: bool,
}

impl Listing {
    /// A listing that reached its last page.
    pub fn complete(items: Vec<RemoteNode>) -> Self {
        Self {
            items,
            complete: true,
        }
    }
}
