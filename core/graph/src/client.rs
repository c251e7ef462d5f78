//! Notebook API client.

use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use notemirror_common::{Error, Result};

use crate::fetcher::Fetcher;
use crate::model::{Listing, RemoteNode};
use crate::paginator::list_all;

/// Notebook API base URL for the signed-in user.
pub const DEFAULT_API_BASE: &str = "https://graph.microsoft.com/v1.0/me/onenote";

/// Query parameter asking for `order`/`level` on page listings.
const PAGE_LEVEL_PARAM: &str = "pagelevel";

/// Client naming the listings and downloads the mirror needs.
///
/// Cheap to clone; clones share one fetcher and therefore one in-flight
/// request budget.
#[derive(Clone)]
pub struct GraphClient {
    fetcher: Arc<Fetcher>,
    api_base: String,
}

impl GraphClient {
    /// Create a client rooted at `api_base`.
    pub fn new(fetcher: Fetcher, api_base: impl Into<String>) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// The underlying fetcher.
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// API base URL without trailing slash.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// URL listing every notebook.
    pub fn notebooks_url(&self) -> String {
        format!("{}/notebooks", self.api_base)
    }

    /// List every notebook.
    pub async fn list_notebooks(&self, cancel: &CancellationToken) -> Result<Listing> {
        list_all(&self.fetcher, &self.notebooks_url(), cancel).await
    }

    /// List the sections directly under a notebook or section group.
    pub async fn list_sections(
        &self,
        parent: &RemoteNode,
        parent_collection: &str,
        cancel: &CancellationToken,
    ) -> Result<Listing> {
        let url = parent.sections_url.clone().unwrap_or_else(|| {
            format!("{}/{}/{}/sections", self.api_base, parent_collection, parent.id)
        });
        list_all(&self.fetcher, &url, cancel).await
    }

    /// List the section groups directly under a notebook or section group.
    pub async fn list_section_groups(
        &self,
        parent: &RemoteNode,
        parent_collection: &str,
        cancel: &CancellationToken,
    ) -> Result<Listing> {
        let url = parent.section_groups_url.clone().unwrap_or_else(|| {
            format!(
                "{}/{}/{}/sectionGroups",
                self.api_base, parent_collection, parent.id
            )
        });
        list_all(&self.fetcher, &url, cancel).await
    }

    /// List a section's pages with their order and nesting level.
    pub async fn list_pages(
        &self,
        section: &RemoteNode,
        cancel: &CancellationToken,
    ) -> Result<Listing> {
        let base = section
            .pages_url
            .clone()
            .unwrap_or_else(|| format!("{}/sections/{}/pages", self.api_base, section.id));
        let url = with_page_levels(&base)?;
        list_all(&self.fetcher, &url, cancel).await
    }

    /// Download a page's HTML content.
    pub async fn page_content(
        &self,
        page: &RemoteNode,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let url = page
            .content_url
            .clone()
            .unwrap_or_else(|| format!("{}/pages/{}/content", self.api_base, page.id));

        let body = self.fetcher.fetch(&url, cancel).await?;
        if let Some(other) = body.media_type().filter(|t| t != "text/html") {
            debug!("{} returned {} for page content", url, other);
        }
        body.text()
    }

    /// Download a binary resource referenced by page content.
    pub async fn resource(&self, url: &str, cancel: &CancellationToken) -> Result<Bytes> {
        let url = resource_content_url(url);
        Ok(self.fetcher.fetch(&url, cancel).await?.body)
    }
}

/// Add `pagelevel=true` to a page listing URL unless already present.
pub fn with_page_levels(url: &str) -> Result<String> {
    let mut parsed =
        Url::parse(url).map_err(|e| Error::InvalidInput(format!("Invalid URL {}: {}", url, e)))?;

    if !parsed.query_pairs().any(|(k, _)| k == PAGE_LEVEL_PARAM) {
        parsed
            .query_pairs_mut()
            .append_pair(PAGE_LEVEL_PARAM, "true");
    }
    Ok(parsed.to_string())
}

/// Resource references end in `/$value`; the download endpoint is `/content`.
pub fn resource_content_url(url: &str) -> String {
    match url.strip_suffix("/$value") {
        Some(base) => format!("{}/content", base),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffConfig;
    use crate::memory::MemoryTransport;
    use crate::transport::RawResponse;
    use notemirror_common::AccessToken;
    use serde_json::json;

    fn client(transport: Arc<MemoryTransport>) -> GraphClient {
        let fetcher = Fetcher::new(
            transport,
            AccessToken::new("token").unwrap(),
            BackoffConfig::default(),
            4,
        );
        GraphClient::new(fetcher, "https://graph.test/v1.0/me/onenote/")
    }

    #[test]
    fn test_with_page_levels() {
        assert_eq!(
            with_page_levels("https://graph.test/sections/s1/pages").unwrap(),
            "https://graph.test/sections/s1/pages?pagelevel=true"
        );
        assert_eq!(
            with_page_levels("https://graph.test/sections/s1/pages?pagelevel=true").unwrap(),
            "https://graph.test/sections/s1/pages?pagelevel=true"
        );
        assert!(with_page_levels("not a url").is_err());
    }

    #[test]
    fn test_resource_content_url() {
        assert_eq!(
            resource_content_url("https://graph.test/onenote/resources/0-abc!1-def/$value"),
            "https://graph.test/onenote/resources/0-abc!1-def/content"
        );
        assert_eq!(
            resource_content_url("https://graph.test/onenote/resources/0-abc/content"),
            "https://graph.test/onenote/resources/0-abc/content"
        );
    }

    #[tokio::test]
    async fn test_listing_urls() {
        let transport = Arc::new(MemoryTransport::new());
        let empty = RawResponse::json(&json!({ "value": [] }));
        transport.respond("https://graph.test/v1.0/me/onenote/notebooks", empty.clone());
        transport.respond(
            "https://graph.test/v1.0/me/onenote/notebooks/nb1/sections",
            empty.clone(),
        );
        transport.respond(
            "https://graph.test/v1.0/me/onenote/sections/s1/pages?pagelevel=true",
            empty,
        );

        let client = client(transport.clone());
        let cancel = CancellationToken::new();

        assert!(client.list_notebooks(&cancel).await.unwrap().complete);

        let notebook = RemoteNode::new("nb1", "Personal");
        assert!(client
            .list_sections(&notebook, "notebooks", &cancel)
            .await
            .unwrap()
            .complete);

        let section = RemoteNode::new("s1", "Recipes");
        assert!(client.list_pages(&section, &cancel).await.unwrap().complete);

        assert_eq!(transport.total_requests(), 3);
    }

    #[tokio::test]
    async fn test_page_content() {
        let transport = Arc::new(MemoryTransport::new());
        transport.respond(
            "https://graph.test/pages/p1/content",
            RawResponse::html("<html><body>hi</body></html>"),
        );

        let mut page = RemoteNode::new("p1", "");
        page.content_url = Some("https://graph.test/pages/p1/content".to_string());

        let html = client(transport)
            .page_content(&page, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(html, "<html><body>hi</body></html>");
    }
}
