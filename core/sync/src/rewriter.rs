//! Localize images and attachments referenced by page content.
//!
//! Page HTML as served by the API is flat and machine-generated: every `img`
//! and `object` tag is a single, non-nested start tag whose attributes are
//! double-quoted. The rewriter relies on that shape and matches whole tags
//! with a regular expression instead of building a DOM. Markup that does not
//! follow it is passed through untouched.

use regex::Regex;
use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use notemirror_common::{sanitize_name, Error, Result};
use notemirror_graph::GraphClient;

use crate::mirror::{write_atomic, ResourceKind, ResourceRef};

/// Result of rewriting one page.
#[derive(Debug, Clone, Default)]
pub struct RewriteOutcome {
    /// Content with localized references.
    pub html: String,
    /// Resources the content now references locally.
    pub resources: Vec<ResourceRef>,
    /// Resources downloaded during this call.
    pub fetched: usize,
    /// Resources already present on disk.
    pub reused: usize,
    /// Resources whose download failed; their tags keep the remote URL.
    pub failed: usize,
}

/// One `name="value"` attribute inside a tag.
#[derive(Debug)]
struct Attr {
    name: String,
    value: String,
    /// Whole attribute, leading whitespace included.
    span: Range<usize>,
    /// Value between the quotes.
    value_span: Range<usize>,
}

/// What to do with one tag.
#[derive(Debug)]
struct Plan {
    kind: ResourceKind,
    fetch_url: String,
    file_name: String,
    target_attr: &'static str,
    strip: &'static [&'static str],
}

const IMAGE_STRIP: &[&str] = &["data-fullres-src", "data-fullres-src-type"];

/// Downloads resources into a page directory and rewrites their references.
pub struct ResourceRewriter {
    client: GraphClient,
    tag_re: Regex,
    attr_re: Regex,
    absolute_attr_re: Regex,
    absolute_style_re: Regex,
}

impl ResourceRewriter {
    /// Create a rewriter fetching through `client`.
    pub fn new(client: GraphClient) -> Result<Self> {
        Ok(Self {
            client,
            tag_re: compile(r"(?is)<(img|object)\b[^>]*>")?,
            attr_re: compile(r#"\s+([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*"([^"]*)""#)?,
            absolute_attr_re: compile(r#"(?i)\s+data-absolute-enabled\s*=\s*"[^"]*""#)?,
            absolute_style_re: compile(
                r#"(?i)\s+style\s*=\s*"[^"]*position\s*:\s*absolute[^"]*""#,
            )?,
        })
    }

    /// Localize every resource referenced by `html` under `page_dir`.
    ///
    /// Images go to `images/`, attachments to `attachments/`. A resource whose
    /// file already exists is not downloaded again, so re-running on the same
    /// content issues no requests and yields identical markup. A failed
    /// download leaves its tag unchanged and does not fail the page.
    ///
    /// # Errors
    /// Only `Error::Cancelled`; everything else stays local to the resource.
    pub async fn rewrite(
        &self,
        html: &str,
        page_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<RewriteOutcome> {
        let mut outcome = RewriteOutcome::default();
        let mut out = String::with_capacity(html.len());
        let mut claimed: HashMap<String, String> = HashMap::new();
        let mut last = 0;

        let tags: Vec<(Range<usize>, String)> = self
            .tag_re
            .captures_iter(html)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let name = caps.get(1)?.as_str().to_ascii_lowercase();
                Some((whole.range(), name))
            })
            .collect();

        for (range, tag_name) in tags {
            out.push_str(&html[last..range.start]);
            last = range.end;

            let tag = &html[range];
            let attrs = self.attributes(tag);

            let plan = match tag_name.as_str() {
                "img" => image_plan(&attrs),
                _ => object_plan(&attrs),
            };
            let Some(mut plan) = plan else {
                if let Some(local) = existing_reference(&tag_name, &attrs, page_dir).await {
                    outcome.resources.push(local);
                }
                out.push_str(tag);
                continue;
            };

            plan.file_name = claim(&mut claimed, plan.kind, &plan.file_name, &plan.fetch_url);
            let local_path = format!("{}/{}", plan.kind.dir_name(), plan.file_name);
            let file = page_dir.join(plan.kind.dir_name()).join(&plan.file_name);

            match self.localize(&plan, &file, cancel).await {
                Ok(fetched) => {
                    if fetched {
                        outcome.fetched += 1;
                    } else {
                        outcome.reused += 1;
                    }
                    out.push_str(&rewrite_tag(tag, &attrs, &plan, &local_path));
                    outcome.resources.push(ResourceRef {
                        remote_url: plan.fetch_url,
                        local_path,
                        kind: plan.kind,
                    });
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("Keeping remote reference to {}: {}", plan.fetch_url, e);
                    outcome.failed += 1;
                    out.push_str(tag);
                }
            }
        }

        out.push_str(&html[last..]);
        outcome.html = out;
        Ok(outcome)
    }

    /// Remove absolute positioning so the page reflows as a plain document.
    pub fn strip_absolute_layout(&self, html: &str) -> String {
        let html = self.absolute_attr_re.replace_all(html, "");
        self.absolute_style_re.replace_all(&html, "").into_owned()
    }

    fn attributes(&self, tag: &str) -> Vec<Attr> {
        self.attr_re
            .captures_iter(tag)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let name = caps.get(1)?;
                let value = caps.get(2)?;
                Some(Attr {
                    name: name.as_str().to_ascii_lowercase(),
                    value: html_escape::decode_html_entities(value.as_str()).into_owned(),
                    span: whole.range(),
                    value_span: value.range(),
                })
            })
            .collect()
    }

    /// Make sure `file` exists; returns whether it had to be downloaded.
    async fn localize(&self, plan: &Plan, file: &Path, cancel: &CancellationToken) -> Result<bool> {
        if fs::try_exists(file).await? {
            debug!("{} already present", file.display());
            return Ok(false);
        }

        let body = self.client.resource(&plan.fetch_url, cancel).await?;
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir).await?;
        }
        write_atomic(file, &body).await?;
        debug!("Saved {} ({} bytes)", file.display(), body.len());
        Ok(true)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::InvalidInput(format!("pattern {}: {}", pattern, e)))
}

fn attr<'a>(attrs: &'a [Attr], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|a| a.name == name)
        .map(|a| a.value.as_str())
        .filter(|v| !v.trim().is_empty())
}

fn is_remote(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}

/// Prefer the full-resolution variant when the tag offers one.
fn image_plan(attrs: &[Attr]) -> Option<Plan> {
    let (url, declared_type) = match attr(attrs, "data-fullres-src").filter(|u| is_remote(u)) {
        Some(fullres) => (
            fullres,
            attr(attrs, "data-fullres-src-type").or_else(|| attr(attrs, "data-src-type")),
        ),
        None => (
            attr(attrs, "src").filter(|u| is_remote(u))?,
            attr(attrs, "data-src-type"),
        ),
    };

    let stem = resource_id(url).unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let file_name = match declared_type.and_then(image_extension) {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    };

    Some(Plan {
        kind: ResourceKind::Image,
        fetch_url: url.to_string(),
        file_name: sanitize_name(&file_name),
        target_attr: "src",
        strip: IMAGE_STRIP,
    })
}

fn object_plan(attrs: &[Attr]) -> Option<Plan> {
    let url = attr(attrs, "data").filter(|u| is_remote(u))?;
    let file_name = attr(attrs, "data-attachment")
        .map(str::to_string)
        .or_else(|| resource_id(url))
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    Some(Plan {
        kind: ResourceKind::Attachment,
        fetch_url: url.to_string(),
        file_name: sanitize_name(&file_name),
        target_attr: "data",
        strip: &[],
    })
}

/// Identifier segment of a resource URL: the path after `resources/` up to
/// the first `!` or `/`.
pub fn resource_id(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("resources/")?;
    let id = rest.split(['!', '/', '?']).next()?;
    (!id.is_empty()).then(|| id.to_string())
}

/// `image/png` becomes `png`.
fn image_extension(media_type: &str) -> Option<String> {
    let media_type = media_type.trim().to_ascii_lowercase();
    let ext = media_type.strip_prefix("image/").unwrap_or(&media_type);
    let ext = ext.split(['+', ';']).next().unwrap_or(ext).trim();
    let valid = !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_string())
}

/// Give the same file name to the same URL and a suffixed one to a different
/// URL wanting a taken name.
fn claim(
    claimed: &mut HashMap<String, String>,
    kind: ResourceKind,
    file_name: &str,
    url: &str,
) -> String {
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    };

    let mut n = 1;
    loop {
        let candidate = match (n, ext) {
            (1, _) => file_name.to_string(),
            (_, Some(ext)) => format!("{} ({}).{}", stem, n, ext),
            (_, None) => format!("{} ({})", stem, n),
        };
        let key = format!("{}/{}", kind.dir_name(), candidate);
        match claimed.get(&key) {
            Some(owner) if owner != url => n += 1,
            _ => {
                claimed.insert(key, url.to_string());
                return candidate;
            }
        }
    }
}

/// Point the tag at `local_path` and drop the variant attributes.
fn rewrite_tag(tag: &str, attrs: &[Attr], plan: &Plan, local_path: &str) -> String {
    let mut edits: Vec<(Range<usize>, String)> = Vec::new();
    for a in attrs {
        if a.name == plan.target_attr {
            edits.push((
                a.value_span.clone(),
                html_escape::encode_double_quoted_attribute(local_path).into_owned(),
            ));
        } else if plan.strip.contains(&a.name.as_str()) {
            edits.push((a.span.clone(), String::new()));
        }
    }
    edits.sort_by_key(|(range, _)| std::cmp::Reverse(range.start));

    let mut rewritten = tag.to_string();
    for (range, replacement) in edits {
        rewritten.replace_range(range, &replacement);
    }
    rewritten
}

/// A tag already pointing into `images/` or `attachments/` of this page.
async fn existing_reference(tag_name: &str, attrs: &[Attr], page_dir: &Path) -> Option<ResourceRef> {
    let (kind, target) = match tag_name {
        "img" => (ResourceKind::Image, attr(attrs, "src")?),
        _ => (ResourceKind::Attachment, attr(attrs, "data")?),
    };
    let relative = target.strip_prefix(&format!("{}/", kind.dir_name()))?;
    if relative.contains('/') || relative.contains("..") {
        return None;
    }

    let file: PathBuf = page_dir.join(kind.dir_name()).join(relative);
    match fs::try_exists(&file).await {
        Ok(true) => Some(ResourceRef {
            remote_url: target.to_string(),
            local_path: target.to_string(),
            kind,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notemirror_common::AccessToken;
    use notemirror_graph::{BackoffConfig, Fetcher, MemoryTransport, RawResponse};
    use std::sync::Arc;
    use tempfile::TempDir;

    const IMG_SRC: &str = "https://graph.test/onenote/resources/0-aaa!1-X!1/$value";
    const IMG_FULL: &str = "https://graph.test/onenote/resources/0-bbb!1-X!2/$value";
    const PDF: &str = "https://graph.test/onenote/resources/0-ccc!1-X!3/$value";

    fn rewriter(transport: Arc<MemoryTransport>) -> ResourceRewriter {
        let fetcher = Fetcher::new(
            transport,
            AccessToken::new("token").unwrap(),
            BackoffConfig::default(),
            4,
        );
        ResourceRewriter::new(GraphClient::new(fetcher, "https://graph.test/onenote")).unwrap()
    }

    fn content_url(url: &str) -> String {
        url.replace("/$value", "/content")
    }

    fn page_html() -> String {
        format!(
            concat!(
                "<html><body><p>Trip</p>",
                "<img width=\"320\" src=\"{}\" data-src-type=\"image/png\" ",
                "data-fullres-src=\"{}\" data-fullres-src-type=\"image/jpeg\" />",
                "<object data-attachment=\"Plan &amp; budget.pdf\" type=\"application/pdf\" data=\"{}\"></object>",
                "</body></html>"
            ),
            IMG_SRC, IMG_FULL, PDF
        )
    }

    #[tokio::test]
    async fn test_rewrites_image_and_attachment() {
        let transport = Arc::new(MemoryTransport::new());
        transport.respond(&content_url(IMG_FULL), RawResponse::bytes(&b"jpeg"[..]));
        transport.respond(&content_url(PDF), RawResponse::bytes(&b"%PDF"[..]));
        let dir = TempDir::new().unwrap();

        let outcome = rewriter(transport.clone())
            .rewrite(&page_html(), dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.fetched, 2);
        assert_eq!(outcome.failed, 0);
        assert!(outcome
            .html
            .contains("<img width=\"320\" src=\"images/0-bbb.jpeg\" data-src-type=\"image/png\" />"));
        assert!(outcome.html.contains("data=\"attachments/Plan &amp; budget.pdf\""));
        assert!(!outcome.html.contains("data-fullres-src"));
        assert!(outcome.html.contains("<p>Trip</p>"));

        assert_eq!(
            std::fs::read(dir.path().join("images").join("0-bbb.jpeg")).unwrap(),
            b"jpeg"
        );
        assert_eq!(
            std::fs::read(dir.path().join("attachments").join("Plan & budget.pdf")).unwrap(),
            b"%PDF"
        );
        assert_eq!(outcome.resources.len(), 2);
        assert_eq!(outcome.resources[0].kind, ResourceKind::Image);
        assert_eq!(outcome.resources[0].remote_url, IMG_FULL);
        assert_eq!(transport.request_count(&content_url(IMG_SRC)), 0);
    }

    #[tokio::test]
    async fn test_second_run_is_request_free_and_identical() {
        let transport = Arc::new(MemoryTransport::new());
        transport.respond(&content_url(IMG_FULL), RawResponse::bytes(&b"jpeg"[..]));
        transport.respond(&content_url(PDF), RawResponse::bytes(&b"%PDF"[..]));
        let dir = TempDir::new().unwrap();
        let rewriter = rewriter(transport.clone());
        let cancel = CancellationToken::new();

        let first = rewriter.rewrite(&page_html(), dir.path(), &cancel).await.unwrap();
        transport.clear_requests();
        let second = rewriter.rewrite(&page_html(), dir.path(), &cancel).await.unwrap();

        assert_eq!(transport.total_requests(), 0);
        assert_eq!(second.reused, 2);
        assert_eq!(second.fetched, 0);
        assert_eq!(first.html, second.html);
    }

    #[tokio::test]
    async fn test_failed_resource_keeps_tag() {
        let transport = Arc::new(MemoryTransport::new());
        transport.respond(&content_url(IMG_FULL), RawResponse::status(403));
        transport.respond(&content_url(PDF), RawResponse::bytes(&b"%PDF"[..]));
        let dir = TempDir::new().unwrap();
        let html = page_html();

        let outcome = rewriter(transport)
            .rewrite(&html, dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.fetched, 1);
        assert!(outcome.html.contains(IMG_FULL));
        assert!(outcome.html.contains("data=\"attachments/Plan &amp; budget.pdf\""));
        assert!(!dir.path().join("images").exists());
    }

    #[tokio::test]
    async fn test_plain_src_and_local_references() {
        let transport = Arc::new(MemoryTransport::new());
        transport.respond(&content_url(IMG_SRC), RawResponse::bytes(&b"png"[..]));
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images").join("old.png"), b"old").unwrap();

        let html = format!(
            "<img src=\"{}\" data-src-type=\"image/png\"><img src=\"images/old.png\"><img src=\"data:image/gif;base64,AA\">",
            IMG_SRC
        );
        let outcome = rewriter(transport)
            .rewrite(&html, dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome.html,
            "<img src=\"images/0-aaa.png\" data-src-type=\"image/png\"><img src=\"images/old.png\"><img src=\"data:image/gif;base64,AA\">"
        );
        let paths: Vec<_> = outcome.resources.iter().map(|r| r.local_path.as_str()).collect();
        assert_eq!(paths, vec!["images/0-aaa.png", "images/old.png"]);
    }

    #[tokio::test]
    async fn test_same_attachment_name_different_resources() {
        let other = "https://graph.test/onenote/resources/0-ddd!1-X!4/$value";
        let transport = Arc::new(MemoryTransport::new());
        transport.respond(&content_url(PDF), RawResponse::bytes(&b"one"[..]));
        transport.respond(&content_url(other), RawResponse::bytes(&b"two"[..]));
        let dir = TempDir::new().unwrap();

        let html = format!(
            "<object data-attachment=\"a.pdf\" data=\"{}\"></object><object data-attachment=\"a.pdf\" data=\"{}\"></object>",
            PDF, other
        );
        let outcome = rewriter(transport)
            .rewrite(&html, dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.html.contains("data=\"attachments/a.pdf\""));
        assert!(outcome.html.contains("data=\"attachments/a (2).pdf\""));
        assert_eq!(
            std::fs::read(dir.path().join("attachments").join("a (2).pdf")).unwrap(),
            b"two"
        );
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let transport = Arc::new(MemoryTransport::new());
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = rewriter(transport)
            .rewrite(&page_html(), dir.path(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_strip_absolute_layout() {
        let rewriter = rewriter(Arc::new(MemoryTransport::new()));
        let html = concat!(
            "<body data-absolute-enabled=\"true\" style=\"font-family:Calibri\">",
            "<div style=\"position:absolute;left:48px;top:115px;width:624px\"><p>x</p></div></body>"
        );
        assert_eq!(
            rewriter.strip_absolute_layout(html),
            "<body style=\"font-family:Calibri\"><div><p>x</p></div></body>"
        );
    }

    #[test]
    fn test_resource_id_and_extension() {
        assert_eq!(resource_id(IMG_SRC).as_deref(), Some("0-aaa"));
        assert_eq!(
            resource_id("https://graph.test/resources/0-zzz/content").as_deref(),
            Some("0-zzz")
        );
        assert_eq!(resource_id("https://cdn.test/picture.png"), None);

        assert_eq!(image_extension("image/png").as_deref(), Some("png"));
        assert_eq!(image_extension("image/svg+xml").as_deref(), Some("svg"));
        assert_eq!(image_extension(""), None);
    }
}
