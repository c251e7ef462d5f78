//! Cursor-driven pagination over list responses.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use notemirror_common::{Error, Result};

use crate::fetcher::Fetcher;
use crate::model::{Listing, RemoteNode};

/// One page of a list response.
#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    value: Option<Vec<RemoteNode>>,
    #[serde(default, rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Fetch every page of the collection at `url`.
///
/// Pages are concatenated in server order. A transient failure stops the
/// walk and keeps what was gathered, flagged incomplete.
///
/// # Errors
/// - `Error::MalformedResponse` when a page has no `value` array
/// - Any fatal error from the fetcher
pub async fn list_all(fetcher: &Fetcher, url: &str, cancel: &CancellationToken) -> Result<Listing> {
    let mut items = Vec::new();
    let mut next = Some(url.to_string());
    let mut pages = 0usize;

    while let Some(page_url) = next.take() {
        let body = match fetcher.fetch(&page_url, cancel).await {
            Ok(body) => body,
            Err(e) if e.is_transient() => {
                warn!(
                    "Listing {} stopped after {} pages ({} items): {}",
                    url,
                    pages,
                    items.len(),
                    e
                );
                return Ok(Listing {
                    items,
                    complete: false,
                });
            }
            Err(e) => return Err(e),
        };

        let page: ListPage = body.json()?;
        let value = page.value.ok_or_else(|| {
            Error::MalformedResponse(format!("{}: list response has no 'value' array", page_url))
        })?;

        pages += 1;
        items.extend(value);

        next = match page.next_link {
            Some(link) if link == page_url => {
                warn!("{} returned itself as next page; stopping", page_url);
                None
            }
            other => other,
        };
    }

    debug!("Listed {} items from {} in {} pages", items.len(), url, pages);
    Ok(Listing::complete(items))
}
