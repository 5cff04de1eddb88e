//! Listing page traversal.
//!
//! A listing page is one page of a paginated news catalog. Each entry matching
//! the "new item" selector links to an article through its `href`. Entries
//! without a link are skipped; an empty page is returned as an empty list
//! because running past the last page of a catalog is not detected here.

use crate::config::{SiteSelectors, listing_url};
use crate::error::Result;
use crate::render::{Query, RenderSession};
use tracing::{debug, info, instrument};
use url::Url;

#[derive(Debug, Clone)]
pub struct ListingTraversal {
    entries: Query,
}

impl ListingTraversal {
    pub fn new(selectors: &SiteSelectors) -> Self {
        Self {
            entries: Query::attr(&selectors.listing_item, &selectors.listing_href_attr),
        }
    }

    /// Article URLs on page `page_no` of the catalog `template`, in document order.
    #[instrument(level = "info", skip(self, session))]
    pub async fn list_page(
        &self,
        session: &mut dyn RenderSession,
        template: &str,
        page_no: u32,
    ) -> Result<Vec<String>> {
        let page_url = listing_url(template, page_no);
        session.navigate(&page_url).await?;

        // Relative links resolve against where the page landed, not where it was requested.
        let base = session
            .snapshot()
            .and_then(|doc| Url::parse(doc.url()).ok())
            .or_else(|| Url::parse(&page_url).ok());
        let mut article_urls = Vec::new();
        for (index, href) in session.query_all(&self.entries).into_iter().enumerate() {
            let Some(href) = href.map(|h| h.trim().to_string()).filter(|h| !h.is_empty()) else {
                debug!(index, "Listing entry has no link; skipping");
                continue;
            };
            article_urls.push(resolve(base.as_ref(), &href));
        }

        info!(%page_url, count = article_urls.len(), "Indexed listing page");
        Ok(article_urls)
    }
}

fn resolve(base: Option<&Url>, href: &str) -> String {
    base.and_then(|base| base.join(href).ok())
        .map(|url| url.to_string())
        .unwrap_or_else(|| href.to_string())
}
