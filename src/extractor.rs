//! Article field extraction.

use crate::config::SiteSelectors;
use crate::error::Result;
use crate::models::RawArticle;
use crate::render::{Query, RenderSession};
use tracing::{debug, instrument};

/// Reads title, publish time, body text and lead image off an article page.
#[derive(Debug, Clone)]
pub struct ArticleExtractor {
    queries: [Query; 4],
}

impl ArticleExtractor {
    pub fn new(selectors: &SiteSelectors) -> Self {
        Self {
            queries: [
                Query::text(&selectors.title),
                Query::text(&selectors.publish_time),
                Query::text(&selectors.content),
                Query::attr(&selectors.image, &selectors.image_src_attr),
            ],
        }
    }

    /// Navigate to `url` and extract its article.
    ///
    /// Returns `Ok(None)` when the page has no body text after trimming; such
    /// pages are not articles and must not be persisted. Navigation failures
    /// are returned so the caller can skip this URL and move on.
    #[instrument(level = "info", skip(self, session))]
    pub async fn extract(
        &self,
        session: &mut dyn RenderSession,
        url: &str,
        category: &str,
    ) -> Result<Option<RawArticle>> {
        session.navigate(url).await?;

        let [title, publish_time, content, img] = <[Option<String>; 4]>::try_from(
            session.query_many(&self.queries),
        )
        .unwrap_or_default();

        let content = content.unwrap_or_default().trim().to_string();
        if content.is_empty() {
            debug!("Page has no article content; discarding");
            return Ok(None);
        }

        Ok(Some(RawArticle {
            url: url.to_string(),
            title: title.unwrap_or_default().trim().to_string(),
            publish_time: publish_time.unwrap_or_default().trim().to_string(),
            content,
            img: img.unwrap_or_default().trim().to_string(),
            category: category.to_string(),
        }))
    }
}
