//! Competition index scraping.
//!
//! The competitions page lists every league the site covers as links whose
//! `href` ends in `-<id>`, e.g. `/data/zuqiu/comp-120`. The index maps that
//! trailing id to the link text.

use crate::config::SiteSelectors;
use crate::error::Result;
use crate::render::{Query, RenderSession};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone)]
pub struct CompetitionIndexer {
    names: Query,
    links: Query,
}

impl CompetitionIndexer {
    pub fn new(selectors: &SiteSelectors) -> Self {
        Self {
            names: Query::text(&selectors.competition_link),
            links: Query::attr(&selectors.competition_link, "href"),
        }
    }

    /// Competition id → display name for every link on `url`.
    #[instrument(level = "info", skip(self, session))]
    pub async fn index(
        &self,
        session: &mut dyn RenderSession,
        url: &str,
    ) -> Result<BTreeMap<String, String>> {
        session.navigate(url).await?;

        let names = session.query_all(&self.names);
        let links = session.query_all(&self.links);

        let mut competitions = BTreeMap::new();
        for (name, href) in names.into_iter().zip(links) {
            let name = name.unwrap_or_default().trim().to_string();
            let Some(id) = href.as_deref().and_then(competition_id) else {
                debug!(%name, "Competition link has no id; skipping");
                continue;
            };
            competitions.insert(id.to_string(), name);
        }

        info!(count = competitions.len(), "Indexed competitions");
        Ok(competitions)
    }
}

/// Trailing `-`-separated segment of a competition href.
pub fn competition_id(href: &str) -> Option<&str> {
    href.trim()
        .rsplit('-')
        .next()
        .map(|id| id.trim_end_matches('/'))
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyEndpoint;
    use crate::render::RenderEngine;
    use crate::render::fake::FakeEngine;
    use std::time::Duration;

    #[test]
    fn test_competition_id() {
        assert_eq!(competition_id("/data/zuqiu/comp-120"), Some("120"));
        assert_eq!(competition_id("https://www.leisu.com/data/zuqiu/comp-36/"), Some("36"));
        assert_eq!(competition_id("plain"), Some("plain"));
        assert_eq!(competition_id(""), None);
        assert_eq!(competition_id("/comp-"), None);
    }

    #[tokio::test]
    async fn test_index_maps_ids_to_names() {
        let html = r#"
            <div class="competition-levels">
              <div class="competition"><a href="/data/zuqiu/comp-36"> Premier League </a></div>
              <div class="competition"><a href="/data/zuqiu/comp-120">Chinese Super League</a></div>
              <div class="competition"><a>Unlinked</a></div>
            </div>
        "#;
        let engine = FakeEngine::new().with_page("https://a.test/comp-120", html);
        let proxy = ProxyEndpoint::new("127.0.0.1:1", "http", Duration::from_secs(60));
        let mut session = engine.open(&proxy).await.unwrap();

        let index = CompetitionIndexer::new(&SiteSelectors::default())
            .index(session.as_mut(), "https://a.test/comp-120")
            .await
            .unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index["36"], "Premier League");
        assert_eq!(index["120"], "Chinese Super League");
    }
}
