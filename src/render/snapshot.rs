//! Selector queries over a captured document.

use scraper::{ElementRef, Html, Selector};
use tracing::warn;

/// What to read off a matched element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Concatenated text of the element and its descendants.
    Text,
    /// Value of the named attribute.
    Attr(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub selector: String,
    pub target: Target,
}

impl Query {
    pub fn text(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            target: Target::Text,
        }
    }

    pub fn attr(selector: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            target: Target::Attr(name.into()),
        }
    }

    fn read(&self, element: ElementRef<'_>) -> Option<String> {
        match &self.target {
            Target::Text => Some(element.text().collect()),
            Target::Attr(name) => element.value().attr(name).map(str::to_string),
        }
    }

    fn compile(&self) -> Option<Selector> {
        match Selector::parse(&self.selector) {
            Ok(selector) => Some(selector),
            Err(e) => {
                warn!(selector = %self.selector, error = %e, "Invalid selector; treating as no match");
                None
            }
        }
    }
}

/// Rendered HTML of one navigation.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    url: String,
    html: String,
}

impl PageSnapshot {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }

    /// Address of the loaded document, after any redirects.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn query(&self, query: &Query) -> Option<String> {
        let document = Html::parse_document(&self.html);
        first_match(&document, query)
    }

    /// One entry per matched element; `None` where the element lacks the attribute.
    pub fn query_all(&self, query: &Query) -> Vec<Option<String>> {
        let Some(selector) = query.compile() else {
            return Vec::new();
        };
        let document = Html::parse_document(&self.html);
        document
            .select(&selector)
            .map(|element| query.read(element))
            .collect()
    }

    pub fn query_many(&self, queries: &[Query]) -> Vec<Option<String>> {
        let document = Html::parse_document(&self.html);
        queries
            .iter()
            .map(|query| first_match(&document, query))
            .collect()
    }
}

fn first_match(document: &Html, query: &Query) -> Option<String> {
    let selector = query.compile()?;
    document
        .select(&selector)
        .next()
        .and_then(|element| query.read(element))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"
        <html><body>
          <div class="article-detail">
            <h1 class="title">Derby ends level</h1>
            <div class="article-info"><span class="publish-time">2025-03-01 20:15</span></div>
            <div class="article-content">
              <p>First half.</p><p>Second <b>half</b>.</p>
            </div>
            <img src="/img/one.jpg"><img src="/img/two.jpg">
          </div>
        </body></html>
    "#;

    #[test]
    fn test_text_query_concatenates_descendants() {
        let doc = PageSnapshot::new("https://a.test/1", ARTICLE);
        let content = doc.query(&Query::text(".article-detail .article-content")).unwrap();
        assert_eq!(content.trim(), "First half.Second half.");
    }

    #[test]
    fn test_attr_query_takes_first_match() {
        let doc = PageSnapshot::new("https://a.test/1", ARTICLE);
        assert_eq!(
            doc.query(&Query::attr(".article-detail img", "src")),
            Some("/img/one.jpg".to_string())
        );
    }

    #[test]
    fn test_missing_match_is_none() {
        let doc = PageSnapshot::new("https://a.test/1", ARTICLE);
        assert_eq!(doc.query(&Query::text(".does-not-exist")), None);
        assert_eq!(doc.query(&Query::attr(".title", "href")), None);
    }

    #[test]
    fn test_invalid_selector_is_none() {
        let doc = PageSnapshot::new("https://a.test/1", ARTICLE);
        assert_eq!(doc.query(&Query::text("..[")), None);
        assert!(doc.query_all(&Query::text("..[")).is_empty());
    }

    #[test]
    fn test_query_all_keeps_missing_attributes() {
        let doc = PageSnapshot::new(
            "https://a.test/list",
            r#"<a class="new-item" href="/n/1">1</a><div class="new-item">x</div><a class="new-item" href="/n/2">2</a>"#,
        );
        assert_eq!(
            doc.query_all(&Query::attr(".new-item", "href")),
            vec![Some("/n/1".to_string()), None, Some("/n/2".to_string())]
        );
    }

    #[test]
    fn test_query_many_preserves_order() {
        let doc = PageSnapshot::new("https://a.test/1", ARTICLE);
        let values = doc.query_many(&[
            Query::text(".article-detail .title"),
            Query::text(".missing"),
            Query::text(".article-detail .article-info .publish-time"),
        ]);
        assert_eq!(
            values,
            vec![
                Some("Derby ends level".to_string()),
                None,
                Some("2025-03-01 20:15".to_string())
            ]
        );
    }
}
