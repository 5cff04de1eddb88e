//! In-process article store, used for dry runs and tests.

use super::{ArticleStore, StoreError};
use crate::models::{ArticleRecord, Fingerprint, PersistedId, StoredArticle, UpsertOutcome};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    rows: HashMap<Fingerprint, StoredArticle>,
    next_id: i64,
}

/// Holds articles in a map keyed by fingerprint. Lookup and write happen
/// under one lock, so concurrent upserts of the same content cannot both
/// insert.
#[derive(Debug, Default)]
pub struct MemoryArticleStore {
    inner: Mutex<Inner>,
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<StoredArticle> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<_> = inner.rows.values().cloned().collect();
        rows.sort_by_key(|row| row.id.0);
        rows
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn find_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<StoredArticle>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.rows.get(fingerprint).cloned())
    }

    async fn upsert(&self, record: &ArticleRecord) -> Result<UpsertOutcome, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();

        if let Some(existing) = inner.rows.get_mut(&record.fingerprint) {
            existing.record = record.clone();
            existing.updated_at = now;
            return Ok(UpsertOutcome {
                id: existing.id,
                inserted: false,
            });
        }

        inner.next_id += 1;
        let id = PersistedId(inner.next_id);
        inner.rows.insert(
            record.fingerprint.clone(),
            StoredArticle {
                id,
                record: record.clone(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
        );
        Ok(UpsertOutcome { id, inserted: true })
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawArticle;
    use std::sync::Arc;

    fn record(content: &str, title: &str) -> ArticleRecord {
        ArticleRecord::from_raw(RawArticle {
            url: "https://a.test/n".to_string(),
            title: title.to_string(),
            publish_time: String::new(),
            content: content.to_string(),
            img: String::new(),
            category: "football".to_string(),
        })
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let store = MemoryArticleStore::new();
        let a = store.upsert(&record("a", "A")).await.unwrap();
        let b = store.upsert(&record("b", "B")).await.unwrap();
        assert_eq!(a.id, PersistedId(1));
        assert_eq!(b.id, PersistedId(2));
        assert!(a.inserted && b.inserted);
    }

    #[tokio::test]
    async fn test_update_keeps_id_and_created_at() {
        let store = MemoryArticleStore::new();
        let first = store.upsert(&record("same body", "Old title")).await.unwrap();
        let created = store.all()[0].created_at;

        let second = store.upsert(&record("same body", "New title")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(!second.inserted);
        let rows = store.all();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record.title, "New title");
        assert_eq!(rows[0].created_at, created);
        assert!(rows[0].updated_at >= created);
        assert!(rows[0].deleted_at.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_upserts_of_same_content_store_one_row() {
        let store = Arc::new(MemoryArticleStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.upsert(&record("contended body", &format!("t{i}"))).await.unwrap()
            }));
        }
        let mut inserted = 0;
        let mut ids = Vec::new();
        for handle in handles {
            let outcome = handle.await.unwrap();
            inserted += outcome.inserted as usize;
            ids.push(outcome.id);
        }
        assert_eq!(inserted, 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_missing_fingerprint() {
        let store = MemoryArticleStore::new();
        assert!(store
            .find_by_fingerprint(&Fingerprint::of("nothing"))
            .await
            .unwrap()
            .is_none());
    }
}
