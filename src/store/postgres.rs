use super::{ArticleStore, StoreError};
use crate::models::{ArticleRecord, Fingerprint, PersistedId, StoredArticle, UpsertOutcome};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{info, instrument};

const SCHEMA: &str = include_str!("../../migrations/0001_create_articles.sql");

const UPSERT: &str = r#"
    INSERT INTO articles (title, publish_time, content, img, sport, md5, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, now(), now())
    ON CONFLICT (md5) DO UPDATE SET
        title = EXCLUDED.title,
        publish_time = EXCLUDED.publish_time,
        content = EXCLUDED.content,
        img = EXCLUDED.img,
        sport = EXCLUDED.sport,
        updated_at = now()
    RETURNING id, (xmax = 0) AS inserted
"#;

/// Postgres-backed article store.
///
/// The upsert is a single statement against the unique index on `md5`, so
/// concurrent writers of the same content resolve to one row.
#[derive(Debug, Clone)]
pub struct PgArticleStore {
    pool: PgPool,
}

impl PgArticleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(level = "info", skip_all)]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "Connected to Postgres");
        Ok(Self::new(pool))
    }

    /// Create the `articles` table and its indexes if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn stored_from_row(row: &PgRow) -> Result<StoredArticle, sqlx::Error> {
    Ok(StoredArticle {
        id: PersistedId(row.try_get("id")?),
        record: ArticleRecord {
            title: row.try_get("title")?,
            publish_time: row.try_get("publish_time")?,
            content: row.try_get("content")?,
            img: row.try_get("img")?,
            category: row.try_get("sport")?,
            fingerprint: Fingerprint(row.try_get("md5")?),
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

#[async_trait]
impl ArticleStore for PgArticleStore {
    async fn find_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<StoredArticle>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, publish_time, content, img, sport, md5, created_at, updated_at, deleted_at
            FROM articles
            WHERE md5 = $1
            "#,
        )
        .bind(fingerprint.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(stored_from_row).transpose()?)
    }

    #[instrument(level = "debug", skip_all, fields(fingerprint = %record.fingerprint))]
    async fn upsert(&self, record: &ArticleRecord) -> Result<UpsertOutcome, StoreError> {
        let row = sqlx::query(UPSERT)
            .bind(&record.title)
            .bind(&record.publish_time)
            .bind(&record.content)
            .bind(&record.img)
            .bind(&record.category)
            .bind(record.fingerprint.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(UpsertOutcome {
            id: PersistedId(row.try_get("id")?),
            inserted: row.try_get("inserted")?,
        })
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use testcontainers::runners::AsyncRunner;
    use testcontainers::{ContainerAsync, ImageExt};
    use testcontainers_modules::postgres::Postgres;

    /// A fresh Postgres with the schema applied. Keep the container alive for the test.
    async fn start_store() -> (ContainerAsync<Postgres>, PgArticleStore) {
        let container = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .expect("start Postgres container");
        let host = container.get_host().await.unwrap();
        let port = container.get_host_port_ipv4(5432).await.unwrap();
        let url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

        let store = PgArticleStore::connect(&url, 20).await.unwrap();
        store.ensure_schema().await.unwrap();
        (container, store)
    }

    fn record(title: &str, content: &str) -> ArticleRecord {
        ArticleRecord {
            title: title.to_string(),
            publish_time: "2025-05-06 10:00".to_string(),
            content: content.to_string(),
            img: "https://img.test/a.jpg".to_string(),
            category: "football".to_string(),
            fingerprint: Fingerprint::of(content),
        }
    }

    #[test]
    fn test_schema_declares_unique_fingerprint() {
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS articles"));
        assert!(SCHEMA.contains("CREATE UNIQUE INDEX IF NOT EXISTS articles_md5_key ON articles (md5)"));
        assert!(SCHEMA.contains("deleted_at TIMESTAMPTZ"));
    }

    #[test]
    fn test_upsert_conflicts_on_fingerprint_and_keeps_created_at() {
        assert!(UPSERT.contains("ON CONFLICT (md5) DO UPDATE"));
        let update_clause = UPSERT.split("DO UPDATE SET").nth(1).unwrap();
        assert!(!update_clause.contains("created_at"));
        assert!(!update_clause.contains("deleted_at"));
    }

    #[tokio::test]
    #[ignore = "starts a Postgres container; needs Docker"]
    async fn test_upsert_same_content_updates_in_place() {
        let (_container, store) = start_store().await;

        let first = store.upsert(&record("Original", "Hello world")).await.unwrap();
        let before = store
            .find_by_fingerprint(&Fingerprint::of("Hello world"))
            .await
            .unwrap()
            .unwrap();
        let second = store.upsert(&record("Retitled", "Hello world")).await.unwrap();
        let after = store
            .find_by_fingerprint(&Fingerprint::of("Hello world"))
            .await
            .unwrap()
            .unwrap();

        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(first.id, second.id);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(after.id, first.id);
        assert_eq!(after.record.title, "Retitled");
        assert_eq!(after.record.fingerprint.as_str(), "3e25960a79dbc69b674cd4ec67a72c62");
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at >= before.updated_at);
        assert!(after.deleted_at.is_none());
    }

    #[tokio::test]
    #[ignore = "starts a Postgres container; needs Docker"]
    async fn test_concurrent_upserts_of_same_content_leave_one_row() {
        let (_container, store) = start_store().await;
        let rec = record("Shared", "Same story from many workers");

        let outcomes = join_all((0..16).map(|_| store.upsert(&rec))).await;
        let outcomes: Vec<_> = outcomes.into_iter().map(|o| o.unwrap()).collect();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(outcomes.iter().filter(|o| o.inserted).count(), 1);
        assert!(outcomes.iter().all(|o| o.id == outcomes[0].id));
    }

    #[tokio::test]
    #[ignore = "starts a Postgres container; needs Docker"]
    async fn test_distinct_content_gets_distinct_rows_and_schema_is_idempotent() {
        let (_container, store) = start_store().await;
        store.ensure_schema().await.unwrap();

        let a = store.upsert(&record("A", "first")).await.unwrap();
        let b = store.upsert(&record("B", "second")).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(store.count().await.unwrap(), 2);
        assert!(
            store
                .find_by_fingerprint(&Fingerprint::of("missing"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
