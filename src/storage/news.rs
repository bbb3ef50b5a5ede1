use super::schema::Database;
use super::types::{DatabaseError, NewNewsItem, NewsItem, NewsItemRow};

/// Upper bound on page size for listing queries (OOM protection)
const MAX_PAGE_SIZE: i64 = 200;

impl Database {
    // ========================================================================
    // News Item Operations
    // ========================================================================

    pub(crate) async fn news_exists(&self, source_id: i64, guid: &str) -> Result<bool, DatabaseError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM news_items WHERE source_id = ? AND guid = ?)",
        )
        .bind(source_id)
        .bind(guid)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Plain INSERT so a (source, guid) conflict surfaces as `Duplicate`.
    pub(crate) async fn insert_news(&self, item: &NewNewsItem) -> Result<i64, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO news_items (title, content, url, published_at, source_id, guid, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&item.title)
        .bind(&item.content)
        .bind(&item.url)
        .bind(item.published_at.timestamp())
        .bind(item.source_id)
        .bind(&item.guid)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_insert)?;

        Ok(result.last_insert_rowid())
    }

    /// Page through news from the sources a user subscribes to, newest first.
    ///
    /// `page` is 1-based; `page_size` is capped at 200. Returns the page and
    /// the total number of matching items.
    pub async fn news_for_user(
        &self,
        user_id: i64,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<NewsItem>, i64), DatabaseError> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page.max(1) - 1) * page_size;

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM news_items ni
            JOIN user_sources us ON ni.source_id = us.source_id
            WHERE us.user_id = ?
        "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, NewsItemRow>(
            r#"
            SELECT ni.id, ni.title, ni.content, ni.url, ni.published_at, ni.source_id, ni.guid
            FROM news_items ni
            JOIN user_sources us ON ni.source_id = us.source_id
            WHERE us.user_id = ?
            ORDER BY ni.published_at DESC, ni.id DESC
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(user_id)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.into_iter().map(NewsItemRow::into_news_item).collect(), total))
    }

    /// Number of stored items for a source
    pub async fn count_news_for_source(&self, source_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM news_items WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, DatabaseError, NewNewsItem};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_item(source_id: i64, guid: &str, ts: i64) -> NewNewsItem {
        NewNewsItem {
            title: format!("Title {}", guid),
            content: Some("Body".to_string()),
            url: format!("https://example.com/{}", guid),
            published_at: Utc.timestamp_opt(ts, 0).unwrap(),
            source_id,
            guid: guid.to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_then_exists() {
        let db = test_db().await;
        let src = db.add_source("S", "https://s.example.com/rss", None).await.unwrap();

        assert!(!db.news_exists(src, "g1").await.unwrap());
        let id = db.insert_news(&test_item(src, "g1", 1_700_000_000)).await.unwrap();
        assert!(id > 0);
        assert!(db.news_exists(src, "g1").await.unwrap());
        assert_eq!(db.count_news_for_source(src).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_reports_duplicate() {
        let db = test_db().await;
        let src = db.add_source("S", "https://s.example.com/rss", None).await.unwrap();

        db.insert_news(&test_item(src, "g1", 1_700_000_000)).await.unwrap();
        let err = db
            .insert_news(&test_item(src, "g1", 1_700_000_000))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate));
        assert_eq!(db.count_news_for_source(src).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_guid_different_sources_allowed() {
        let db = test_db().await;
        let a = db.add_source("A", "https://a.example.com/rss", None).await.unwrap();
        let b = db.add_source("B", "https://b.example.com/rss", None).await.unwrap();

        db.insert_news(&test_item(a, "shared", 1)).await.unwrap();
        db.insert_news(&test_item(b, "shared", 1)).await.unwrap();
        assert!(db.news_exists(a, "shared").await.unwrap());
        assert!(db.news_exists(b, "shared").await.unwrap());
    }

    #[tokio::test]
    async fn test_news_for_user_pagination() {
        let db = test_db().await;
        let a = db.add_source("A", "https://a.example.com/rss", None).await.unwrap();
        let b = db.add_source("B", "https://b.example.com/rss", None).await.unwrap();
        db.subscribe(1, a).await.unwrap();

        for (i, guid) in ["old", "mid", "new"].iter().enumerate() {
            db.insert_news(&test_item(a, guid, 1_000 + i as i64)).await.unwrap();
        }
        db.insert_news(&test_item(b, "other", 5_000)).await.unwrap();

        let (page1, total) = db.news_for_user(1, 1, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(
            page1.iter().map(|n| n.guid.as_str()).collect::<Vec<_>>(),
            vec!["new", "mid"]
        );
        assert_eq!(page1[0].published_at.timestamp(), 1_002);

        let (page2, _) = db.news_for_user(1, 2, 2).await.unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].guid, "old");

        let (none, total) = db.news_for_user(99, 1, 10).await.unwrap();
        assert!(none.is_empty());
        assert_eq!(total, 0);
    }
}
