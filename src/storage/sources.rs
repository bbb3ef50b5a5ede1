use url::Url;

use super::schema::Database;
use super::types::{Category, DatabaseError, Source};

impl Database {
    // ========================================================================
    // Category Operations
    // ========================================================================

    /// Create a category, returning the existing id when the name is taken.
    pub async fn create_category(&self, name: &str) -> Result<i64, DatabaseError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DatabaseError::InvalidInput(
                "category name must not be empty".into(),
            ));
        }

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO categories (name) VALUES (?)
            ON CONFLICT(name) DO UPDATE SET name = excluded.name
            RETURNING id
        "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>, DatabaseError> {
        let categories = sqlx::query_as::<_, Category>("SELECT id, name FROM categories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(categories)
    }

    // ========================================================================
    // Source Operations
    // ========================================================================

    /// Register a feed source (active by default).
    ///
    /// Re-adding a known URL updates its name and category and keeps its id.
    pub async fn add_source(
        &self,
        name: &str,
        url: &str,
        category_id: Option<i64>,
    ) -> Result<i64, DatabaseError> {
        let parsed = Url::parse(url.trim())
            .map_err(|e| DatabaseError::InvalidInput(format!("invalid source URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DatabaseError::InvalidInput(format!(
                "unsupported scheme: {} (only http/https allowed)",
                parsed.scheme()
            )));
        }

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO sources (name, url, category_id) VALUES (?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                name = excluded.name,
                category_id = excluded.category_id
            RETURNING id
        "#,
        )
        .bind(name.trim())
        .bind(url.trim())
        .bind(category_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(source_id = id, url = %url.trim(), "Source registered");
        Ok(id)
    }

    /// Enable or disable a source. Returns false if no such source exists.
    pub async fn set_source_active(&self, source_id: i64, active: bool) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE sources SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All sources, active or not
    pub async fn list_sources(&self) -> Result<Vec<Source>, DatabaseError> {
        let sources = sqlx::query_as::<_, Source>(
            "SELECT id, name, url, category_id, is_active FROM sources ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }

    pub(crate) async fn active_sources(&self) -> Result<Vec<Source>, DatabaseError> {
        let sources = sqlx::query_as::<_, Source>(
            r#"
            SELECT id, name, url, category_id, is_active
            FROM sources
            WHERE is_active = 1
            ORDER BY id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }

    pub(crate) async fn active_sources_for_user(&self, user_id: i64) -> Result<Vec<Source>, DatabaseError> {
        let sources = sqlx::query_as::<_, Source>(
            r#"
            SELECT s.id, s.name, s.url, s.category_id, s.is_active
            FROM sources s
            JOIN user_sources us ON us.source_id = s.id
            WHERE us.user_id = ? AND s.is_active = 1
            ORDER BY s.id
        "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }

    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// Subscribe a user to a source. Subscribing twice is a no-op.
    pub async fn subscribe(&self, user_id: i64, source_id: i64) -> Result<(), DatabaseError> {
        sqlx::query("INSERT OR IGNORE INTO user_sources (user_id, source_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns false if the user was not subscribed.
    pub async fn unsubscribe(&self, user_id: i64, source_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM user_sources WHERE user_id = ? AND source_id = ?")
            .bind(user_id)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
