use async_trait::async_trait;

use super::schema::Database;
use super::types::{DatabaseError, NewNewsItem, Source};

/// What the ingestion pipeline needs from persistence.
///
/// `insert_news_item` must accept a GUID that is already stored for the
/// source and report it as [`DatabaseError::Duplicate`]; callers treat that as
/// "already present", not as a failure.
#[async_trait]
pub trait NewsStore: Send + Sync {
    async fn list_active_sources(&self) -> Result<Vec<Source>, DatabaseError>;

    async fn list_active_sources_for_user(&self, user_id: i64) -> Result<Vec<Source>, DatabaseError>;

    async fn exists_by_guid(&self, source_id: i64, guid: &str) -> Result<bool, DatabaseError>;

    /// Returns the new row id.
    async fn insert_news_item(&self, item: &NewNewsItem) -> Result<i64, DatabaseError>;
}

#[async_trait]
impl NewsStore for Database {
    async fn list_active_sources(&self) -> Result<Vec<Source>, DatabaseError> {
        self.active_sources().await
    }

    async fn list_active_sources_for_user(&self, user_id: i64) -> Result<Vec<Source>, DatabaseError> {
        self.active_sources_for_user(user_id).await
    }

    async fn exists_by_guid(&self, source_id: i64, guid: &str) -> Result<bool, DatabaseError> {
        self.news_exists(source_id, guid).await
    }

    async fn insert_news_item(&self, item: &NewNewsItem) -> Result<i64, DatabaseError> {
        self.insert_news(item).await
    }
}
