use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::feed::FeedItem;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An item with the same (source, GUID) is already stored
    #[error("News item already exists for this source")]
    Duplicate,

    /// Caller supplied data the store refuses to accept
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Map an insert failure, recognizing uniqueness violations.
    pub(crate) fn from_insert(err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => DatabaseError::Duplicate,
            _ => DatabaseError::Other(err),
        }
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Internal row type for news queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct NewsItemRow {
    pub id: i64,
    pub title: String,
    pub content: Option<String>,
    pub url: String,
    pub published_at: i64,
    pub source_id: i64,
    pub guid: String,
}

impl NewsItemRow {
    pub(crate) fn into_news_item(self) -> NewsItem {
        NewsItem {
            id: self.id,
            title: self.title,
            content: self.content,
            url: self.url,
            published_at: DateTime::from_timestamp(self.published_at, 0).unwrap_or_default(),
            source_id: self.source_id,
            guid: self.guid,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A syndication source. Read-only to the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub category_id: Option<i64>,
    pub is_active: bool,
}

/// A stored news item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsItem {
    pub id: i64,
    pub title: String,
    pub content: Option<String>,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub source_id: i64,
    pub guid: String,
}

/// A news item about to be inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNewsItem {
    pub title: String,
    pub content: Option<String>,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub source_id: i64,
    pub guid: String,
}

impl NewNewsItem {
    /// Build the persisted form of a fetched item for `source_id`.
    pub fn from_feed_item(source_id: i64, item: &FeedItem) -> Self {
        Self {
            title: item.title.clone(),
            content: (!item.description.is_empty()).then(|| item.description.clone()),
            url: item.link.clone(),
            published_at: item.published,
            source_id,
            guid: item.guid.clone(),
        }
    }
}

/// A source grouping
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
}
