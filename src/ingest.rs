//! Ingestion orchestration: list sources, fetch, deduplicate, persist.
//!
//! Two entry points share the same dedup-and-insert step:
//!
//! - [`Ingestor::run_full_sweep`] fetches every active source through the
//!   bounded fan-out pool and persists through a fixed-size saver pool.
//! - [`Ingestor::run_for_user`] walks one user's subscriptions sequentially.
//!
//! Dedup is check-then-insert. Two overlapping runs can both pass the
//! existence check for the same item; the store's `UNIQUE(source_id, guid)`
//! turns the second insert into [`DatabaseError::Duplicate`], which is counted
//! as "already present".

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::feed::{fetch_all, FeedFetcher, FeedItem, FetchError};
use crate::storage::{DatabaseError, NewNewsItem, NewsStore, Source};

pub const DEFAULT_FETCH_WORKERS: usize = 10;
pub const DEFAULT_SAVER_WORKERS: usize = 5;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Listing sources failed; nothing was fetched
    #[error("failed to list sources: {0}")]
    Store(#[from] DatabaseError),

    /// Cancelled before every source was processed; `saved` items were kept
    #[error("ingestion cancelled after saving {saved} items")]
    Cancelled { saved: usize },
}

/// Summary of one full sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Newly inserted news items
    pub saved: usize,
    /// Active sources considered
    pub sources: usize,
    /// Sources whose fetch failed this cycle
    pub failed_sources: usize,
}

impl SweepOutcome {
    pub fn had_partial_failures(&self) -> bool {
        self.failed_sources > 0
    }
}

/// Something that can run a full sweep. Implemented by [`Ingestor`].
#[async_trait]
pub trait Sweeper: Send + Sync {
    async fn sweep(&self, cancel: &CancellationToken) -> Result<SweepOutcome, IngestError>;
}

/// Something that can refresh one user's sources. Implemented by [`Ingestor`].
#[async_trait]
pub trait UserRefresher: Send + Sync {
    async fn refresh_user(&self, user_id: i64, cancel: &CancellationToken) -> Result<usize, IngestError>;
}

pub struct Ingestor {
    store: Arc<dyn NewsStore>,
    fetcher: FeedFetcher,
    fetch_workers: usize,
    saver_workers: usize,
}

impl Ingestor {
    pub fn new(store: Arc<dyn NewsStore>, fetcher: FeedFetcher) -> Self {
        Self {
            store,
            fetcher,
            fetch_workers: DEFAULT_FETCH_WORKERS,
            saver_workers: DEFAULT_SAVER_WORKERS,
        }
    }

    /// Override pool sizes (values below 1 are treated as 1).
    pub fn with_workers(mut self, fetch_workers: usize, saver_workers: usize) -> Self {
        self.fetch_workers = fetch_workers.max(1);
        self.saver_workers = saver_workers.max(1);
        self
    }

    /// Fetch every active source and persist new items.
    ///
    /// Per-source fetch failures and per-item persistence failures are logged
    /// and skipped; only a failure to list sources is returned as an error.
    pub async fn run_full_sweep(&self, cancel: &CancellationToken) -> Result<SweepOutcome, IngestError> {
        let sources = self.store.list_active_sources().await?;
        if sources.is_empty() {
            tracing::info!("No active sources found");
            return Ok(SweepOutcome::default());
        }

        let urls: Vec<String> = sources.iter().map(|s| s.url.clone()).collect();
        let fetched = fetch_all(&self.fetcher, urls, self.fetch_workers, cancel).await;
        if fetched.had_failures() {
            tracing::warn!(
                failed = fetched.failed.len(),
                total = sources.len(),
                "Sweep fetched with partial failures, continuing"
            );
        }

        let tasks: Vec<(Source, Vec<FeedItem>)> = sources
            .iter()
            .filter_map(|source| {
                // Several sources may share a URL; each gets its own copy
                let items = fetched.items.get(&source.url)?;
                (!items.is_empty()).then(|| (source.clone(), items.clone()))
            })
            .collect();

        let saved = Arc::new(AtomicUsize::new(0));
        let store = &self.store;

        stream::iter(tasks)
            .for_each_concurrent(self.saver_workers, |(source, items)| {
                let saved = Arc::clone(&saved);
                async move {
                    let count = save_source_items(store.as_ref(), &source, &items).await;
                    saved.fetch_add(count, Ordering::Relaxed);
                    tracing::info!(
                        source_id = source.id,
                        source = %source.name,
                        saved = count,
                        "Saved new news items"
                    );
                }
            })
            .await;

        let outcome = SweepOutcome {
            saved: saved.load(Ordering::Relaxed),
            sources: sources.len(),
            failed_sources: fetched.failed.len(),
        };
        Ok(outcome)
    }

    /// Fetch and persist the active sources `user_id` subscribes to.
    ///
    /// Sources are processed one after another. A user with no subscriptions
    /// gets `Ok(0)`. Cancellation stops before the next source and returns
    /// [`IngestError::Cancelled`] carrying the count saved so far.
    pub async fn run_for_user(&self, user_id: i64, cancel: &CancellationToken) -> Result<usize, IngestError> {
        let sources = self.store.list_active_sources_for_user(user_id).await?;
        if sources.is_empty() {
            tracing::debug!(user_id = user_id, "User has no active subscriptions");
            return Ok(0);
        }

        let mut saved = 0;
        for source in &sources {
            if cancel.is_cancelled() {
                tracing::debug!(user_id = user_id, saved = saved, "User refresh cancelled");
                return Err(IngestError::Cancelled { saved });
            }

            let items = match self.fetcher.fetch(&source.url, cancel).await {
                Ok(items) => items,
                Err(FetchError::Cancelled) => {
                    tracing::debug!(user_id = user_id, saved = saved, "User refresh cancelled");
                    return Err(IngestError::Cancelled { saved });
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = user_id,
                        source = %source.name,
                        error = %e,
                        "Failed to fetch source for user"
                    );
                    continue;
                }
            };

            saved += save_source_items(self.store.as_ref(), source, &items).await;
        }

        Ok(saved)
    }
}

#[async_trait]
impl Sweeper for Ingestor {
    async fn sweep(&self, cancel: &CancellationToken) -> Result<SweepOutcome, IngestError> {
        self.run_full_sweep(cancel).await
    }
}

#[async_trait]
impl UserRefresher for Ingestor {
    async fn refresh_user(&self, user_id: i64, cancel: &CancellationToken) -> Result<usize, IngestError> {
        self.run_for_user(user_id, cancel).await
    }
}

/// Dedup-and-insert every item of one source, returning how many were new.
async fn save_source_items(store: &dyn NewsStore, source: &Source, items: &[FeedItem]) -> usize {
    let mut saved = 0;

    for item in items {
        match store.exists_by_guid(source.id, &item.guid).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(guid = %item.guid, error = %e, "Error checking existence, skipping item");
                continue;
            }
        }

        match store.insert_news_item(&NewNewsItem::from_feed_item(source.id, item)).await {
            Ok(_) => saved += 1,
            // Lost a race with a concurrent run; the item is stored either way
            Err(DatabaseError::Duplicate) => {
                tracing::debug!(source_id = source.id, guid = %item.guid, "Item inserted concurrently");
            }
            Err(e) => {
                tracing::warn!(title = %item.title, error = %e, "Failed to save news item");
            }
        }
    }

    saved
}
