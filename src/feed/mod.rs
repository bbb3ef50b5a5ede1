//! Feed retrieval: fetching, parsing and bounded fan-out.
//!
//! - [`parser`] - Normalizes RSS/Atom documents into [`FeedItem`]s and derives GUIDs
//! - [`fetcher`] - HTTP retrieval of one feed with fixed-delay retry
//! - [`pool`] - Concurrent fetch of many feeds with a fixed worker count
//!
//! # Example
//!
//! ```ignore
//! use newswire::feed::{fetch_all, FeedFetcher, RetryPolicy};
//!
//! let fetcher = FeedFetcher::new(RetryPolicy::default(), Duration::from_secs(30))?;
//! let outcome = fetch_all(&fetcher, urls, 10, &cancel).await;
//! if outcome.had_failures() {
//!     tracing::warn!(failed = outcome.failed.len(), "Some feeds failed");
//! }
//! ```

mod fetcher;
mod parser;
mod pool;

pub use fetcher::{FeedFetcher, FetchError, RetryPolicy};
pub use parser::{generate_guid, parse_feed, FeedItem};
pub use pool::{fetch_all, PoolOutcome};
