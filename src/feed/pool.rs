//! Bounded fan-out of feed fetches.
//!
//! All URLs go onto a work channel up front; a fixed number of workers drain
//! it and report `(url, result)` pairs on a results channel. The pool is done
//! when every worker has exited and the results channel closes.

use crate::feed::fetcher::{FeedFetcher, FetchError};
use crate::feed::parser::FeedItem;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Collected results of one fan-out run.
///
/// A URL appears in exactly one of `items` or `failed`.
#[derive(Debug, Default)]
pub struct PoolOutcome {
    /// Items per URL for every URL that fetched and parsed successfully
    pub items: HashMap<String, Vec<FeedItem>>,
    /// URLs that exhausted their retries, with the final error
    pub failed: Vec<(String, FetchError)>,
}

impl PoolOutcome {
    /// True if at least one URL failed.
    pub fn had_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

type WorkResult = (String, Result<Vec<FeedItem>, FetchError>);

/// Fetch every URL with at most `max_workers` concurrent fetches.
///
/// A failing URL never affects the others: it simply lands in
/// [`PoolOutcome::failed`]. Duplicate URLs are fetched once.
pub async fn fetch_all(
    fetcher: &FeedFetcher,
    urls: Vec<String>,
    max_workers: usize,
    cancel: &CancellationToken,
) -> PoolOutcome {
    let mut seen = HashSet::with_capacity(urls.len());
    let urls: Vec<String> = urls.into_iter().filter(|u| seen.insert(u.clone())).collect();

    if urls.is_empty() {
        return PoolOutcome::default();
    }

    let total = urls.len();
    let workers = max_workers.clamp(1, total);

    let (work_tx, work_rx) = mpsc::channel::<String>(total);
    for url in urls {
        // Capacity equals the URL count and the receiver is alive, so this never fails
        if let Err(e) = work_tx.try_send(url) {
            tracing::error!(error = %e, "Work queue rejected URL");
        }
    }
    drop(work_tx);

    let work_rx = Arc::new(Mutex::new(work_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<WorkResult>(total);

    for worker in 0..workers {
        let work_rx = Arc::clone(&work_rx);
        let result_tx = result_tx.clone();
        let fetcher = fetcher.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                let next = work_rx.lock().await.recv().await;
                let Some(url) = next else { break };

                let result = fetcher.fetch(&url, &cancel).await;
                if result_tx.send((url, result)).await.is_err() {
                    break;
                }
            }
            tracing::trace!(worker = worker, "Fetch worker drained");
        });
    }
    // Workers hold the remaining senders; the channel closes when the last exits
    drop(result_tx);

    let mut outcome = PoolOutcome::default();
    while let Some((url, result)) = result_rx.recv().await {
        match result {
            Ok(items) => {
                outcome.items.insert(url, items);
            }
            Err(FetchError::Cancelled) => {
                tracing::debug!(url = %url, "Feed fetch cancelled");
                outcome.failed.push((url, FetchError::Cancelled));
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Feed failed, skipping this cycle");
                outcome.failed.push((url, e));
            }
        }
    }

    tracing::debug!(
        total = total,
        succeeded = outcome.items.len(),
        failed = outcome.failed.len(),
        workers = workers,
        "Fan-out fetch finished"
    );

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::fetcher::RetryPolicy;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss(guid: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>{guid}</guid><title>Item {guid}</title><link>https://example.com/{guid}</link></item>
</channel></rss>"#
        )
    }

    fn fetcher() -> FeedFetcher {
        FeedFetcher::with_client(
            reqwest::Client::new(),
            RetryPolicy {
                max_attempts: 2,
                delay: Duration::from_millis(10),
            },
        )
    }

    #[tokio::test]
    async fn test_empty_input() {
        let outcome = fetch_all(&fetcher(), Vec::new(), 4, &CancellationToken::new()).await;
        assert!(outcome.items.is_empty());
        assert!(!outcome.had_failures());
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_every_url_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let urls = vec![
            "http://127.0.0.1:9/a.xml".to_string(),
            "http://127.0.0.1:9/b.xml".to_string(),
        ];

        let outcome = fetch_all(&fetcher(), urls, 2, &cancel).await;
        assert!(outcome.items.is_empty());
        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome
            .failed
            .iter()
            .all(|(_, e)| matches!(e, FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_one_failing_url_does_not_affect_others() {
        let server = MockServer::start().await;
        for name in ["a", "b", "c"] {
            Mock::given(method("GET"))
                .and(path(format!("/{name}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(rss(name)))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let urls: Vec<String> = ["a", "broken", "b", "c"]
            .iter()
            .map(|p| format!("{}/{}", server.uri(), p))
            .collect();

        let outcome = fetch_all(&fetcher(), urls, 2, &CancellationToken::new()).await;

        assert_eq!(outcome.items.len(), 3);
        assert!(outcome.had_failures());
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed[0].0.ends_with("/broken"));
        let b = &outcome.items[&format!("{}/b", server.uri())];
        assert_eq!(b[0].guid, "b");
    }

    #[tokio::test]
    async fn test_more_workers_than_urls_and_duplicates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/only"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss("only")))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/only", server.uri());
        let outcome = fetch_all(
            &fetcher(),
            vec![url.clone(), url.clone()],
            16,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.items.len(), 1);
        assert!(outcome.items.contains_key(&url));
    }

    #[tokio::test]
    async fn test_zero_workers_still_makes_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss("x")))
            .mount(&server)
            .await;

        let urls = vec![format!("{}/1", server.uri()), format!("{}/2", server.uri())];
        let outcome = fetch_all(&fetcher(), urls, 0, &CancellationToken::new()).await;
        assert_eq!(outcome.items.len(), 2);
    }
}
