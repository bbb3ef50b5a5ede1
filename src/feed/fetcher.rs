use crate::feed::parser::{parse_feed, FeedItem};
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const USER_AGENT: &str = concat!("newswire/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur while fetching a single feed.
///
/// Every variant except [`FetchError::Exhausted`] and [`FetchError::Cancelled`]
/// describes one failed attempt; the fetcher wraps the last of them in
/// `Exhausted` once the retry budget is spent.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the client timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// All attempts failed
    #[error("failed to fetch {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
    /// Shutdown was requested before the fetch finished
    #[error("Fetch cancelled")]
    Cancelled,
}

/// Fixed-delay retry budget for one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Fetches one feed URL and normalizes it into [`FeedItem`]s.
///
/// Cheap to clone: the underlying `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl FeedFetcher {
    /// Build a fetcher with its own HTTP client.
    pub fn new(policy: RetryPolicy, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, policy })
    }

    /// Build a fetcher around an existing client (shared connection pool).
    pub fn with_client(client: reqwest::Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Fetch and parse `url`, retrying on any failure.
    ///
    /// The first attempt that parses successfully wins. Between attempts the
    /// fetcher waits `policy.delay`. Whether waiting or mid-request, it returns
    /// [`FetchError::Cancelled`] as soon as `cancel` fires. After `policy.max_attempts` failures the last
    /// error is returned inside [`FetchError::Exhausted`].
    pub async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<FeedItem>, FetchError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        tracing::debug!(url = %url, "Fetching feed");

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = self.fetch_once(url) => result,
            };
            let err = match result {
                Ok(items) => {
                    tracing::debug!(url = %url, attempt = attempt, items = items.len(), "Feed fetched");
                    return Ok(items);
                }
                Err(e) => e,
            };

            tracing::warn!(url = %url, attempt = attempt, error = %err, "Feed fetch attempt failed");

            if attempt >= attempts {
                return Err(FetchError::Exhausted {
                    url: url.to_string(),
                    attempts,
                    last: Box::new(err),
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(self.policy.delay) => {}
            }
            attempt += 1;
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<FeedItem>, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Network(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
        parse_feed(&bytes, url).map_err(|e| FetchError::Parse(e.to_string()))
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Network(e)
            }
        })?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
