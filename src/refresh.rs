//! On-demand, per-user refresh requests.
//!
//! A request moves through `pending → queued → processing → completed | failed`.
//! Admission is controlled by two checks, in this order:
//!
//! 1. Per-user cooldown: a user whose last accepted request is younger than
//!    the cooldown gets [`RefreshError::RateLimited`].
//! 2. Queue capacity: when the bounded queue is full the caller gets
//!    [`RefreshError::QueueFull`].
//!
//! Neither rejection leaves any trace in the coordinator's state. Accepted
//! requests are processed by a fixed pool of workers and stay queryable via
//! [`RefreshCoordinator::get_request_status`] until the janitor prunes them.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ingest::{IngestError, UserRefresher};

/// Tunables for the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    /// Number of queue workers
    pub workers: usize,
    /// Bounded queue size; the only admission control besides cooldown
    pub queue_capacity: usize,
    /// Minimum gap between two accepted requests of one user
    pub cooldown: Duration,
    /// Age after which request records and cooldown entries are pruned
    pub request_ttl: Duration,
    /// How often the janitor runs
    pub janitor_interval: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 100,
            cooldown: Duration::from_secs(3 * 60),
            request_ttl: Duration::from_secs(24 * 60 * 60),
            janitor_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("please wait {}s before refreshing again", retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    #[error("refresh queue is full, try again later")]
    QueueFull,

    #[error("refresh service is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Queued => "queued",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a refresh request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub id: Uuid,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub status: RequestStatus,
    /// Items saved; set only once the request completed
    pub result: Option<usize>,
}

struct TrackedRequest {
    request: RefreshRequest,
    accepted: Instant,
}

struct Job {
    id: Uuid,
    user_id: i64,
}

struct Shared {
    refresher: Arc<dyn UserRefresher>,
    settings: RefreshSettings,
    last_request: RwLock<HashMap<i64, Instant>>,
    requests: Mutex<HashMap<Uuid, TrackedRequest>>,
    queue_tx: mpsc::Sender<Job>,
    queue_rx: tokio::sync::Mutex<mpsc::Receiver<Job>>,
    cancel: CancellationToken,
}

/// Accepts per-user refresh requests and runs them on a fixed worker pool.
pub struct RefreshCoordinator {
    shared: Arc<Shared>,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl RefreshCoordinator {
    /// Create a coordinator whose workers stop when `parent` is cancelled.
    ///
    /// Nothing runs until [`start`](Self::start) is called; requests accepted
    /// before that simply wait in the queue.
    pub fn new(
        refresher: Arc<dyn UserRefresher>,
        settings: RefreshSettings,
        parent: &CancellationToken,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(settings.queue_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                refresher,
                settings,
                last_request: RwLock::new(HashMap::new()),
                requests: Mutex::new(HashMap::new()),
                queue_tx,
                queue_rx: tokio::sync::Mutex::new(queue_rx),
                cancel: parent.child_token(),
            }),
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool and the retention janitor. Calling it again is a no-op.
    pub fn start(&self) {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Refresh coordinator already started");
            return;
        }

        let workers = self.shared.settings.workers.max(1);
        tracing::info!(workers = workers, "Starting refresh coordinator");

        let mut handles = lock(&self.handles);
        for worker in 0..workers {
            let shared = Arc::clone(&self.shared);
            handles.push(tokio::spawn(async move { shared.run_worker(worker).await }));
        }
        let shared = Arc::clone(&self.shared);
        handles.push(tokio::spawn(async move { shared.run_janitor().await }));
    }

    /// Stop accepting requests, cancel the workers and wait for them to exit.
    ///
    /// A request being processed is interrupted at its next cancellation
    /// point and ends up `failed`.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let handles: Vec<_> = lock(&self.handles).drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Refresh task ended abnormally");
            }
        }
        tracing::info!("Refresh coordinator stopped");
    }

    /// Ask for a refresh of `user_id`'s sources.
    ///
    /// Never blocks: the request is either queued immediately or rejected, so
    /// there is no per-call cancellation. Processing is cancelled through the
    /// token given to [`new`](Self::new).
    pub fn request_refresh(&self, user_id: i64) -> Result<RefreshRequest, RefreshError> {
        self.shared.request_refresh(user_id)
    }

    /// Current state of a request, or `None` if the id was never issued or
    /// has been pruned.
    pub fn get_request_status(&self, id: Uuid) -> Option<RefreshRequest> {
        lock(&self.shared.requests)
            .get(&id)
            .map(|tracked| tracked.request.clone())
    }

    /// Drop request records and cooldown entries older than the TTL.
    ///
    /// Returns `(requests_removed, cooldowns_removed)`. Runs on its own every
    /// `janitor_interval` once started.
    pub fn prune_expired(&self) -> (usize, usize) {
        self.shared.prune_expired()
    }

    /// Number of requests waiting in the queue
    pub fn queued_len(&self) -> usize {
        self.shared.settings.queue_capacity.max(1) - self.shared.queue_tx.capacity()
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        // Workers and janitor hold their own Arc<Shared>; stop them
        self.shared.cancel.cancel();
    }
}

impl Shared {
    fn request_refresh(&self, user_id: i64) -> Result<RefreshRequest, RefreshError> {
        if self.cancel.is_cancelled() {
            return Err(RefreshError::ShuttingDown);
        }

        // Held across the whole accept path so concurrent calls for one user
        // cannot both pass the cooldown check. Nothing below awaits.
        let mut last_request = self
            .last_request
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if let Some(&last) = last_request.get(&user_id) {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.settings.cooldown {
                return Err(RefreshError::RateLimited {
                    retry_after: self.settings.cooldown - elapsed,
                });
            }
        }

        if self.queue_tx.capacity() == 0 {
            tracing::warn!(user_id = user_id, "Refresh queue full, rejecting request");
            return Err(RefreshError::QueueFull);
        }

        let request = RefreshRequest {
            id: Uuid::new_v4(),
            user_id,
            created_at: Utc::now(),
            status: RequestStatus::Pending,
            result: None,
        };
        lock(&self.requests).insert(
            request.id,
            TrackedRequest {
                request: request.clone(),
                accepted: now,
            },
        );
        let previous = last_request.insert(user_id, now);

        match self.queue_tx.try_send(Job {
            id: request.id,
            user_id,
        }) {
            Ok(()) => {
                // A worker may already have claimed it; only advance from pending
                let snapshot = self.transition(request.id, |req| {
                    if req.status == RequestStatus::Pending {
                        req.status = RequestStatus::Queued;
                    }
                });
                tracing::info!(request_id = %request.id, user_id = user_id, "Refresh request queued");
                Ok(snapshot.unwrap_or(RefreshRequest {
                    status: RequestStatus::Queued,
                    ..request
                }))
            }
            Err(e) => {
                // Roll back so a rejected request leaves no trace
                lock(&self.requests).remove(&request.id);
                match previous {
                    Some(prev) => last_request.insert(user_id, prev),
                    None => last_request.remove(&user_id),
                };
                match e {
                    TrySendError::Full(_) => Err(RefreshError::QueueFull),
                    TrySendError::Closed(_) => Err(RefreshError::ShuttingDown),
                }
            }
        }
    }

    /// Apply `f` to a tracked request and return the updated snapshot.
    fn transition(&self, id: Uuid, f: impl FnOnce(&mut RefreshRequest)) -> Option<RefreshRequest> {
        let mut requests = lock(&self.requests);
        let tracked = requests.get_mut(&id)?;
        f(&mut tracked.request);
        Some(tracked.request.clone())
    }

    async fn run_worker(self: Arc<Self>, worker: usize) {
        loop {
            let job = tokio::select! {
                _ = self.cancel.cancelled() => break,
                job = async { self.queue_rx.lock().await.recv().await } => job,
            };
            let Some(job) = job else { break };
            self.process(job).await;
        }
        tracing::debug!(worker = worker, "Refresh worker stopped");
    }

    async fn process(&self, job: Job) {
        self.transition(job.id, |req| req.status = RequestStatus::Processing);
        tracing::debug!(request_id = %job.id, user_id = job.user_id, "Processing refresh request");

        let outcome = catch_task_panic(self.refresher.refresh_user(job.user_id, &self.cancel)).await;

        match outcome {
            Ok(Ok(saved)) => {
                self.transition(job.id, |req| {
                    req.status = RequestStatus::Completed;
                    req.result = Some(saved);
                });
                tracing::info!(
                    request_id = %job.id,
                    user_id = job.user_id,
                    saved = saved,
                    "Completed refresh for user"
                );
            }
            Ok(Err(IngestError::Cancelled { saved })) => {
                self.transition(job.id, |req| req.status = RequestStatus::Failed);
                tracing::info!(request_id = %job.id, user_id = job.user_id, saved = saved, "Refresh cancelled by shutdown");
            }
            Ok(Err(e)) => {
                self.transition(job.id, |req| req.status = RequestStatus::Failed);
                tracing::warn!(request_id = %job.id, user_id = job.user_id, error = %e, "Failed to refresh news for user");
            }
            Err(panic_msg) => {
                self.transition(job.id, |req| req.status = RequestStatus::Failed);
                tracing::error!(request_id = %job.id, user_id = job.user_id, error = %panic_msg, "Refresh task panicked");
            }
        }
    }

    async fn run_janitor(self: Arc<Self>) {
        let period = self.settings.janitor_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let (requests, cooldowns) = self.prune_expired();
                    if requests > 0 || cooldowns > 0 {
                        tracing::debug!(requests = requests, cooldowns = cooldowns, "Pruned expired refresh state");
                    }
                }
            }
        }
    }

    fn prune_expired(&self) -> (usize, usize) {
        let ttl = self.settings.request_ttl;
        let now = Instant::now();
        let expired = |at: Instant| now.saturating_duration_since(at) > ttl;

        let requests_removed = {
            let mut requests = lock(&self.requests);
            let before = requests.len();
            requests.retain(|_, tracked| !expired(tracked.accepted));
            before - requests.len()
        };

        let cooldowns_removed = {
            let mut last_request = self
                .last_request
                .write()
                .unwrap_or_else(|e| e.into_inner());
            let before = last_request.len();
            last_request.retain(|_, at| !expired(*at));
            before - last_request.len()
        };

        (requests_removed, cooldowns_removed)
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Wraps a future to catch panics and convert them to errors.
async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|panic| {
            if let Some(s) = panic.downcast_ref::<&'static str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            }
        })
}
