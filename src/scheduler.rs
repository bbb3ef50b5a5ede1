//! Periodic full sweeps.
//!
//! The first sweep runs immediately on [`Scheduler::start`], then one per
//! interval. A tick that fires while the previous sweep is still running is
//! skipped, so sweeps never overlap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::ingest::Sweeper;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

pub struct Scheduler {
    sweeper: Arc<dyn Sweeper>,
    interval: Duration,
    running: Arc<AtomicBool>,
    sweeping: Arc<AtomicBool>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Scheduler {
    /// `interval` of zero is replaced by [`DEFAULT_SWEEP_INTERVAL`].
    pub fn new(sweeper: Arc<dyn Sweeper>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_SWEEP_INTERVAL
        } else {
            interval
        };
        Self {
            sweeper,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            sweeping: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Begin sweeping. A second call while running logs and returns.
    ///
    /// The loop also stops when `parent` is cancelled.
    pub fn start(&self, parent: &CancellationToken) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!("Scheduler already running");
            return;
        }

        let cancel = parent.child_token();
        let sweeper = Arc::clone(&self.sweeper);
        let running = Arc::clone(&self.running);
        let sweeping = Arc::clone(&self.sweeping);
        let interval = self.interval;
        let loop_cancel = cancel.clone();

        tracing::info!(interval_secs = interval.as_secs(), "Starting news scheduler");
        let handle = tokio::spawn(async move {
            run_loop(sweeper, interval, sweeping, loop_cancel).await;
            running.store(false, Ordering::Release);
            tracing::info!("Scheduler stopped");
        });

        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some((cancel, handle));
    }

    /// Stop the loop and wait for it to exit. A sweep in progress sees the
    /// cancellation at its next cancellation point. No-op when not running.
    pub async fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some((cancel, handle)) = task else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Scheduler task ended abnormally");
        }
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let task = self.task.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some((cancel, _)) = task.take() {
            cancel.cancel();
        }
    }
}

async fn run_loop(
    sweeper: Arc<dyn Sweeper>,
    interval: Duration,
    sweeping: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    // First tick completes immediately
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut current: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if sweeping.swap(true, Ordering::AcqRel) {
                    tracing::warn!("Previous sweep still running, skipping this tick");
                    continue;
                }
                let sweeper = Arc::clone(&sweeper);
                let guard = SweepGuard(Arc::clone(&sweeping));
                let cancel = cancel.clone();
                current = Some(tokio::spawn(async move {
                    let _guard = guard;
                    run_sweep(sweeper.as_ref(), &cancel).await;
                }));
            }
        }
    }

    if let Some(handle) = current {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Sweep task panicked");
        }
    }
}

async fn run_sweep(sweeper: &dyn Sweeper, cancel: &CancellationToken) {
    tracing::info!("Starting scheduled news sweep");
    let started = tokio::time::Instant::now();
    match sweeper.sweep(cancel).await {
        Ok(outcome) => tracing::info!(
            saved = outcome.saved,
            sources = outcome.sources,
            failed_sources = outcome.failed_sources,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "News sweep completed"
        ),
        Err(e) => tracing::error!(error = %e, "News sweep failed"),
    }
}

/// Clears the in-progress flag even if the sweep panics.
struct SweepGuard(Arc<AtomicBool>);

impl Drop for SweepGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
