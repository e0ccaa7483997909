//! Generic async condition polling with timeout.
//!
//! Every component that waits on an external event goes through
//! [`PollingMonitor`]: the condition is evaluated on a fixed interval off the
//! caller's thread until it holds or a deadline elapses. Deadlines are
//! enforced by an independent higher-frequency sweeper, so a slow or stuck
//! condition callback cannot delay timeout detection.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::errors::MonitorError;

/// A condition evaluated repeatedly until it holds.
#[async_trait]
pub trait Condition: Send + Sync {
    /// Returns true once the awaited state has been reached.
    async fn check(&self) -> bool;
}

struct FnCondition<F>(F);

#[async_trait]
impl<F> Condition for FnCondition<F>
where
    F: Fn() -> bool + Send + Sync,
{
    async fn check(&self) -> bool {
        (self.0)()
    }
}

const STATE_PENDING: u8 = 0;
const STATE_COMPLETED: u8 = 1;
const STATE_TIMED_OUT: u8 = 2;
const STATE_CANCELLED: u8 = 3;

/// State shared between the poll task, the sweeper and the handle.
///
/// Every resolution goes through a compare-and-swap on the state byte, so
/// exactly one of completion, timeout and cancellation wins and the outcome
/// is delivered to the waiter exactly once.
struct MonitorShared {
    state: AtomicU8,
    outcome_tx: Mutex<Option<oneshot::Sender<Result<(), MonitorError>>>>,
}

impl MonitorShared {
    fn new(outcome_tx: oneshot::Sender<Result<(), MonitorError>>) -> Self {
        Self {
            state: AtomicU8::new(STATE_PENDING),
            outcome_tx: Mutex::new(Some(outcome_tx)),
        }
    }

    fn resolve(&self, state: u8, outcome: Result<(), MonitorError>) -> bool {
        if self
            .state
            .compare_exchange(STATE_PENDING, state, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Some(tx) = self.outcome_tx.lock().take() {
                let _ = tx.send(outcome);
            }
            true
        } else {
            false
        }
    }

    fn is_pending(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_PENDING
    }
}

struct DeadlineEntry {
    deadline: Instant,
    shared: Arc<MonitorShared>,
}

/// Polls caller-supplied conditions on fixed intervals, with deadlines
/// enforced by a dedicated sweeper task.
///
/// Must be created inside a Tokio runtime.
pub struct PollingMonitor {
    deadlines: Arc<DashMap<Uuid, DeadlineEntry>>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl Default for PollingMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PollingMonitor {
    /// Default period of the deadline sweeper.
    pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

    /// Creates a monitor with the default sweep interval.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sweep_interval(Self::DEFAULT_SWEEP_INTERVAL)
    }

    /// Creates a monitor sweeping deadlines at the given period.
    #[must_use]
    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        let deadlines: Arc<DashMap<Uuid, DeadlineEntry>> = Arc::new(DashMap::new());
        let sweep_map = Arc::clone(&deadlines);

        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let expired: Vec<Uuid> = sweep_map
                    .iter()
                    .filter(|entry| entry.deadline <= now)
                    .map(|entry| *entry.key())
                    .collect();
                for id in expired {
                    if let Some((_, entry)) = sweep_map.remove(&id) {
                        if entry.shared.resolve(STATE_TIMED_OUT, Err(MonitorError::Timeout)) {
                            debug!(monitor_id = %id, "Monitor timed out");
                        }
                    }
                }
            }
        });

        Self { deadlines, sweeper }
    }

    /// Registers a condition to poll every `interval` until it holds or
    /// `timeout` elapses.
    ///
    /// Never blocks the caller. The first evaluation happens one interval
    /// after registration, never earlier. After the handle resolves, the
    /// condition is not evaluated again.
    pub fn monitor<C>(&self, condition: C, interval: Duration, timeout: Duration) -> MonitorHandle
    where
        C: Condition + 'static,
    {
        let id = Uuid::new_v4();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let shared = Arc::new(MonitorShared::new(outcome_tx));

        self.deadlines.insert(
            id,
            DeadlineEntry {
                deadline: Instant::now() + timeout,
                shared: Arc::clone(&shared),
            },
        );

        let poll_shared = Arc::clone(&shared);
        let poll_map = Arc::clone(&self.deadlines);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !poll_shared.is_pending() {
                    break;
                }
                trace!(monitor_id = %id, "Evaluating monitor condition");
                if condition.check().await {
                    if poll_shared.resolve(STATE_COMPLETED, Ok(())) {
                        poll_map.remove(&id);
                        debug!(monitor_id = %id, "Monitor condition satisfied");
                    }
                    break;
                }
            }
        });

        MonitorHandle {
            id,
            shared,
            deadlines: Arc::clone(&self.deadlines),
            outcome_rx,
        }
    }

    /// Registers a plain closure as the condition.
    pub fn monitor_fn<F>(&self, condition: F, interval: Duration, timeout: Duration) -> MonitorHandle
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.monitor(FnCondition(condition), interval, timeout)
    }

    /// Number of monitors still awaiting resolution.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.deadlines.len()
    }
}

impl Drop for PollingMonitor {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

/// Cancellable handle to a registered monitor.
pub struct MonitorHandle {
    id: Uuid,
    shared: Arc<MonitorShared>,
    deadlines: Arc<DashMap<Uuid, DeadlineEntry>>,
    outcome_rx: oneshot::Receiver<Result<(), MonitorError>>,
}

impl MonitorHandle {
    /// Cancels the monitor.
    ///
    /// Idempotent, and a no-op after completion or timeout.
    pub fn cancel(&self) {
        if self
            .shared
            .resolve(STATE_CANCELLED, Err(MonitorError::Cancelled))
        {
            self.deadlines.remove(&self.id);
            debug!(monitor_id = %self.id, "Monitor cancelled");
        }
    }

    /// Returns true once the monitor has resolved, whichever way.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !self.shared.is_pending()
    }

    /// Awaits the outcome.
    ///
    /// # Errors
    ///
    /// [`MonitorError::Timeout`] when the deadline elapsed first,
    /// [`MonitorError::Cancelled`] when the monitor was cancelled.
    pub async fn wait(self) -> Result<(), MonitorError> {
        self.outcome_rx
            .await
            .unwrap_or(Err(MonitorError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_condition_true_after_k_intervals() {
        let monitor = PollingMonitor::new();
        let checks = Arc::new(AtomicUsize::new(0));
        let checks_in = Arc::clone(&checks);

        let start = Instant::now();
        let handle = monitor.monitor_fn(
            move || checks_in.fetch_add(1, Ordering::SeqCst) + 1 >= 3,
            Duration::from_secs(1),
            Duration::from_secs(30),
        );

        handle.wait().await.expect("condition satisfied");
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "completed at {elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "completed at {elapsed:?}");
        assert_eq!(checks.load(Ordering::SeqCst), 3);
        assert_eq!(monitor.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_completes_before_first_interval() {
        let monitor = PollingMonitor::new();
        let start = Instant::now();
        let handle = monitor.monitor_fn(|| true, Duration::from_secs(2), Duration::from_secs(30));

        handle.wait().await.expect("condition satisfied");
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_and_condition_stops() {
        let monitor = PollingMonitor::new();
        let checks = Arc::new(AtomicUsize::new(0));
        let checks_in = Arc::clone(&checks);

        let start = Instant::now();
        let handle = monitor.monitor_fn(
            move || {
                checks_in.fetch_add(1, Ordering::SeqCst);
                false
            },
            Duration::from_secs(1),
            Duration::from_secs(5),
        );

        let err = handle.wait().await.expect_err("must time out");
        assert_eq!(err, MonitorError::Timeout);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5), "timed out at {elapsed:?}");
        assert!(elapsed < Duration::from_secs(6), "timed out at {elapsed:?}");

        // The condition must never run again after the timeout fired.
        let observed = checks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(checks.load(Ordering::SeqCst), observed);
        assert_eq!(monitor.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent_and_safe_after_completion() {
        let monitor = PollingMonitor::new();
        let handle = monitor.monitor_fn(|| true, Duration::from_millis(10), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished());

        // Completed monitors ignore cancellation, repeatedly.
        handle.cancel();
        handle.cancel();
        assert_eq!(handle.wait().await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_resolves_waiter() {
        let monitor = PollingMonitor::new();
        let handle =
            monitor.monitor_fn(|| false, Duration::from_secs(1), Duration::from_secs(60));

        handle.cancel();
        assert_eq!(handle.wait().await, Err(MonitorError::Cancelled));
        assert_eq!(monitor.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_condition_does_not_delay_timeout() {
        let monitor = PollingMonitor::new();

        struct StuckCondition;

        #[async_trait]
        impl Condition for StuckCondition {
            async fn check(&self) -> bool {
                // Simulates a condition callback that hangs far past the
                // deadline.
                tokio::time::sleep(Duration::from_secs(3600)).await;
                false
            }
        }

        let start = Instant::now();
        let handle = monitor.monitor(StuckCondition, Duration::from_secs(1), Duration::from_secs(5));
        let err = handle.wait().await.expect_err("must time out");
        assert_eq!(err, MonitorError::Timeout);
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
