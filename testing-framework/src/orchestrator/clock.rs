// File: testing-framework/src/orchestrator/clock.rs
//
// Clock Abstraction
//
// Consensus timestamps, step budgets and subscription deadlines all read time
// through this trait so scenario runs can be driven by paused tokio time.

use std::future::Future;
use std::pin::Pin;
use tokio::time::{self, Duration, Instant};

/// Clock abstraction trait - the harness never reads time any other way
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use tokio::time::Duration;
/// use ledger_testing_framework::orchestrator::clock::{Clock, SystemClock};
///
/// #[tokio::main]
/// async fn main() {
///     let clock: Arc<dyn Clock> = Arc::new(SystemClock);
///     let start = clock.now();
///     clock.sleep(Duration::from_millis(10)).await;
///     assert!(clock.now() - start >= Duration::from_millis(10));
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Returns the current instant in time
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration
    ///
    /// Under paused tokio time this completes as soon as the runtime is idle
    /// and auto-advances the clock.
    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// System real-time clock, used by the scenario runner
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

/// Paused clock (test environment)
///
/// Works with tokio's `time::pause()`. Time only moves through `advance()`
/// or when every task is idle on a timer, so timeouts resolve instantly and
/// consensus timestamps are reproducible.
///
/// Use [`PausedClock::new`] in a plain `#[tokio::test]` and
/// [`PausedClock::attach`] in `#[tokio::test(start_paused = true)]`, where
/// time is already frozen.
pub struct PausedClock;

impl PausedClock {
    /// Pause tokio time and return a clock over it
    ///
    /// # Panics
    ///
    /// Panics if time is already paused or the runtime is multi-threaded,
    /// as `tokio::time::pause` does. For that reason there is no `Default`.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        time::pause();
        Self
    }

    /// Clock over time that the runtime already paused
    pub fn attach() -> Self {
        Self
    }

    /// Advance paused time, firing every timer that becomes due
    pub async fn advance(&self, d: Duration) {
        time::advance(d).await;
    }
}

impl Clock for PausedClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_system_clock_advances() {
        let clock = SystemClock;
        let start = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now() - start >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_paused_clock_new_pauses_time() {
        let clock = PausedClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(3600)).await;
        assert_eq!(clock.now() - start, Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_clock_attach() {
        let clock: Arc<dyn Clock> = Arc::new(PausedClock::attach());
        let start = clock.now();

        // Auto-advance: the runtime is idle, so the sleep completes at once
        clock.sleep(Duration::from_secs(60)).await;

        assert_eq!(clock.now() - start, Duration::from_secs(60));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_attach_leaves_time_running() {
        // `new` would panic here; `attach` only reads the runtime's time
        let clock = PausedClock::attach();
        let start = std::time::Instant::now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_clock_fires_timeouts() {
        let clock = PausedClock::attach();
        let budget = Duration::from_secs(10);

        let start = clock.now();
        let result = time::timeout(budget, std::future::pending::<()>()).await;
        assert!(result.is_err());
        assert_eq!(clock.now() - start, budget);
    }
}
