// File: testing-framework/src/orchestrator/mod.rs
//
// Orchestrator Module
//
// Time control and per-step budgets shared by fixtures, assertions and the
// scenario executor.

/// Clock abstractions for deterministic time control in tests
pub mod clock;

use std::future::Future;

use tokio::time::{self, Duration};

use crate::error::HarnessError;

// Re-export for convenience
pub use clock::{Clock, PausedClock, SystemClock};

/// Default budget for one scenario step
///
/// Token creation, mint and multi-party signing can take tens of seconds on a
/// live network.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default deadline for the first message of a topic subscription
pub const DEFAULT_SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Run `fut` within `budget`, failing with [`HarnessError::Timeout`]
///
/// # Example
///
/// ```rust,ignore
/// let balance = within("balance query", budget, client.account_balance(&id)).await?;
/// ```
pub async fn within<T, E, F>(operation: &str, budget: Duration, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    match time::timeout(budget, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            log::warn!("{} exceeded its {:?} budget", operation, budget);
            Err(HarnessError::Timeout {
                operation: operation.to_string(),
                timeout: budget,
            }
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_within_times_out() {
        let err = within("slow step", Duration::from_secs(5), async {
            std::future::pending::<Result<(), HarnessError>>().await
        })
        .await
        .unwrap_err();

        match err.downcast_ref::<HarnessError>() {
            Some(HarnessError::Timeout { operation, timeout }) => {
                assert_eq!(operation, "slow step");
                assert_eq!(*timeout, Duration::from_secs(5));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_within_passes_result_through() {
        let value = within("fast step", DEFAULT_STEP_TIMEOUT, async {
            Ok::<_, HarnessError>(7)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }
}
