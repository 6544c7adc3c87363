//! SimulatedLedgerBuilder - Fluent API for configuring SimulatedLedger instances

use std::sync::Arc;

use super::simulated::{SimulatedLedger, DEFAULT_TRANSACTION_FEE};
use super::types::{AccountId, AccountRef, Hbar, PrivateKey};
use crate::config::HarnessConfig;
use crate::orchestrator::{Clock, SystemClock};

/// First account number handed out to generated accounts
const GENERATED_ACCOUNT_BASE: u64 = 1001;

/// Builder for SimulatedLedger instances with fluent API
///
/// # Example
///
/// ```rust,ignore
/// use ledger_testing_framework::ledger::SimulatedLedgerBuilder;
///
/// let ledger = SimulatedLedgerBuilder::new()
///     .with_clock(clock)
///     .with_default_balance(Hbar::from_hbars(500))
///     .with_generated_accounts(5)
///     .build();
/// ```
pub struct SimulatedLedgerBuilder {
    /// Clock implementation for consensus timestamps
    clock: Option<Arc<dyn Clock>>,

    /// Funded accounts (account, balance)
    accounts: Vec<(AccountRef, Hbar)>,

    /// Balance for generated accounts and pool entries without one
    default_balance: Hbar,

    /// Number of accounts to generate
    generated_account_count: Option<usize>,

    /// Flat fee per transaction
    fee: Hbar,
}

impl SimulatedLedgerBuilder {
    /// Create new builder with defaults
    ///
    /// Default configuration:
    /// - SystemClock (real time)
    /// - no accounts
    /// - 1,000 hbar default balance
    /// - 0.05 hbar fee
    pub fn new() -> Self {
        Self {
            clock: None,
            accounts: Vec::new(),
            default_balance: Hbar::from_hbars(1_000),
            generated_account_count: None,
            fee: DEFAULT_TRANSACTION_FEE,
        }
    }

    /// Set clock implementation
    ///
    /// If not set, uses `SystemClock` by default.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Generate N accounts funded with the default balance
    ///
    /// Generated accounts are numbered from `0.0.1001` and derive their keys
    /// from their position, so the same count always yields the same pool.
    /// They come before individually added accounts in `genesis_accounts()`.
    pub fn with_generated_accounts(mut self, count: usize) -> Self {
        self.generated_account_count = Some(count);
        self
    }

    /// Add a specific funded account
    pub fn with_account(mut self, account: AccountRef, balance: Hbar) -> Self {
        self.accounts.push((account, balance));
        self
    }

    /// Add every account of every configured pool
    ///
    /// Entries carrying `initial_hbars` get that balance, the rest get the
    /// default balance. Accounts listed in several pools are funded once.
    ///
    /// # Errors
    ///
    /// Returns an error if a pool entry has an unparsable private key.
    pub fn with_config_pools(mut self, config: &HarnessConfig) -> anyhow::Result<Self> {
        for entry in config.pools.values().flatten() {
            if self.accounts.iter().any(|(a, _)| a.id == entry.id) {
                continue;
            }
            let balance = entry
                .initial_hbars
                .map(Hbar::from_hbars)
                .unwrap_or(self.default_balance);
            self.accounts.push((entry.to_account_ref()?, balance));
        }
        Ok(self)
    }

    /// Set default balance for generated accounts
    pub fn with_default_balance(mut self, balance: Hbar) -> Self {
        self.default_balance = balance;
        self
    }

    /// Set the flat transaction fee
    pub fn with_fee(mut self, fee: Hbar) -> Self {
        self.fee = fee;
        self
    }

    /// Build the SimulatedLedger instance
    pub fn build(self) -> SimulatedLedger {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let mut accounts = Vec::new();
        if let Some(count) = self.generated_account_count {
            for idx in 0..count as u64 {
                let id = AccountId::new(GENERATED_ACCOUNT_BASE + idx);
                let key = PrivateKey::derive(&format!("generated-account-{}", id));
                accounts.push((AccountRef::new(id, key), self.default_balance));
            }
        }
        accounts.extend(self.accounts);

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Building simulated ledger with {} accounts, fee {}",
                accounts.len(),
                self.fee
            );
        }

        SimulatedLedger::new(accounts, self.fee, clock)
    }
}

impl Default for SimulatedLedgerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerClient;
    use crate::orchestrator::PausedClock;

    #[tokio::test]
    async fn test_builder_generated_accounts() {
        let ledger = SimulatedLedgerBuilder::new()
            .with_generated_accounts(5)
            .build();

        assert_eq!(ledger.genesis_accounts().len(), 5);
        for account in ledger.genesis_accounts() {
            let balance = ledger.account_balance(&account.id).await.unwrap();
            assert_eq!(balance.hbars, Hbar::from_hbars(1_000));
        }
    }

    #[tokio::test]
    async fn test_builder_is_deterministic() {
        let a = SimulatedLedgerBuilder::new().with_generated_accounts(3).build();
        let b = SimulatedLedgerBuilder::new().with_generated_accounts(3).build();
        assert_eq!(a.genesis_accounts(), b.genesis_accounts());
    }

    #[tokio::test]
    async fn test_builder_specific_account_and_fee() {
        let alice = AccountRef::new(AccountId::new(42), PrivateKey::derive("alice"));
        let ledger = SimulatedLedgerBuilder::new()
            .with_account(alice.clone(), Hbar::from_hbars(10))
            .with_fee(Hbar::from_tinybars(1))
            .build();

        assert_eq!(ledger.fee(), Hbar::from_tinybars(1));
        let balance = ledger.account_balance(&alice.id).await.unwrap();
        assert_eq!(balance.hbars, Hbar::from_hbars(10));
    }

    #[tokio::test]
    async fn test_builder_with_paused_clock() {
        let clock = Arc::new(PausedClock::new());
        let ledger = SimulatedLedgerBuilder::new()
            .with_clock(clock.clone())
            .with_generated_accounts(1)
            .build();
        let alice = ledger.genesis_accounts()[0].clone();
        let topic = ledger
            .create_topic(&alice, Default::default())
            .await
            .unwrap()
            .topic_id
            .unwrap();

        ledger.submit_message(&alice, &topic, b"one").await.unwrap();
        clock.advance(tokio::time::Duration::from_secs(60)).await;
        ledger.submit_message(&alice, &topic, b"two").await.unwrap();

        let mut sub = ledger.subscribe_topic(&topic).await.unwrap();
        let one = sub.next_message().await.unwrap();
        let two = sub.next_message().await.unwrap();
        let gap = two.consensus_timestamp - one.consensus_timestamp;
        assert!(gap >= chrono::Duration::seconds(60));
    }
}
