//! Harness configuration
//!
//! Account pools, slot wiring and time budgets. Loaded from a YAML or JSON
//! file chosen by extension; the path may come from `LEDGER_HARNESS_CONFIG`.
//!
//! ```yaml
//! network: simulated
//! step_timeout_secs: 60
//! tolerate_existing_association: false
//! pools:
//!   accounts:
//!     - id: 0.0.1001
//!       private_key: 302e020100300506032b6570042204...
//!       initial_hbars: 1000
//! slots:
//!   admin: { pool: accounts, index: 4 }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::context::AccountSlot;
use crate::error::{HarnessError, HarnessResult};
use crate::ledger::simulated::DEFAULT_TRANSACTION_FEE;
use crate::ledger::{AccountId, AccountRef, Hbar, LedgerError, PrivateKey};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "LEDGER_HARNESS_CONFIG";

/// Primary pool; slots default into it
pub const ACCOUNTS_POOL: &str = "accounts";
/// Pool of accounts expected to carry a balance
pub const BAL_ACCOUNTS_POOL: &str = "bal_accounts";
/// Pool of accounts expected to hold no hbar
pub const ZERO_BALANCE_POOL: &str = "zero_balance_accounts";

/// One externally provisioned account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub id: AccountId,
    /// Hex ed25519 key, with or without DER prefix
    pub private_key: String,
    /// Genesis balance when the pool seeds a simulated ledger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_hbars: Option<u64>,
}

impl AccountEntry {
    pub fn to_account_ref(&self) -> Result<AccountRef, LedgerError> {
        let key = PrivateKey::from_string_ed25519(&self.private_key)?;
        Ok(AccountRef::new(self.id, key))
    }
}

/// Position of an account inside a named pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolIndex {
    pub pool: String,
    pub index: usize,
}

impl PoolIndex {
    pub fn new(pool: impl Into<String>, index: usize) -> Self {
        Self {
            pool: pool.into(),
            index,
        }
    }
}

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Network label shown in reports
    pub network: String,

    /// Budget for each scenario step
    pub step_timeout_secs: u64,

    /// Deadline for the first message of a topic subscription
    pub subscription_timeout_secs: u64,

    /// Flat fee of the simulated ledger, in tinybars
    pub fee_tinybars: u64,

    /// Treat `TOKEN_ALREADY_ASSOCIATED_TO_ACCOUNT` as a successful association
    pub tolerate_existing_association: bool,

    /// Named account pools
    pub pools: BTreeMap<String, Vec<AccountEntry>>,

    /// Pool position each slot loads from when a step does not name one
    pub slots: BTreeMap<AccountSlot, PoolIndex>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let slots = AccountSlot::ALL
            .iter()
            .enumerate()
            .map(|(index, slot)| (*slot, PoolIndex::new(ACCOUNTS_POOL, index)))
            .collect();

        Self {
            network: "simulated".to_string(),
            step_timeout_secs: 60,
            subscription_timeout_secs: 30,
            fee_tinybars: DEFAULT_TRANSACTION_FEE.to_tinybars(),
            tolerate_existing_association: false,
            pools: BTreeMap::new(),
            slots,
        }
    }
}

impl HarnessConfig {
    /// Load from a `.yaml`/`.yml` or `.json` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?,
            other => bail!(
                "Unsupported config extension {:?} for {}",
                other,
                path.display()
            ),
        };
        config.fill_default_slots();
        config.validate()?;

        log::info!(
            "Loaded harness config for '{}' from {} ({} pools)",
            config.network,
            path.display(),
            config.pools.len()
        );
        Ok(config)
    }

    /// Give every slot missing from the file its default position
    fn fill_default_slots(&mut self) {
        for (index, slot) in AccountSlot::ALL.iter().enumerate() {
            self.slots
                .entry(*slot)
                .or_insert_with(|| PoolIndex::new(ACCOUNTS_POOL, index));
        }
    }

    /// Reject settings no scenario can run with
    pub fn validate(&self) -> Result<()> {
        if self.step_timeout_secs == 0 {
            bail!("step_timeout_secs must be greater than zero");
        }
        if self.subscription_timeout_secs == 0 {
            bail!("subscription_timeout_secs must be greater than zero");
        }
        for (pool, entries) in &self.pools {
            for (index, entry) in entries.iter().enumerate() {
                entry.to_account_ref().with_context(|| {
                    format!("Invalid private key for {}[{}] ({})", pool, index, entry.id)
                })?;
            }
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn subscription_timeout(&self) -> Duration {
        Duration::from_secs(self.subscription_timeout_secs)
    }

    pub fn fee(&self) -> Hbar {
        Hbar::from_tinybars(self.fee_tinybars)
    }

    /// Account at `index` of `pool`
    pub fn account(&self, pool: &str, index: usize) -> HarnessResult<AccountRef> {
        let entries = self
            .pools
            .get(pool)
            .ok_or_else(|| HarnessError::Config(format!("no account pool named '{}'", pool)))?;
        let entry = entries.get(index).ok_or_else(|| {
            HarnessError::Config(format!(
                "account pool '{}' has {} entries, index {} requested",
                pool,
                entries.len(),
                index
            ))
        })?;
        Ok(entry.to_account_ref()?)
    }

    /// Where `slot` loads from by default
    pub fn slot_location(&self, slot: AccountSlot) -> HarnessResult<&PoolIndex> {
        self.slots
            .get(&slot)
            .ok_or_else(|| HarnessError::Config(format!("no pool position for the {}", slot)))
    }

    /// Fill every missing standard pool with generated accounts
    ///
    /// `accounts` gets five funded entries (admin is the fifth), the
    /// `bal_accounts` pool four funded entries and `zero_balance_accounts`
    /// four entries without hbar. Keys derive from the account id, so the
    /// result is the same on every run.
    pub fn with_generated_pools(mut self) -> Self {
        let layout = [
            (ACCOUNTS_POOL, 1001u64, 5usize, 1_000u64),
            (BAL_ACCOUNTS_POOL, 1101, 4, 1_000),
            (ZERO_BALANCE_POOL, 1201, 4, 0),
        ];
        for (pool, base, count, hbars) in layout {
            self.pools.entry(pool.to_string()).or_insert_with(|| {
                (0..count as u64)
                    .map(|i| {
                        let id = AccountId::new(base + i);
                        AccountEntry {
                            id,
                            private_key: PrivateKey::derive(&format!("pool-account-{}", id))
                                .to_hex(),
                            initial_hbars: Some(hbars),
                        }
                    })
                    .collect()
            });
        }
        self
    }
}
