//! Per-scenario state
//!
//! A [`ScenarioContext`] is created empty when a scenario starts, filled in by
//! its steps, and torn down when it ends. Every getter fails with
//! [`HarnessError::MissingContext`] when the field was never set; there are
//! no defaults.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::ledger::{
    AccountRef, Hbar, KeyList, ScheduleId, TokenId, TokenTransfer, TopicId, TopicSubscription,
};

/// Named account position within a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountSlot {
    First,
    Second,
    Third,
    Fourth,
    /// Token treasury and administrative account
    Admin,
}

impl AccountSlot {
    /// Every slot, in declaration order
    pub const ALL: [AccountSlot; 5] = [
        AccountSlot::First,
        AccountSlot::Second,
        AccountSlot::Third,
        AccountSlot::Fourth,
        AccountSlot::Admin,
    ];

    /// Lowercase name used in scenario files and messages
    pub fn name(self) -> &'static str {
        match self {
            AccountSlot::First => "first",
            AccountSlot::Second => "second",
            AccountSlot::Third => "third",
            AccountSlot::Fourth => "fourth",
            AccountSlot::Admin => "admin",
        }
    }

    /// Parse an ordinal word as used in step phrases
    pub fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "first" => Some(AccountSlot::First),
            "second" => Some(AccountSlot::Second),
            "third" => Some(AccountSlot::Third),
            "fourth" => Some(AccountSlot::Fourth),
            "admin" | "treasury" => Some(AccountSlot::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for AccountSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} account", self.name())
    }
}

/// Lifecycle phase reached by a scenario
///
/// Phases only move forward; the executor reports the last one reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioPhase {
    Init,
    ContextPopulated,
    FixturesApplied,
    AssertionsRun,
    Passed,
    Failed,
}

impl fmt::Display for ScenarioPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScenarioPhase::Init => "INIT",
            ScenarioPhase::ContextPopulated => "CONTEXT_POPULATED",
            ScenarioPhase::FixturesApplied => "FIXTURES_APPLIED",
            ScenarioPhase::AssertionsRun => "ASSERTIONS_RUN",
            ScenarioPhase::Passed => "PASS",
            ScenarioPhase::Failed => "FAIL",
        };
        f.write_str(name)
    }
}

/// Mutable state owned by one running scenario
#[derive(Debug)]
pub struct ScenarioContext {
    name: String,
    phase: ScenarioPhase,
    accounts: BTreeMap<AccountSlot, AccountRef>,
    token: Option<TokenId>,
    topic: Option<TopicId>,
    threshold_key: Option<KeyList>,
    pending_transfer: Option<TokenTransfer>,
    schedule: Option<ScheduleId>,
    native_snapshots: BTreeMap<AccountSlot, Hbar>,
    completed_fixtures: BTreeSet<String>,
    subscriptions: Vec<TopicSubscription>,
}

impl ScenarioContext {
    /// Empty context for the named scenario
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: ScenarioPhase::Init,
            accounts: BTreeMap::new(),
            token: None,
            topic: None,
            threshold_key: None,
            pending_transfer: None,
            schedule: None,
            native_snapshots: BTreeMap::new(),
            completed_fixtures: BTreeSet::new(),
            subscriptions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> ScenarioPhase {
        self.phase
    }

    /// Move to `phase` unless the scenario is already past it
    pub fn advance(&mut self, phase: ScenarioPhase) {
        if phase > self.phase {
            if log::log_enabled!(log::Level::Debug) {
                log::debug!("[{}] {} -> {}", self.name, self.phase, phase);
            }
            self.phase = phase;
        }
    }

    // ===== Accounts =====

    pub fn set_account(&mut self, slot: AccountSlot, account: AccountRef) {
        self.accounts.insert(slot, account);
    }

    pub fn account(&self, slot: AccountSlot) -> HarnessResult<&AccountRef> {
        self.accounts
            .get(&slot)
            .ok_or_else(|| HarnessError::missing(slot.to_string()))
    }

    pub fn has_account(&self, slot: AccountSlot) -> bool {
        self.accounts.contains_key(&slot)
    }

    // ===== Entities =====

    pub fn set_token(&mut self, token: TokenId) {
        self.token = Some(token);
    }

    pub fn token(&self) -> HarnessResult<TokenId> {
        self.token.ok_or_else(|| HarnessError::missing("token id"))
    }

    pub fn set_topic(&mut self, topic: TopicId) {
        self.topic = Some(topic);
    }

    pub fn topic(&self) -> HarnessResult<TopicId> {
        self.topic.ok_or_else(|| HarnessError::missing("topic id"))
    }

    pub fn set_threshold_key(&mut self, key: KeyList) {
        self.threshold_key = Some(key);
    }

    pub fn threshold_key(&self) -> HarnessResult<&KeyList> {
        self.threshold_key
            .as_ref()
            .ok_or_else(|| HarnessError::missing("threshold key"))
    }

    // ===== Pending transfer =====

    /// Replace the pending transfer
    pub fn set_pending_transfer(&mut self, transfer: TokenTransfer) {
        self.pending_transfer = Some(transfer);
    }

    /// Pending transfer, for adding signatures
    pub fn pending_transfer_mut(&mut self) -> HarnessResult<&mut TokenTransfer> {
        self.pending_transfer
            .as_mut()
            .ok_or_else(|| HarnessError::missing("pending transfer"))
    }

    /// Remove the pending transfer for submission
    ///
    /// A second call fails, so a transfer can only ever be submitted once.
    pub fn take_pending_transfer(&mut self) -> HarnessResult<TokenTransfer> {
        self.pending_transfer
            .take()
            .ok_or_else(|| HarnessError::missing("pending transfer"))
    }

    /// Remember a submitted scheduled transfer for later signatures
    pub fn set_schedule(&mut self, schedule: ScheduleId) {
        self.schedule = Some(schedule);
    }

    pub fn schedule(&self) -> HarnessResult<ScheduleId> {
        self.schedule.ok_or_else(|| HarnessError::missing("schedule id"))
    }

    // ===== Snapshots =====

    pub fn record_native_balance(&mut self, slot: AccountSlot, balance: Hbar) {
        self.native_snapshots.insert(slot, balance);
    }

    pub fn native_snapshot(&self, slot: AccountSlot) -> HarnessResult<Hbar> {
        self.native_snapshots
            .get(&slot)
            .copied()
            .ok_or_else(|| HarnessError::missing(format!("hbar snapshot of the {}", slot)))
    }

    // ===== Idempotency registry =====

    /// Claim the one-shot guard `key`
    ///
    /// Returns `true` the first time a key is claimed in this scenario and
    /// `false` on every later call.
    pub fn run_once(&mut self, key: &str) -> bool {
        let first = self.completed_fixtures.insert(key.to_string());
        if !first && log::log_enabled!(log::Level::Debug) {
            log::debug!("[{}] fixture '{}' already ran, skipping", self.name, key);
        }
        first
    }

    /// Whether the guard `key` has been claimed
    pub fn has_run(&self, key: &str) -> bool {
        self.completed_fixtures.contains(key)
    }

    // ===== Subscriptions =====

    /// Keep a subscription alive until teardown
    pub fn track_subscription(&mut self, subscription: TopicSubscription) {
        self.subscriptions.push(subscription);
    }

    /// Most recently tracked subscription to `topic`
    pub fn subscription_mut(&mut self, topic: TopicId) -> HarnessResult<&mut TopicSubscription> {
        self.subscriptions
            .iter_mut()
            .rev()
            .find(|s| s.topic() == topic && !s.is_cancelled())
            .ok_or_else(|| HarnessError::missing(format!("subscription to topic {}", topic)))
    }

    /// Number of subscriptions not yet cancelled
    pub fn live_subscriptions(&self) -> usize {
        self.subscriptions.iter().filter(|s| !s.is_cancelled()).count()
    }

    /// Cancel every subscription and drop the pending transfer
    pub fn teardown(&mut self) {
        let live = self.live_subscriptions();
        for subscription in self.subscriptions.iter_mut() {
            subscription.cancel();
        }
        self.subscriptions.clear();

        if self.pending_transfer.take().is_some() {
            log::warn!("[{}] pending transfer was never submitted", self.name);
        }
        if live > 0 && log::log_enabled!(log::Level::Debug) {
            log::debug!("[{}] cancelled {} subscriptions", self.name, live);
        }
    }
}

impl Drop for ScenarioContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{AccountId, PrivateKey};
    use tokio::sync::mpsc;

    fn account(num: u64) -> AccountRef {
        AccountRef::new(AccountId::new(num), PrivateKey::derive(&num.to_string()))
    }

    #[test]
    fn test_unset_fields_fail_loudly() {
        let mut ctx = ScenarioContext::new("empty");

        assert!(matches!(
            ctx.account(AccountSlot::First),
            Err(HarnessError::MissingContext { .. })
        ));
        assert!(ctx.token().is_err());
        assert!(ctx.topic().is_err());
        assert!(ctx.threshold_key().is_err());
        assert!(ctx.take_pending_transfer().is_err());
        assert!(ctx.native_snapshot(AccountSlot::First).is_err());
    }

    #[test]
    fn test_accounts_by_slot() {
        let mut ctx = ScenarioContext::new("slots");
        ctx.set_account(AccountSlot::First, account(1));
        ctx.set_account(AccountSlot::Admin, account(5));

        assert_eq!(ctx.account(AccountSlot::First).unwrap().id, AccountId::new(1));
        assert_eq!(ctx.account(AccountSlot::Admin).unwrap().id, AccountId::new(5));
        assert!(!ctx.has_account(AccountSlot::Second));
    }

    #[test]
    fn test_pending_transfer_is_single_shot() {
        let mut ctx = ScenarioContext::new("transfer");
        ctx.set_pending_transfer(TokenTransfer::new());

        ctx.pending_transfer_mut()
            .unwrap()
            .add_signature(&PrivateKey::derive("k"));
        let taken = ctx.take_pending_transfer().unwrap();
        assert_eq!(taken.signers().len(), 1);
        assert!(ctx.take_pending_transfer().is_err());
    }

    #[test]
    fn test_run_once() {
        let mut ctx = ScenarioContext::new("guard");
        assert!(ctx.run_once("initial-token-deposit"));
        assert!(!ctx.run_once("initial-token-deposit"));
        assert!(ctx.run_once("other"));
        assert!(ctx.has_run("initial-token-deposit"));
    }

    #[test]
    fn test_phase_only_moves_forward() {
        let mut ctx = ScenarioContext::new("phases");
        ctx.advance(ScenarioPhase::FixturesApplied);
        ctx.advance(ScenarioPhase::ContextPopulated);
        assert_eq!(ctx.phase(), ScenarioPhase::FixturesApplied);
        ctx.advance(ScenarioPhase::Passed);
        assert_eq!(ctx.phase().to_string(), "PASS");
    }

    #[tokio::test]
    async fn test_teardown_cancels_subscriptions() {
        let topic = TopicId::new(9);
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut ctx = ScenarioContext::new("teardown");
        ctx.track_subscription(TopicSubscription::new(topic, rx, None));
        assert_eq!(ctx.live_subscriptions(), 1);
        assert!(ctx.subscription_mut(topic).is_ok());

        ctx.teardown();
        assert_eq!(ctx.live_subscriptions(), 0);
        assert!(ctx.subscription_mut(topic).is_err());
    }

    #[test]
    fn test_slot_words() {
        assert_eq!(AccountSlot::from_word("Third"), Some(AccountSlot::Third));
        assert_eq!(AccountSlot::from_word("fifth"), None);
        assert_eq!(AccountSlot::Second.to_string(), "second account");
    }
}
