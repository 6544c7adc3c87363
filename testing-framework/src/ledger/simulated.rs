//! SimulatedLedger - In-process ledger for harness and scenario testing
//!
//! Implements [`LedgerClient`] over in-memory state so scenarios run without
//! a network. It models what the harness observes of a real network:
//! transaction fees, key-based authorization (single and threshold keys),
//! token association, finite supply, scheduled transfers, and topic message
//! streams with consensus timestamps taken from the injected clock.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use super::error::LedgerError;
use super::subscription::TopicSubscription;
use super::transaction::TokenTransfer;
use super::types::{
    AccountBalance, AccountId, AccountRef, Hbar, Key, PrivateKey, PublicKey, Receipt, ScheduleId,
    Status, TokenConfig, TokenId, TokenInfo, TopicConfig, TopicId, TopicInfo, TopicMessage,
    TransactionId,
};
use super::LedgerClient;
use crate::orchestrator::Clock;

/// Flat fee charged to the payer of every transaction reaching consensus
pub const DEFAULT_TRANSACTION_FEE: Hbar = Hbar::from_tinybars(5_000_000);

/// Longest accepted topic memo, in bytes
pub const MAX_MEMO_BYTES: usize = 100;

/// Longest accepted topic message, in bytes
pub const MAX_MESSAGE_BYTES: usize = 1024;

/// Highest accepted token decimal count
pub const MAX_TOKEN_DECIMALS: u32 = 18;

const TOPIC_CHANNEL_CAPACITY: usize = 256;

struct AccountState {
    key: Key,
    hbars: Hbar,
    /// Associated tokens and their balances
    tokens: BTreeMap<TokenId, u64>,
}

struct TokenState {
    name: String,
    symbol: String,
    decimals: u32,
    total_supply: u64,
    max_supply: Option<u64>,
    treasury: AccountId,
    admin_key: Option<Key>,
    supply_key: Option<Key>,
}

struct TopicState {
    memo: String,
    submit_key: Option<Key>,
    messages: Vec<TopicMessage>,
    sender: broadcast::Sender<TopicMessage>,
}

struct ScheduleState {
    transfer: TokenTransfer,
    signers: BTreeSet<PublicKey>,
    executed: bool,
}

/// Activity counters of a [`SimulatedLedger`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCounters {
    /// Transactions that reached consensus (fee charged)
    pub transactions: u64,
    /// Token transfers applied to balances
    pub executed_transfers: u64,
    /// Sum of all fees charged
    pub fees_collected: Hbar,
}

#[derive(Default)]
struct LedgerState {
    accounts: BTreeMap<AccountId, AccountState>,
    tokens: BTreeMap<TokenId, TokenState>,
    topics: BTreeMap<TopicId, TopicState>,
    schedules: BTreeMap<ScheduleId, ScheduleState>,
    next_entity: u64,
    next_sequence: u64,
    counters: LedgerCounters,
}

fn signer_set(keys: impl IntoIterator<Item = PublicKey>) -> BTreeSet<PublicKey> {
    keys.into_iter().collect()
}

fn receipt_error(status: Status, transaction_id: TransactionId) -> LedgerError {
    LedgerError::Receipt {
        status,
        transaction_id,
    }
}

impl LedgerState {
    fn next_entity(&mut self) -> u64 {
        let num = self.next_entity;
        self.next_entity += 1;
        num
    }

    fn allocate_transaction(&mut self, payer: &AccountRef) -> TransactionId {
        self.next_sequence += 1;
        TransactionId {
            payer: payer.id,
            sequence: self.next_sequence,
        }
    }

    /// Precheck the payer and charge the fee
    fn charge(
        &mut self,
        payer: &AccountRef,
        transaction_id: TransactionId,
        fee: Hbar,
    ) -> Result<(), LedgerError> {
        let precheck = move |status| LedgerError::Precheck {
            status,
            transaction_id,
        };

        let account = self
            .accounts
            .get_mut(&payer.id)
            .ok_or_else(|| precheck(Status::InvalidAccountId))?;
        if !account
            .key
            .is_satisfied_by(&signer_set([payer.public_key()]))
        {
            return Err(precheck(Status::InvalidSignature));
        }
        account.hbars = account
            .hbars
            .checked_sub(fee)
            .ok_or_else(|| precheck(Status::InsufficientPayerBalance))?;

        self.counters.transactions += 1;
        self.counters.fees_collected = self
            .counters
            .fees_collected
            .checked_add(fee)
            .unwrap_or(self.counters.fees_collected);
        Ok(())
    }

    /// Begin a transaction: allocate its id, precheck and charge the payer
    fn begin(&mut self, payer: &AccountRef, fee: Hbar) -> Result<TransactionId, LedgerError> {
        let transaction_id = self.allocate_transaction(payer);
        self.charge(payer, transaction_id, fee)?;
        Ok(transaction_id)
    }

    fn create_token(
        &mut self,
        operator: &AccountRef,
        config: TokenConfig,
        transaction_id: TransactionId,
    ) -> Result<Receipt, LedgerError> {
        let fail = |status| receipt_error(status, transaction_id);

        if config.name.trim().is_empty() {
            return Err(fail(Status::MissingTokenName));
        }
        if config.symbol.trim().is_empty() {
            return Err(fail(Status::MissingTokenSymbol));
        }
        if config.decimals > MAX_TOKEN_DECIMALS {
            return Err(fail(Status::InvalidTokenDecimals));
        }
        match config.max_supply {
            Some(0) => return Err(fail(Status::InvalidTokenMaxSupply)),
            Some(max) if config.initial_supply > max => {
                return Err(fail(Status::InvalidTokenInitialSupply))
            }
            _ => {}
        }

        let signers = signer_set([operator.public_key()]);
        let treasury = self
            .accounts
            .get(&config.treasury)
            .ok_or_else(|| fail(Status::InvalidAccountId))?;
        if !treasury.key.is_satisfied_by(&signers) {
            return Err(fail(Status::InvalidSignature));
        }
        if let Some(admin) = &config.admin_key {
            if !admin.is_satisfied_by(&signers) {
                return Err(fail(Status::InvalidSignature));
            }
        }

        let token_id = TokenId::new(self.next_entity());
        if let Some(treasury) = self.accounts.get_mut(&config.treasury) {
            treasury.tokens.insert(token_id, config.initial_supply);
        }
        self.tokens.insert(
            token_id,
            TokenState {
                name: config.name,
                symbol: config.symbol,
                decimals: config.decimals,
                total_supply: config.initial_supply,
                max_supply: config.max_supply,
                treasury: config.treasury,
                admin_key: config.admin_key,
                supply_key: config.supply_key,
            },
        );

        let mut receipt = Receipt::success(transaction_id);
        receipt.token_id = Some(token_id);
        receipt.total_supply = Some(config.initial_supply);
        Ok(receipt)
    }

    fn mint_token(
        &mut self,
        operator: &AccountRef,
        token: &TokenId,
        amount: u64,
        transaction_id: TransactionId,
    ) -> Result<Receipt, LedgerError> {
        let fail = |status| receipt_error(status, transaction_id);

        let state = self
            .tokens
            .get_mut(token)
            .ok_or_else(|| fail(Status::InvalidTokenId))?;
        if amount == 0 {
            return Err(fail(Status::InvalidTokenMintAmount));
        }
        let supply_key = state
            .supply_key
            .as_ref()
            .ok_or_else(|| fail(Status::TokenHasNoSupplyKey))?;
        if !supply_key.is_satisfied_by(&signer_set([operator.public_key()])) {
            return Err(fail(Status::InvalidSignature));
        }

        let new_supply = state
            .total_supply
            .checked_add(amount)
            .ok_or_else(|| fail(Status::TokenMaxSupplyReached))?;
        if let Some(max) = state.max_supply {
            if new_supply > max {
                return Err(fail(Status::TokenMaxSupplyReached));
            }
        }

        let treasury = state.treasury;
        let balance = self
            .accounts
            .get_mut(&treasury)
            .and_then(|account| account.tokens.get_mut(token))
            .ok_or_else(|| fail(Status::TokenNotAssociatedToAccount))?;
        *balance += amount;
        state.total_supply = new_supply;

        let mut receipt = Receipt::success(transaction_id);
        receipt.total_supply = Some(new_supply);
        Ok(receipt)
    }

    fn associate_token(
        &mut self,
        payer: &AccountRef,
        account: &AccountRef,
        token: &TokenId,
        transaction_id: TransactionId,
    ) -> Result<Receipt, LedgerError> {
        let fail = |status| receipt_error(status, transaction_id);

        if !self.tokens.contains_key(token) {
            return Err(fail(Status::InvalidTokenId));
        }
        let state = self
            .accounts
            .get_mut(&account.id)
            .ok_or_else(|| fail(Status::InvalidAccountId))?;
        if !state
            .key
            .is_satisfied_by(&signer_set([payer.public_key(), account.public_key()]))
        {
            return Err(fail(Status::InvalidSignature));
        }
        if state.tokens.contains_key(token) {
            return Err(fail(Status::TokenAlreadyAssociatedToAccount));
        }
        state.tokens.insert(*token, 0);
        Ok(Receipt::success(transaction_id))
    }

    fn is_authorized(&self, transfer: &TokenTransfer, signers: &BTreeSet<PublicKey>) -> bool {
        transfer.debited_accounts().iter().all(|account| {
            self.accounts
                .get(account)
                .map(|state| state.key.is_satisfied_by(signers))
                .unwrap_or(false)
        })
    }

    /// Validate every leg, then apply all of them; nothing changes on error
    fn apply_transfer(&mut self, transfer: &TokenTransfer) -> Result<(), Status> {
        if transfer.token_sums().values().any(|sum| *sum != 0) {
            return Err(Status::TransfersNotZeroSumForToken);
        }

        let mut updates = Vec::new();
        for ((token, account), change) in transfer.net_changes() {
            if !self.tokens.contains_key(&token) {
                return Err(Status::InvalidTokenId);
            }
            let state = self
                .accounts
                .get(&account)
                .ok_or(Status::InvalidAccountId)?;
            let current = state
                .tokens
                .get(&token)
                .copied()
                .ok_or(Status::TokenNotAssociatedToAccount)?;
            let next = u64::try_from(current as i128 + change)
                .map_err(|_| Status::InsufficientTokenBalance)?;
            updates.push((account, token, next));
        }

        for (account, token, balance) in updates {
            if let Some(state) = self.accounts.get_mut(&account) {
                state.tokens.insert(token, balance);
            }
        }
        self.counters.executed_transfers += 1;
        Ok(())
    }

    fn submit(
        &mut self,
        payer: &AccountRef,
        transfer: TokenTransfer,
        transaction_id: TransactionId,
    ) -> Result<Receipt, LedgerError> {
        let fail = |status| receipt_error(status, transaction_id);

        let mut signers = transfer.signers().clone();
        signers.insert(payer.public_key());

        let mut receipt = Receipt::success(transaction_id);
        if transfer.is_scheduled() {
            let schedule_id = ScheduleId::new(self.next_entity());
            self.schedules.insert(
                schedule_id,
                ScheduleState {
                    transfer,
                    signers,
                    executed: false,
                },
            );
            receipt.schedule_id = Some(schedule_id);
            receipt.schedule_executed = self.try_execute_schedule(&schedule_id, transaction_id)?;
            return Ok(receipt);
        }

        if !self.is_authorized(&transfer, &signers) {
            return Err(fail(Status::InvalidSignature));
        }
        self.apply_transfer(&transfer).map_err(fail)?;
        Ok(receipt)
    }

    /// Run a schedule if its collected signatures now authorize it
    fn try_execute_schedule(
        &mut self,
        schedule_id: &ScheduleId,
        transaction_id: TransactionId,
    ) -> Result<bool, LedgerError> {
        let fail = |status| receipt_error(status, transaction_id);

        let schedule = self
            .schedules
            .get(schedule_id)
            .ok_or_else(|| fail(Status::InvalidScheduleId))?;
        if !self.is_authorized(&schedule.transfer, &schedule.signers) {
            return Ok(false);
        }

        let transfer = schedule.transfer.clone();
        // A schedule whose transfer fails is consumed with it
        if let Err(status) = self.apply_transfer(&transfer) {
            self.schedules.remove(schedule_id);
            return Err(fail(status));
        }
        if let Some(schedule) = self.schedules.get_mut(schedule_id) {
            schedule.executed = true;
        }
        Ok(true)
    }

    fn sign_schedule(
        &mut self,
        payer: &AccountRef,
        schedule_id: &ScheduleId,
        key: &PrivateKey,
        transaction_id: TransactionId,
    ) -> Result<Receipt, LedgerError> {
        let fail = |status| receipt_error(status, transaction_id);

        let schedule = self
            .schedules
            .get_mut(schedule_id)
            .ok_or_else(|| fail(Status::InvalidScheduleId))?;
        if schedule.executed {
            return Err(fail(Status::ScheduleAlreadyExecuted));
        }
        schedule.signers.insert(key.public_key());
        schedule.signers.insert(payer.public_key());

        let mut receipt = Receipt::success(transaction_id);
        receipt.schedule_id = Some(*schedule_id);
        receipt.schedule_executed = self.try_execute_schedule(schedule_id, transaction_id)?;
        Ok(receipt)
    }

    fn create_topic(
        &mut self,
        config: TopicConfig,
        transaction_id: TransactionId,
    ) -> Result<Receipt, LedgerError> {
        if config.memo.len() > MAX_MEMO_BYTES {
            return Err(receipt_error(Status::MemoTooLong, transaction_id));
        }

        let topic_id = TopicId::new(self.next_entity());
        let (sender, _) = broadcast::channel(TOPIC_CHANNEL_CAPACITY);
        self.topics.insert(
            topic_id,
            TopicState {
                memo: config.memo,
                submit_key: config.submit_key,
                messages: Vec::new(),
                sender,
            },
        );

        let mut receipt = Receipt::success(transaction_id);
        receipt.topic_id = Some(topic_id);
        Ok(receipt)
    }

    fn submit_message(
        &mut self,
        operator: &AccountRef,
        topic: &TopicId,
        message: &[u8],
        consensus_timestamp: DateTime<Utc>,
        transaction_id: TransactionId,
    ) -> Result<Receipt, LedgerError> {
        let fail = |status| receipt_error(status, transaction_id);

        let state = self
            .topics
            .get_mut(topic)
            .ok_or_else(|| fail(Status::InvalidTopicId))?;
        if message.is_empty() {
            return Err(fail(Status::InvalidTopicMessage));
        }
        if message.len() > MAX_MESSAGE_BYTES {
            return Err(fail(Status::MessageSizeTooLarge));
        }
        if let Some(key) = &state.submit_key {
            if !key.is_satisfied_by(&signer_set([operator.public_key()])) {
                return Err(fail(Status::InvalidSignature));
            }
        }

        let sequence_number = state.messages.len() as u64 + 1;
        let delivered = TopicMessage {
            topic_id: *topic,
            sequence_number,
            consensus_timestamp,
            contents: message.to_vec(),
        };
        state.messages.push(delivered.clone());
        // No live subscribers is fine; history replays to later ones
        let _ = state.sender.send(delivered);

        let mut receipt = Receipt::success(transaction_id);
        receipt.topic_sequence_number = Some(sequence_number);
        Ok(receipt)
    }
}

/// In-process ledger implementing [`LedgerClient`]
///
/// # Example
///
/// ```rust,ignore
/// use ledger_testing_framework::ledger::SimulatedLedgerBuilder;
///
/// let ledger = SimulatedLedgerBuilder::new()
///     .with_generated_accounts(5)
///     .build();
///
/// let alice = &ledger.genesis_accounts()[0];
/// let balance = ledger.account_balance(&alice.id).await?;
/// ```
pub struct SimulatedLedger {
    state: Mutex<LedgerState>,
    clock: Arc<dyn Clock>,
    started_at: Instant,
    genesis_time: DateTime<Utc>,
    fee: Hbar,
    genesis_accounts: Vec<AccountRef>,
    offline: AtomicBool,
}

impl SimulatedLedger {
    /// Create a ledger from funded genesis accounts
    ///
    /// This is an internal constructor. Use `SimulatedLedgerBuilder` instead.
    pub(crate) fn new(accounts: Vec<(AccountRef, Hbar)>, fee: Hbar, clock: Arc<dyn Clock>) -> Self {
        let mut state = LedgerState::default();
        let mut genesis_accounts = Vec::with_capacity(accounts.len());
        for (account, hbars) in accounts {
            state.accounts.insert(
                account.id,
                AccountState {
                    key: Key::Single(account.public_key()),
                    hbars,
                    tokens: BTreeMap::new(),
                },
            );
            genesis_accounts.push(account);
        }
        state.next_entity = state
            .accounts
            .keys()
            .map(|id| id.num + 1)
            .max()
            .unwrap_or(1)
            .max(1000);

        let started_at = clock.now();
        Self {
            state: Mutex::new(state),
            clock,
            started_at,
            genesis_time: Utc::now(),
            fee,
            genesis_accounts,
            offline: AtomicBool::new(false),
        }
    }

    /// Accounts funded at genesis, in builder order
    pub fn genesis_accounts(&self) -> &[AccountRef] {
        &self.genesis_accounts
    }

    /// Fee charged per transaction
    pub fn fee(&self) -> Hbar {
        self.fee
    }

    /// Snapshot of activity counters
    pub fn counters(&self) -> LedgerCounters {
        self.state.lock().counters
    }

    /// Simulate a network outage: every call fails with `Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable(
                "simulated network is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn consensus_time(&self, sequence: u64) -> DateTime<Utc> {
        let elapsed = self.clock.now().saturating_duration_since(self.started_at);
        let elapsed = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        // Sequence nanos keep timestamps unique while the clock is paused
        self.genesis_time + elapsed + chrono::Duration::nanoseconds(sequence as i64)
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn account_balance(&self, account: &AccountId) -> Result<AccountBalance, LedgerError> {
        self.ensure_online()?;
        let state = self.state.lock();
        let account_state = state.accounts.get(account).ok_or(LedgerError::NotFound {
            entity: "account",
            id: account.to_string(),
        })?;
        Ok(AccountBalance {
            hbars: account_state.hbars,
            tokens: account_state.tokens.clone(),
        })
    }

    async fn create_token(
        &self,
        operator: &AccountRef,
        config: TokenConfig,
    ) -> Result<Receipt, LedgerError> {
        self.ensure_online()?;
        let mut state = self.state.lock();
        let transaction_id = state.begin(operator, self.fee)?;
        state.create_token(operator, config, transaction_id)
    }

    async fn mint_token(
        &self,
        operator: &AccountRef,
        token: &TokenId,
        amount: u64,
    ) -> Result<Receipt, LedgerError> {
        self.ensure_online()?;
        let mut state = self.state.lock();
        let transaction_id = state.begin(operator, self.fee)?;
        state.mint_token(operator, token, amount, transaction_id)
    }

    async fn associate_token(
        &self,
        payer: &AccountRef,
        account: &AccountRef,
        token: &TokenId,
    ) -> Result<Receipt, LedgerError> {
        self.ensure_online()?;
        let mut state = self.state.lock();
        let transaction_id = state.begin(payer, self.fee)?;
        state.associate_token(payer, account, token, transaction_id)
    }

    async fn submit(
        &self,
        payer: &AccountRef,
        transfer: TokenTransfer,
    ) -> Result<Receipt, LedgerError> {
        self.ensure_online()?;
        let mut state = self.state.lock();
        let transaction_id = state.allocate_transaction(payer);
        if transfer.legs().is_empty() {
            return Err(LedgerError::Precheck {
                status: Status::EmptyTokenTransferBody,
                transaction_id,
            });
        }
        state.charge(payer, transaction_id, self.fee)?;
        state.submit(payer, transfer, transaction_id)
    }

    async fn sign_schedule(
        &self,
        payer: &AccountRef,
        schedule: &ScheduleId,
        key: &PrivateKey,
    ) -> Result<Receipt, LedgerError> {
        self.ensure_online()?;
        let mut state = self.state.lock();
        let transaction_id = state.begin(payer, self.fee)?;
        state.sign_schedule(payer, schedule, key, transaction_id)
    }

    async fn token_info(&self, token: &TokenId) -> Result<TokenInfo, LedgerError> {
        self.ensure_online()?;
        let state = self.state.lock();
        let token_state = state.tokens.get(token).ok_or(LedgerError::NotFound {
            entity: "token",
            id: token.to_string(),
        })?;
        Ok(TokenInfo {
            token_id: *token,
            name: token_state.name.clone(),
            symbol: token_state.symbol.clone(),
            decimals: token_state.decimals,
            total_supply: token_state.total_supply,
            max_supply: token_state.max_supply,
            treasury: token_state.treasury,
            admin_key: token_state.admin_key.clone(),
        })
    }

    async fn create_topic(
        &self,
        operator: &AccountRef,
        config: TopicConfig,
    ) -> Result<Receipt, LedgerError> {
        self.ensure_online()?;
        let mut state = self.state.lock();
        let transaction_id = state.begin(operator, self.fee)?;
        state.create_topic(config, transaction_id)
    }

    async fn submit_message(
        &self,
        operator: &AccountRef,
        topic: &TopicId,
        message: &[u8],
    ) -> Result<Receipt, LedgerError> {
        self.ensure_online()?;
        let mut state = self.state.lock();
        let transaction_id = state.begin(operator, self.fee)?;
        let timestamp = self.consensus_time(transaction_id.sequence);
        state.submit_message(operator, topic, message, timestamp, transaction_id)
    }

    async fn topic_info(&self, topic: &TopicId) -> Result<TopicInfo, LedgerError> {
        self.ensure_online()?;
        let state = self.state.lock();
        let topic_state = state.topics.get(topic).ok_or(LedgerError::NotFound {
            entity: "topic",
            id: topic.to_string(),
        })?;
        Ok(TopicInfo {
            topic_id: *topic,
            memo: topic_state.memo.clone(),
            submit_key: topic_state.submit_key.clone(),
            sequence_number: topic_state.messages.len() as u64,
        })
    }

    async fn subscribe_topic(&self, topic: &TopicId) -> Result<TopicSubscription, LedgerError> {
        self.ensure_online()?;

        // Subscribe and copy history under one lock so no message is missed
        let (mut live, history) = {
            let state = self.state.lock();
            let topic_state = state.topics.get(topic).ok_or(LedgerError::NotFound {
                entity: "topic",
                id: topic.to_string(),
            })?;
            (topic_state.sender.subscribe(), topic_state.messages.clone())
        };

        let (tx, rx) = mpsc::unbounded_channel();
        for message in history {
            // Receiver is still held locally; send cannot fail
            let _ = tx.send(Ok(message));
        }

        let topic_id = *topic;
        let listener = tokio::spawn(async move {
            loop {
                match live.recv().await {
                    Ok(message) => {
                        if tx.send(Ok(message)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let error = LedgerError::Unavailable(format!(
                            "subscription to topic {} lagged by {} messages",
                            topic_id, skipped
                        ));
                        if tx.send(Err(error)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Opened subscription to topic {}", topic);
        }

        Ok(TopicSubscription::new(*topic, rx, Some(listener)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::builder::SimulatedLedgerBuilder;
    use crate::ledger::types::KeyList;

    fn ledger_with_accounts(count: usize) -> SimulatedLedger {
        SimulatedLedgerBuilder::new()
            .with_generated_accounts(count)
            .build()
    }

    async fn create_test_token(
        ledger: &SimulatedLedger,
        admin: &AccountRef,
        initial: u64,
        max: Option<u64>,
    ) -> TokenId {
        let mut config = TokenConfig::fungible("Test Token", "HTT", 2, admin.id)
            .with_initial_supply(initial)
            .with_admin_key(admin.public_key())
            .with_supply_key(admin.public_key());
        if let Some(max) = max {
            config = config.with_max_supply(max);
        }
        let receipt = ledger.create_token(admin, config).await.unwrap();
        receipt.token_id.unwrap()
    }

    #[tokio::test]
    async fn test_fee_charged_on_every_transaction() {
        let ledger = ledger_with_accounts(1);
        let admin = ledger.genesis_accounts()[0].clone();
        let before = ledger.account_balance(&admin.id).await.unwrap().hbars;

        create_test_token(&ledger, &admin, 100, None).await;

        let after = ledger.account_balance(&admin.id).await.unwrap().hbars;
        assert_eq!(before.checked_sub(after), Some(ledger.fee()));
        assert_eq!(ledger.counters().transactions, 1);
    }

    #[tokio::test]
    async fn test_mint_respects_max_supply() {
        let ledger = ledger_with_accounts(1);
        let admin = ledger.genesis_accounts()[0].clone();
        let token = create_test_token(&ledger, &admin, 1000, Some(1000)).await;

        let err = ledger.mint_token(&admin, &token, 1).await.unwrap_err();
        assert_eq!(err.status(), Some(Status::TokenMaxSupplyReached));

        let info = ledger.token_info(&token).await.unwrap();
        assert_eq!(info.total_supply, 1000);
    }

    #[tokio::test]
    async fn test_mint_credits_treasury() {
        let ledger = ledger_with_accounts(1);
        let admin = ledger.genesis_accounts()[0].clone();
        let token = create_test_token(&ledger, &admin, 0, None).await;

        let receipt = ledger.mint_token(&admin, &token, 250).await.unwrap();
        assert_eq!(receipt.total_supply, Some(250));

        let balance = ledger.account_balance(&admin.id).await.unwrap();
        assert_eq!(balance.token(&token), Some(250));
    }

    #[tokio::test]
    async fn test_transfer_requires_association() {
        let ledger = ledger_with_accounts(2);
        let admin = ledger.genesis_accounts()[0].clone();
        let bob = ledger.genesis_accounts()[1].clone();
        let token = create_test_token(&ledger, &admin, 100, None).await;

        let transfer = TokenTransfer::new()
            .add_token_transfer(token, admin.id, -10)
            .add_token_transfer(token, bob.id, 10);
        let err = ledger.submit(&admin, transfer.clone()).await.unwrap_err();
        assert_eq!(err.status(), Some(Status::TokenNotAssociatedToAccount));

        ledger.associate_token(&bob, &bob, &token).await.unwrap();
        ledger.submit(&admin, transfer).await.unwrap();
        let balance = ledger.account_balance(&bob.id).await.unwrap();
        assert_eq!(balance.token(&token), Some(10));
    }

    #[tokio::test]
    async fn test_sponsored_association() {
        let ledger = ledger_with_accounts(2);
        let admin = ledger.genesis_accounts()[0].clone();
        let bob = ledger.genesis_accounts()[1].clone();
        let token = create_test_token(&ledger, &admin, 0, None).await;
        let before = ledger.account_balance(&bob.id).await.unwrap().hbars;

        ledger.associate_token(&admin, &bob, &token).await.unwrap();

        let balance = ledger.account_balance(&bob.id).await.unwrap();
        assert_eq!(balance.hbars, before);
        assert_eq!(balance.token(&token), Some(0));
    }

    #[tokio::test]
    async fn test_double_association_rejected() {
        let ledger = ledger_with_accounts(2);
        let admin = ledger.genesis_accounts()[0].clone();
        let bob = ledger.genesis_accounts()[1].clone();
        let token = create_test_token(&ledger, &admin, 0, None).await;

        ledger.associate_token(&bob, &bob, &token).await.unwrap();
        let err = ledger.associate_token(&bob, &bob, &token).await.unwrap_err();
        assert_eq!(err.status(), Some(Status::TokenAlreadyAssociatedToAccount));
    }

    #[tokio::test]
    async fn test_multi_party_transfer_needs_every_debited_signature() {
        let ledger = ledger_with_accounts(3);
        let admin = ledger.genesis_accounts()[0].clone();
        let alice = ledger.genesis_accounts()[1].clone();
        let bob = ledger.genesis_accounts()[2].clone();
        let token = create_test_token(&ledger, &admin, 100, None).await;
        ledger.associate_token(&alice, &alice, &token).await.unwrap();
        ledger.associate_token(&bob, &bob, &token).await.unwrap();
        ledger
            .submit(
                &admin,
                TokenTransfer::new()
                    .add_token_transfer(token, admin.id, -20)
                    .add_token_transfer(token, alice.id, 10)
                    .add_token_transfer(token, bob.id, 10),
            )
            .await
            .unwrap();

        let transfer = TokenTransfer::new()
            .add_token_transfer(token, alice.id, -5)
            .add_token_transfer(token, bob.id, -5)
            .add_token_transfer(token, admin.id, 10);

        let err = ledger
            .submit(&alice, transfer.clone())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidSignature));

        ledger.submit(&alice, transfer.sign(&bob.key)).await.unwrap();
        let balance = ledger.account_balance(&admin.id).await.unwrap();
        assert_eq!(balance.token(&token), Some(90));
    }

    #[tokio::test]
    async fn test_scheduled_transfer_waits_for_signatures() {
        let ledger = ledger_with_accounts(2);
        let admin = ledger.genesis_accounts()[0].clone();
        let alice = ledger.genesis_accounts()[1].clone();
        let token = create_test_token(&ledger, &admin, 100, None).await;
        ledger.associate_token(&alice, &alice, &token).await.unwrap();

        let transfer = TokenTransfer::new()
            .add_token_transfer(token, admin.id, -10)
            .add_token_transfer(token, alice.id, 10)
            .schedule();

        // Payer alice cannot authorize admin's debit
        let receipt = ledger.submit(&alice, transfer).await.unwrap();
        assert!(!receipt.schedule_executed);
        let schedule = receipt.schedule_id.unwrap();
        assert_eq!(
            ledger.account_balance(&alice.id).await.unwrap().token(&token),
            Some(0)
        );

        let receipt = ledger
            .sign_schedule(&alice, &schedule, &admin.key)
            .await
            .unwrap();
        assert!(receipt.schedule_executed);
        assert_eq!(
            ledger.account_balance(&alice.id).await.unwrap().token(&token),
            Some(10)
        );

        let err = ledger
            .sign_schedule(&alice, &schedule, &admin.key)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(Status::ScheduleAlreadyExecuted));
    }

    #[tokio::test]
    async fn test_failed_scheduled_transfer_is_not_kept() {
        let ledger = ledger_with_accounts(2);
        let admin = ledger.genesis_accounts()[0].clone();
        let alice = ledger.genesis_accounts()[1].clone();
        let token = create_test_token(&ledger, &admin, 100, None).await;
        ledger.associate_token(&alice, &alice, &token).await.unwrap();

        // Fully signed, but admin only holds 100
        let transfer = TokenTransfer::new()
            .add_token_transfer(token, admin.id, -500)
            .add_token_transfer(token, alice.id, 500)
            .schedule();

        let err = ledger.submit(&admin, transfer).await.unwrap_err();
        assert_eq!(err.status(), Some(Status::InsufficientTokenBalance));
        assert!(ledger.state.lock().schedules.is_empty());
        assert_eq!(ledger.counters().executed_transfers, 0);
        assert_eq!(
            ledger.account_balance(&admin.id).await.unwrap().token(&token),
            Some(100)
        );
    }

    #[tokio::test]
    async fn test_topic_submit_key_enforced() {
        let ledger = ledger_with_accounts(3);
        let alice = ledger.genesis_accounts()[0].clone();
        let bob = ledger.genesis_accounts()[1].clone();
        let carol = ledger.genesis_accounts()[2].clone();

        let threshold = KeyList::new(vec![alice.public_key(), bob.public_key()], 1).unwrap();
        let receipt = ledger
            .create_topic(
                &alice,
                TopicConfig {
                    memo: "threshold topic".to_string(),
                    submit_key: Some(threshold.into()),
                },
            )
            .await
            .unwrap();
        let topic = receipt.topic_id.unwrap();

        ledger.submit_message(&bob, &topic, b"hello").await.unwrap();
        let err = ledger
            .submit_message(&carol, &topic, b"hello")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidSignature));

        let info = ledger.topic_info(&topic).await.unwrap();
        assert_eq!(info.memo, "threshold topic");
        assert_eq!(info.sequence_number, 1);
    }

    #[tokio::test]
    async fn test_subscription_replays_history_then_streams() {
        let ledger = ledger_with_accounts(1);
        let alice = ledger.genesis_accounts()[0].clone();
        let topic = ledger
            .create_topic(&alice, TopicConfig::default())
            .await
            .unwrap()
            .topic_id
            .unwrap();

        ledger.submit_message(&alice, &topic, b"first").await.unwrap();
        let mut sub = ledger.subscribe_topic(&topic).await.unwrap();
        ledger.submit_message(&alice, &topic, b"second").await.unwrap();

        let first = sub.next_message().await.unwrap();
        let second = sub.next_message().await.unwrap();
        assert_eq!(first.contents_str(), "first");
        assert_eq!(second.contents_str(), "second");
        assert!(second.consensus_timestamp > first.consensus_timestamp);
    }

    #[tokio::test]
    async fn test_offline_ledger_fails_every_call() {
        let ledger = ledger_with_accounts(1);
        let alice = ledger.genesis_accounts()[0].clone();
        ledger.set_offline(true);

        let err = ledger.account_balance(&alice.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Unavailable(_)));
        assert_eq!(ledger.counters().transactions, 0);
    }
}
