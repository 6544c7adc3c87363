// File: testing-framework/src/ledger/mod.rs
//
// Ledger Client Seam
//
// This module defines the collaborator every scenario talks to: a client of a
// distributed ledger offering token and consensus-topic services. The harness
// never reaches past this trait; consensus, signing and transport belong to
// the implementation.

pub mod builder;
pub mod error;
pub mod simulated;
pub mod subscription;
pub mod transaction;
pub mod types;

pub use builder::SimulatedLedgerBuilder;
pub use error::LedgerError;
pub use simulated::SimulatedLedger;
pub use subscription::TopicSubscription;
pub use transaction::{TokenTransfer, TransferLeg};
pub use types::{
    AccountBalance, AccountId, AccountRef, Hbar, Key, KeyList, PrivateKey, PublicKey, Receipt,
    ScheduleId, Status, TokenConfig, TokenId, TokenInfo, TopicConfig, TopicId, TopicInfo,
    TopicMessage, TransactionId, TINYBARS_PER_HBAR,
};

use async_trait::async_trait;

/// Client of a ledger network offering token and topic services.
///
/// Every state-changing call names its operator (the paying account) and
/// returns once the transaction's receipt is final. Queries are free.
///
/// # Implementation Note
///
/// Implementations must surface every rejection as a [`LedgerError`]; the
/// harness turns those into scenario failures and never retries.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current native and token balances of an account.
    async fn account_balance(&self, account: &AccountId) -> Result<AccountBalance, LedgerError>;

    /// Create a fungible token; the receipt carries the new token id.
    async fn create_token(
        &self,
        operator: &AccountRef,
        config: TokenConfig,
    ) -> Result<Receipt, LedgerError>;

    /// Mint `amount` units into the token's treasury.
    async fn mint_token(
        &self,
        operator: &AccountRef,
        token: &TokenId,
        amount: u64,
    ) -> Result<Receipt, LedgerError>;

    /// Associate `account` with `token`; `payer` pays, the account signs.
    async fn associate_token(
        &self,
        payer: &AccountRef,
        account: &AccountRef,
        token: &TokenId,
    ) -> Result<Receipt, LedgerError>;

    /// Submit a token transfer paid for by `payer`, whose key signs implicitly.
    async fn submit(
        &self,
        payer: &AccountRef,
        transfer: TokenTransfer,
    ) -> Result<Receipt, LedgerError>;

    /// Add a signature to a pending scheduled transfer.
    async fn sign_schedule(
        &self,
        payer: &AccountRef,
        schedule: &ScheduleId,
        key: &PrivateKey,
    ) -> Result<Receipt, LedgerError>;

    /// Token metadata and supply.
    async fn token_info(&self, token: &TokenId) -> Result<TokenInfo, LedgerError>;

    /// Create a consensus topic; the receipt carries the new topic id.
    async fn create_topic(
        &self,
        operator: &AccountRef,
        config: TopicConfig,
    ) -> Result<Receipt, LedgerError>;

    /// Publish a message to a topic.
    async fn submit_message(
        &self,
        operator: &AccountRef,
        topic: &TopicId,
        message: &[u8],
    ) -> Result<Receipt, LedgerError>;

    /// Topic metadata.
    async fn topic_info(&self, topic: &TopicId) -> Result<TopicInfo, LedgerError>;

    /// Subscribe to a topic's messages from its first message onward.
    async fn subscribe_topic(&self, topic: &TopicId) -> Result<TopicSubscription, LedgerError>;
}
