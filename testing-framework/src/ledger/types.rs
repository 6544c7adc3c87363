//! Ledger domain types
//!
//! Identifiers, keys, amounts, and the query/receipt records exchanged with a
//! [`LedgerClient`](super::LedgerClient).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use super::error::LedgerError;

/// Tinybars per whole hbar
pub const TINYBARS_PER_HBAR: u64 = 100_000_000;

/// DER prefix some tools prepend to raw ed25519 private keys
const ED25519_DER_PREFIX: &str = "302e020100300506032b657004220420";

// ===== Entity identifiers =====

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name {
            /// Shard number
            pub shard: u64,
            /// Realm number
            pub realm: u64,
            /// Entity number
            pub num: u64,
        }

        impl $name {
            /// Create an identifier in shard 0, realm 0
            pub const fn new(num: u64) -> Self {
                Self { shard: 0, realm: 0, num }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
            }
        }

        impl FromStr for $name {
            type Err = LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let parts: Vec<&str> = s.trim().split('.').collect();
                let parse = |p: &str| {
                    p.parse::<u64>()
                        .map_err(|_| LedgerError::InvalidEntityId(s.to_string()))
                };
                match parts.as_slice() {
                    [shard, realm, num] => Ok(Self {
                        shard: parse(shard)?,
                        realm: parse(realm)?,
                        num: parse(num)?,
                    }),
                    _ => Err(LedgerError::InvalidEntityId(s.to_string())),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = LedgerError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.to_string()
            }
        }
    };
}

entity_id!(
    /// Network account identifier (`shard.realm.num`)
    AccountId
);
entity_id!(
    /// Fungible token identifier
    TokenId
);
entity_id!(
    /// Consensus topic identifier
    TopicId
);
entity_id!(
    /// Scheduled transaction identifier
    ScheduleId
);

/// Identifier of a submitted transaction: payer plus a per-ledger sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    /// Account that paid for the transaction
    pub payer: AccountId,
    /// Ledger-wide submission sequence
    pub sequence: u64,
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.payer, self.sequence)
    }
}

// ===== Native currency =====

/// Native currency amount, stored in tinybars
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Hbar(u64);

impl Hbar {
    /// Zero balance
    pub const ZERO: Hbar = Hbar(0);

    /// Amount from tinybars
    pub const fn from_tinybars(tinybars: u64) -> Self {
        Self(tinybars)
    }

    /// Amount from whole hbars (saturating)
    pub const fn from_hbars(hbars: u64) -> Self {
        Self(hbars.saturating_mul(TINYBARS_PER_HBAR))
    }

    /// Amount in tinybars
    pub const fn to_tinybars(self) -> u64 {
        self.0
    }

    /// Checked subtraction
    pub fn checked_sub(self, other: Hbar) -> Option<Hbar> {
        self.0.checked_sub(other.0).map(Hbar)
    }

    /// Checked addition
    pub fn checked_add(self, other: Hbar) -> Option<Hbar> {
        self.0.checked_add(other.0).map(Hbar)
    }
}

impl fmt::Display for Hbar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / TINYBARS_PER_HBAR;
        let frac = self.0 % TINYBARS_PER_HBAR;
        if frac == 0 {
            write!(f, "{} ℏ", whole)
        } else {
            let digits = format!("{:08}", frac);
            write!(f, "{}.{} ℏ", whole, digits.trim_end_matches('0'))
        }
    }
}

// ===== Keys =====

/// Simulated ed25519 private key material
///
/// The harness never signs anything cryptographically; a key only proves
/// identity to the ledger through its derived [`PublicKey`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    /// Wrap raw key bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a hex-encoded ed25519 key, with or without the DER prefix
    pub fn from_string_ed25519(s: &str) -> Result<Self, LedgerError> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let raw = trimmed
            .to_ascii_lowercase()
            .strip_prefix(ED25519_DER_PREFIX)
            .map(str::to_string)
            .unwrap_or_else(|| trimmed.to_string());

        let bytes = hex::decode(&raw).map_err(|e| LedgerError::InvalidKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            LedgerError::InvalidKey(format!("expected 32 bytes, got {}", v.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Deterministically derive a key from a label (test accounts)
    pub fn derive(label: &str) -> Self {
        let digest = Sha3_256::digest(label.as_bytes());
        Self(digest.into())
    }

    /// Derived public key
    pub fn public_key(&self) -> PublicKey {
        let mut hasher = Sha3_256::new();
        hasher.update(b"ledger-harness/public-key");
        hasher.update(self.0);
        PublicKey(hasher.finalize().into())
    }

    /// Hex encoding of the raw key
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({})", self.public_key())
    }
}

/// Public half of a [`PrivateKey`]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

/// M-of-N threshold key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyList {
    keys: Vec<PublicKey>,
    threshold: u32,
}

impl KeyList {
    /// Create a threshold key; `threshold` must be in `1..=keys.len()`
    pub fn new(keys: Vec<PublicKey>, threshold: u32) -> Result<Self, LedgerError> {
        if threshold == 0 || threshold as usize > keys.len() {
            return Err(LedgerError::InvalidThreshold {
                threshold,
                keys: keys.len(),
            });
        }
        Ok(Self { keys, threshold })
    }

    /// Member keys
    pub fn keys(&self) -> &[PublicKey] {
        &self.keys
    }

    /// Required signature count
    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

/// Authorization policy attached to accounts, tokens and topics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Key {
    /// Single signer
    Single(PublicKey),
    /// Threshold of signers
    Threshold(KeyList),
}

impl Key {
    /// Whether the given signer set authorizes this key
    pub fn is_satisfied_by(&self, signers: &BTreeSet<PublicKey>) -> bool {
        match self {
            Key::Single(pk) => signers.contains(pk),
            Key::Threshold(list) => {
                let present = list.keys.iter().filter(|k| signers.contains(k)).count();
                present >= list.threshold as usize
            }
        }
    }
}

impl From<PublicKey> for Key {
    fn from(pk: PublicKey) -> Self {
        Key::Single(pk)
    }
}

impl From<KeyList> for Key {
    fn from(list: KeyList) -> Self {
        Key::Threshold(list)
    }
}

/// Account identifier paired with its authorizing key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRef {
    /// Network account id
    pub id: AccountId,
    /// Private key that authorizes the account
    pub key: PrivateKey,
}

impl AccountRef {
    /// Pair an account with its key
    pub fn new(id: AccountId, key: PrivateKey) -> Self {
        Self { id, key }
    }

    /// Public key of the account
    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }
}

// ===== Queries =====

/// Result of an account balance query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Native balance
    pub hbars: Hbar,
    /// Balances of associated tokens
    pub tokens: BTreeMap<TokenId, u64>,
}

impl AccountBalance {
    /// Balance of `token`, `None` when the account is not associated
    pub fn token(&self, token: &TokenId) -> Option<u64> {
        self.tokens.get(token).copied()
    }
}

/// Parameters of a fungible token creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    /// Token name
    pub name: String,
    /// Token symbol
    pub symbol: String,
    /// Decimal places
    pub decimals: u32,
    /// Units credited to the treasury at creation
    pub initial_supply: u64,
    /// Finite supply cap; `None` means infinite supply
    pub max_supply: Option<u64>,
    /// Treasury account
    pub treasury: AccountId,
    /// Administrative key
    pub admin_key: Option<Key>,
    /// Key authorizing mint
    pub supply_key: Option<Key>,
}

impl TokenConfig {
    /// Fungible token with no supply, no cap and no keys
    pub fn fungible(
        name: impl Into<String>,
        symbol: impl Into<String>,
        decimals: u32,
        treasury: AccountId,
    ) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            decimals,
            initial_supply: 0,
            max_supply: None,
            treasury,
            admin_key: None,
            supply_key: None,
        }
    }

    /// Set the initial supply
    pub fn with_initial_supply(mut self, supply: u64) -> Self {
        self.initial_supply = supply;
        self
    }

    /// Set a finite supply cap
    pub fn with_max_supply(mut self, max: u64) -> Self {
        self.max_supply = Some(max);
        self
    }

    /// Set the admin key
    pub fn with_admin_key(mut self, key: impl Into<Key>) -> Self {
        self.admin_key = Some(key.into());
        self
    }

    /// Set the supply key
    pub fn with_supply_key(mut self, key: impl Into<Key>) -> Self {
        self.supply_key = Some(key.into());
        self
    }
}

/// Result of a token info query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Token id
    pub token_id: TokenId,
    /// Token name
    pub name: String,
    /// Token symbol
    pub symbol: String,
    /// Decimal places
    pub decimals: u32,
    /// Units in circulation
    pub total_supply: u64,
    /// Supply cap, `None` for infinite supply
    pub max_supply: Option<u64>,
    /// Treasury account
    pub treasury: AccountId,
    /// Administrative key
    pub admin_key: Option<Key>,
}

/// Parameters of a topic creation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicConfig {
    /// Topic memo
    pub memo: String,
    /// Key required to submit messages; `None` means open submission
    pub submit_key: Option<Key>,
}

/// Result of a topic info query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    /// Topic id
    pub topic_id: TopicId,
    /// Topic memo
    pub memo: String,
    /// Submit key
    pub submit_key: Option<Key>,
    /// Number of messages accepted so far
    pub sequence_number: u64,
}

/// Message delivered by a topic subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMessage {
    /// Topic the message was published to
    pub topic_id: TopicId,
    /// 1-based position in the topic
    pub sequence_number: u64,
    /// Consensus timestamp
    pub consensus_timestamp: DateTime<Utc>,
    /// Raw message contents
    pub contents: Vec<u8>,
}

impl TopicMessage {
    /// Contents as UTF-8 (lossy)
    pub fn contents_str(&self) -> String {
        String::from_utf8_lossy(&self.contents).into_owned()
    }
}

/// Consensus status of a transaction
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    InvalidSignature,
    InsufficientPayerBalance,
    InsufficientTokenBalance,
    InvalidAccountId,
    InvalidTokenId,
    InvalidTopicId,
    InvalidScheduleId,
    TokenNotAssociatedToAccount,
    TokenAlreadyAssociatedToAccount,
    TokenMaxSupplyReached,
    TokenHasNoSupplyKey,
    InvalidTokenMintAmount,
    InvalidTokenInitialSupply,
    InvalidTokenMaxSupply,
    InvalidTokenDecimals,
    MissingTokenName,
    MissingTokenSymbol,
    TransfersNotZeroSumForToken,
    EmptyTokenTransferBody,
    InvalidTopicMessage,
    MessageSizeTooLarge,
    MemoTooLong,
    ScheduleAlreadyExecuted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Success => "SUCCESS",
            Status::InvalidSignature => "INVALID_SIGNATURE",
            Status::InsufficientPayerBalance => "INSUFFICIENT_PAYER_BALANCE",
            Status::InsufficientTokenBalance => "INSUFFICIENT_TOKEN_BALANCE",
            Status::InvalidAccountId => "INVALID_ACCOUNT_ID",
            Status::InvalidTokenId => "INVALID_TOKEN_ID",
            Status::InvalidTopicId => "INVALID_TOPIC_ID",
            Status::InvalidScheduleId => "INVALID_SCHEDULE_ID",
            Status::TokenNotAssociatedToAccount => "TOKEN_NOT_ASSOCIATED_TO_ACCOUNT",
            Status::TokenAlreadyAssociatedToAccount => "TOKEN_ALREADY_ASSOCIATED_TO_ACCOUNT",
            Status::TokenMaxSupplyReached => "TOKEN_MAX_SUPPLY_REACHED",
            Status::TokenHasNoSupplyKey => "TOKEN_HAS_NO_SUPPLY_KEY",
            Status::InvalidTokenMintAmount => "INVALID_TOKEN_MINT_AMOUNT",
            Status::InvalidTokenInitialSupply => "INVALID_TOKEN_INITIAL_SUPPLY",
            Status::InvalidTokenMaxSupply => "INVALID_TOKEN_MAX_SUPPLY",
            Status::InvalidTokenDecimals => "INVALID_TOKEN_DECIMALS",
            Status::MissingTokenName => "MISSING_TOKEN_NAME",
            Status::MissingTokenSymbol => "MISSING_TOKEN_SYMBOL",
            Status::TransfersNotZeroSumForToken => "TRANSFERS_NOT_ZERO_SUM_FOR_TOKEN",
            Status::EmptyTokenTransferBody => "EMPTY_TOKEN_TRANSFER_BODY",
            Status::InvalidTopicMessage => "INVALID_TOPIC_MESSAGE",
            Status::MessageSizeTooLarge => "MESSAGE_SIZE_TOO_LARGE",
            Status::MemoTooLong => "MEMO_TOO_LONG",
            Status::ScheduleAlreadyExecuted => "SCHEDULE_ALREADY_EXECUTED",
        };
        f.write_str(name)
    }
}

/// Confirmation record returned once a transaction reaches consensus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Transaction this receipt belongs to
    pub transaction_id: TransactionId,
    /// Final status
    pub status: Status,
    /// Created token, for token creations
    pub token_id: Option<TokenId>,
    /// Created topic, for topic creations
    pub topic_id: Option<TopicId>,
    /// Created schedule, for scheduled transactions
    pub schedule_id: Option<ScheduleId>,
    /// Whether a scheduled transaction executed within this transaction
    pub schedule_executed: bool,
    /// Supply after a mint
    pub total_supply: Option<u64>,
    /// Sequence number assigned to a topic message
    pub topic_sequence_number: Option<u64>,
}

impl Receipt {
    /// Successful receipt with no created entities
    pub fn success(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            status: Status::Success,
            token_id: None,
            topic_id: None,
            schedule_id: None,
            schedule_executed: false,
            total_supply: None,
            topic_sequence_number: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_parse_and_display() {
        let id: AccountId = "0.0.1234".parse().unwrap();
        assert_eq!(id, AccountId::new(1234));
        assert_eq!(id.to_string(), "0.0.1234");

        assert!("0.0".parse::<TokenId>().is_err());
        assert!("0.0.x".parse::<TopicId>().is_err());
    }

    #[test]
    fn test_private_key_der_prefix() {
        let raw = "11".repeat(32);
        let der = format!("{}{}", ED25519_DER_PREFIX, raw);

        let a = PrivateKey::from_string_ed25519(&raw).unwrap();
        let b = PrivateKey::from_string_ed25519(&der).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.public_key(), b.public_key());

        assert!(PrivateKey::from_string_ed25519("abcd").is_err());
    }

    #[test]
    fn test_threshold_key_satisfaction() {
        let k1 = PrivateKey::derive("one").public_key();
        let k2 = PrivateKey::derive("two").public_key();
        let key: Key = KeyList::new(vec![k1, k2], 2).unwrap().into();

        let mut signers = BTreeSet::new();
        signers.insert(k1);
        assert!(!key.is_satisfied_by(&signers));
        signers.insert(k2);
        assert!(key.is_satisfied_by(&signers));

        assert!(KeyList::new(vec![k1], 2).is_err());
        assert!(KeyList::new(vec![k1], 0).is_err());
    }

    #[test]
    fn test_hbar_display() {
        assert_eq!(Hbar::from_hbars(10).to_string(), "10 ℏ");
        assert_eq!(Hbar::from_tinybars(150_000_000).to_string(), "1.5 ℏ");
    }
}
