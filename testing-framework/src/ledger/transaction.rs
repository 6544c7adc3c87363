//! Composable multi-leg token transfer
//!
//! A [`TokenTransfer`] is built client-side, collects signatures from any
//! number of keys, and is handed to [`LedgerClient::submit`](super::LedgerClient::submit)
//! once. The ledger checks that every debited account authorized it.

use std::collections::{BTreeMap, BTreeSet};

use super::types::{AccountId, PrivateKey, PublicKey, TokenId};

/// One debit or credit of a token transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLeg {
    /// Token moved by this leg
    pub token: TokenId,
    /// Account debited (negative) or credited (positive)
    pub account: AccountId,
    /// Signed amount in the token's smallest unit
    pub amount: i64,
}

/// Unsubmitted, possibly partially signed token transfer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenTransfer {
    legs: Vec<TransferLeg>,
    signers: BTreeSet<PublicKey>,
    scheduled: bool,
}

impl TokenTransfer {
    /// Empty transfer
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a leg; negative amounts debit the account
    pub fn add_token_transfer(mut self, token: TokenId, account: AccountId, amount: i64) -> Self {
        self.legs.push(TransferLeg {
            token,
            account,
            amount,
        });
        self
    }

    /// Sign with `key`
    pub fn sign(mut self, key: &PrivateKey) -> Self {
        self.add_signature(key);
        self
    }

    /// Sign in place with `key`
    pub fn add_signature(&mut self, key: &PrivateKey) {
        self.signers.insert(key.public_key());
    }

    /// Wrap the transfer in a schedule that executes once fully signed
    pub fn schedule(mut self) -> Self {
        self.scheduled = true;
        self
    }

    /// Transfer legs in insertion order
    pub fn legs(&self) -> &[TransferLeg] {
        &self.legs
    }

    /// Public keys that signed so far
    pub fn signers(&self) -> &BTreeSet<PublicKey> {
        &self.signers
    }

    /// Whether the transfer is wrapped in a schedule
    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Accounts with at least one debit leg; each must authorize the transfer
    pub fn debited_accounts(&self) -> BTreeSet<AccountId> {
        self.legs
            .iter()
            .filter(|leg| leg.amount < 0)
            .map(|leg| leg.account)
            .collect()
    }

    /// Net change per (token, account)
    pub fn net_changes(&self) -> BTreeMap<(TokenId, AccountId), i128> {
        let mut changes = BTreeMap::new();
        for leg in &self.legs {
            *changes.entry((leg.token, leg.account)).or_insert(0i128) += leg.amount as i128;
        }
        changes
    }

    /// Sum of all legs per token; a valid transfer is zero for every token
    pub fn token_sums(&self) -> BTreeMap<TokenId, i128> {
        let mut sums = BTreeMap::new();
        for leg in &self.legs {
            *sums.entry(leg.token).or_insert(0i128) += leg.amount as i128;
        }
        sums
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debited_accounts_and_sums() {
        let token = TokenId::new(10);
        let a = AccountId::new(1);
        let b = AccountId::new(2);
        let c = AccountId::new(3);

        let tx = TokenTransfer::new()
            .add_token_transfer(token, a, -10)
            .add_token_transfer(token, b, -10)
            .add_token_transfer(token, c, 20);

        assert_eq!(tx.debited_accounts(), [a, b].into_iter().collect());
        assert_eq!(tx.token_sums().get(&token), Some(&0));
        assert_eq!(tx.net_changes().get(&(token, c)), Some(&20));
    }

    #[test]
    fn test_signatures_accumulate() {
        let k1 = PrivateKey::derive("k1");
        let k2 = PrivateKey::derive("k2");

        let mut tx = TokenTransfer::new().sign(&k1).schedule();
        tx.add_signature(&k2);
        tx.add_signature(&k1);

        assert!(tx.is_scheduled());
        assert_eq!(tx.signers().len(), 2);
    }
}
