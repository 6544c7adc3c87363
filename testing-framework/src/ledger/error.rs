use thiserror::Error;

use super::types::{Status, TopicId, TransactionId};

/// Errors surfaced by a [`LedgerClient`](super::LedgerClient)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Rejected before reaching consensus; no fee charged
    #[error("transaction {transaction_id} failed precheck with status {status}")]
    Precheck {
        status: Status,
        transaction_id: TransactionId,
    },

    /// Reached consensus with a failure status; fee charged
    #[error("receipt for transaction {transaction_id} contained error status {status}")]
    Receipt {
        status: Status,
        transaction_id: TransactionId,
    },

    #[error("invalid entity id `{0}`")]
    InvalidEntityId(String),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("invalid threshold {threshold} for a key list of {keys} keys")]
    InvalidThreshold { threshold: u32, keys: usize },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("subscription to topic {0} closed")]
    SubscriptionClosed(TopicId),

    #[error("network unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Consensus status carried by the error, if any
    pub fn status(&self) -> Option<Status> {
        match self {
            LedgerError::Precheck { status, .. } | LedgerError::Receipt { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}
