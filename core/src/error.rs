use crate::{payment_transfer::TransferError, types::EntityId};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Decimal, available: Decimal },

    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: &'static str },

    #[error("Invalid commission settings: {0}")]
    InvalidSettings(String),

    #[error("Invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("No earnings record for store '{store_id}'")]
    StoreNotFound { store_id: EntityId },

    #[error("Payout request '{payout_id}' not found")]
    PayoutNotFound { payout_id: EntityId },

    #[error("Commission transaction '{transaction_id}' not found")]
    TransactionNotFound { transaction_id: EntityId },

    #[error("Invalid transition for '{id}': {from} -> {to}")]
    InvalidTransition {
        id: EntityId,
        from: &'static str,
        to: &'static str,
    },

    #[error("Earnings for store '{store_id}' changed concurrently (version {version})")]
    ConcurrentModification { store_id: EntityId, version: i64 },

    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PayoutResult<T> = Result<T, PayoutError>;
