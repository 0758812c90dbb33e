//! The external payment processor, seen through the three calls the payout
//! flow needs. Amounts cross this boundary in minor units (cents).

use crate::types::EntityId;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("processor rejected the request: {0}")]
    Rejected(String),

    /// A timeout is a failure. The payout flow never assumes it went through.
    #[error("processor timed out after {0}s")]
    Timeout(u64),

    #[error("processor unavailable: {0}")]
    Unavailable(String),
}

pub trait PaymentTransfer {
    /// Provision a connected account. Returns the processor's account id.
    fn create_account(&self, email: &str) -> Result<EntityId, TransferError>;

    /// A URL where the store owner completes onboarding for `account_id`.
    fn create_onboarding_link(&self, account_id: &str) -> Result<String, TransferError>;

    /// Move `amount_minor` cents to `destination`. Returns the transfer id.
    fn transfer(
        &self,
        amount_minor: i64,
        destination: &str,
        description: &str,
    ) -> Result<EntityId, TransferError>;
}

/// One transfer the sandbox accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxTransferRecord {
    pub transfer_id: EntityId,
    pub amount_minor: i64,
    pub destination: String,
    pub description: String,
}

#[derive(Debug, Default)]
struct SandboxState {
    accounts: Vec<(EntityId, String)>,
    transfers: Vec<SandboxTransferRecord>,
    queued_failures: Vec<TransferError>,
    fail_all: Option<TransferError>,
}

/// In-process processor. Records every call and can be told to fail.
/// Clones share state, so a caller can keep a handle for inspection.
#[derive(Debug, Clone, Default)]
pub struct SandboxTransfer {
    state: Arc<Mutex<SandboxState>>,
}

impl SandboxTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SandboxState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The next transfer call fails with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, error: TransferError) {
        self.state().queued_failures.push(error);
    }

    /// Every transfer fails with `error` until `recover()` is called.
    pub fn fail_all(&self, error: TransferError) {
        self.state().fail_all = Some(error);
    }

    pub fn recover(&self) {
        let mut state = self.state();
        state.fail_all = None;
        state.queued_failures.clear();
    }

    pub fn transfers(&self) -> Vec<SandboxTransferRecord> {
        self.state().transfers.clone()
    }

    pub fn accounts(&self) -> Vec<(EntityId, String)> {
        self.state().accounts.clone()
    }
}

impl PaymentTransfer for SandboxTransfer {
    fn create_account(&self, email: &str) -> Result<EntityId, TransferError> {
        if email.trim().is_empty() || !email.contains('@') {
            return Err(TransferError::Rejected(format!("invalid email '{email}'")));
        }
        let account_id = format!("acct_{}", uuid::Uuid::new_v4().simple());
        self.state().accounts.push((account_id.clone(), email.to_string()));
        Ok(account_id)
    }

    fn create_onboarding_link(&self, account_id: &str) -> Result<String, TransferError> {
        let known = self.state().accounts.iter().any(|(id, _)| id == account_id);
        if !known {
            return Err(TransferError::Rejected(format!("no such account '{account_id}'")));
        }
        Ok(format!("https://connect.sandbox.invalid/onboarding/{account_id}"))
    }

    fn transfer(
        &self,
        amount_minor: i64,
        destination: &str,
        description: &str,
    ) -> Result<EntityId, TransferError> {
        let mut state = self.state();
        if let Some(err) = state.fail_all.clone() {
            return Err(err);
        }
        if !state.queued_failures.is_empty() {
            return Err(state.queued_failures.remove(0));
        }
        if amount_minor <= 0 {
            return Err(TransferError::Rejected(format!(
                "amount must be positive, got {amount_minor}"
            )));
        }
        let transfer_id = format!("tr_{}", uuid::Uuid::new_v4().simple());
        state.transfers.push(SandboxTransferRecord {
            transfer_id: transfer_id.clone(),
            amount_minor,
            destination: destination.to_string(),
            description: description.to_string(),
        });
        Ok(transfer_id)
    }
}
