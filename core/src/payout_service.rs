//! Payout orchestrator.
//!
//! State machine per request:
//!   pending ──► processing ──► completed
//!                         └──► failed
//! `completed` and `failed` are terminal.
//!
//! RULE: funds leave `available_balance` when a request is created (or, for
//! automatic payouts, before the transfer is attempted). A request that ends
//! `failed` puts exactly that amount back. The external transfer is never
//! called while a database write transaction is open.
//!
//! A request left in `processing` by a crash is released with
//! `fail_stuck_payout`; the daily job does this once it passes the stuck
//! threshold.

use crate::{
    clock::Clock,
    config::EngineConfig,
    earnings_ledger::{PayoutSchedule, StoreEarnings},
    error::{PayoutError, PayoutResult},
    event::LedgerEvent,
    money,
    payment_transfer::PaymentTransfer,
    store::LedgerStore,
    types::{new_entity_id, EntityId, ParseEnumError, StoreId, Timestamp},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending    => "pending",
            Self::Processing => "processing",
            Self::Completed  => "completed",
            Self::Failed     => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for PayoutStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"    => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed"  => Ok(Self::Completed),
            "failed"     => Ok(Self::Failed),
            other => Err(ParseEnumError::new("payout status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDetails {
    pub account_holder: String,
    pub bank_name: String,
    pub account_number: String,
    pub routing_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub payout_id: EntityId,
    pub store_id: StoreId,
    pub amount: Decimal,
    pub status: PayoutStatus,
    pub automatic: bool,
    pub requested_at: Timestamp,
    pub processed_at: Option<Timestamp>,
    pub transfer_id: Option<String>,
    pub failure_reason: Option<String>,
    pub bank_details: Option<BankDetails>,
    pub archived: bool,
}

/// The external account a store gets paid into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutAccount {
    pub store_id: StoreId,
    pub account_id: EntityId,
    pub email: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoEarnings,
    ManualSchedule,
    NoPayoutAccount,
    NothingAvailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AutoPayoutOutcome {
    Paid {
        payout_id: EntityId,
        amount: Decimal,
        transfer_id: String,
    },
    Skipped {
        reason: SkipReason,
    },
}

/// Reference recorded for payouts settled by bank transfer outside the processor.
pub fn bank_transfer_reference(payout_id: &str) -> String {
    format!("bank-transfer:{payout_id}")
}

pub struct PayoutService<'a> {
    store: &'a LedgerStore,
    clock: &'a dyn Clock,
    config: &'a EngineConfig,
    transfer: &'a dyn PaymentTransfer,
}

impl<'a> PayoutService<'a> {
    pub fn new(
        store: &'a LedgerStore,
        clock: &'a dyn Clock,
        config: &'a EngineConfig,
        transfer: &'a dyn PaymentTransfer,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            transfer,
        }
    }

    fn earnings_or_missing(&self, store_id: &str) -> PayoutResult<StoreEarnings> {
        self.store
            .get_store_earnings(store_id)?
            .ok_or_else(|| PayoutError::StoreNotFound {
                store_id: store_id.to_string(),
            })
    }

    fn payout_or_missing(&self, payout_id: &str) -> PayoutResult<PayoutRequest> {
        self.store
            .get_payout_request(payout_id)?
            .ok_or_else(|| PayoutError::PayoutNotFound {
                payout_id: payout_id.to_string(),
            })
    }

    // ── Requests ───────────────────────────────────────────────

    /// Create a `pending` request and reserve `amount` out of the available
    /// balance in the same write transaction.
    pub fn request_payout(
        &self,
        store_id: &str,
        amount: Decimal,
        bank_details: Option<BankDetails>,
    ) -> PayoutResult<PayoutRequest> {
        money::validate_payout_amount(amount)?;
        let now = self.clock.now();

        let request = self.store.write_transaction(|| {
            let mut earnings = self.earnings_or_missing(store_id)?;
            if amount > earnings.available_balance {
                return Err(PayoutError::InsufficientBalance {
                    requested: amount,
                    available: earnings.available_balance,
                });
            }
            earnings.available_balance -= amount;
            earnings.updated_at = now;
            self.store.update_store_earnings(&earnings)?;

            let request = PayoutRequest {
                payout_id: new_entity_id("payout"),
                store_id: store_id.to_string(),
                amount,
                status: PayoutStatus::Pending,
                automatic: false,
                requested_at: now,
                processed_at: None,
                transfer_id: None,
                failure_reason: None,
                bank_details: bank_details.clone(),
                archived: false,
            };
            self.store.insert_payout_request(&request)?;
            self.store.append_event(
                &LedgerEvent::PayoutRequested {
                    payout_id: request.payout_id.clone(),
                    store_id: request.store_id.clone(),
                    amount,
                    automatic: false,
                },
                now,
            )?;
            Ok(request)
        })?;

        log::info!(
            "payout {} requested: store={} amount={}",
            request.payout_id,
            store_id,
            amount
        );
        Ok(request)
    }

    /// Drive a `pending` request through processing to a terminal state.
    /// A transfer failure (timeouts included) is not an error here: the
    /// request comes back `failed` with its amount restored.
    pub fn process_manual_payout(&self, payout_id: &str) -> PayoutResult<PayoutRequest> {
        let request = self.store.write_transaction(|| {
            let request = self.payout_or_missing(payout_id)?;
            if request.status != PayoutStatus::Pending
                || !self.store.transition_payout(
                    payout_id,
                    PayoutStatus::Pending,
                    PayoutStatus::Processing,
                )?
            {
                return Err(PayoutError::InvalidTransition {
                    id: payout_id.to_string(),
                    from: request.status.as_str(),
                    to: PayoutStatus::Processing.as_str(),
                });
            }
            Ok(PayoutRequest {
                status: PayoutStatus::Processing,
                ..request
            })
        })?;

        match self.execute_manual_transfer(&request) {
            Ok(reference) => self.finalize_completed(&request, &reference, None),
            Err(e) => {
                log::warn!("payout {payout_id} failed: {e}");
                self.finalize_failed(&request, &e.to_string())
            }
        }
    }

    fn execute_manual_transfer(&self, request: &PayoutRequest) -> PayoutResult<String> {
        if let Some(account) = self.store.get_payout_account(&request.store_id)? {
            let amount_minor = money::to_minor_units(request.amount)?;
            let transfer_id = self.transfer.transfer(
                amount_minor,
                &account.account_id,
                &self.transfer_description(request),
            )?;
            return Ok(transfer_id);
        }
        log::info!(
            "payout {} has no processor account; recorded for separate bank settlement",
            request.payout_id
        );
        Ok(bank_transfer_reference(&request.payout_id))
    }

    fn transfer_description(&self, request: &PayoutRequest) -> String {
        format!("{} {}", self.config.payout_description, request.payout_id)
    }

    fn finalize_completed(
        &self,
        request: &PayoutRequest,
        transfer_id: &str,
        next_payout_date: Option<Timestamp>,
    ) -> PayoutResult<PayoutRequest> {
        let now = self.clock.now();
        self.store.write_transaction(|| {
            if !self.store.complete_payout(&request.payout_id, transfer_id, now)? {
                return Err(PayoutError::InvalidTransition {
                    id: request.payout_id.clone(),
                    from: request.status.as_str(),
                    to: PayoutStatus::Completed.as_str(),
                });
            }
            let mut earnings = self.earnings_or_missing(&request.store_id)?;
            earnings.last_payout_date = Some(now);
            if let Some(next) = next_payout_date {
                earnings.next_payout_date = Some(next);
            }
            earnings.updated_at = now;
            self.store.update_store_earnings(&earnings)?;
            self.store.append_event(
                &LedgerEvent::PayoutCompleted {
                    payout_id: request.payout_id.clone(),
                    store_id: request.store_id.clone(),
                    amount: request.amount,
                    transfer_id: transfer_id.to_string(),
                },
                now,
            )
        })?;
        log::info!(
            "payout {} completed: store={} amount={} transfer={transfer_id}",
            request.payout_id,
            request.store_id,
            request.amount
        );
        self.payout_or_missing(&request.payout_id)
    }

    /// Mark failed and return the reserved amount to the available balance.
    fn finalize_failed(&self, request: &PayoutRequest, reason: &str) -> PayoutResult<PayoutRequest> {
        let now = self.clock.now();
        let result = self.store.write_transaction(|| {
            if !self.store.fail_payout(&request.payout_id, reason, now)? {
                return Err(PayoutError::InvalidTransition {
                    id: request.payout_id.clone(),
                    from: request.status.as_str(),
                    to: PayoutStatus::Failed.as_str(),
                });
            }
            let mut earnings = self.earnings_or_missing(&request.store_id)?;
            earnings.available_balance += request.amount;
            earnings.updated_at = now;
            self.store.update_store_earnings(&earnings)?;
            self.store.append_event(
                &LedgerEvent::PayoutFailed {
                    payout_id: request.payout_id.clone(),
                    store_id: request.store_id.clone(),
                    amount: request.amount,
                    reason: reason.to_string(),
                },
                now,
            )
        });
        if let Err(e) = &result {
            log::error!(
                "payout {} could not be marked failed; {} still reserved: {e}",
                request.payout_id,
                request.amount
            );
        }
        result?;
        self.payout_or_missing(&request.payout_id)
    }

    // ── Automatic payouts ──────────────────────────────────────

    /// Pay out a store's entire available balance to its linked account.
    /// Skips stores that are manual, unlinked, or have nothing available.
    /// A failed transfer restores the balance and is returned as an error.
    pub fn run_automatic_payout(&self, store_id: &str) -> PayoutResult<AutoPayoutOutcome> {
        let skip = |reason: SkipReason| -> PayoutResult<AutoPayoutOutcome> {
            Ok(AutoPayoutOutcome::Skipped { reason })
        };

        let Some(earnings) = self.store.get_store_earnings(store_id)? else {
            return skip(SkipReason::NoEarnings);
        };
        if earnings.payout_schedule != PayoutSchedule::Automatic {
            return skip(SkipReason::ManualSchedule);
        }
        let Some(account) = self.store.get_payout_account(store_id)? else {
            return skip(SkipReason::NoPayoutAccount);
        };

        let now = self.clock.now();
        let next_payout_date = now
            .checked_add_signed(self.config.payout_interval()?)
            .ok_or_else(|| {
                PayoutError::InvalidConfig("payout_interval_days overflows the calendar".into())
            })?;
        let reserved = self.store.write_transaction(|| {
            let mut earnings = self.earnings_or_missing(store_id)?;
            let amount = earnings.available_balance;
            if amount <= Decimal::ZERO {
                return Ok(None);
            }
            earnings.available_balance = Decimal::ZERO;
            earnings.updated_at = now;
            self.store.update_store_earnings(&earnings)?;

            let request = PayoutRequest {
                payout_id: new_entity_id("payout"),
                store_id: store_id.to_string(),
                amount,
                status: PayoutStatus::Processing,
                automatic: true,
                requested_at: now,
                processed_at: None,
                transfer_id: None,
                failure_reason: None,
                bank_details: None,
                archived: false,
            };
            self.store.insert_payout_request(&request)?;
            self.store.append_event(
                &LedgerEvent::PayoutRequested {
                    payout_id: request.payout_id.clone(),
                    store_id: request.store_id.clone(),
                    amount,
                    automatic: true,
                },
                now,
            )?;
            Ok(Some(request))
        })?;
        let Some(request) = reserved else {
            return skip(SkipReason::NothingAvailable);
        };

        let transfer = money::to_minor_units(request.amount).and_then(|amount_minor| {
            self.transfer
                .transfer(amount_minor, &account.account_id, &self.transfer_description(&request))
                .map_err(PayoutError::from)
        });
        match transfer {
            Ok(transfer_id) => {
                self.finalize_completed(&request, &transfer_id, Some(next_payout_date))?;
                Ok(AutoPayoutOutcome::Paid {
                    payout_id: request.payout_id,
                    amount: request.amount,
                    transfer_id,
                })
            }
            Err(e) => {
                self.finalize_failed(&request, &e.to_string())?;
                Err(e)
            }
        }
    }

    /// Fail a request stuck in `processing` and give its amount back.
    ///
    /// A request lands here when the process died between reserving funds
    /// and finalizing, or the finalize write itself failed. The transfer
    /// outcome is unknown at that point; check the processor before calling.
    pub fn fail_stuck_payout(&self, payout_id: &str, reason: &str) -> PayoutResult<PayoutRequest> {
        let request = self.payout_or_missing(payout_id)?;
        if request.status != PayoutStatus::Processing {
            return Err(PayoutError::InvalidTransition {
                id: payout_id.to_string(),
                from: request.status.as_str(),
                to: PayoutStatus::Failed.as_str(),
            });
        }
        log::warn!(
            "payout {payout_id} for store {} released from processing: {reason}",
            request.store_id
        );
        self.finalize_failed(&request, reason)
    }

    /// `run_automatic_payout` for callers that only need to know whether money moved.
    /// Errors are logged and count as "not processed this cycle".
    pub fn process_automatic_payout(&self, store_id: &str) -> bool {
        match self.run_automatic_payout(store_id) {
            Ok(AutoPayoutOutcome::Paid { .. }) => true,
            Ok(AutoPayoutOutcome::Skipped { reason }) => {
                log::debug!("automatic payout skipped for store {store_id}: {reason:?}");
                false
            }
            Err(e) => {
                log::warn!("automatic payout for store {store_id} not processed: {e}");
                false
            }
        }
    }

    // ── Accounts and preferences ───────────────────────────────

    /// Provision (or reuse) the store's processor account and return the
    /// onboarding URL for the store owner.
    pub fn setup_external_payout_account(&self, store_id: &str, email: &str) -> PayoutResult<String> {
        let account_id = match self.store.get_payout_account(store_id)? {
            Some(existing) => existing.account_id,
            None => {
                let account_id = self.transfer.create_account(email)?;
                let now = self.clock.now();
                let account = PayoutAccount {
                    store_id: store_id.to_string(),
                    account_id: account_id.clone(),
                    email: email.to_string(),
                    created_at: now,
                };
                self.store.write_transaction(|| {
                    self.store.insert_payout_account(&account)?;
                    self.store.append_event(
                        &LedgerEvent::PayoutAccountLinked {
                            store_id: store_id.to_string(),
                            account_id: account_id.clone(),
                        },
                        now,
                    )
                })?;
                log::info!("payout account {account_id} linked to store {store_id}");
                account_id
            }
        };
        Ok(self.transfer.create_onboarding_link(&account_id)?)
    }

    pub fn payout_account(&self, store_id: &str) -> PayoutResult<Option<PayoutAccount>> {
        self.store.get_payout_account(store_id)
    }

    /// Switching to automatic clears `next_payout_date`, so the store is due
    /// on the next daily run.
    pub fn set_payout_schedule(
        &self,
        store_id: &str,
        schedule: PayoutSchedule,
    ) -> PayoutResult<StoreEarnings> {
        let now = self.clock.now();
        self.store.write_transaction(|| {
            let mut earnings = self.earnings_or_missing(store_id)?;
            if earnings.payout_schedule == schedule {
                return Ok(earnings);
            }
            earnings.payout_schedule = schedule;
            earnings.next_payout_date = None;
            earnings.updated_at = now;
            let earnings = self.store.update_store_earnings(&earnings)?;
            self.store.append_event(
                &LedgerEvent::PayoutScheduleChanged {
                    store_id: store_id.to_string(),
                    schedule: schedule.as_str().to_string(),
                },
                now,
            )?;
            Ok(earnings)
        })
    }

    pub fn get_payout(&self, payout_id: &str) -> PayoutResult<Option<PayoutRequest>> {
        self.store.get_payout_request(payout_id)
    }

    /// Newest first.
    pub fn payout_history(&self, store_id: &str) -> PayoutResult<Vec<PayoutRequest>> {
        self.store.payouts_for_store(store_id)
    }
}
