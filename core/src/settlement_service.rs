//! Settlement sweep: matures pending funds into available funds once a
//! transaction has cleared the holding window.
//!
//! Each transaction settles in its own write transaction: a failure on one
//! never rolls back another. The `settled_at IS NULL` guard makes the sweep
//! safe to re-run.

use crate::{
    clock::Clock,
    commission_service::CommissionTransaction,
    config::{window_start, EngineConfig},
    error::{PayoutError, PayoutResult},
    event::LedgerEvent,
    jobs::BatchOutcome,
    store::LedgerStore,
    types::Timestamp,
};
use rust_decimal::Decimal;

pub struct SettlementService<'a> {
    store: &'a LedgerStore,
    clock: &'a dyn Clock,
    config: &'a EngineConfig,
}

impl<'a> SettlementService<'a> {
    pub fn new(store: &'a LedgerStore, clock: &'a dyn Clock, config: &'a EngineConfig) -> Self {
        Self { store, clock, config }
    }

    /// Transactions created on or before this instant are due.
    pub fn cutoff(&self, now: Timestamp) -> PayoutResult<Timestamp> {
        window_start(now, self.config.holding_period()?)
    }

    pub fn settle_pending_funds(&self) -> BatchOutcome {
        let now = self.clock.now();
        let mut outcome = BatchOutcome::default();

        let cutoff = match self.cutoff(now) {
            Ok(cutoff) => cutoff,
            Err(e) => {
                log::error!("settlement cutoff unavailable: {e}");
                outcome.record_failure("settlement_cutoff", &e);
                return outcome;
            }
        };

        let due = match self.store.unsettled_completed_before(cutoff) {
            Ok(due) => due,
            Err(e) => {
                log::error!("settlement query failed: {e}");
                outcome.record_failure("settlement_query", &e);
                return outcome;
            }
        };

        for txn in &due {
            match self.settle_transaction(txn, now) {
                Ok(Some(moved)) => {
                    log::debug!("settled {} for store {}: {moved}", txn.transaction_id, txn.store_id);
                    outcome.succeeded += 1;
                }
                Ok(None) => outcome.skipped += 1,
                Err(e) => {
                    log::warn!("settlement of {} failed: {e}", txn.transaction_id);
                    outcome.record_failure(&txn.transaction_id, &e);
                }
            }
        }

        log::info!(
            "settlement sweep (cutoff {cutoff}): {} settled, {} skipped, {} failed",
            outcome.succeeded,
            outcome.skipped,
            outcome.failed.len()
        );
        outcome
    }

    /// Returns the amount moved, or `None` if another sweep got there first.
    fn settle_transaction(
        &self,
        txn: &CommissionTransaction,
        now: Timestamp,
    ) -> PayoutResult<Option<Decimal>> {
        self.store.write_transaction(|| {
            if !self.store.mark_transaction_settled(&txn.transaction_id, now)? {
                return Ok(None);
            }
            let mut earnings = self.store.get_store_earnings(&txn.store_id)?.ok_or_else(|| {
                PayoutError::StoreNotFound {
                    store_id: txn.store_id.clone(),
                }
            })?;

            // Clamped: drift between the pools must never drive pending negative.
            let moved = earnings
                .pending_balance
                .min(txn.net_amount)
                .max(Decimal::ZERO);
            earnings.pending_balance -= moved;
            earnings.available_balance += moved;
            earnings.updated_at = now;
            self.store.update_store_earnings(&earnings)?;

            self.store.append_event(
                &LedgerEvent::FundsSettled {
                    transaction_id: txn.transaction_id.clone(),
                    store_id: txn.store_id.clone(),
                    amount: moved,
                },
                now,
            )?;
            Ok(Some(moved))
        })
    }
}
