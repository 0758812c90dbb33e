//! Scheduled jobs: the four entry points an external cron trigger calls.
//!
//! EXECUTION ORDER (daily):
//!   1. Settlement sweep
//!   2. Release payouts stuck in `processing`
//!   3. Automatic payouts for every due store (unless disabled)
//!
//! RULES:
//!   - Jobs never return an error. Every per-item failure is caught and
//!     reported in the job's summary, and the sweep continues.
//!   - Steps run sequentially; each item is awaited before the next.

use crate::{
    clock::Clock,
    config::{window_start, EngineConfig},
    earnings_ledger::{EarningsLedger, PayoutSchedule},
    error::PayoutError,
    event::LedgerEvent,
    payment_transfer::PaymentTransfer,
    payout_service::{AutoPayoutOutcome, PayoutService, PayoutStatus},
    settings_resolver::SettingsResolver,
    settlement_service::SettlementService,
    store::LedgerStore,
    types::Timestamp,
};
use chrono::Months;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub item: String,
    pub error: String,
}

/// Result of one best-effort sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub succeeded: usize,
    /// Items that needed no work (already handled, or not eligible).
    pub skipped: usize,
    pub failed: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn record_failure(&mut self, item: &str, error: &dyn Display) {
        self.failed.push(BatchFailure {
            item: item.to_string(),
            error: error.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyJobReport {
    pub settlement: BatchOutcome,
    pub stuck_payouts: BatchOutcome,
    pub payouts: BatchOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub issues: Vec<String>,
    pub checked_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Daily,
    Weekly,
    Monthly,
    Health,
}

impl FromStr for JobKind {
    type Err = crate::types::ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily"   => Ok(Self::Daily),
            "weekly"  => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "health"  => Ok(Self::Health),
            other => Err(crate::types::ParseEnumError::new("job", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", content = "report", rename_all = "snake_case")]
pub enum JobSummary {
    Daily(DailyJobReport),
    Weekly(BatchOutcome),
    Monthly(BatchOutcome),
    Health(HealthReport),
}

impl JobSummary {
    /// True when nothing in the run needs an operator's attention.
    pub fn is_clean(&self) -> bool {
        match self {
            Self::Daily(r) => {
                r.settlement.is_clean() && r.stuck_payouts.is_clean() && r.payouts.is_clean()
            }
            Self::Weekly(r) | Self::Monthly(r) => r.is_clean(),
            Self::Health(r) => r.healthy,
        }
    }
}

pub struct BackgroundJobs<'a> {
    store: &'a LedgerStore,
    clock: &'a dyn Clock,
    config: &'a EngineConfig,
    settings: &'a SettingsResolver,
    transfer: &'a dyn PaymentTransfer,
    automatic_payouts: bool,
}

impl<'a> BackgroundJobs<'a> {
    pub fn new(
        store: &'a LedgerStore,
        clock: &'a dyn Clock,
        config: &'a EngineConfig,
        settings: &'a SettingsResolver,
        transfer: &'a dyn PaymentTransfer,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            settings,
            transfer,
            automatic_payouts: true,
        }
    }

    /// Daily runs settle and reconcile but move no money. The skipped step
    /// is reported as a failure so the run does not read as clean.
    pub fn without_automatic_payouts(mut self) -> Self {
        self.automatic_payouts = false;
        self
    }

    pub fn run(&self, kind: JobKind) -> JobSummary {
        log::info!("job {kind:?} starting");
        let summary = match kind {
            JobKind::Daily   => JobSummary::Daily(self.daily()),
            JobKind::Weekly  => JobSummary::Weekly(self.weekly()),
            JobKind::Monthly => JobSummary::Monthly(self.monthly()),
            JobKind::Health  => JobSummary::Health(self.health_check()),
        };
        log::info!("job {kind:?} finished, clean={}", summary.is_clean());
        summary
    }

    // ── Daily ──────────────────────────────────────────────────

    pub fn daily(&self) -> DailyJobReport {
        let settlement = SettlementService::new(self.store, self.clock, self.config)
            .settle_pending_funds();
        let stuck_payouts = self.release_stuck_payouts();
        let payouts = if self.automatic_payouts {
            self.run_automatic_payouts()
        } else {
            log::warn!("automatic payouts disabled for this run");
            let mut outcome = BatchOutcome::default();
            outcome.record_failure("automatic_payouts", &"no live payment processor configured");
            outcome
        };
        DailyJobReport {
            settlement,
            stuck_payouts,
            payouts,
        }
    }

    /// Fail every request that has sat in `processing` past the stuck
    /// threshold, returning its amount to the store.
    fn release_stuck_payouts(&self) -> BatchOutcome {
        let now = self.clock.now();
        let service = PayoutService::new(self.store, self.clock, self.config, self.transfer);
        let mut outcome = BatchOutcome::default();

        let stuck = self
            .config
            .stuck_threshold()
            .and_then(|threshold| window_start(now, threshold))
            .and_then(|cutoff| {
                self.store
                    .payouts_in_status_requested_before(PayoutStatus::Processing, cutoff)
            });
        let stuck = match stuck {
            Ok(stuck) => stuck,
            Err(e) => {
                log::error!("stuck payout query failed: {e}");
                outcome.record_failure("stuck_payout_query", &e);
                return outcome;
            }
        };

        let reason = format!(
            "stuck in processing for over {} minutes",
            self.config.stuck_transaction_minutes
        );
        for request in &stuck {
            match service.fail_stuck_payout(&request.payout_id, &reason) {
                Ok(_) => outcome.succeeded += 1,
                // Finished by another worker since the query.
                Err(PayoutError::InvalidTransition { .. }) => outcome.skipped += 1,
                Err(e) => {
                    log::warn!("releasing payout {} failed: {e}", request.payout_id);
                    outcome.record_failure(&request.payout_id, &e);
                }
            }
        }
        if !stuck.is_empty() {
            log::info!(
                "stuck payouts: {} released, {} skipped, {} failed",
                outcome.succeeded,
                outcome.skipped,
                outcome.failed.len()
            );
        }
        outcome
    }

    fn run_automatic_payouts(&self) -> BatchOutcome {
        let now = self.clock.now();
        let service = PayoutService::new(self.store, self.clock, self.config, self.transfer);
        let mut outcome = BatchOutcome::default();

        let stores = match self.store.stores_with_schedule(PayoutSchedule::Automatic) {
            Ok(stores) => stores,
            Err(e) => {
                log::error!("automatic payout query failed: {e}");
                outcome.record_failure("automatic_payout_query", &e);
                return outcome;
            }
        };

        for earnings in stores.iter().filter(|e| {
            e.available_balance > Decimal::ZERO && e.next_payout_date.map_or(true, |next| next <= now)
        }) {
            match service.run_automatic_payout(&earnings.store_id) {
                Ok(AutoPayoutOutcome::Paid { .. }) => outcome.succeeded += 1,
                Ok(AutoPayoutOutcome::Skipped { reason }) => {
                    log::debug!("store {} skipped: {reason:?}", earnings.store_id);
                    outcome.skipped += 1;
                }
                Err(e) => {
                    log::warn!("automatic payout for store {} failed: {e}", earnings.store_id);
                    outcome.record_failure(&earnings.store_id, &e);
                }
            }
        }

        log::info!(
            "automatic payouts: {} paid, {} skipped, {} failed",
            outcome.succeeded,
            outcome.skipped,
            outcome.failed.len()
        );
        outcome
    }

    // ── Weekly ─────────────────────────────────────────────────

    /// Recompute every store's month-to-date sales, then drop the settings cache.
    pub fn weekly(&self) -> BatchOutcome {
        let ledger = EarningsLedger::new(self.store, self.clock);
        let mut outcome = BatchOutcome::default();

        match self.store.all_store_ids() {
            Ok(store_ids) => {
                for store_id in &store_ids {
                    match ledger.refresh_current_month_sales(store_id) {
                        Ok(_) => outcome.succeeded += 1,
                        Err(e) => {
                            log::warn!("month sales refresh for store {store_id} failed: {e}");
                            outcome.record_failure(store_id, &e);
                        }
                    }
                }
            }
            Err(e) => outcome.record_failure("store_query", &e),
        }

        self.settings.invalidate();
        log::info!(
            "weekly maintenance: {} stores refreshed, {} failed",
            outcome.succeeded,
            outcome.failed.len()
        );
        outcome
    }

    // ── Monthly ────────────────────────────────────────────────

    /// Flag completed payouts older than the archive window. Nothing is deleted.
    pub fn monthly(&self) -> BatchOutcome {
        let now = self.clock.now();
        let months = self.config.archive_after_months;
        let mut outcome = BatchOutcome::default();
        let Some(cutoff) = now.checked_sub_months(Months::new(months)) else {
            log::error!("archive window of {months} months reaches before the calendar");
            outcome.record_failure(
                "payout_archive",
                &format!("archive_after_months = {months} is out of range"),
            );
            return outcome;
        };

        let archived = self.store.write_transaction(|| {
            let count = self.store.archive_completed_payouts_before(cutoff)?;
            if count > 0 {
                self.store
                    .append_event(&LedgerEvent::PayoutsArchived { count, cutoff }, now)?;
            }
            Ok(count)
        });
        match archived {
            Ok(count) => {
                outcome.succeeded = count;
                log::info!("archived {count} payout requests older than {cutoff}");
            }
            Err(e) => {
                log::error!("payout archive failed: {e}");
                outcome.record_failure("payout_archive", &e);
            }
        }
        outcome
    }

    // ── Health check ───────────────────────────────────────────

    pub fn health_check(&self) -> HealthReport {
        let now = self.clock.now();
        let cfg = self.config;
        let mut issues = Vec::new();

        let stuck_cutoff = match cfg.stuck_threshold().and_then(|w| window_start(now, w)) {
            Ok(cutoff) => Some(cutoff),
            Err(e) => {
                issues.push(format!("stuck checks skipped: {e}"));
                None
            }
        };
        if let Some(cutoff) = stuck_cutoff {
            match self.store.pending_transactions_created_before(cutoff) {
                Ok(stuck) if !stuck.is_empty() => issues.push(format!(
                    "{} commission transaction(s) pending for over {} minutes",
                    stuck.len(),
                    cfg.stuck_transaction_minutes
                )),
                Ok(_) => {}
                Err(e) => issues.push(format!("stuck transaction check failed: {e}")),
            }

            match self.store.payouts_in_status_requested_before(PayoutStatus::Processing, cutoff) {
                Ok(stuck) if !stuck.is_empty() => issues.push(format!(
                    "{} payout(s) processing for over {} minutes",
                    stuck.len(),
                    cfg.stuck_transaction_minutes
                )),
                Ok(_) => {}
                Err(e) => issues.push(format!("stuck payout check failed: {e}")),
            }
        }

        match cfg
            .failed_payout_lookback()
            .and_then(|w| window_start(now, w))
            .and_then(|since| self.store.failed_payouts_since(since))
        {
            Ok(failed) if !failed.is_empty() => issues.push(format!(
                "{} payout(s) failed in the last {} hours",
                failed.len(),
                cfg.failed_payout_lookback_hours
            )),
            Ok(_) => {}
            Err(e) => issues.push(format!("failed payout check failed: {e}")),
        }

        match cfg
            .idle_payout_window()
            .and_then(|w| window_start(now, w))
            .and_then(|since| Ok((since, self.store.all_store_earnings()?)))
        {
            Ok((idle_since, all)) => {
                for earnings in &all {
                    if earnings.pending_balance < Decimal::ZERO
                        || earnings.available_balance < Decimal::ZERO
                    {
                        issues.push(format!(
                            "store {} has a negative balance (pending {}, available {})",
                            earnings.store_id, earnings.pending_balance, earnings.available_balance
                        ));
                    }
                    let paid_recently = earnings
                        .last_payout_date
                        .is_some_and(|last| last >= idle_since);
                    if earnings.available_balance > cfg.idle_balance_threshold && !paid_recently {
                        issues.push(format!(
                            "store {} holds {} available with no payout in {} days",
                            earnings.store_id, earnings.available_balance, cfg.idle_payout_days
                        ));
                    }
                }
            }
            Err(e) => issues.push(format!("balance check failed: {e}")),
        }

        let healthy = issues.is_empty();
        if healthy {
            log::info!("health check passed");
        } else {
            for issue in &issues {
                log::warn!("health: {issue}");
            }
        }
        HealthReport {
            healthy,
            issues,
            checked_at: now,
        }
    }
}
