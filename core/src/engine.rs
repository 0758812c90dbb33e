//! The payout engine. One instance per process, wiring the store, the
//! settings cache, the clock, and the payment processor into the services.
//!
//! Components, leaf-first:
//!   1. SettingsResolver   (cached rates and tiers)
//!   2. CommissionService  (calculator + order-completion entry point)
//!   3. EarningsLedger     (per-store balances)
//!   4. SettlementService  (pending → available sweep)
//!   5. PayoutService      (requests, transfers, reconciliation)
//!   6. BackgroundJobs     (daily / weekly / monthly / health)
//!
//! RULES:
//!   - Services are borrowed views; all state lives in the store and the
//!     resolver cache.
//!   - No service reads the wall clock; time comes from the injected `Clock`.

use crate::{
    clock::Clock,
    commission_service::CommissionService,
    config::EngineConfig,
    earnings_ledger::EarningsLedger,
    error::PayoutResult,
    event::EventLogEntry,
    jobs::{BackgroundJobs, JobKind, JobSummary},
    payment_transfer::PaymentTransfer,
    payout_service::PayoutService,
    settings_resolver::SettingsResolver,
    settlement_service::SettlementService,
    store::LedgerStore,
};

pub struct PayoutEngine {
    pub store: LedgerStore,
    pub config: EngineConfig,
    settings: SettingsResolver,
    clock: Box<dyn Clock>,
    transfer: Box<dyn PaymentTransfer>,
    automatic_payouts: bool,
}

impl PayoutEngine {
    pub fn new(
        store: LedgerStore,
        config: EngineConfig,
        clock: Box<dyn Clock>,
        transfer: Box<dyn PaymentTransfer>,
    ) -> Self {
        Self {
            store,
            config,
            settings: SettingsResolver::new(),
            clock,
            transfer,
            automatic_payouts: true,
        }
    }

    /// Turn off the automatic-payout step of the daily job, for deployments
    /// whose transfer backend cannot move real money.
    pub fn without_automatic_payouts(mut self) -> Self {
        self.automatic_payouts = false;
        self
    }

    /// Apply migrations, then wire. Call this instead of new() + migrate().
    pub fn build(
        store: LedgerStore,
        config: EngineConfig,
        clock: Box<dyn Clock>,
        transfer: Box<dyn PaymentTransfer>,
    ) -> PayoutResult<Self> {
        store.migrate()?;
        Ok(Self::new(store, config, clock, transfer))
    }

    pub fn settings(&self) -> &SettingsResolver {
        &self.settings
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn commission(&self) -> CommissionService<'_> {
        CommissionService::new(&self.store, &self.settings, self.clock.as_ref())
    }

    pub fn ledger(&self) -> EarningsLedger<'_> {
        EarningsLedger::new(&self.store, self.clock.as_ref())
    }

    pub fn settlement(&self) -> SettlementService<'_> {
        SettlementService::new(&self.store, self.clock.as_ref(), &self.config)
    }

    pub fn payouts(&self) -> PayoutService<'_> {
        PayoutService::new(
            &self.store,
            self.clock.as_ref(),
            &self.config,
            self.transfer.as_ref(),
        )
    }

    pub fn jobs(&self) -> BackgroundJobs<'_> {
        let jobs = BackgroundJobs::new(
            &self.store,
            self.clock.as_ref(),
            &self.config,
            &self.settings,
            self.transfer.as_ref(),
        );
        if self.automatic_payouts {
            jobs
        } else {
            jobs.without_automatic_payouts()
        }
    }

    pub fn run_job(&self, kind: JobKind) -> JobSummary {
        self.jobs().run(kind)
    }

    /// Run a job and roll back everything it wrote. The summary reports what
    /// the run would have done; the ledger is left as it was.
    pub fn dry_run_job(&self, kind: JobKind) -> PayoutResult<JobSummary> {
        let summary = self.store.rolled_back(|| Ok(self.run_job(kind)))?;
        log::info!("dry run of {kind:?} rolled back");
        Ok(summary)
    }

    /// Audit history for one transaction, payout, or store.
    pub fn events_for_entity(&self, entity_id: &str) -> PayoutResult<Vec<EventLogEntry>> {
        self.store.events_for_entity(entity_id)
    }
}
