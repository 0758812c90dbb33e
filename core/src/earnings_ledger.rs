//! Earnings ledger. One balance record per store.
//!
//! Pools:
//!   pending    net amounts still inside the holding window
//!   available  matured funds a store may withdraw
//!   lifetime   every net amount ever credited (never decreases)
//!
//! All mutations go through `LedgerStore::update_store_earnings`, which
//! is version-checked, and run inside a write transaction.

use crate::{
    clock::Clock,
    error::{PayoutError, PayoutResult},
    store::LedgerStore,
    types::{ParseEnumError, StoreId, Timestamp},
};
use chrono::{Datelike, NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutSchedule {
    Manual,
    Automatic,
}

impl PayoutSchedule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual    => "manual",
            Self::Automatic => "automatic",
        }
    }
}

impl FromStr for PayoutSchedule {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual"    => Ok(Self::Manual),
            "automatic" => Ok(Self::Automatic),
            other => Err(ParseEnumError::new("payout schedule", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEarnings {
    pub store_id: StoreId,
    pub total_sales: Decimal,
    pub platform_fee_accrued: Decimal,
    pub net_earnings: Decimal,
    pub pending_balance: Decimal,
    pub available_balance: Decimal,
    pub lifetime_earnings: Decimal,
    pub current_month_sales: Decimal,
    pub payout_schedule: PayoutSchedule,
    pub last_payout_date: Option<Timestamp>,
    pub next_payout_date: Option<Timestamp>,
    /// Optimistic-concurrency token, bumped on every write.
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl StoreEarnings {
    /// A fresh record seeded from a store's first transaction.
    /// `month_sales` is the store's completed gross since the month began,
    /// which excludes a first transaction created in an earlier month.
    pub fn seeded(
        store_id: &str,
        gross: Decimal,
        platform_fee: Decimal,
        month_sales: Decimal,
        now: Timestamp,
    ) -> Self {
        let net = gross - platform_fee;
        Self {
            store_id: store_id.to_string(),
            total_sales: gross,
            platform_fee_accrued: platform_fee,
            net_earnings: net,
            pending_balance: net,
            available_balance: Decimal::ZERO,
            lifetime_earnings: net,
            current_month_sales: month_sales,
            payout_schedule: PayoutSchedule::Manual,
            last_payout_date: None,
            next_payout_date: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Funds not yet withdrawn.
    pub fn unwithdrawn(&self) -> Decimal {
        self.pending_balance + self.available_balance
    }
}

/// First instant of the calendar month containing `now`.
pub fn month_start(now: Timestamp) -> Timestamp {
    let date = now.date_naive();
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
        .unwrap_or(date)
        .and_time(NaiveTime::MIN)
        .and_utc()
}

pub struct EarningsLedger<'a> {
    store: &'a LedgerStore,
    clock: &'a dyn Clock,
}

impl<'a> EarningsLedger<'a> {
    pub fn new(store: &'a LedgerStore, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    /// Credit one completed transaction to its store. Creates the record on
    /// the store's first transaction. Failures propagate.
    pub fn record_transaction(
        &self,
        store_id: &str,
        gross_amount: Decimal,
        platform_fee: Decimal,
    ) -> PayoutResult<StoreEarnings> {
        if gross_amount < Decimal::ZERO || platform_fee < Decimal::ZERO || platform_fee > gross_amount {
            return Err(PayoutError::InvalidAmount {
                amount: gross_amount,
                reason: "fee must lie between zero and the gross amount",
            });
        }
        let now = self.clock.now();
        let net_amount = gross_amount - platform_fee;

        self.store.write_transaction(|| {
            let Some(mut earnings) = self.store.get_store_earnings(store_id)? else {
                let month_sales =
                    self.store.sum_completed_sales_since(store_id, month_start(now))?;
                let earnings =
                    StoreEarnings::seeded(store_id, gross_amount, platform_fee, month_sales, now);
                self.store.insert_store_earnings(&earnings)?;
                log::debug!("earnings record created for store {store_id}");
                return Ok(earnings);
            };

            earnings.total_sales += gross_amount;
            earnings.platform_fee_accrued += platform_fee;
            earnings.net_earnings += net_amount;
            earnings.pending_balance += net_amount;
            earnings.lifetime_earnings += net_amount;
            earnings.current_month_sales = self
                .store
                .sum_completed_sales_since(store_id, month_start(now))?;
            earnings.updated_at = now;
            self.store.update_store_earnings(&earnings)
        })
    }

    /// Completed gross sales since the start of the current month.
    /// Returns zero on any failure: this feeds rate calculation, which must
    /// not block order processing.
    pub fn get_current_month_sales(&self, store_id: &str) -> Decimal {
        let since = month_start(self.clock.now());
        self.store
            .sum_completed_sales_since(store_id, since)
            .unwrap_or_else(|e| {
                log::warn!("month sales for store {store_id} unavailable: {e}");
                Decimal::ZERO
            })
    }

    /// Recompute and persist `current_month_sales`. Used by the weekly job.
    pub fn refresh_current_month_sales(&self, store_id: &str) -> PayoutResult<Decimal> {
        let now = self.clock.now();
        self.store.write_transaction(|| {
            let mut earnings = self.store.get_store_earnings(store_id)?.ok_or_else(|| {
                PayoutError::StoreNotFound {
                    store_id: store_id.to_string(),
                }
            })?;
            earnings.current_month_sales =
                self.store.sum_completed_sales_since(store_id, month_start(now))?;
            earnings.updated_at = now;
            let earnings = self.store.update_store_earnings(&earnings)?;
            Ok(earnings.current_month_sales)
        })
    }

    pub fn store_earnings(&self, store_id: &str) -> PayoutResult<Option<StoreEarnings>> {
        self.store.get_store_earnings(store_id)
    }
}
