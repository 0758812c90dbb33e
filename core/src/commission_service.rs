//! Commission calculator and the order-completion entry point.
//!
//! Rate resolution: store override > category override > global rate,
//! minus the best volume tier the store's trailing month sales reach,
//! floored at zero. The fee is rounded once; the net amount is whatever
//! remains, so `platform_fee + net_amount == gross_amount` exactly.

use crate::{
    clock::Clock,
    earnings_ledger::EarningsLedger,
    error::{PayoutError, PayoutResult},
    event::LedgerEvent,
    money,
    settings_resolver::{CommissionSettings, SettingsResolver},
    store::LedgerStore,
    types::{new_entity_id, CategoryId, EntityId, ParseEnumError, StoreId, Timestamp},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending   => "pending",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"   => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            other => Err(ParseEnumError::new("transaction status", other)),
        }
    }
}

/// One commission event. Amounts never change after insert; only `status`
/// (pending → completed) and `settled_at` (set once) move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionTransaction {
    pub transaction_id: EntityId,
    pub order_id: EntityId,
    pub store_id: StoreId,
    pub category_id: Option<CategoryId>,
    pub gross_amount: Decimal,
    pub commission_rate: Decimal,
    pub platform_fee: Decimal,
    pub net_amount: Decimal,
    pub status: TransactionStatus,
    pub created_at: Timestamp,
    pub settled_at: Option<Timestamp>,
}

/// What the order flow hands over when an order completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedOrder {
    pub order_id: EntityId,
    pub store_id: StoreId,
    pub category_id: Option<CategoryId>,
    pub gross_amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionBreakdown {
    /// Effective rate in percent, after overrides and volume discount.
    pub rate: Decimal,
    pub platform_fee: Decimal,
    pub net_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionReport {
    pub from: Timestamp,
    pub to: Timestamp,
    pub transaction_count: usize,
    pub gross_amount: Decimal,
    pub platform_fees: Decimal,
    pub net_amount: Decimal,
}

/// The rate a store pays before volume discounts.
pub fn base_rate(
    settings: &CommissionSettings,
    store_id: &str,
    category_id: Option<&str>,
) -> Decimal {
    if let Some(rate) = settings.store_rates.get(store_id) {
        return *rate;
    }
    category_id
        .and_then(|c| settings.category_rates.get(c))
        .copied()
        .unwrap_or(settings.global_rate)
}

/// Discount of the highest tier whose threshold the sales reach, if any.
pub fn volume_discount(settings: &CommissionSettings, trailing_month_sales: Decimal) -> Decimal {
    settings
        .volume_discounts
        .iter()
        .filter(|tier| tier.threshold_amount <= trailing_month_sales)
        .max_by(|a, b| a.threshold_amount.cmp(&b.threshold_amount))
        .map(|tier| tier.discount_rate)
        .unwrap_or(Decimal::ZERO)
}

/// Pure calculation. Only rejects negative amounts.
pub fn calculate_commission(
    settings: &CommissionSettings,
    amount: Decimal,
    store_id: &str,
    category_id: Option<&str>,
    trailing_month_sales: Option<Decimal>,
) -> PayoutResult<CommissionBreakdown> {
    if amount < Decimal::ZERO {
        return Err(PayoutError::InvalidAmount {
            amount,
            reason: "commission base must not be negative",
        });
    }
    let base = base_rate(settings, store_id, category_id);
    let discount = volume_discount(settings, trailing_month_sales.unwrap_or(Decimal::ZERO));
    let rate = (base - discount).max(Decimal::ZERO);
    let platform_fee = money::percent_of(amount, rate);
    Ok(CommissionBreakdown {
        rate,
        platform_fee,
        net_amount: amount - platform_fee,
    })
}

pub struct CommissionService<'a> {
    store: &'a LedgerStore,
    settings: &'a SettingsResolver,
    clock: &'a dyn Clock,
}

impl<'a> CommissionService<'a> {
    pub fn new(store: &'a LedgerStore, settings: &'a SettingsResolver, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            settings,
            clock,
        }
    }

    fn ledger(&self) -> EarningsLedger<'a> {
        EarningsLedger::new(self.store, self.clock)
    }

    /// Calculate against the current settings. No side effects beyond the settings read.
    pub fn calculate(
        &self,
        amount: Decimal,
        store_id: &str,
        category_id: Option<&str>,
        trailing_month_sales: Option<Decimal>,
    ) -> PayoutResult<CommissionBreakdown> {
        let settings = self.settings.get_settings(self.store);
        calculate_commission(&settings, amount, store_id, category_id, trailing_month_sales)
    }

    /// Record the commission for a completed order and credit the store's
    /// pending balance. Idempotent per `order_id`. Errors propagate: the
    /// order flow must retry rather than lose a commission record.
    pub fn record_order_commission(
        &self,
        order: &CompletedOrder,
    ) -> PayoutResult<CommissionTransaction> {
        if let Some(existing) = self.store.get_commission_transaction_by_order(&order.order_id)? {
            return match existing.status {
                TransactionStatus::Completed => {
                    log::debug!("order {} already recorded as {}", order.order_id, existing.transaction_id);
                    Ok(existing)
                }
                TransactionStatus::Pending => self.complete_pending_transaction(&existing.transaction_id),
            };
        }

        if order.gross_amount < Decimal::ZERO || money::round2(order.gross_amount) != order.gross_amount {
            return Err(PayoutError::InvalidAmount {
                amount: order.gross_amount,
                reason: "order total must be non-negative with at most two decimal places",
            });
        }

        let trailing = self.ledger().get_current_month_sales(&order.store_id);
        let breakdown = self.calculate(
            order.gross_amount,
            &order.store_id,
            order.category_id.as_deref(),
            Some(trailing),
        )?;

        let txn = CommissionTransaction {
            transaction_id: new_entity_id("ctx"),
            order_id: order.order_id.clone(),
            store_id: order.store_id.clone(),
            category_id: order.category_id.clone(),
            gross_amount: order.gross_amount,
            commission_rate: breakdown.rate,
            platform_fee: breakdown.platform_fee,
            net_amount: breakdown.net_amount,
            status: TransactionStatus::Pending,
            created_at: self.clock.now(),
            settled_at: None,
        };
        self.store.insert_commission_transaction(&txn)?;

        self.complete_pending_transaction(&txn.transaction_id)
    }

    /// Move a pending transaction to completed and apply it to the ledger,
    /// in one write transaction. Also the retry path for stuck transactions.
    pub fn complete_pending_transaction(
        &self,
        transaction_id: &str,
    ) -> PayoutResult<CommissionTransaction> {
        let result = self.store.write_transaction(|| {
            let txn = self
                .store
                .get_commission_transaction(transaction_id)?
                .ok_or_else(|| PayoutError::TransactionNotFound {
                    transaction_id: transaction_id.to_string(),
                })?;
            if txn.status == TransactionStatus::Completed {
                return Ok(txn);
            }
            if !self.store.mark_transaction_completed(transaction_id)? {
                return Err(PayoutError::InvalidTransition {
                    id: transaction_id.to_string(),
                    from: txn.status.as_str(),
                    to: TransactionStatus::Completed.as_str(),
                });
            }
            self.ledger()
                .record_transaction(&txn.store_id, txn.gross_amount, txn.platform_fee)?;
            self.store.append_event(
                &LedgerEvent::CommissionRecorded {
                    transaction_id: txn.transaction_id.clone(),
                    order_id: txn.order_id.clone(),
                    store_id: txn.store_id.clone(),
                    gross_amount: txn.gross_amount,
                    commission_rate: txn.commission_rate,
                    platform_fee: txn.platform_fee,
                    net_amount: txn.net_amount,
                },
                self.clock.now(),
            )?;
            Ok(CommissionTransaction {
                status: TransactionStatus::Completed,
                ..txn
            })
        });

        match &result {
            Ok(txn) => log::info!(
                "commission recorded: txn={} store={} gross={} fee={} rate={}%",
                txn.transaction_id,
                txn.store_id,
                txn.gross_amount,
                txn.platform_fee,
                txn.commission_rate
            ),
            Err(e) => log::error!("commission for {transaction_id} not recorded: {e}"),
        }
        result
    }

    /// Replace the commission settings and drop the resolver cache.
    pub fn update_settings(&self, settings: CommissionSettings) -> PayoutResult<CommissionSettings> {
        let settings = settings.validated()?;
        let now = self.clock.now();
        self.store.write_transaction(|| {
            self.store.save_commission_settings(&settings, now)?;
            self.store.append_event(
                &LedgerEvent::SettingsUpdated {
                    global_rate: settings.global_rate,
                    category_overrides: settings.category_rates.len(),
                    store_overrides: settings.store_rates.len(),
                    volume_tiers: settings.volume_discounts.len(),
                },
                now,
            )
        })?;
        self.settings.invalidate();
        log::info!("commission settings updated: global rate {}%", settings.global_rate);
        Ok(settings)
    }

    /// Totals over completed transactions created in `[from, to)`.
    pub fn commission_report(&self, from: Timestamp, to: Timestamp) -> PayoutResult<CommissionReport> {
        let txns = self.store.completed_transactions_between(from, to)?;
        Ok(CommissionReport {
            from,
            to,
            transaction_count: txns.len(),
            gross_amount: txns.iter().map(|t| t.gross_amount).sum(),
            platform_fees: txns.iter().map(|t| t.platform_fee).sum(),
            net_amount: txns.iter().map(|t| t.net_amount).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings_resolver::VolumeDiscountTier;
    use rust_decimal_macros::dec;

    fn tiered(store_rate: Option<Decimal>) -> CommissionSettings {
        let mut settings = CommissionSettings::flat(dec!(10));
        settings.category_rates.insert("electronics".into(), dec!(6));
        if let Some(rate) = store_rate {
            settings.store_rates.insert("store-a".into(), rate);
        }
        settings.volume_discounts = vec![
            VolumeDiscountTier { threshold_amount: dec!(10000), discount_rate: dec!(1) },
            VolumeDiscountTier { threshold_amount: dec!(50000), discount_rate: dec!(2) },
        ];
        settings
    }

    #[test]
    fn global_rate_scenario() {
        let settings = CommissionSettings::flat(dec!(10));
        let b = calculate_commission(&settings, dec!(1000.00), "store-a", None, None).unwrap();
        assert_eq!(b.rate, dec!(10));
        assert_eq!(b.platform_fee, dec!(100.00));
        assert_eq!(b.net_amount, dec!(900.00));
    }

    #[test]
    fn store_override_with_volume_discount_scenario() {
        let mut settings = CommissionSettings::flat(dec!(10));
        settings.store_rates.insert("store-a".into(), dec!(8));
        settings.volume_discounts = vec![VolumeDiscountTier {
            threshold_amount: dec!(10000),
            discount_rate: dec!(1),
        }];
        let b = calculate_commission(&settings, dec!(5000.00), "store-a", None, Some(dec!(12000)))
            .unwrap();
        assert_eq!(b.rate, dec!(7));
        assert_eq!(b.platform_fee, dec!(350.00));
        assert_eq!(b.net_amount, dec!(4650.00));
    }

    #[test]
    fn resolution_order_store_then_category_then_global() {
        let settings = tiered(Some(dec!(4)));
        assert_eq!(base_rate(&settings, "store-a", Some("electronics")), dec!(4));
        assert_eq!(base_rate(&settings, "store-b", Some("electronics")), dec!(6));
        assert_eq!(base_rate(&settings, "store-b", Some("books")), dec!(10));
        assert_eq!(base_rate(&settings, "store-b", None), dec!(10));
    }

    #[test]
    fn highest_reached_tier_wins() {
        let settings = tiered(None);
        assert_eq!(volume_discount(&settings, dec!(9999.99)), dec!(0));
        assert_eq!(volume_discount(&settings, dec!(10000)), dec!(1));
        assert_eq!(volume_discount(&settings, dec!(75000)), dec!(2));
    }

    #[test]
    fn discount_never_pushes_rate_negative() {
        let settings = tiered(Some(dec!(1.5)));
        let b = calculate_commission(&settings, dec!(200), "store-a", None, Some(dec!(60000))).unwrap();
        assert_eq!(b.rate, dec!(0));
        assert_eq!(b.platform_fee, dec!(0));
        assert_eq!(b.net_amount, dec!(200));
    }

    #[test]
    fn fee_and_net_reconcile_across_awkward_amounts() {
        let settings = tiered(Some(dec!(7.25)));
        for cents in [1i64, 7, 99, 1_001, 33_333, 123_457, 9_999_999] {
            let amount = Decimal::new(cents, 2);
            for sales in [None, Some(dec!(15000)), Some(dec!(80000))] {
                let b = calculate_commission(&settings, amount, "store-a", None, sales).unwrap();
                assert_eq!(b.platform_fee + b.net_amount, amount);
                assert!(b.rate >= dec!(0) && b.rate <= dec!(7.25));
                assert_eq!(b.platform_fee, money::round2(b.platform_fee));
            }
        }
    }

    #[test]
    fn negative_amount_rejected() {
        let settings = CommissionSettings::flat(dec!(10));
        assert!(matches!(
            calculate_commission(&settings, dec!(-1), "store-a", None, None),
            Err(PayoutError::InvalidAmount { .. })
        ));
    }
}
