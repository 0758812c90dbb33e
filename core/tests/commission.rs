//! Commission calculation and order recording.
//!
//! Tests cover: the documented rate scenarios, idempotent order replay,
//! retry of stuck pending transactions, settings updates and cache
//! invalidation, reporting, and the audit trail.

use chrono::{Duration, TimeZone, Utc};
use marketplace_payouts_core::{
    clock::{Clock, ManualClock},
    commission_service::{CommissionTransaction, CompletedOrder, TransactionStatus},
    config::EngineConfig,
    engine::PayoutEngine,
    error::PayoutError,
    earnings_ledger::PayoutSchedule,
    payment_transfer::SandboxTransfer,
    settings_resolver::{CommissionSettings, VolumeDiscountTier},
    store::LedgerStore,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn build() -> (PayoutEngine, ManualClock) {
    let _ = env_logger::builder().is_test(true).try_init();
    let clock = ManualClock::at(Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap());
    let engine = PayoutEngine::build(
        LedgerStore::in_memory().expect("in-memory store"),
        EngineConfig::default(),
        Box::new(clock.clone()),
        Box::new(SandboxTransfer::new()),
    )
    .expect("build test engine");
    (engine, clock)
}

fn order(order_id: &str, store_id: &str, amount: Decimal) -> CompletedOrder {
    CompletedOrder {
        order_id: order_id.into(),
        store_id: store_id.into(),
        category_id: None,
        gross_amount: amount,
    }
}

#[test]
fn global_rate_order_credits_pending_balance() {
    let (engine, _clock) = build();
    engine
        .commission()
        .update_settings(CommissionSettings::flat(dec!(10)))
        .unwrap();

    let txn = engine
        .commission()
        .record_order_commission(&order("ord-1", "store-a", dec!(1000.00)))
        .unwrap();
    assert_eq!(txn.status, TransactionStatus::Completed);
    assert_eq!(txn.commission_rate, dec!(10));
    assert_eq!(txn.platform_fee, dec!(100.00));
    assert_eq!(txn.net_amount, dec!(900.00));
    assert!(txn.settled_at.is_none());

    let earnings = engine.ledger().store_earnings("store-a").unwrap().unwrap();
    assert_eq!(earnings.total_sales, dec!(1000.00));
    assert_eq!(earnings.platform_fee_accrued, dec!(100.00));
    assert_eq!(earnings.net_earnings, dec!(900.00));
    assert_eq!(earnings.pending_balance, dec!(900.00));
    assert_eq!(earnings.available_balance, dec!(0));
    assert_eq!(earnings.lifetime_earnings, dec!(900.00));
    assert_eq!(earnings.current_month_sales, dec!(1000.00));
    assert_eq!(earnings.payout_schedule, PayoutSchedule::Manual);
}

#[test]
fn store_override_and_volume_tier_give_seven_percent() {
    let (engine, _clock) = build();
    let mut settings = CommissionSettings::flat(dec!(10));
    settings.store_rates.insert("store-a".into(), dec!(8));
    settings.volume_discounts = vec![VolumeDiscountTier {
        threshold_amount: dec!(10000),
        discount_rate: dec!(1),
    }];
    engine.commission().update_settings(settings).unwrap();

    // Builds 12,000 of month-to-date sales; charged at the undiscounted 8%.
    let first = engine
        .commission()
        .record_order_commission(&order("ord-big", "store-a", dec!(12000.00)))
        .unwrap();
    assert_eq!(first.commission_rate, dec!(8));

    let txn = engine
        .commission()
        .record_order_commission(&order("ord-2", "store-a", dec!(5000.00)))
        .unwrap();
    assert_eq!(txn.commission_rate, dec!(7));
    assert_eq!(txn.platform_fee, dec!(350.00));
    assert_eq!(txn.net_amount, dec!(4650.00));

    let earnings = engine.ledger().store_earnings("store-a").unwrap().unwrap();
    assert_eq!(earnings.current_month_sales, dec!(17000.00));
    assert_eq!(earnings.pending_balance, dec!(11040.00) + dec!(4650.00));
}

#[test]
fn category_override_applies_without_store_override() {
    let (engine, _clock) = build();
    let mut settings = CommissionSettings::flat(dec!(10));
    settings.category_rates.insert("books".into(), dec!(5));
    engine.commission().update_settings(settings).unwrap();

    let mut book_order = order("ord-book", "store-b", dec!(80.00));
    book_order.category_id = Some("books".into());
    let txn = engine.commission().record_order_commission(&book_order).unwrap();
    assert_eq!(txn.commission_rate, dec!(5));
    assert_eq!(txn.platform_fee, dec!(4.00));
    assert_eq!(txn.category_id.as_deref(), Some("books"));
}

#[test]
fn replaying_an_order_does_not_double_count() {
    let (engine, _clock) = build();
    let first = engine
        .commission()
        .record_order_commission(&order("ord-1", "store-a", dec!(250.00)))
        .unwrap();
    let again = engine
        .commission()
        .record_order_commission(&order("ord-1", "store-a", dec!(250.00)))
        .unwrap();

    assert_eq!(first.transaction_id, again.transaction_id);
    assert_eq!(engine.store.commission_transaction_count().unwrap(), 1);
    let earnings = engine.ledger().store_earnings("store-a").unwrap().unwrap();
    assert_eq!(earnings.total_sales, dec!(250.00));
}

#[test]
fn stuck_pending_transaction_completes_on_retry() {
    let (engine, clock) = build();
    let stuck = CommissionTransaction {
        transaction_id: "ctx-stuck".into(),
        order_id: "ord-stuck".into(),
        store_id: "store-a".into(),
        category_id: None,
        gross_amount: dec!(500.00),
        commission_rate: dec!(10),
        platform_fee: dec!(50.00),
        net_amount: dec!(450.00),
        status: TransactionStatus::Pending,
        created_at: clock.now() - Duration::hours(2),
        settled_at: None,
    };
    engine.store.insert_commission_transaction(&stuck).unwrap();
    assert!(engine.ledger().store_earnings("store-a").unwrap().is_none());

    // The order flow retries with the same order id.
    let txn = engine
        .commission()
        .record_order_commission(&order("ord-stuck", "store-a", dec!(500.00)))
        .unwrap();
    assert_eq!(txn.transaction_id, "ctx-stuck");
    assert_eq!(txn.status, TransactionStatus::Completed);

    let earnings = engine.ledger().store_earnings("store-a").unwrap().unwrap();
    assert_eq!(earnings.pending_balance, dec!(450.00));
}

#[test]
fn unknown_transaction_cannot_be_completed() {
    let (engine, _clock) = build();
    let err = engine
        .commission()
        .complete_pending_transaction("ctx-missing")
        .unwrap_err();
    assert!(matches!(err, PayoutError::TransactionNotFound { .. }));
}

#[test]
fn malformed_order_amounts_are_rejected_before_any_write() {
    let (engine, _clock) = build();
    for amount in [dec!(-1.00), dec!(10.005)] {
        let err = engine
            .commission()
            .record_order_commission(&order("ord-bad", "store-a", amount))
            .unwrap_err();
        assert!(matches!(err, PayoutError::InvalidAmount { .. }));
    }
    assert_eq!(engine.store.commission_transaction_count().unwrap(), 0);
}

#[test]
fn settings_update_invalidates_cached_rates() {
    let (engine, _clock) = build();
    let before = engine
        .commission()
        .calculate(dec!(100.00), "store-a", None, None)
        .unwrap();
    assert_eq!(before.rate, dec!(10), "defaults apply when no record exists");
    assert!(engine.settings().is_loaded());

    engine
        .commission()
        .update_settings(CommissionSettings::flat(dec!(12.5)))
        .unwrap();
    assert!(!engine.settings().is_loaded());

    let after = engine
        .commission()
        .calculate(dec!(100.00), "store-a", None, None)
        .unwrap();
    assert_eq!(after.rate, dec!(12.5));
    assert_eq!(after.platform_fee, dec!(12.50));
}

#[test]
fn invalid_settings_leave_current_rates_in_place() {
    let (engine, _clock) = build();
    engine
        .commission()
        .update_settings(CommissionSettings::flat(dec!(9)))
        .unwrap();

    let mut bad = CommissionSettings::flat(dec!(9));
    bad.volume_discounts.push(VolumeDiscountTier {
        threshold_amount: dec!(100),
        discount_rate: dec!(-2),
    });
    assert!(matches!(
        engine.commission().update_settings(bad),
        Err(PayoutError::InvalidSettings(_))
    ));
    assert_eq!(engine.settings().get_settings(&engine.store).global_rate, dec!(9));
}

#[test]
fn commission_report_sums_a_window() {
    let (engine, clock) = build();
    engine
        .commission()
        .update_settings(CommissionSettings::flat(dec!(10)))
        .unwrap();
    let start = clock.now();

    for (i, amount) in [dec!(100.00), dec!(250.50), dec!(19.99)].into_iter().enumerate() {
        engine
            .commission()
            .record_order_commission(&order(&format!("ord-{i}"), "store-a", amount))
            .unwrap();
        clock.advance(Duration::hours(1));
    }

    let report = engine
        .commission()
        .commission_report(start, start + Duration::days(1))
        .unwrap();
    assert_eq!(report.transaction_count, 3);
    assert_eq!(report.gross_amount, dec!(370.49));
    assert_eq!(report.platform_fees + report.net_amount, report.gross_amount);
    assert_eq!(report.platform_fees, dec!(10.00) + dec!(25.05) + dec!(2.00));
}

#[test]
fn recorded_commission_is_in_the_audit_trail() {
    let (engine, _clock) = build();
    let txn = engine
        .commission()
        .record_order_commission(&order("ord-1", "store-a", dec!(40.00)))
        .unwrap();

    let events = engine.events_for_entity(&txn.transaction_id).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "commission_recorded");
    let decoded = events[0].decode().unwrap();
    assert_eq!(decoded.entity_id(), txn.transaction_id);
}
