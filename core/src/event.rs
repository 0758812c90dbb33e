//! The audit trail: every ledger state change, as a typed event.
//!
//! RULE: An event is appended in the same database transaction as the
//! change it describes. Variants are never removed or reordered.

use crate::types::{EntityId, StoreId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    // ── Commission events ──────────────────────────
    CommissionRecorded {
        transaction_id: EntityId,
        order_id: EntityId,
        store_id: StoreId,
        gross_amount: Decimal,
        commission_rate: Decimal,
        platform_fee: Decimal,
        net_amount: Decimal,
    },
    SettingsUpdated {
        global_rate: Decimal,
        category_overrides: usize,
        store_overrides: usize,
        volume_tiers: usize,
    },

    // ── Settlement events ──────────────────────────
    FundsSettled {
        transaction_id: EntityId,
        store_id: StoreId,
        amount: Decimal,
    },

    // ── Payout events ──────────────────────────────
    PayoutRequested {
        payout_id: EntityId,
        store_id: StoreId,
        amount: Decimal,
        automatic: bool,
    },
    PayoutCompleted {
        payout_id: EntityId,
        store_id: StoreId,
        amount: Decimal,
        transfer_id: String,
    },
    PayoutFailed {
        payout_id: EntityId,
        store_id: StoreId,
        amount: Decimal,
        reason: String,
    },
    PayoutAccountLinked {
        store_id: StoreId,
        account_id: EntityId,
    },
    PayoutScheduleChanged {
        store_id: StoreId,
        schedule: String,
    },
    PayoutsArchived {
        count: usize,
        cutoff: Timestamp,
    },
}

impl LedgerEvent {
    /// Stable name for the `event_type` column.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CommissionRecorded { .. }    => "commission_recorded",
            Self::SettingsUpdated { .. }       => "settings_updated",
            Self::FundsSettled { .. }          => "funds_settled",
            Self::PayoutRequested { .. }       => "payout_requested",
            Self::PayoutCompleted { .. }       => "payout_completed",
            Self::PayoutFailed { .. }          => "payout_failed",
            Self::PayoutAccountLinked { .. }   => "payout_account_linked",
            Self::PayoutScheduleChanged { .. } => "payout_schedule_changed",
            Self::PayoutsArchived { .. }       => "payouts_archived",
        }
    }

    /// The entity the event is filed under, for per-entity history queries.
    pub fn entity_id(&self) -> &str {
        match self {
            Self::CommissionRecorded { transaction_id, .. }
            | Self::FundsSettled { transaction_id, .. } => transaction_id,
            Self::PayoutRequested { payout_id, .. }
            | Self::PayoutCompleted { payout_id, .. }
            | Self::PayoutFailed { payout_id, .. } => payout_id,
            Self::PayoutAccountLinked { store_id, .. }
            | Self::PayoutScheduleChanged { store_id, .. } => store_id,
            Self::SettingsUpdated { .. } => "commission_settings",
            Self::PayoutsArchived { .. } => "payout_archive",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub event_type: String,
    pub entity_id: EntityId,
    pub payload: String, // JSON-serialized LedgerEvent
    pub created_at: Timestamp,
}

impl EventLogEntry {
    pub fn decode(&self) -> serde_json::Result<LedgerEvent> {
        serde_json::from_str(&self.payload)
    }
}
