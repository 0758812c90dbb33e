//! Shared primitive types used across the entire ledger.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A marketplace store (seller). Opaque, assigned by the catalog.
pub type StoreId = String;

/// A product category. Opaque, assigned by the catalog.
pub type CategoryId = String;

/// A stable, unique identifier for any ledger entity
/// (transaction, payout request, external account).
pub type EntityId = String;

/// Every timestamp in the ledger is UTC.
pub type Timestamp = DateTime<Utc>;

/// Returned when a persisted enum column holds an unknown value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} value '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Fresh entity id with a readable prefix, e.g. `payout-7f0c…`.
pub fn new_entity_id(prefix: &str) -> EntityId {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}
