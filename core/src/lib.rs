//! Marketplace commission and payout engine.
//!
//! Computes per-order platform fees, keeps each store's pending/available
//! balances, matures funds after a holding window, and pays stores out
//! through an external payment processor. Scheduled work is exposed as
//! four job entry points in [`jobs`].

pub mod clock;
pub mod commission_service;
pub mod config;
pub mod earnings_ledger;
pub mod engine;
pub mod error;
pub mod event;
pub mod jobs;
pub mod money;
pub mod payment_transfer;
pub mod payout_service;
pub mod settings_resolver;
pub mod settlement_service;
pub mod store;
pub mod types;
