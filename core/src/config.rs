//! Engine configuration: holding windows, payout cadence, health thresholds.
//!
//! Loaded from a JSON file by the runner. Every field has a default, so a
//! partial file only overrides what it names. In tests, use
//! `EngineConfig::default()`.

use crate::{
    error::{PayoutError, PayoutResult},
    types::Timestamp,
};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Days a completed transaction's net amount stays pending.
    pub holding_period_days: i64,
    /// Days between automatic payouts for one store.
    pub payout_interval_days: i64,
    /// Completed payout requests older than this are archived.
    pub archive_after_months: u32,
    /// A transaction still pending after this long is reported as stuck.
    pub stuck_transaction_minutes: i64,
    /// Window for the failed-payout health check.
    pub failed_payout_lookback_hours: i64,
    /// Available balance above which a store without recent payouts is flagged.
    pub idle_balance_threshold: Decimal,
    /// "Recent" for the idle-balance health check.
    pub idle_payout_days: i64,
    /// Description attached to every external transfer.
    pub payout_description: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            holding_period_days: 14,
            payout_interval_days: 7,
            archive_after_months: 6,
            stuck_transaction_minutes: 60,
            failed_payout_lookback_hours: 24,
            idle_balance_threshold: Decimal::from(1000),
            idle_payout_days: 7,
            payout_description: "Marketplace payout".into(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.payout_interval_days <= 0 {
            anyhow::bail!("payout_interval_days must be positive");
        }
        if self.idle_balance_threshold < Decimal::ZERO {
            anyhow::bail!("idle_balance_threshold must not be negative");
        }
        self.holding_period()?;
        self.payout_interval()?;
        self.stuck_threshold()?;
        self.failed_payout_lookback()?;
        self.idle_payout_window()?;
        Ok(())
    }

    // ── Windows as durations ───────────────────────────────────

    pub fn holding_period(&self) -> PayoutResult<Duration> {
        span("holding_period_days", self.holding_period_days, Duration::try_days)
    }

    pub fn payout_interval(&self) -> PayoutResult<Duration> {
        span("payout_interval_days", self.payout_interval_days, Duration::try_days)
    }

    pub fn stuck_threshold(&self) -> PayoutResult<Duration> {
        span("stuck_transaction_minutes", self.stuck_transaction_minutes, Duration::try_minutes)
    }

    pub fn failed_payout_lookback(&self) -> PayoutResult<Duration> {
        span("failed_payout_lookback_hours", self.failed_payout_lookback_hours, Duration::try_hours)
    }

    pub fn idle_payout_window(&self) -> PayoutResult<Duration> {
        span("idle_payout_days", self.idle_payout_days, Duration::try_days)
    }
}

fn span(
    field: &'static str,
    value: i64,
    to_duration: fn(i64) -> Option<Duration>,
) -> PayoutResult<Duration> {
    if value < 0 {
        return Err(PayoutError::InvalidConfig(format!(
            "{field} must not be negative, got {value}"
        )));
    }
    to_duration(value)
        .ok_or_else(|| PayoutError::InvalidConfig(format!("{field} = {value} is out of range")))
}

/// `now - window`, or an error when the result falls outside the calendar.
pub fn window_start(now: Timestamp, window: Duration) -> PayoutResult<Timestamp> {
    now.checked_sub_signed(window)
        .ok_or_else(|| PayoutError::InvalidConfig(format!("window of {window} reaches before {now}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "holding_period_days": 7, "idle_balance_threshold": "250.00" }"#)
                .unwrap();
        assert_eq!(config.holding_period_days, 7);
        assert_eq!(config.idle_balance_threshold, Decimal::new(25000, 2));
        assert_eq!(config.payout_interval_days, 7);
        assert_eq!(config.archive_after_months, 6);
    }

    #[test]
    fn windows_outside_the_calendar_are_rejected() {
        let config = EngineConfig {
            stuck_transaction_minutes: i64::MAX,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(matches!(config.stuck_threshold(), Err(PayoutError::InvalidConfig(_))));

        let config = EngineConfig {
            idle_payout_days: -1,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn load_rejects_huge_holding_period() {
        let path = std::env::temp_dir().join(format!("payout-config-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{ "holding_period_days": 9223372036854775807 }"#).unwrap();
        let result = EngineConfig::load(path.to_str().unwrap());
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn load_rejects_bad_interval() {
        let dir = std::env::temp_dir().join(format!("payout-config-{}", uuid::Uuid::new_v4()));
        std::fs::write(&dir, r#"{ "payout_interval_days": 0 }"#).unwrap();
        let result = EngineConfig::load(dir.to_str().unwrap());
        std::fs::remove_file(&dir).ok();
        assert!(result.is_err());
    }
}
