//! Settings resolver: commission rates and volume tiers, cached in memory.
//!
//! One resolver is built at process start and shared by reference. It loads
//! lazily on first read and is invalidated explicitly after any settings
//! write. A missing record or an unreadable store resolves to
//! `CommissionSettings::default()`; the resolver never fails its caller.

use crate::{
    error::{PayoutError, PayoutResult},
    store::LedgerStore,
    types::{CategoryId, StoreId},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Rates are percentages: `10` means 10%.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommissionSettings {
    pub global_rate: Decimal,
    #[serde(default)]
    pub category_rates: HashMap<CategoryId, Decimal>,
    #[serde(default)]
    pub store_rates: HashMap<StoreId, Decimal>,
    /// Sorted by ascending threshold.
    #[serde(default)]
    pub volume_discounts: Vec<VolumeDiscountTier>,
}

/// Stores whose trailing month sales reach `threshold_amount` get
/// `discount_rate` percentage points off their rate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeDiscountTier {
    pub threshold_amount: Decimal,
    pub discount_rate: Decimal,
}

impl Default for CommissionSettings {
    fn default() -> Self {
        Self {
            global_rate: Decimal::from(10),
            category_rates: HashMap::new(),
            store_rates: HashMap::new(),
            volume_discounts: vec![
                VolumeDiscountTier {
                    threshold_amount: Decimal::from(10_000),
                    discount_rate: Decimal::new(5, 1),
                },
                VolumeDiscountTier {
                    threshold_amount: Decimal::from(50_000),
                    discount_rate: Decimal::ONE,
                },
                VolumeDiscountTier {
                    threshold_amount: Decimal::from(100_000),
                    discount_rate: Decimal::new(15, 1),
                },
            ],
        }
    }
}

impl CommissionSettings {
    /// Flat rate, no overrides, no volume discounts.
    pub fn flat(global_rate: Decimal) -> Self {
        Self {
            global_rate,
            category_rates: HashMap::new(),
            store_rates: HashMap::new(),
            volume_discounts: Vec::new(),
        }
    }

    /// Reject out-of-range values and sort the tiers. Called before every write.
    pub fn validated(mut self) -> PayoutResult<Self> {
        check_rate("global_rate", self.global_rate)?;
        for (category, rate) in &self.category_rates {
            check_rate(&format!("category '{category}'"), *rate)?;
        }
        for (store, rate) in &self.store_rates {
            check_rate(&format!("store '{store}'"), *rate)?;
        }
        for tier in &self.volume_discounts {
            if tier.threshold_amount < Decimal::ZERO {
                return Err(PayoutError::InvalidSettings(format!(
                    "volume tier threshold {} is negative",
                    tier.threshold_amount
                )));
            }
            if tier.discount_rate < Decimal::ZERO {
                return Err(PayoutError::InvalidSettings(format!(
                    "volume tier discount {} is negative",
                    tier.discount_rate
                )));
            }
        }
        self.volume_discounts
            .sort_by(|a, b| a.threshold_amount.cmp(&b.threshold_amount));
        Ok(self)
    }
}

fn check_rate(label: &str, rate: Decimal) -> PayoutResult<()> {
    if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
        return Err(PayoutError::InvalidSettings(format!(
            "{label} rate {rate} outside 0..=100"
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct SettingsResolver {
    cached: RwLock<Option<Arc<CommissionSettings>>>,
}

impl SettingsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_settings(&self, store: &LedgerStore) -> Arc<CommissionSettings> {
        if let Some(settings) = self
            .cached
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            return Arc::clone(settings);
        }

        let loaded = match store.load_commission_settings() {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                log::debug!("no commission settings record, using defaults");
                CommissionSettings::default()
            }
            Err(e) => {
                // Not cached: the next read retries the store.
                log::warn!("commission settings unavailable, using defaults: {e}");
                return Arc::new(CommissionSettings::default());
            }
        };

        let loaded = Arc::new(loaded);
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&loaded));
        loaded
    }

    pub fn invalidate(&self) {
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = None;
        log::debug!("commission settings cache invalidated");
    }

    pub fn is_loaded(&self) -> bool {
        self.cached
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn validation_sorts_tiers() {
        let mut settings = CommissionSettings::flat(dec!(12));
        settings.volume_discounts = vec![
            VolumeDiscountTier { threshold_amount: dec!(5000), discount_rate: dec!(2) },
            VolumeDiscountTier { threshold_amount: dec!(1000), discount_rate: dec!(1) },
        ];
        let settings = settings.validated().unwrap();
        assert_eq!(settings.volume_discounts[0].threshold_amount, dec!(1000));
    }

    #[test]
    fn validation_rejects_out_of_range_rates() {
        let mut settings = CommissionSettings::flat(dec!(10));
        settings.store_rates.insert("store-a".into(), dec!(101));
        assert!(matches!(
            settings.validated(),
            Err(PayoutError::InvalidSettings(_))
        ));
        assert!(CommissionSettings::flat(dec!(-1)).validated().is_err());
    }

    #[test]
    fn resolver_caches_until_invalidated() {
        let store = LedgerStore::in_memory().unwrap();
        store.migrate().unwrap();
        let resolver = SettingsResolver::new();

        assert_eq!(resolver.get_settings(&store).global_rate, dec!(10));
        assert!(resolver.is_loaded());

        let now = chrono::Utc::now();
        store
            .save_commission_settings(&CommissionSettings::flat(dec!(7)), now)
            .unwrap();
        assert_eq!(resolver.get_settings(&store).global_rate, dec!(10));

        resolver.invalidate();
        assert_eq!(resolver.get_settings(&store).global_rate, dec!(7));
    }

    #[test]
    fn unreadable_store_falls_back_without_caching() {
        // No migration: the settings table does not exist.
        let store = LedgerStore::in_memory().unwrap();
        let resolver = SettingsResolver::new();

        assert_eq!(*resolver.get_settings(&store), CommissionSettings::default());
        assert!(!resolver.is_loaded());
    }
}
