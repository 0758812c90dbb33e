//! Currency arithmetic. The ledger works in major units (`Decimal`);
//! minor units exist only at the transfer boundary.

use crate::error::{PayoutError, PayoutResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// The single rounding rule for every monetary amount: 2 dp, half away from zero.
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `amount * rate / 100`, rounded once.
pub fn percent_of(amount: Decimal, rate: Decimal) -> Decimal {
    round2(amount * rate / Decimal::ONE_HUNDRED)
}

/// Convert a major-unit amount into minor units (cents) for the transfer call.
pub fn to_minor_units(amount: Decimal) -> PayoutResult<i64> {
    (round2(amount) * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or(PayoutError::InvalidAmount {
            amount,
            reason: "does not fit in minor units",
        })
}

/// Payout amounts must be positive and carry at most two decimal places.
pub fn validate_payout_amount(amount: Decimal) -> PayoutResult<()> {
    if amount <= Decimal::ZERO {
        return Err(PayoutError::InvalidAmount {
            amount,
            reason: "must be positive",
        });
    }
    if round2(amount) != amount {
        return Err(PayoutError::InvalidAmount {
            amount,
            reason: "more than two decimal places",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round2_is_half_away_from_zero() {
        assert_eq!(round2(dec!(1.005)), dec!(1.01));
        assert_eq!(round2(dec!(1.004)), dec!(1.00));
        assert_eq!(round2(dec!(-1.005)), dec!(-1.01));
    }

    #[test]
    fn percent_of_rounds_after_multiplying() {
        assert_eq!(percent_of(dec!(1000.00), dec!(10)), dec!(100.00));
        assert_eq!(percent_of(dec!(19.99), dec!(7.5)), dec!(1.50));
    }

    #[test]
    fn minor_units_are_cents() {
        assert_eq!(to_minor_units(dec!(250)).unwrap(), 25_000);
        assert_eq!(to_minor_units(dec!(12.345)).unwrap(), 1_235);
    }

    #[test]
    fn payout_amount_validation() {
        assert!(validate_payout_amount(dec!(10.50)).is_ok());
        assert!(matches!(
            validate_payout_amount(dec!(0)),
            Err(PayoutError::InvalidAmount { .. })
        ));
        assert!(matches!(
            validate_payout_amount(dec!(-5)),
            Err(PayoutError::InvalidAmount { .. })
        ));
        assert!(matches!(
            validate_payout_amount(dec!(1.001)),
            Err(PayoutError::InvalidAmount { .. })
        ));
    }
}
