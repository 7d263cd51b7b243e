//! Decimal rounding policy for token and currency amounts.
//!
//! - Conversions and rates: HALF_UP to 2 decimals.
//! - Token amounts: whole units.
//! - Interest owed: CEILING to whole units, so a fractional amount owed is
//!   never rounded down to nothing.

use crate::error::{DepositError, DepositResult};
use rust_decimal::{Decimal, RoundingStrategy};

/// Smallest amount any ledger operation accepts.
pub const MIN_UNIT: Decimal = Decimal::ONE;

pub fn round_half_up_2dp(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_half_up_units(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

pub fn ceil_units(amount: Decimal) -> Decimal {
    amount.ceil()
}

pub fn floor_units(amount: Decimal) -> Decimal {
    amount.floor()
}

/// Validates a ledger amount: rounded HALF_UP to 2 decimals, positive, and at
/// least one whole unit.
pub fn normalize_amount(amount: Decimal) -> DepositResult<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(DepositError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    let rounded = round_half_up_2dp(amount);
    if rounded < MIN_UNIT {
        return Err(DepositError::InvalidAmount(format!(
            "amount {} is below the minimum of {} unit",
            rounded, MIN_UNIT
        )));
    }
    Ok(rounded)
}

/// Rounds to whole units HALF_UP and requires at least one unit.
pub fn normalize_whole_units(amount: Decimal) -> DepositResult<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(DepositError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    let units = round_half_up_units(amount);
    if units < MIN_UNIT {
        return Err(DepositError::InvalidAmount(format!(
            "amount {} rounds to less than one whole unit",
            amount
        )));
    }
    Ok(units)
}

/// Interest owed on `balance` at `rate_percent` for one period, rounded up.
pub fn interest_for_period(balance: Decimal, rate_percent: Decimal) -> Decimal {
    if balance <= Decimal::ZERO || rate_percent <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    ceil_units(balance * rate_percent / Decimal::ONE_HUNDRED)
}
