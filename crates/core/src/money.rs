//! Monetary rounding policy.
//!
//! Monetary values travel as [`Decimal`] at full precision through every
//! intermediate computation. They are rounded to [`MONEY_SCALE`] places only
//! when written to storage.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::DomainError;

/// Decimal places kept for persisted monetary values.
pub const MONEY_SCALE: u32 = 2;

/// Round a monetary value for persistence (half away from zero).
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

pub fn ensure_positive(value: Decimal, field: &str) -> Result<(), DomainError> {
    if value <= Decimal::ZERO {
        return Err(DomainError::validation(format!("{field} must be positive")));
    }
    Ok(())
}

pub fn ensure_non_negative(value: Decimal, field: &str) -> Result<(), DomainError> {
    if value < Decimal::ZERO {
        return Err(DomainError::validation(format!(
            "{field} cannot be negative"
        )));
    }
    Ok(())
}
