//! Inventory valuation (weighted-average cost).
//!
//! Values are carried at full decimal precision; rounding to money scale
//! happens only when the product row is persisted.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_core::{DomainError, ProductId, ValueObject, money::ensure_non_negative};

use crate::movement::ProductStock;

/// `(prev_stock * prev_avg + qty * unit_cost) / (prev_stock + qty)`.
///
/// When the combined quantity is zero the unit cost is the average.
pub fn weighted_average_cost(
    previous_stock: i64,
    previous_average: Decimal,
    quantity: i64,
    unit_cost: Decimal,
) -> Decimal {
    let total_units = previous_stock + quantity;
    if total_units == 0 {
        return unit_cost;
    }
    (Decimal::from(previous_stock) * previous_average + Decimal::from(quantity) * unit_cost)
        / Decimal::from(total_units)
}

/// Result of valuing one receipt line against a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptValuation {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub previous_stock: i64,
    pub previous_average_cost: Decimal,
    pub new_stock: i64,
    pub new_average_cost: Decimal,
    pub last_cost: Decimal,
}

impl ValueObject for ReceiptValuation {}

/// Value a receipt of `quantity` units at `unit_cost`.
pub fn value_receipt(
    product: &ProductStock,
    quantity: i64,
    unit_cost: Decimal,
) -> Result<ReceiptValuation, DomainError> {
    if quantity <= 0 {
        return Err(DomainError::validation("received quantity must be positive"));
    }
    ensure_non_negative(unit_cost, "unit cost")?;

    let new_stock = product
        .stock
        .checked_add(quantity)
        .ok_or_else(|| DomainError::validation("stock quantity overflow"))?;

    Ok(ReceiptValuation {
        product_id: product.product_id,
        quantity,
        unit_cost,
        previous_stock: product.stock,
        previous_average_cost: product.average_cost,
        new_stock,
        new_average_cost: weighted_average_cost(
            product.stock,
            product.average_cost,
            quantity,
            unit_cost,
        ),
        last_cost: unit_cost,
    })
}

impl ProductStock {
    /// Take the valuation's cost figures.
    ///
    /// Stock itself moves through the matching PURCHASE movement, applied in
    /// the same transaction.
    pub fn apply_valuation(&mut self, valuation: &ReceiptValuation) -> Result<(), DomainError> {
        if valuation.product_id != self.product_id {
            return Err(DomainError::invariant("valuation belongs to another product"));
        }
        self.average_cost = valuation.new_average_cost;
        self.last_cost = Some(valuation.last_cost);
        Ok(())
    }
}
