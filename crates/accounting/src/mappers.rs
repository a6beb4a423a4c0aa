//! Business event -> cash-flow entry mappers.
//!
//! Each returns the entry to record, or `None` when the event carries no
//! money (a zero total records nothing).

use rust_decimal::Decimal;

use stockbook_core::{
    AdjustmentId, DomainError, OrderId, ProductId, PurchaseOrderId, Reference,
};

use crate::cash_flow::{CashFlowCategory, CashFlowDirection, NewCashFlowEntry};

pub fn sale_income(
    order_id: OrderId,
    total: Decimal,
    payment_method: Option<&str>,
) -> Option<NewCashFlowEntry> {
    if total <= Decimal::ZERO {
        return None;
    }
    let entry = NewCashFlowEntry::new(
        CashFlowDirection::Income,
        CashFlowCategory::Sales,
        total,
        format!("Sale for order {order_id}"),
    )
    .with_reference(Reference::order(order_id));
    Some(with_method(entry, payment_method))
}

pub fn refund_expense(
    order_id: OrderId,
    amount: Decimal,
    payment_method: Option<&str>,
) -> Option<NewCashFlowEntry> {
    if amount <= Decimal::ZERO {
        return None;
    }
    let entry = NewCashFlowEntry::new(
        CashFlowDirection::Expense,
        CashFlowCategory::Refunds,
        amount,
        format!("Refund for order {order_id}"),
    )
    .with_reference(Reference::order(order_id));
    Some(with_method(entry, payment_method))
}

pub fn purchase_expense(
    purchase_order_id: PurchaseOrderId,
    order_number: &str,
    total: Decimal,
    payment_method: &str,
) -> Option<NewCashFlowEntry> {
    if total <= Decimal::ZERO {
        return None;
    }
    Some(
        NewCashFlowEntry::new(
            CashFlowDirection::Expense,
            CashFlowCategory::Purchases,
            total,
            format!("Payment for purchase order {order_number}"),
        )
        .with_reference(Reference::purchase_order(purchase_order_id))
        .with_payment_method(payment_method),
    )
}

/// Unit cost used to value lost stock: last purchase cost, then the sale
/// price, then zero. A source counts only when present and positive.
pub fn shrinkage_unit_cost(last_cost: Option<Decimal>, base_price: Decimal) -> Decimal {
    last_cost
        .filter(|c| *c > Decimal::ZERO)
        .or(Some(base_price).filter(|p| *p > Decimal::ZERO))
        .unwrap_or(Decimal::ZERO)
}

/// SHRINKAGE expense for `quantity` lost units.
///
/// Keyed on the adjustment when there is one, otherwise on the product (which
/// is never de-duplicated).
pub fn shrinkage_expense(
    product_id: ProductId,
    adjustment_id: Option<AdjustmentId>,
    quantity: i64,
    last_cost: Option<Decimal>,
    base_price: Decimal,
    reason: &str,
) -> Option<NewCashFlowEntry> {
    let amount = Decimal::from(quantity.unsigned_abs()) * shrinkage_unit_cost(last_cost, base_price);
    if amount <= Decimal::ZERO {
        return None;
    }
    let reference = match adjustment_id {
        Some(id) => Reference::adjustment(id),
        None => Reference::product(product_id),
    };
    Some(
        NewCashFlowEntry::new(
            CashFlowDirection::Expense,
            CashFlowCategory::Shrinkage,
            amount,
            format!("Stock loss of {} units of product {product_id}: {reason}", quantity.unsigned_abs()),
        )
        .with_reference(reference),
    )
}

/// Unreferenced operating expense (salaries, rent, ...).
pub fn operating_expense(
    category: CashFlowCategory,
    amount: Decimal,
    description: impl Into<String>,
    payment_method: Option<&str>,
) -> Result<NewCashFlowEntry, DomainError> {
    if !category.is_operating() {
        return Err(DomainError::validation(format!(
            "{category} is not an operating expense category"
        )));
    }
    let entry = NewCashFlowEntry::new(CashFlowDirection::Expense, category, amount, description);
    entry.validate()?;
    Ok(with_method(entry, payment_method))
}

fn with_method(entry: NewCashFlowEntry, method: Option<&str>) -> NewCashFlowEntry {
    match method {
        Some(m) => entry.with_payment_method(m),
        None => entry,
    }
}
