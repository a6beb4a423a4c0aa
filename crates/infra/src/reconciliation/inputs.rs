//! Plain-data inputs and outcomes of the coordinator.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_accounting::{CashFlowEntry, CashFlowSummary};
use stockbook_core::{AdjustmentId, OrderId, ProductId, PurchaseOrderId, SupplierId};
use stockbook_inventory::{ReceiptValuation, StockAlert, StockMovement};
use stockbook_purchasing::{NewLine, PurchaseOrderSnapshot};

/// Seed row for a product entering the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub product_id: ProductId,
    pub opening_stock: i64,
    pub opening_cost: Decimal,
    pub base_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Decimal,
}

/// A confirmed sales order, already resolved by the order system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleOrder {
    pub order_id: OrderId,
    pub lines: Vec<SaleLine>,
    pub total: Decimal,
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryAdjustment {
    pub product_id: ProductId,
    /// Signed correction; negative is a loss.
    pub delta: i64,
    pub reason: String,
    pub adjustment_id: Option<AdjustmentId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub order_number: String,
    pub supplier_id: SupplierId,
    pub lines: Vec<NewLine>,
    pub tax: Decimal,
    pub expected_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementOutcome {
    pub movement: StockMovement,
    pub alert: Option<StockAlert>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleOutcome {
    pub movements: Vec<StockMovement>,
    pub income: Option<CashFlowEntry>,
    pub alerts: Vec<StockAlert>,
    /// The order had already been applied; nothing was written.
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleCancellation {
    pub movements: Vec<StockMovement>,
    pub reversed_income: Option<CashFlowEntry>,
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentOutcome {
    pub movement: StockMovement,
    pub shrinkage: Option<CashFlowEntry>,
    pub alert: Option<StockAlert>,
    /// The adjustment id had already been applied; `movement` is the
    /// original one.
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptOutcome {
    pub purchase_order: PurchaseOrderSnapshot,
    pub valuations: Vec<ReceiptValuation>,
    pub movements: Vec<StockMovement>,
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOutcome {
    pub purchase_order: PurchaseOrderSnapshot,
    /// `None` for a zero-total order.
    pub expense: Option<CashFlowEntry>,
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashFlowReport {
    pub entries: Vec<CashFlowEntry>,
    pub summary: CashFlowSummary,
}
