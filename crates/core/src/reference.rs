//! Source-event references shared by the stock and cash-flow ledgers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::closed_enum;
use crate::id::{AdjustmentId, OrderId, ProductId, PurchaseOrderId};
use crate::value_object::ValueObject;

/// What kind of business record a ledger row points back to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceKind {
    Order,
    PurchaseOrder,
    InventoryAdjustment,
    Product,
}

closed_enum!(ReferenceKind, "reference kind", {
    ReferenceKind::Order => "ORDER",
    ReferenceKind::PurchaseOrder => "PURCHASE_ORDER",
    ReferenceKind::InventoryAdjustment => "INVENTORY_ADJUSTMENT",
    ReferenceKind::Product => "PRODUCT",
});

impl ReferenceKind {
    /// One-shot sources produce at most one cash-flow entry per category.
    ///
    /// A product is not a one-shot source: it can shrink any number of times.
    pub fn is_one_shot(self) -> bool {
        !matches!(self, ReferenceKind::Product)
    }
}

/// `(kind, id)` pointer from a ledger row to its originating record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub id: Uuid,
}

impl ValueObject for Reference {}

impl Reference {
    pub fn new(kind: ReferenceKind, id: Uuid) -> Self {
        Self { kind, id }
    }

    pub fn order(id: OrderId) -> Self {
        Self::new(ReferenceKind::Order, id.into())
    }

    pub fn purchase_order(id: PurchaseOrderId) -> Self {
        Self::new(ReferenceKind::PurchaseOrder, id.into())
    }

    pub fn adjustment(id: AdjustmentId) -> Self {
        Self::new(ReferenceKind::InventoryAdjustment, id.into())
    }

    pub fn product(id: ProductId) -> Self {
        Self::new(ReferenceKind::Product, id.into())
    }

    pub fn is_one_shot(&self) -> bool {
        self.kind.is_one_shot()
    }
}

impl core::fmt::Display for Reference {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}
