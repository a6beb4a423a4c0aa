//! Transactional ledger store boundary.
//!
//! One [`LedgerTx`] is one unit of work: every product, movement, cash-flow and
//! purchase-order write made through it commits together or not at all.
//! Dropping a transaction without committing rolls it back.
//!
//! Monetary columns are rounded to money scale here, at persistence, and
//! nowhere earlier.

pub mod in_memory;
pub mod postgres;
pub mod query;

use async_trait::async_trait;
use thiserror::Error;

use stockbook_accounting::{CashFlowCategory, CashFlowEntry, CashFlowPeriod};
use stockbook_core::{
    CashFlowEntryId, ExpectedVersion, ProductId, PurchaseOrderId, ReceiptId, Reference,
    round_money,
};
use stockbook_inventory::{MovementKind, ProductStock, StockMovement};
use stockbook_purchasing::PurchaseOrderSnapshot;

pub use in_memory::{FailPoint, InMemoryStore};
pub use postgres::PostgresStore;
pub use query::{MovementPage, Pagination};

/// Store operation error.
///
/// These are infrastructure failures as opposed to domain errors; callers
/// receive them wrapped in `ReconciliationError::Store`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("lock or statement timeout: {0}")]
    LockTimeout(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("failed to decode row: {0}")]
    Decode(String),

    #[error("database error: {0}")]
    Database(String),

    /// Fault injected by the in-memory store.
    #[error("injected failure: {0}")]
    Injected(String),
}

impl StoreError {
    /// Worth retrying the whole unit of work.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout(_) | StoreError::Concurrency(_) | StoreError::Connection(_)
        )
    }
}

/// Factory for units of work.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError>;
}

/// One open transaction.
///
/// `lock_*` methods take row locks held until commit/rollback; plain reads do
/// not lock.
#[async_trait]
pub trait LedgerTx: Send {
    // products
    async fn insert_product(&mut self, product: &ProductStock) -> Result<(), StoreError>;

    async fn get_product(&mut self, id: ProductId) -> Result<Option<ProductStock>, StoreError>;

    /// Lock the given products in ascending id order. Missing ids are absent
    /// from the result.
    async fn lock_products(&mut self, ids: &[ProductId]) -> Result<Vec<ProductStock>, StoreError>;

    async fn update_product(&mut self, product: &ProductStock) -> Result<(), StoreError>;

    async fn product_ids(&mut self) -> Result<Vec<ProductId>, StoreError>;

    // stock ledger
    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError>;

    /// Every movement of a product, oldest first.
    async fn product_movements(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<StockMovement>, StoreError>;

    /// One page of a product's movements, newest first.
    async fn movement_page(
        &mut self,
        product_id: ProductId,
        page: Pagination,
    ) -> Result<MovementPage, StoreError>;

    /// Movements of `kind` pointing at `reference`, oldest first.
    async fn movements_by_reference(
        &mut self,
        reference: Reference,
        kind: MovementKind,
    ) -> Result<Vec<StockMovement>, StoreError>;

    // cash-flow ledger
    /// Insert `entry`, or return the entry already holding its one-shot
    /// `(reference, category)` key.
    async fn insert_cash_flow(&mut self, entry: &CashFlowEntry) -> Result<CashFlowEntry, StoreError>;

    async fn find_cash_flow(
        &mut self,
        reference: Reference,
        category: CashFlowCategory,
    ) -> Result<Option<CashFlowEntry>, StoreError>;

    async fn delete_cash_flow(&mut self, id: CashFlowEntryId) -> Result<bool, StoreError>;

    /// Entries whose value date falls in `period`, oldest first.
    async fn cash_flow_in_period(
        &mut self,
        period: CashFlowPeriod,
    ) -> Result<Vec<CashFlowEntry>, StoreError>;

    // purchase orders
    async fn insert_purchase_order(&mut self, po: &PurchaseOrderSnapshot) -> Result<(), StoreError>;

    async fn get_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrderSnapshot>, StoreError>;

    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrderSnapshot>, StoreError>;

    /// Write `po`, requiring the stored row to be at `expected` version.
    async fn update_purchase_order(
        &mut self,
        po: &PurchaseOrderSnapshot,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;

    /// Claim a receipt token. Returns the purchase order that already holds
    /// it, or `None` if the claim succeeded.
    async fn claim_receipt(
        &mut self,
        receipt_id: ReceiptId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrderId>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Persisted form of a product row.
pub(crate) fn persisted_product(product: &ProductStock) -> ProductStock {
    ProductStock {
        average_cost: round_money(product.average_cost),
        last_cost: product.last_cost.map(round_money),
        base_price: round_money(product.base_price),
        ..product.clone()
    }
}

pub(crate) fn persisted_movement(movement: &StockMovement) -> StockMovement {
    StockMovement {
        unit_cost: movement.unit_cost.map(round_money),
        unit_price: movement.unit_price.map(round_money),
        total_value: movement.total_value.map(round_money),
        ..movement.clone()
    }
}

pub(crate) fn persisted_purchase_order(po: &PurchaseOrderSnapshot) -> PurchaseOrderSnapshot {
    let mut po = po.clone();
    po.subtotal = round_money(po.subtotal);
    po.tax = round_money(po.tax);
    po.total = round_money(po.total);
    for item in &mut po.items {
        item.unit_price = round_money(item.unit_price);
    }
    po
}
