use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use stockbook_accounting::{CashFlowCategory, CashFlowEntry, CashFlowPeriod};
use stockbook_core::{
    CashFlowEntryId, ExpectedVersion, ProductId, PurchaseOrderId, ReceiptId, Reference,
    round_money,
};
use stockbook_inventory::{MovementKind, ProductStock, StockMovement};
use stockbook_purchasing::PurchaseOrderSnapshot;

use super::query::{MovementPage, Pagination};
use super::{
    LedgerStore, LedgerTx, StoreError, persisted_movement, persisted_product,
    persisted_purchase_order,
};

/// Points at which the in-memory store can be told to fail once.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertMovement,
    InsertCashFlow,
    UpdatePurchaseOrder,
    Commit,
}

#[derive(Debug, Default, Clone)]
struct State {
    products: BTreeMap<ProductId, ProductStock>,
    /// Append order is ledger order.
    movements: Vec<StockMovement>,
    cash_flow: Vec<CashFlowEntry>,
    purchase_orders: HashMap<PurchaseOrderId, PurchaseOrderSnapshot>,
    receipts: HashMap<ReceiptId, PurchaseOrderId>,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. A transaction holds the whole store exclusively
/// and works on a copy that replaces the shared state on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    fail_points: Arc<Mutex<HashSet<FailPoint>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next operation reaching `point` fail.
    pub async fn fail_once(&self, point: FailPoint) {
        self.fail_points.lock().await.insert(point);
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx {
            guard,
            working,
            fail_points: Arc::clone(&self.fail_points),
        }))
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
    fail_points: Arc<Mutex<HashSet<FailPoint>>>,
}

impl InMemoryTx {
    async fn trip(&self, point: FailPoint) -> Result<(), StoreError> {
        if self.fail_points.lock().await.remove(&point) {
            return Err(StoreError::Injected(format!("{point:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    async fn insert_product(&mut self, product: &ProductStock) -> Result<(), StoreError> {
        if self.working.products.contains_key(&product.product_id) {
            return Err(StoreError::UniqueViolation(format!(
                "product {} already registered",
                product.product_id
            )));
        }
        self.working
            .products
            .insert(product.product_id, persisted_product(product));
        Ok(())
    }

    async fn get_product(&mut self, id: ProductId) -> Result<Option<ProductStock>, StoreError> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn lock_products(&mut self, ids: &[ProductId]) -> Result<Vec<ProductStock>, StoreError> {
        let mut sorted = ids.to_vec();
        sorted.sort();
        sorted.dedup();
        Ok(sorted
            .into_iter()
            .filter_map(|id| self.working.products.get(&id).cloned())
            .collect())
    }

    async fn update_product(&mut self, product: &ProductStock) -> Result<(), StoreError> {
        if product.stock < 0 {
            return Err(StoreError::Constraint("products.stock >= 0".into()));
        }
        match self.working.products.get_mut(&product.product_id) {
            Some(row) => {
                *row = persisted_product(product);
                Ok(())
            }
            None => Err(StoreError::Constraint(format!(
                "no product row {}",
                product.product_id
            ))),
        }
    }

    async fn product_ids(&mut self) -> Result<Vec<ProductId>, StoreError> {
        Ok(self.working.products.keys().copied().collect())
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        self.trip(FailPoint::InsertMovement).await?;
        if !movement.is_well_formed() {
            return Err(StoreError::Constraint(
                "stock_movements snapshot check".into(),
            ));
        }
        if !self.working.products.contains_key(&movement.product_id) {
            return Err(StoreError::Constraint(format!(
                "movement for unknown product {}",
                movement.product_id
            )));
        }
        self.working.movements.push(persisted_movement(movement));
        Ok(())
    }

    async fn product_movements(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self
            .working
            .movements
            .iter()
            .filter(|m| m.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn movement_page(
        &mut self,
        product_id: ProductId,
        page: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let all: Vec<&StockMovement> = self
            .working
            .movements
            .iter()
            .rev()
            .filter(|m| m.product_id == product_id)
            .collect();
        let total = all.len() as u64;
        let movements = all
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect();
        Ok(MovementPage::new(movements, total, page))
    }

    async fn movements_by_reference(
        &mut self,
        reference: Reference,
        kind: MovementKind,
    ) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self
            .working
            .movements
            .iter()
            .filter(|m| m.kind == kind && m.reference == Some(reference))
            .cloned()
            .collect())
    }

    async fn insert_cash_flow(&mut self, entry: &CashFlowEntry) -> Result<CashFlowEntry, StoreError> {
        self.trip(FailPoint::InsertCashFlow).await?;
        if let Some(key) = entry.idempotency_key() {
            if let Some(existing) = self
                .working
                .cash_flow
                .iter()
                .find(|e| e.idempotency_key() == Some(key))
            {
                return Ok(existing.clone());
            }
        }
        if entry.amount <= Decimal::ZERO {
            return Err(StoreError::Constraint("cash_flow_entries.amount > 0".into()));
        }
        let mut stored = entry.clone();
        stored.amount = round_money(stored.amount);
        self.working.cash_flow.push(stored.clone());
        Ok(stored)
    }

    async fn find_cash_flow(
        &mut self,
        reference: Reference,
        category: CashFlowCategory,
    ) -> Result<Option<CashFlowEntry>, StoreError> {
        Ok(self
            .working
            .cash_flow
            .iter()
            .find(|e| e.reference == Some(reference) && e.category == category)
            .cloned())
    }

    async fn delete_cash_flow(&mut self, id: CashFlowEntryId) -> Result<bool, StoreError> {
        let before = self.working.cash_flow.len();
        self.working.cash_flow.retain(|e| e.id != id);
        Ok(self.working.cash_flow.len() != before)
    }

    async fn cash_flow_in_period(
        &mut self,
        period: CashFlowPeriod,
    ) -> Result<Vec<CashFlowEntry>, StoreError> {
        let mut entries: Vec<CashFlowEntry> = self
            .working
            .cash_flow
            .iter()
            .filter(|e| period.contains(e.value_date))
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.value_date, e.created_at));
        Ok(entries)
    }

    async fn insert_purchase_order(&mut self, po: &PurchaseOrderSnapshot) -> Result<(), StoreError> {
        if self.working.purchase_orders.contains_key(&po.id) {
            return Err(StoreError::UniqueViolation(format!(
                "purchase order {} exists",
                po.id
            )));
        }
        if self
            .working
            .purchase_orders
            .values()
            .any(|existing| existing.order_number == po.order_number)
        {
            return Err(StoreError::UniqueViolation(format!(
                "order number {} exists",
                po.order_number
            )));
        }
        self.working
            .purchase_orders
            .insert(po.id, persisted_purchase_order(po));
        Ok(())
    }

    async fn get_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrderSnapshot>, StoreError> {
        Ok(self.working.purchase_orders.get(&id).cloned())
    }

    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrderSnapshot>, StoreError> {
        self.get_purchase_order(id).await
    }

    async fn update_purchase_order(
        &mut self,
        po: &PurchaseOrderSnapshot,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        self.trip(FailPoint::UpdatePurchaseOrder).await?;
        let Some(row) = self.working.purchase_orders.get_mut(&po.id) else {
            return Err(StoreError::Constraint(format!("no purchase order row {}", po.id)));
        };
        if !expected.matches(row.version) {
            return Err(StoreError::Concurrency(format!(
                "purchase order {}: expected {expected:?}, found {}",
                po.id, row.version
            )));
        }
        *row = persisted_purchase_order(po);
        Ok(())
    }

    async fn claim_receipt(
        &mut self,
        receipt_id: ReceiptId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrderId>, StoreError> {
        if let Some(existing) = self.working.receipts.get(&receipt_id) {
            return Ok(Some(*existing));
        }
        self.working.receipts.insert(receipt_id, purchase_order_id);
        Ok(None)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.trip(FailPoint::Commit).await?;
        let InMemoryTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
