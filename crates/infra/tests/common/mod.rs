#![allow(dead_code)]

use chrono::{Days, Utc};
use rust_decimal::Decimal;

use stockbook_accounting::{CashFlowCategory, CashFlowEntry, CashFlowPeriod};
use stockbook_core::{ProductId, PurchaseOrderId, SupplierId};
use stockbook_events::InMemoryEventBus;
use stockbook_infra::{
    AlertEnvelope, InMemoryStore, NewProduct, NewPurchaseOrder, ReconciliationCoordinator,
};
use stockbook_inventory::StockThresholds;
use stockbook_purchasing::{NewLine, PurchaseOrderSnapshot};

pub type Coordinator = ReconciliationCoordinator<InMemoryStore, InMemoryEventBus<AlertEnvelope>>;

pub fn setup() -> (Coordinator, InMemoryStore) {
    let store = InMemoryStore::new();
    let coordinator =
        ReconciliationCoordinator::new(store.clone(), InMemoryEventBus::new(), StockThresholds::default());
    (coordinator, store)
}

pub async fn product(
    coordinator: &Coordinator,
    opening_stock: i64,
    opening_cost: Decimal,
    base_price: Decimal,
) -> ProductId {
    let product_id = ProductId::new();
    coordinator
        .register_product(NewProduct {
            product_id,
            opening_stock,
            opening_cost,
            base_price,
        })
        .await
        .unwrap();
    product_id
}

pub async fn purchase_order(
    coordinator: &Coordinator,
    lines: &[(ProductId, i64, Decimal)],
) -> PurchaseOrderSnapshot {
    let order_id = PurchaseOrderId::new();
    coordinator
        .create_purchase_order(NewPurchaseOrder {
            order_id,
            order_number: format!("PO-{order_id}"),
            supplier_id: SupplierId::new(),
            lines: lines
                .iter()
                .map(|(product_id, quantity, unit_price)| NewLine {
                    product_id: *product_id,
                    quantity: *quantity,
                    unit_price: *unit_price,
                })
                .collect(),
            tax: Decimal::ZERO,
            expected_on: None,
        })
        .await
        .unwrap()
}

/// Every entry dated around today.
pub async fn entries(coordinator: &Coordinator) -> Vec<CashFlowEntry> {
    let today = Utc::now().date_naive();
    let period = CashFlowPeriod::new(
        today.checked_sub_days(Days::new(1)).unwrap(),
        today.checked_add_days(Days::new(1)).unwrap(),
    )
    .unwrap();
    coordinator.cash_flow_in_period(period).await.unwrap().entries
}

pub async fn entries_in(coordinator: &Coordinator, category: CashFlowCategory) -> Vec<CashFlowEntry> {
    entries(coordinator)
        .await
        .into_iter()
        .filter(|e| e.category == category)
        .collect()
}
