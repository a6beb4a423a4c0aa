//! Overlapping units of work on the same rows.
//!
//! Each scenario runs against the in-memory store and, when
//! `DATABASE_URL` is set, against PostgreSQL.

use chrono::{Days, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use stockbook_accounting::{CashFlowCategory, CashFlowEntry, CashFlowPeriod};
use stockbook_core::{AdjustmentId, OrderId, ProductId, PurchaseOrderId, Reference, SupplierId};
use stockbook_events::InMemoryEventBus;
use stockbook_infra::{
    AlertEnvelope, DatabaseSettings, InMemoryStore, InventoryAdjustment, LedgerStore, NewProduct,
    NewPurchaseOrder, Pagination, PostgresStore, ReconciliationCoordinator, SaleLine, SaleOrder,
    TransactionSettings,
};
use stockbook_inventory::{MovementKind, StockThresholds};
use stockbook_purchasing::{NewLine, PurchaseOrderSnapshot};

type Coordinator<S> = ReconciliationCoordinator<S, InMemoryEventBus<AlertEnvelope>>;

fn coordinator<S: LedgerStore>(store: S) -> Coordinator<S> {
    ReconciliationCoordinator::new(store, InMemoryEventBus::new(), StockThresholds::default())
}

async fn postgres() -> Option<Coordinator<PostgresStore>> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let database = DatabaseSettings {
        url,
        max_connections: 8,
        min_connections: 1,
        acquire_timeout_secs: 5,
    };
    let store = PostgresStore::connect(&database, &TransactionSettings::default())
        .await
        .unwrap();
    store.migrate().await.unwrap();
    Some(coordinator(store))
}

async fn product<S: LedgerStore>(coordinator: &Coordinator<S>, opening_stock: i64) -> ProductId {
    let product_id = ProductId::new();
    coordinator
        .register_product(NewProduct {
            product_id,
            opening_stock,
            opening_cost: dec!(4),
            base_price: dec!(10),
        })
        .await
        .unwrap();
    product_id
}

fn sale(order_id: OrderId, product_id: ProductId, quantity: i64) -> SaleOrder {
    SaleOrder {
        order_id,
        lines: vec![SaleLine {
            product_id,
            quantity,
            unit_price: dec!(10),
        }],
        total: Decimal::from(quantity) * dec!(10),
        payment_method: Some("card".into()),
    }
}

async fn purchase_order<S: LedgerStore>(
    coordinator: &Coordinator<S>,
    product_id: ProductId,
) -> PurchaseOrderSnapshot {
    let order_id = PurchaseOrderId::new();
    coordinator
        .create_purchase_order(NewPurchaseOrder {
            order_id,
            order_number: format!("PO-{order_id}"),
            supplier_id: SupplierId::new(),
            lines: vec![NewLine {
                product_id,
                quantity: 5,
                unit_price: dec!(3),
            }],
            tax: Decimal::ZERO,
            expected_on: None,
        })
        .await
        .unwrap()
}

async fn entries_for<S: LedgerStore>(
    coordinator: &Coordinator<S>,
    reference: Reference,
    category: CashFlowCategory,
) -> Vec<CashFlowEntry> {
    let today = Utc::now().date_naive();
    let period = CashFlowPeriod::new(
        today.checked_sub_days(Days::new(1)).unwrap(),
        today.checked_add_days(Days::new(1)).unwrap(),
    )
    .unwrap();
    coordinator
        .cash_flow_in_period(period)
        .await
        .unwrap()
        .entries
        .into_iter()
        .filter(|e| e.reference == Some(reference) && e.category == category)
        .collect()
}

async fn two_sales_share_one_product<S: LedgerStore>(coordinator: Coordinator<S>) {
    let p = product(&coordinator, 10).await;

    let (first, second) = tokio::join!(
        coordinator.on_sale_confirmed(sale(OrderId::new(), p, 3)),
        coordinator.on_sale_confirmed(sale(OrderId::new(), p, 4)),
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(coordinator.product_stock(p).await.unwrap().stock, 3);
    assert!(coordinator.verify_product_ledger(p).await.unwrap().is_consistent());
}

async fn duplicate_sale_delivery_applies_once<S: LedgerStore>(coordinator: Coordinator<S>) {
    let p = product(&coordinator, 10).await;
    let order_id = OrderId::new();

    let (first, second) = tokio::join!(
        coordinator.on_sale_confirmed(sale(order_id, p, 3)),
        coordinator.on_sale_confirmed(sale(order_id, p, 3)),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(first.replayed != second.replayed);
    assert_eq!(coordinator.product_stock(p).await.unwrap().stock, 7);
    let page = coordinator.movements(p, Pagination::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.movements[0].kind, MovementKind::Sale);
    let income = entries_for(&coordinator, Reference::order(order_id), CashFlowCategory::Sales).await;
    assert_eq!(income.len(), 1);
}

async fn duplicate_cancellation_restores_once<S: LedgerStore>(coordinator: Coordinator<S>) {
    let p = product(&coordinator, 10).await;
    let order_id = OrderId::new();
    coordinator.on_sale_confirmed(sale(order_id, p, 3)).await.unwrap();

    let (first, second) = tokio::join!(
        coordinator.on_sale_cancelled(order_id),
        coordinator.on_sale_cancelled(order_id),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(first.replayed != second.replayed);
    assert_eq!(coordinator.product_stock(p).await.unwrap().stock, 10);
    assert!(coordinator.verify_product_ledger(p).await.unwrap().is_consistent());
}

async fn duplicate_adjustment_applies_once<S: LedgerStore>(coordinator: Coordinator<S>) {
    let p = product(&coordinator, 10).await;
    let adjustment = InventoryAdjustment {
        product_id: p,
        delta: -2,
        reason: "damaged".into(),
        adjustment_id: Some(AdjustmentId::new()),
    };

    let (first, second) = tokio::join!(
        coordinator.on_inventory_adjusted(adjustment.clone()),
        coordinator.on_inventory_adjusted(adjustment.clone()),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(first.replayed != second.replayed);
    assert_eq!(coordinator.product_stock(p).await.unwrap().stock, 8);
}

async fn paying_concurrently_records_one_expense<S: LedgerStore>(coordinator: Coordinator<S>) {
    let p = product(&coordinator, 0).await;
    let po = purchase_order(&coordinator, p).await;

    let (first, second) = tokio::join!(
        coordinator.on_purchase_paid(po.id, "transfer"),
        coordinator.on_purchase_paid(po.id, "transfer"),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(first.replayed != second.replayed);
    let expenses = entries_for(
        &coordinator,
        Reference::purchase_order(po.id),
        CashFlowCategory::Purchases,
    )
    .await;
    assert_eq!(expenses.len(), 1);
    assert_eq!(expenses[0].amount, dec!(15.00));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_sales_on_one_product() {
    two_sales_share_one_product(coordinator(InMemoryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_duplicate_sale() {
    duplicate_sale_delivery_applies_once(coordinator(InMemoryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_duplicate_cancellation() {
    duplicate_cancellation_restores_once(coordinator(InMemoryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_duplicate_adjustment() {
    duplicate_adjustment_applies_once(coordinator(InMemoryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_payment() {
    paying_concurrently_records_one_expense(coordinator(InMemoryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn postgres_concurrent_sales_on_one_product() {
    let Some(coordinator) = postgres().await else {
        return;
    };
    two_sales_share_one_product(coordinator).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn postgres_concurrent_duplicate_sale() {
    let Some(coordinator) = postgres().await else {
        return;
    };
    duplicate_sale_delivery_applies_once(coordinator).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn postgres_concurrent_duplicate_cancellation() {
    let Some(coordinator) = postgres().await else {
        return;
    };
    duplicate_cancellation_restores_once(coordinator).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn postgres_concurrent_duplicate_adjustment() {
    let Some(coordinator) = postgres().await else {
        return;
    };
    duplicate_adjustment_applies_once(coordinator).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn postgres_concurrent_payment() {
    let Some(coordinator) = postgres().await else {
        return;
    };
    paying_concurrently_records_one_expense(coordinator).await;
}
