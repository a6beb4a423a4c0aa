//! Stock, valuation and cash-flow reconciliation against the in-memory store.

mod common;

use rust_decimal_macros::dec;

use stockbook_accounting::{CashFlowCategory, CashFlowDirection, NewCashFlowEntry};
use stockbook_core::{AdjustmentId, DomainError, OrderId, Reference};
use stockbook_events::EventBus;
use stockbook_infra::{
    FailPoint, InventoryAdjustment, Pagination, ReconciliationError, SaleLine, SaleOrder,
    StoreError,
};
use stockbook_inventory::{AlertLevel, MovementKind, MovementRequest};

use common::{entries, entries_in, product, setup};

fn sale(order_id: OrderId, lines: &[(stockbook_core::ProductId, i64, rust_decimal::Decimal)]) -> SaleOrder {
    let total = lines
        .iter()
        .map(|(_, qty, price)| rust_decimal::Decimal::from(*qty) * price)
        .sum();
    SaleOrder {
        order_id,
        lines: lines
            .iter()
            .map(|(product_id, quantity, unit_price)| SaleLine {
                product_id: *product_id,
                quantity: *quantity,
                unit_price: *unit_price,
            })
            .collect(),
        total,
        payment_method: Some("CASH".into()),
    }
}

#[tokio::test]
async fn rejected_movement_leaves_stock_unchanged() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 2, dec!(10), dec!(20)).await;

    let err = coordinator
        .record_movement(MovementRequest::new(p, MovementKind::Sale, -3, "walk-in"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReconciliationError::Domain(DomainError::InsufficientStock {
            available: 2,
            delta: -3,
            ..
        })
    ));
    assert_eq!(coordinator.product_stock(p).await.unwrap().stock, 2);
    let page = coordinator.movements(p, Pagination::default()).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn adjustments_cannot_drive_stock_negative() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 1, dec!(10), dec!(20)).await;

    let err = coordinator
        .on_inventory_adjusted(InventoryAdjustment {
            product_id: p,
            delta: -4,
            reason: "breakage".into(),
            adjustment_id: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err.domain(),
        Some(DomainError::InsufficientStock { .. })
    ));
    assert_eq!(coordinator.product_stock(p).await.unwrap().stock, 1);
    assert!(entries(&coordinator).await.is_empty());
}

#[tokio::test]
async fn replaying_the_ledger_reproduces_stock() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 5, dec!(10), dec!(20)).await;

    coordinator.apply_receipt(p, 10, dec!(12)).await.unwrap();
    coordinator
        .on_sale_confirmed(sale(OrderId::new(), &[(p, 7, dec!(20))]))
        .await
        .unwrap();
    coordinator
        .on_inventory_adjusted(InventoryAdjustment {
            product_id: p,
            delta: -2,
            reason: "damaged".into(),
            adjustment_id: Some(AdjustmentId::new()),
        })
        .await
        .unwrap();
    coordinator
        .record_movement(MovementRequest::new(p, MovementKind::Adjustment, 3, "found"))
        .await
        .unwrap();

    let verification = coordinator.verify_product_ledger(p).await.unwrap();
    assert!(verification.is_consistent());
    assert_eq!(verification.movement_count, 4);
    assert_eq!(verification.replayed_stock, 9);
    assert_eq!(coordinator.product_stock(p).await.unwrap().stock, 9);
}

#[tokio::test]
async fn receipt_updates_weighted_average_and_last_cost() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 10, dec!(100), dec!(200)).await;

    let valuation = coordinator.apply_receipt(p, 5, dec!(160)).await.unwrap();
    assert_eq!(valuation.new_stock, 15);
    assert_eq!(valuation.new_average_cost, dec!(120));

    let stock = coordinator.product_stock(p).await.unwrap();
    assert_eq!(stock.stock, 15);
    assert_eq!(stock.average_cost, dec!(120.00));
    assert_eq!(stock.last_cost, Some(dec!(160)));
}

#[tokio::test]
async fn average_cost_is_rounded_when_stored() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 10, dec!(150), dec!(200)).await;

    coordinator.apply_receipt(p, 5, dec!(160)).await.unwrap();

    let stock = coordinator.product_stock(p).await.unwrap();
    assert_eq!(stock.average_cost, dec!(153.33));
    assert_eq!(stock.stock, 15);
}

#[tokio::test]
async fn purchase_movement_moves_the_average_cost() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 10, dec!(100), dec!(200)).await;

    coordinator
        .record_movement(
            MovementRequest::new(p, MovementKind::Purchase, 5, "supplier drop-off")
                .with_unit_cost(dec!(160)),
        )
        .await
        .unwrap();

    let stock = coordinator.product_stock(p).await.unwrap();
    assert_eq!(stock.stock, 15);
    assert_eq!(stock.average_cost, dec!(120.00));
    assert_eq!(stock.last_cost, Some(dec!(160)));
}

#[tokio::test]
async fn purchase_movement_without_cost_is_rejected() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 10, dec!(100), dec!(200)).await;

    let err = coordinator
        .record_movement(MovementRequest::new(p, MovementKind::Purchase, 5, "unpriced"))
        .await
        .unwrap_err();

    assert!(matches!(err.domain(), Some(DomainError::Validation(_))));
    let stock = coordinator.product_stock(p).await.unwrap();
    assert_eq!(stock.stock, 10);
    assert_eq!(stock.average_cost, dec!(100));
    let page = coordinator.movements(p, Pagination::default()).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn receipt_into_empty_stock_takes_unit_cost() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 0, dec!(0), dec!(10)).await;

    let valuation = coordinator.apply_receipt(p, 4, dec!(7.5)).await.unwrap();

    assert_eq!(valuation.new_average_cost, dec!(7.5));
}

#[tokio::test]
async fn shrinkage_falls_back_to_base_price() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 10, dec!(0), dec!(5000)).await;

    let outcome = coordinator
        .on_inventory_adjusted(InventoryAdjustment {
            product_id: p,
            delta: -3,
            reason: "theft".into(),
            adjustment_id: Some(AdjustmentId::new()),
        })
        .await
        .unwrap();

    let shrinkage = outcome.shrinkage.unwrap();
    assert_eq!(shrinkage.amount, dec!(15000));
    assert_eq!(shrinkage.direction, CashFlowDirection::Expense);
    assert_eq!(shrinkage.category, CashFlowCategory::Shrinkage);
    assert_eq!(outcome.movement.new_stock, 7);
}

#[tokio::test]
async fn shrinkage_prefers_last_purchase_cost() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 0, dec!(0), dec!(5000)).await;
    coordinator.apply_receipt(p, 10, dec!(40)).await.unwrap();

    let outcome = coordinator
        .on_inventory_adjusted(InventoryAdjustment {
            product_id: p,
            delta: -2,
            reason: "expired".into(),
            adjustment_id: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome.shrinkage.unwrap().amount, dec!(80));
}

#[tokio::test]
async fn loss_without_any_cost_records_no_expense() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 10, dec!(0), dec!(0)).await;

    let outcome = coordinator
        .on_inventory_adjusted(InventoryAdjustment {
            product_id: p,
            delta: -1,
            reason: "lost".into(),
            adjustment_id: None,
        })
        .await
        .unwrap();

    assert!(outcome.shrinkage.is_none());
    assert_eq!(outcome.movement.new_stock, 9);
    assert!(entries(&coordinator).await.is_empty());
}

#[tokio::test]
async fn positive_adjustment_records_no_expense() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 1, dec!(3), dec!(9)).await;

    let outcome = coordinator
        .on_inventory_adjusted(InventoryAdjustment {
            product_id: p,
            delta: 4,
            reason: "recount".into(),
            adjustment_id: None,
        })
        .await
        .unwrap();

    assert!(outcome.shrinkage.is_none());
    assert_eq!(outcome.movement.new_stock, 5);
}

#[tokio::test]
async fn replayed_adjustment_is_applied_once() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 10, dec!(0), dec!(50)).await;
    let adjustment = InventoryAdjustment {
        product_id: p,
        delta: -2,
        reason: "broken".into(),
        adjustment_id: Some(AdjustmentId::new()),
    };

    let first = coordinator.on_inventory_adjusted(adjustment.clone()).await.unwrap();
    let second = coordinator.on_inventory_adjusted(adjustment).await.unwrap();

    assert!(second.replayed);
    assert_eq!(second.movement.id, first.movement.id);
    assert_eq!(coordinator.product_stock(p).await.unwrap().stock, 8);
    assert_eq!(entries_in(&coordinator, CashFlowCategory::Shrinkage).await.len(), 1);
}

#[tokio::test]
async fn product_keyed_shrinkage_always_appends() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 10, dec!(0), dec!(50)).await;

    for _ in 0..2 {
        coordinator
            .on_inventory_adjusted(InventoryAdjustment {
                product_id: p,
                delta: -1,
                reason: "shelf loss".into(),
                adjustment_id: None,
            })
            .await
            .unwrap();
    }

    let shrinkage = entries_in(&coordinator, CashFlowCategory::Shrinkage).await;
    assert_eq!(shrinkage.len(), 2);
    assert!(shrinkage.iter().all(|e| e.reference == Some(Reference::product(p))));
}

#[tokio::test]
async fn sale_records_movements_and_income() {
    let (coordinator, _) = setup();
    let a = product(&coordinator, 20, dec!(5), dec!(12)).await;
    let b = product(&coordinator, 20, dec!(8), dec!(15)).await;
    let order_id = OrderId::new();

    let outcome = coordinator
        .on_sale_confirmed(sale(order_id, &[(a, 2, dec!(12)), (b, 1, dec!(15))]))
        .await
        .unwrap();

    assert!(!outcome.replayed);
    assert_eq!(outcome.movements.len(), 2);
    assert!(outcome.movements.iter().all(|m| m.kind == MovementKind::Sale));
    assert_eq!(outcome.movements[0].unit_price, Some(dec!(12)));
    assert_eq!(outcome.movements[0].total_value, Some(dec!(24)));

    let income = outcome.income.unwrap();
    assert_eq!(income.amount, dec!(39));
    assert_eq!(income.reference, Some(Reference::order(order_id)));
    assert_eq!(coordinator.product_stock(a).await.unwrap().stock, 18);
    assert_eq!(coordinator.product_stock(b).await.unwrap().stock, 19);
}

#[tokio::test]
async fn failure_before_cash_flow_write_rolls_back_the_sale() {
    let (coordinator, store) = setup();
    let a = product(&coordinator, 10, dec!(5), dec!(12)).await;
    let b = product(&coordinator, 10, dec!(5), dec!(12)).await;
    store.fail_once(FailPoint::InsertCashFlow).await;

    let err = coordinator
        .on_sale_confirmed(sale(OrderId::new(), &[(a, 2, dec!(12)), (b, 3, dec!(12))]))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconciliationError::Store(StoreError::Injected(_))));
    for p in [a, b] {
        assert_eq!(coordinator.product_stock(p).await.unwrap().stock, 10);
        let page = coordinator.movements(p, Pagination::default()).await.unwrap();
        assert!(page.movements.is_empty());
    }
    assert!(entries(&coordinator).await.is_empty());
}

#[tokio::test]
async fn commit_failure_discards_every_write() {
    let (coordinator, store) = setup();
    let p = product(&coordinator, 10, dec!(0), dec!(30)).await;
    store.fail_once(FailPoint::Commit).await;

    let err = coordinator
        .on_inventory_adjusted(InventoryAdjustment {
            product_id: p,
            delta: -4,
            reason: "flood".into(),
            adjustment_id: Some(AdjustmentId::new()),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ReconciliationError::Store(StoreError::Injected(_))));
    assert_eq!(coordinator.product_stock(p).await.unwrap().stock, 10);
    assert!(entries(&coordinator).await.is_empty());
}

#[tokio::test]
async fn one_short_line_rejects_the_whole_sale() {
    let (coordinator, _) = setup();
    let a = product(&coordinator, 10, dec!(5), dec!(12)).await;
    let b = product(&coordinator, 1, dec!(5), dec!(12)).await;

    let err = coordinator
        .on_sale_confirmed(sale(OrderId::new(), &[(a, 2, dec!(12)), (b, 2, dec!(12))]))
        .await
        .unwrap_err();

    assert!(matches!(err.domain(), Some(DomainError::InsufficientStock { .. })));
    assert_eq!(coordinator.product_stock(a).await.unwrap().stock, 10);
}

#[tokio::test]
async fn sale_of_unknown_product_is_not_found() {
    let (coordinator, _) = setup();

    let err = coordinator
        .on_sale_confirmed(sale(
            OrderId::new(),
            &[(stockbook_core::ProductId::new(), 1, dec!(1))],
        ))
        .await
        .unwrap_err();

    assert!(matches!(err.domain(), Some(DomainError::NotFound(_))));
}

#[tokio::test]
async fn replayed_sale_is_a_no_op() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 10, dec!(5), dec!(12)).await;
    let order = sale(OrderId::new(), &[(p, 3, dec!(12))]);

    let first = coordinator.on_sale_confirmed(order.clone()).await.unwrap();
    let second = coordinator.on_sale_confirmed(order).await.unwrap();

    assert!(second.replayed);
    assert_eq!(second.movements, first.movements);
    assert_eq!(second.income, first.income);
    assert_eq!(coordinator.product_stock(p).await.unwrap().stock, 7);
    assert_eq!(entries_in(&coordinator, CashFlowCategory::Sales).await.len(), 1);
}

#[tokio::test]
async fn zero_total_sale_records_no_income() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 10, dec!(5), dec!(12)).await;

    let outcome = coordinator
        .on_sale_confirmed(sale(OrderId::new(), &[(p, 1, dec!(0))]))
        .await
        .unwrap();

    assert_eq!(outcome.movements.len(), 1);
    assert!(outcome.income.is_none());
    assert!(entries(&coordinator).await.is_empty());
}

#[tokio::test]
async fn cancelled_sale_restores_stock_and_drops_income() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 10, dec!(5), dec!(12)).await;
    let order_id = OrderId::new();
    coordinator
        .on_sale_confirmed(sale(order_id, &[(p, 4, dec!(12))]))
        .await
        .unwrap();

    let cancellation = coordinator.on_sale_cancelled(order_id).await.unwrap();

    assert_eq!(cancellation.movements.len(), 1);
    assert_eq!(cancellation.movements[0].kind, MovementKind::Adjustment);
    assert_eq!(cancellation.movements[0].delta, 4);
    assert_eq!(cancellation.reversed_income.unwrap().amount, dec!(48));
    assert_eq!(coordinator.product_stock(p).await.unwrap().stock, 10);
    assert!(entries_in(&coordinator, CashFlowCategory::Sales).await.is_empty());

    let again = coordinator.on_sale_cancelled(order_id).await.unwrap();
    assert!(again.replayed);
    assert_eq!(coordinator.product_stock(p).await.unwrap().stock, 10);
    assert!(coordinator.verify_product_ledger(p).await.unwrap().is_consistent());
}

#[tokio::test]
async fn cancelling_an_unknown_sale_is_not_found() {
    let (coordinator, _) = setup();

    let err = coordinator.on_sale_cancelled(OrderId::new()).await.unwrap_err();

    assert!(matches!(err.domain(), Some(DomainError::NotFound(_))));
}

#[tokio::test]
async fn refund_defaults_to_the_recorded_sale_total() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 10, dec!(5), dec!(12.50)).await;
    let order_id = OrderId::new();
    coordinator
        .on_sale_confirmed(sale(order_id, &[(p, 2, dec!(12.50))]))
        .await
        .unwrap();

    let refund = coordinator.on_refund(order_id, None, Some("CARD")).await.unwrap();
    let again = coordinator.on_refund(order_id, None, Some("CARD")).await.unwrap();

    assert_eq!(refund.amount, dec!(25));
    assert_eq!(refund.direction, CashFlowDirection::Expense);
    assert_eq!(refund.category, CashFlowCategory::Refunds);
    assert_eq!(again.id, refund.id);
    assert_eq!(entries_in(&coordinator, CashFlowCategory::Refunds).await.len(), 1);
}

#[tokio::test]
async fn refund_without_sale_or_amount_is_not_found() {
    let (coordinator, _) = setup();
    let order_id = OrderId::new();

    let err = coordinator.on_refund(order_id, None, None).await.unwrap_err();
    assert!(matches!(err.domain(), Some(DomainError::NotFound(_))));

    let explicit = coordinator
        .on_refund(order_id, Some(dec!(9.99)), None)
        .await
        .unwrap();
    assert_eq!(explicit.amount, dec!(9.99));
}

#[tokio::test]
async fn crossing_a_threshold_publishes_after_commit() {
    let (coordinator, _) = setup();
    let subscription = coordinator.bus().subscribe();
    let p = product(&coordinator, 12, dec!(5), dec!(12)).await;

    coordinator
        .on_sale_confirmed(sale(OrderId::new(), &[(p, 10, dec!(12))]))
        .await
        .unwrap();

    let alert = subscription.try_recv().unwrap();
    assert_eq!(alert.payload().product_id, p);
    assert_eq!(alert.payload().level, AlertLevel::Critical);
    assert_eq!(alert.payload().previous_stock, 12);
    assert_eq!(alert.payload().new_stock, 2);
    assert!(subscription.try_recv().is_err());
}

#[tokio::test]
async fn rolled_back_operation_publishes_nothing() {
    let (coordinator, store) = setup();
    let subscription = coordinator.bus().subscribe();
    let p = product(&coordinator, 5, dec!(5), dec!(12)).await;
    store.fail_once(FailPoint::InsertCashFlow).await;

    coordinator
        .on_sale_confirmed(sale(OrderId::new(), &[(p, 5, dec!(12))]))
        .await
        .unwrap_err();

    assert!(subscription.try_recv().is_err());
}

#[tokio::test]
async fn one_shot_entries_are_recorded_once() {
    let (coordinator, _) = setup();
    let order_id = OrderId::new();
    let entry = || {
        NewCashFlowEntry::new(
            CashFlowDirection::Income,
            CashFlowCategory::Sales,
            dec!(100),
            "manual sale",
        )
        .with_reference(Reference::order(order_id))
    };

    let first = coordinator.record_entry(entry()).await.unwrap();
    let second = coordinator.record_entry(entry()).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(entries(&coordinator).await.len(), 1);
}

#[tokio::test]
async fn amounts_are_stored_at_money_scale() {
    let (coordinator, _) = setup();

    let entry = coordinator
        .record_entry(NewCashFlowEntry::new(
            CashFlowDirection::Expense,
            CashFlowCategory::Services,
            dec!(10.005),
            "cleaning",
        ))
        .await
        .unwrap();

    assert_eq!(entry.amount, dec!(10.01));
}

#[tokio::test]
async fn operating_expenses_feed_the_period_summary() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 10, dec!(5), dec!(12)).await;
    coordinator
        .on_sale_confirmed(sale(OrderId::new(), &[(p, 5, dec!(100))]))
        .await
        .unwrap();
    coordinator
        .record_operating_expense(CashFlowCategory::Rent, dec!(120), "March rent", Some("BANK"))
        .await
        .unwrap();
    coordinator
        .record_operating_expense(CashFlowCategory::Salaries, dec!(200), "wages", None)
        .await
        .unwrap();

    let today = chrono::Utc::now().date_naive();
    let period = stockbook_accounting::CashFlowPeriod::new(
        today.pred_opt().unwrap(),
        today.succ_opt().unwrap(),
    )
    .unwrap();
    let report = coordinator.cash_flow_in_period(period).await.unwrap();

    assert_eq!(report.entries.len(), 3);
    assert_eq!(report.summary.income, dec!(500));
    assert_eq!(report.summary.expense, dec!(320));
    assert_eq!(report.summary.net, dec!(180));
    assert_eq!(report.summary.by_category[&CashFlowCategory::Rent], dec!(120));
}

#[tokio::test]
async fn stock_derived_categories_are_not_operating_expenses() {
    let (coordinator, _) = setup();

    let err = coordinator
        .record_operating_expense(CashFlowCategory::Shrinkage, dec!(5), "loss", None)
        .await
        .unwrap_err();

    assert!(matches!(err.domain(), Some(DomainError::Validation(_))));
}

#[tokio::test]
async fn registering_a_product_twice_conflicts() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 1, dec!(1), dec!(1)).await;

    let err = coordinator
        .register_product(stockbook_infra::NewProduct {
            product_id: p,
            opening_stock: 5,
            opening_cost: dec!(1),
            base_price: dec!(1),
        })
        .await
        .unwrap_err();

    assert!(matches!(err.domain(), Some(DomainError::Conflict(_))));
    assert_eq!(coordinator.product_stock(p).await.unwrap().stock, 1);
}

#[tokio::test]
async fn movements_page_newest_first() {
    let (coordinator, _) = setup();
    let p = product(&coordinator, 0, dec!(0), dec!(1)).await;
    for qty in 1..=3 {
        coordinator.apply_receipt(p, qty, dec!(1)).await.unwrap();
    }

    let page = coordinator
        .movements(p, Pagination::new(Some(2), None))
        .await
        .unwrap();

    assert_eq!(page.total, 3);
    assert!(page.has_more);
    assert_eq!(page.movements[0].delta, 3);
    assert_eq!(page.movements[1].delta, 2);
}
