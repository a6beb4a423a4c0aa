use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use stockbook_accounting::{
    CashFlowCategory, CashFlowEntry, CashFlowPeriod, CashFlowSummary, NewCashFlowEntry, mappers,
};
use stockbook_core::{
    Aggregate, DomainError, ExpectedVersion, OrderId, ProductId, PurchaseOrderId, ReceiptId,
    Reference,
};
use stockbook_events::EventBus;
use stockbook_inventory::{
    LedgerVerification, MovementKind, MovementRequest, ProductStock, ReceiptValuation,
    StockThresholds, value_receipt, verify_ledger,
};
use stockbook_purchasing::{
    Cancel, CreatePurchaseOrder, EditItems, MarkPaid, NewLine, PaymentStatus, PurchaseOrder,
    PurchaseOrderCommand, PurchaseOrderEvent, PurchaseOrderSnapshot, ReceiptLine, ReceiveItems,
    ReceivedLine,
};

use crate::alerts::{AlertEnvelope, AlertPublisher};
use crate::error::ReconciliationError;
use crate::store::{
    LedgerStore, LedgerTx, MovementPage, Pagination, StoreError, persisted_product,
    persisted_purchase_order,
};

use super::inputs::{
    AdjustmentOutcome, CashFlowReport, InventoryAdjustment, MovementOutcome, NewProduct,
    NewPurchaseOrder, PaymentOutcome, ReceiptOutcome, SaleCancellation, SaleOrder, SaleOutcome,
};
use super::{cash_flow, finish, stock_ledger};

/// Applies business events to the stock ledger, the valuation, the cash-flow
/// ledger and purchase orders.
///
/// Every public operation is one unit of work: it opens a store transaction,
/// commits on success and rolls back on any error, which is returned to the
/// caller unchanged. Stock alerts collected inside the transaction are
/// published only after it commits.
pub struct ReconciliationCoordinator<S, B> {
    store: S,
    alerts: AlertPublisher<B>,
    thresholds: StockThresholds,
}

impl<S, B> ReconciliationCoordinator<S, B>
where
    S: LedgerStore,
    B: EventBus<AlertEnvelope>,
{
    pub fn new(store: S, bus: B, thresholds: StockThresholds) -> Self {
        Self {
            store,
            alerts: AlertPublisher::new(bus),
            thresholds,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        self.alerts.bus()
    }

    pub fn thresholds(&self) -> StockThresholds {
        self.thresholds
    }

    // ---------------------------------------------------------------------
    // Stock ledger & valuation
    // ---------------------------------------------------------------------

    /// Seed a product's stock/cost row with its opening stock and cost.
    #[instrument(skip(self, product), fields(product_id = %product.product_id), err)]
    pub async fn register_product(
        &self,
        product: NewProduct,
    ) -> Result<ProductStock, ReconciliationError> {
        let stock = ProductStock::new(
            product.product_id,
            product.opening_stock,
            product.opening_cost,
            product.base_price,
            Utc::now(),
        )?;

        let mut tx = self.store.begin().await?;
        let result: Result<ProductStock, ReconciliationError> = match tx.insert_product(&stock).await {
            Ok(()) => Ok(persisted_product(&stock)),
            Err(StoreError::UniqueViolation(_)) => Err(DomainError::conflict(format!(
                "product {} already registered",
                product.product_id
            ))
            .into()),
            Err(err) => Err(err.into()),
        };
        let stock = finish(tx, result).await?;

        info!(opening_stock = stock.opening_stock, "product registered");
        Ok(stock)
    }

    /// Record one movement against a product's current stock.
    #[instrument(
        skip(self, request),
        fields(product_id = %request.product_id, kind = %request.kind, delta = request.delta),
        err
    )]
    pub async fn record_movement(
        &self,
        request: MovementRequest,
    ) -> Result<MovementOutcome, ReconciliationError> {
        let at = Utc::now();
        let mut tx = self.store.begin().await?;
        let result = self.movement_in_tx(tx.as_mut(), request, at).await;
        let outcome = finish(tx, result).await?;

        self.alerts.publish(outcome.alert.as_slice());
        Ok(outcome)
    }

    async fn movement_in_tx(
        &self,
        tx: &mut dyn LedgerTx,
        request: MovementRequest,
        at: DateTime<Utc>,
    ) -> Result<MovementOutcome, ReconciliationError> {
        let mut product = stock_ledger::lock_product(tx, request.product_id).await?;
        // Stock received at a cost moves the weighted average with it.
        if request.kind == MovementKind::Purchase {
            let unit_cost = request.unit_cost.ok_or_else(|| {
                DomainError::validation("purchase movement requires a unit cost; use apply_receipt")
            })?;
            let valuation = value_receipt(&product, request.delta, unit_cost)?;
            product.apply_valuation(&valuation)?;
        }
        let (movement, alert) =
            stock_ledger::append_movement(tx, &mut product, request, &self.thresholds, at).await?;
        Ok(MovementOutcome { movement, alert })
    }

    /// Value a receipt and record its PURCHASE movement together.
    #[instrument(skip(self), err)]
    pub async fn apply_receipt(
        &self,
        product_id: ProductId,
        quantity: i64,
        unit_cost: Decimal,
    ) -> Result<ReceiptValuation, ReconciliationError> {
        let at = Utc::now();
        let mut tx = self.store.begin().await?;
        let result = self
            .receipt_in_tx(tx.as_mut(), product_id, quantity, unit_cost, at)
            .await;
        let valuation = finish(tx, result).await?;

        info!(
            new_stock = valuation.new_stock,
            new_average_cost = %valuation.new_average_cost,
            "receipt valued"
        );
        Ok(valuation)
    }

    async fn receipt_in_tx(
        &self,
        tx: &mut dyn LedgerTx,
        product_id: ProductId,
        quantity: i64,
        unit_cost: Decimal,
        at: DateTime<Utc>,
    ) -> Result<ReceiptValuation, ReconciliationError> {
        let mut product = stock_ledger::lock_product(tx, product_id).await?;
        let valuation = value_receipt(&product, quantity, unit_cost)?;
        product.apply_valuation(&valuation)?;

        let request = MovementRequest::new(product_id, MovementKind::Purchase, quantity, "Stock receipt")
            .with_unit_cost(unit_cost);
        stock_ledger::append_movement(tx, &mut product, request, &self.thresholds, at).await?;
        Ok(valuation)
    }

    // ---------------------------------------------------------------------
    // Cash-flow ledger
    // ---------------------------------------------------------------------

    /// Record an entry; a one-shot reference already holding an entry of the
    /// same category returns that entry instead.
    #[instrument(
        skip(self, entry),
        fields(direction = %entry.direction, category = %entry.category),
        err
    )]
    pub async fn record_entry(
        &self,
        entry: NewCashFlowEntry,
    ) -> Result<CashFlowEntry, ReconciliationError> {
        let at = Utc::now();
        let mut tx = self.store.begin().await?;
        let result = cash_flow::record(tx.as_mut(), entry, at).await;
        let recorded = finish(tx, result).await?;

        if recorded.created {
            info!(entry_id = %recorded.entry.id, amount = %recorded.entry.amount, "cash-flow entry recorded");
        }
        Ok(recorded.entry)
    }

    /// Record an unreferenced operating expense (rent, salaries, ...).
    #[instrument(skip(self, description), err)]
    pub async fn record_operating_expense(
        &self,
        category: CashFlowCategory,
        amount: Decimal,
        description: &str,
        payment_method: Option<&str>,
    ) -> Result<CashFlowEntry, ReconciliationError> {
        let entry = mappers::operating_expense(category, amount, description, payment_method)?;
        self.record_entry(entry).await
    }

    // ---------------------------------------------------------------------
    // Sales
    // ---------------------------------------------------------------------

    /// One SALE movement per line, then one SALES income entry for the order
    /// total. An order that already has SALE movements is left untouched.
    #[instrument(skip(self, order), fields(order_id = %order.order_id, lines = order.lines.len()), err)]
    pub async fn on_sale_confirmed(
        &self,
        order: SaleOrder,
    ) -> Result<SaleOutcome, ReconciliationError> {
        let at = Utc::now();
        let mut tx = self.store.begin().await?;
        let result = self.sale_in_tx(tx.as_mut(), &order, at).await;
        let outcome = finish(tx, result).await?;

        if outcome.replayed {
            info!("sale already applied");
        } else {
            info!(movements = outcome.movements.len(), "sale applied");
            self.alerts.publish(&outcome.alerts);
        }
        Ok(outcome)
    }

    async fn sale_in_tx(
        &self,
        tx: &mut dyn LedgerTx,
        order: &SaleOrder,
        at: DateTime<Utc>,
    ) -> Result<SaleOutcome, ReconciliationError> {
        if order.lines.is_empty() {
            return Err(DomainError::validation("sale order has no lines").into());
        }
        let reference = Reference::order(order.order_id);

        // Replay check runs under the product locks so a concurrent delivery
        // of the same order sees the winner's movements.
        let mut products =
            stock_ledger::lock_products(tx, order.lines.iter().map(|l| l.product_id)).await?;

        let applied = tx.movements_by_reference(reference, MovementKind::Sale).await?;
        if !applied.is_empty() {
            let income = tx.find_cash_flow(reference, CashFlowCategory::Sales).await?;
            return Ok(SaleOutcome {
                movements: applied,
                income,
                alerts: Vec::new(),
                replayed: true,
            });
        }

        let mut movements = Vec::with_capacity(order.lines.len());
        let mut alerts = Vec::new();
        for line in &order.lines {
            let delta = line
                .quantity
                .checked_neg()
                .ok_or_else(|| DomainError::validation("sale quantity out of range"))?;
            let product = products
                .get_mut(&line.product_id)
                .ok_or_else(|| DomainError::not_found(format!("product {}", line.product_id)))?;
            let request = MovementRequest::new(
                line.product_id,
                MovementKind::Sale,
                delta,
                format!("Sale for order {}", order.order_id),
            )
            .with_reference(reference)
            .with_unit_price(line.unit_price);

            let (movement, alert) =
                stock_ledger::append_movement(tx, product, request, &self.thresholds, at).await?;
            movements.push(movement);
            alerts.extend(alert);
        }

        let income = mappers::sale_income(order.order_id, order.total, order.payment_method.as_deref());
        let income = cash_flow::record_optional(tx, income, at).await?.map(|r| r.entry);

        Ok(SaleOutcome {
            movements,
            income,
            alerts,
            replayed: false,
        })
    }

    /// Reverse a confirmed sale before fulfilment: restore stock with
    /// ADJUSTMENT movements and remove the order's income entry.
    #[instrument(skip(self), err)]
    pub async fn on_sale_cancelled(
        &self,
        order_id: OrderId,
    ) -> Result<SaleCancellation, ReconciliationError> {
        let at = Utc::now();
        let mut tx = self.store.begin().await?;
        let result = self.sale_cancellation_in_tx(tx.as_mut(), order_id, at).await;
        let outcome = finish(tx, result).await?;

        if !outcome.replayed {
            info!(movements = outcome.movements.len(), "sale cancelled");
        }
        Ok(outcome)
    }

    async fn sale_cancellation_in_tx(
        &self,
        tx: &mut dyn LedgerTx,
        order_id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<SaleCancellation, ReconciliationError> {
        let reference = Reference::order(order_id);

        let sales = tx.movements_by_reference(reference, MovementKind::Sale).await?;
        if sales.is_empty() {
            return Err(DomainError::not_found(format!("sale for order {order_id}")).into());
        }
        let mut products =
            stock_ledger::lock_products(tx, sales.iter().map(|m| m.product_id)).await?;

        let reversals = tx
            .movements_by_reference(reference, MovementKind::Adjustment)
            .await?;
        if !reversals.is_empty() {
            return Ok(SaleCancellation {
                movements: reversals,
                reversed_income: None,
                replayed: true,
            });
        }

        let mut movements = Vec::with_capacity(sales.len());
        for sale in &sales {
            let product = products
                .get_mut(&sale.product_id)
                .ok_or_else(|| DomainError::not_found(format!("product {}", sale.product_id)))?;
            let mut request = MovementRequest::new(
                sale.product_id,
                MovementKind::Adjustment,
                -sale.delta,
                format!("Cancellation of order {order_id}"),
            )
            .with_reference(reference);
            if let Some(price) = sale.unit_price {
                request = request.with_unit_price(price);
            }
            let (movement, _) =
                stock_ledger::append_movement(tx, product, request, &self.thresholds, at).await?;
            movements.push(movement);
        }

        let income = tx.find_cash_flow(reference, CashFlowCategory::Sales).await?;
        if let Some(entry) = &income {
            tx.delete_cash_flow(entry.id).await?;
        }

        Ok(SaleCancellation {
            movements,
            reversed_income: income,
            replayed: false,
        })
    }

    /// Refund an order. Without an explicit amount the recorded sale total is
    /// refunded.
    #[instrument(skip(self, amount, payment_method), err)]
    pub async fn on_refund(
        &self,
        order_id: OrderId,
        amount: Option<Decimal>,
        payment_method: Option<&str>,
    ) -> Result<CashFlowEntry, ReconciliationError> {
        let at = Utc::now();
        let mut tx = self.store.begin().await?;
        let result = self
            .refund_in_tx(tx.as_mut(), order_id, amount, payment_method, at)
            .await;
        let recorded = finish(tx, result).await?;

        if recorded.created {
            info!(amount = %recorded.entry.amount, "refund recorded");
        }
        Ok(recorded.entry)
    }

    async fn refund_in_tx(
        &self,
        tx: &mut dyn LedgerTx,
        order_id: OrderId,
        amount: Option<Decimal>,
        payment_method: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<cash_flow::Recorded, ReconciliationError> {
        let amount = match amount {
            Some(amount) => amount,
            None => tx
                .find_cash_flow(Reference::order(order_id), CashFlowCategory::Sales)
                .await?
                .map(|income| income.amount)
                .ok_or_else(|| {
                    DomainError::not_found(format!("sale income for order {order_id}"))
                })?,
        };
        let entry = mappers::refund_expense(order_id, amount, payment_method)
            .ok_or_else(|| DomainError::validation("refund amount must be positive"))?;
        cash_flow::record(tx, entry, at).await
    }

    // ---------------------------------------------------------------------
    // Inventory adjustments
    // ---------------------------------------------------------------------

    /// ADJUSTMENT movement, plus a SHRINKAGE expense for losses.
    #[instrument(
        skip(self, adjustment),
        fields(product_id = %adjustment.product_id, delta = adjustment.delta),
        err
    )]
    pub async fn on_inventory_adjusted(
        &self,
        adjustment: InventoryAdjustment,
    ) -> Result<AdjustmentOutcome, ReconciliationError> {
        let at = Utc::now();
        let mut tx = self.store.begin().await?;
        let result = self.adjustment_in_tx(tx.as_mut(), &adjustment, at).await;
        let outcome = finish(tx, result).await?;

        if !outcome.replayed {
            info!(
                new_stock = outcome.movement.new_stock,
                shrinkage = outcome.shrinkage.is_some(),
                "inventory adjusted"
            );
            self.alerts.publish(outcome.alert.as_slice());
        }
        Ok(outcome)
    }

    async fn adjustment_in_tx(
        &self,
        tx: &mut dyn LedgerTx,
        adjustment: &InventoryAdjustment,
        at: DateTime<Utc>,
    ) -> Result<AdjustmentOutcome, ReconciliationError> {
        let reference = match adjustment.adjustment_id {
            Some(id) => Reference::adjustment(id),
            None => Reference::product(adjustment.product_id),
        };

        let mut product = stock_ledger::lock_product(tx, adjustment.product_id).await?;

        if adjustment.adjustment_id.is_some() {
            let applied = tx
                .movements_by_reference(reference, MovementKind::Adjustment)
                .await?;
            if let Some(movement) = applied.into_iter().next() {
                let shrinkage = tx
                    .find_cash_flow(reference, CashFlowCategory::Shrinkage)
                    .await?;
                return Ok(AdjustmentOutcome {
                    movement,
                    shrinkage,
                    alert: None,
                    replayed: true,
                });
            }
        }

        let unit_cost = mappers::shrinkage_unit_cost(product.last_cost, product.base_price);

        let mut request = MovementRequest::new(
            adjustment.product_id,
            MovementKind::Adjustment,
            adjustment.delta,
            adjustment.reason.clone(),
        )
        .with_reference(reference);
        if adjustment.delta < 0 && unit_cost > Decimal::ZERO {
            request = request.with_unit_cost(unit_cost);
        }
        let (movement, alert) =
            stock_ledger::append_movement(tx, &mut product, request, &self.thresholds, at).await?;

        let shrinkage = if adjustment.delta < 0 {
            let expense = mappers::shrinkage_expense(
                adjustment.product_id,
                adjustment.adjustment_id,
                adjustment.delta,
                product.last_cost,
                product.base_price,
                &adjustment.reason,
            );
            cash_flow::record_optional(tx, expense, at).await?.map(|r| r.entry)
        } else {
            None
        };

        Ok(AdjustmentOutcome {
            movement,
            shrinkage,
            alert,
            replayed: false,
        })
    }

    // ---------------------------------------------------------------------
    // Purchase orders
    // ---------------------------------------------------------------------

    #[instrument(
        skip(self, order),
        fields(purchase_order_id = %order.order_id, order_number = %order.order_number),
        err
    )]
    pub async fn create_purchase_order(
        &self,
        order: NewPurchaseOrder,
    ) -> Result<PurchaseOrderSnapshot, ReconciliationError> {
        let at = Utc::now();
        let mut po = PurchaseOrder::empty(order.order_id);
        execute(
            &mut po,
            PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                order_id: order.order_id,
                order_number: order.order_number,
                supplier_id: order.supplier_id,
                lines: order.lines,
                tax: order.tax,
                expected_on: order.expected_on,
                occurred_at: at,
            }),
        )?;
        let snapshot = po.snapshot()?;

        let mut tx = self.store.begin().await?;
        let result: Result<PurchaseOrderSnapshot, ReconciliationError> = async {
            ensure_products_exist(tx.as_mut(), &snapshot).await?;
            match tx.insert_purchase_order(&snapshot).await {
                Ok(()) => Ok(persisted_purchase_order(&snapshot)),
                Err(StoreError::UniqueViolation(_)) => Err(DomainError::conflict(format!(
                    "purchase order number {} already exists",
                    snapshot.order_number
                ))
                .into()),
                Err(err) => Err(err.into()),
            }
        }
        .await;
        let snapshot = finish(tx, result).await?;

        info!(total = %snapshot.total, "purchase order created");
        Ok(snapshot)
    }

    /// Replace the lines of a purchase order nothing has been received on.
    #[instrument(skip(self, lines, tax), err)]
    pub async fn edit_purchase_order(
        &self,
        purchase_order_id: PurchaseOrderId,
        lines: Vec<NewLine>,
        tax: Decimal,
        expected: ExpectedVersion,
    ) -> Result<PurchaseOrderSnapshot, ReconciliationError> {
        let at = Utc::now();
        let command = PurchaseOrderCommand::EditItems(EditItems {
            order_id: purchase_order_id,
            lines,
            tax,
            occurred_at: at,
        });
        let snapshot = self
            .change_purchase_order(purchase_order_id, command, expected)
            .await?;

        info!(total = %snapshot.total, version = snapshot.version, "purchase order edited");
        Ok(snapshot)
    }

    #[instrument(skip(self), err)]
    pub async fn cancel_purchase_order(
        &self,
        purchase_order_id: PurchaseOrderId,
        expected: ExpectedVersion,
    ) -> Result<PurchaseOrderSnapshot, ReconciliationError> {
        let command = PurchaseOrderCommand::Cancel(Cancel {
            order_id: purchase_order_id,
            occurred_at: Utc::now(),
        });
        let snapshot = self
            .change_purchase_order(purchase_order_id, command, expected)
            .await?;

        info!("purchase order cancelled");
        Ok(snapshot)
    }

    /// Run a command that touches only the purchase order row.
    async fn change_purchase_order(
        &self,
        purchase_order_id: PurchaseOrderId,
        command: PurchaseOrderCommand,
        expected: ExpectedVersion,
    ) -> Result<PurchaseOrderSnapshot, ReconciliationError> {
        let mut tx = self.store.begin().await?;
        let result: Result<PurchaseOrderSnapshot, ReconciliationError> = async {
            let stored = lock_purchase_order(tx.as_mut(), purchase_order_id).await?;
            expected.check(stored.version)?;
            let version = stored.version;

            let mut po = PurchaseOrder::from_snapshot(stored)?;
            execute(&mut po, command)?;
            let snapshot = po.snapshot()?;
            ensure_products_exist(tx.as_mut(), &snapshot).await?;
            tx.update_purchase_order(&snapshot, ExpectedVersion::Exact(version))
                .await?;
            Ok(persisted_purchase_order(&snapshot))
        }
        .await;
        finish(tx, result).await
    }

    /// Receive goods against a purchase order: per line, value the receipt and
    /// record a PURCHASE movement, then store the recomputed order status.
    ///
    /// A `receipt_id` seen before on the same order is a no-op.
    #[instrument(skip(self, lines), fields(lines = lines.len()), err)]
    pub async fn on_purchase_received(
        &self,
        purchase_order_id: PurchaseOrderId,
        lines: Vec<ReceiptLine>,
        receipt_id: Option<ReceiptId>,
    ) -> Result<ReceiptOutcome, ReconciliationError> {
        let at = Utc::now();
        let mut tx = self.store.begin().await?;
        let result = self
            .purchase_receipt_in_tx(tx.as_mut(), purchase_order_id, lines, receipt_id, at)
            .await;
        let outcome = finish(tx, result).await?;

        if outcome.replayed {
            info!("receipt already applied");
        } else {
            info!(
                status = %outcome.purchase_order.status,
                movements = outcome.movements.len(),
                "purchase order received"
            );
        }
        Ok(outcome)
    }

    async fn purchase_receipt_in_tx(
        &self,
        tx: &mut dyn LedgerTx,
        purchase_order_id: PurchaseOrderId,
        lines: Vec<ReceiptLine>,
        receipt_id: Option<ReceiptId>,
        at: DateTime<Utc>,
    ) -> Result<ReceiptOutcome, ReconciliationError> {
        let stored = lock_purchase_order(tx, purchase_order_id).await?;

        if let Some(receipt_id) = receipt_id {
            match tx.claim_receipt(receipt_id, purchase_order_id).await? {
                None => {}
                Some(holder) if holder == purchase_order_id => {
                    return Ok(ReceiptOutcome {
                        purchase_order: stored,
                        valuations: Vec::new(),
                        movements: Vec::new(),
                        replayed: true,
                    });
                }
                Some(holder) => {
                    return Err(DomainError::conflict(format!(
                        "receipt {receipt_id} already applied to purchase order {holder}"
                    ))
                    .into());
                }
            }
        }

        let version = stored.version;
        let mut po = PurchaseOrder::from_snapshot(stored)?;
        let events = execute(
            &mut po,
            PurchaseOrderCommand::ReceiveItems(ReceiveItems {
                order_id: purchase_order_id,
                lines,
                occurred_at: at,
            }),
        )?;
        let received: Vec<ReceivedLine> = events
            .into_iter()
            .filter_map(|event| match event {
                PurchaseOrderEvent::ItemsReceived(e) => Some(e.lines),
                _ => None,
            })
            .flatten()
            .collect();

        let reference = Reference::purchase_order(purchase_order_id);
        let reason = format!("Receipt for purchase order {}", po.order_number());
        let mut products =
            stock_ledger::lock_products(tx, received.iter().map(|l| l.product_id)).await?;

        let mut valuations = Vec::with_capacity(received.len());
        let mut movements = Vec::with_capacity(received.len());
        for line in &received {
            let product = products
                .get_mut(&line.product_id)
                .ok_or_else(|| DomainError::not_found(format!("product {}", line.product_id)))?;
            let valuation = value_receipt(product, line.quantity, line.unit_cost)?;
            product.apply_valuation(&valuation)?;

            let request = MovementRequest::new(
                line.product_id,
                MovementKind::Purchase,
                line.quantity,
                reason.clone(),
            )
            .with_reference(reference)
            .with_unit_cost(line.unit_cost);
            let (movement, _) =
                stock_ledger::append_movement(tx, product, request, &self.thresholds, at).await?;

            valuations.push(valuation);
            movements.push(movement);
        }

        let snapshot = po.snapshot()?;
        tx.update_purchase_order(&snapshot, ExpectedVersion::Exact(version))
            .await?;

        Ok(ReceiptOutcome {
            purchase_order: persisted_purchase_order(&snapshot),
            valuations,
            movements,
            replayed: false,
        })
    }

    /// Mark a purchase order paid and record the PURCHASES expense for its
    /// total. Paying an already-paid order returns the recorded state.
    #[instrument(skip(self, payment_method), err)]
    pub async fn on_purchase_paid(
        &self,
        purchase_order_id: PurchaseOrderId,
        payment_method: &str,
    ) -> Result<PaymentOutcome, ReconciliationError> {
        let at = Utc::now();
        let mut tx = self.store.begin().await?;
        let result = self
            .payment_in_tx(tx.as_mut(), purchase_order_id, payment_method, at)
            .await;
        let outcome = finish(tx, result).await?;

        if outcome.replayed {
            info!("purchase order already paid");
        } else {
            info!(total = %outcome.purchase_order.total, "purchase order paid");
        }
        Ok(outcome)
    }

    async fn payment_in_tx(
        &self,
        tx: &mut dyn LedgerTx,
        purchase_order_id: PurchaseOrderId,
        payment_method: &str,
        at: DateTime<Utc>,
    ) -> Result<PaymentOutcome, ReconciliationError> {
        let stored = lock_purchase_order(tx, purchase_order_id).await?;
        let reference = Reference::purchase_order(purchase_order_id);

        if stored.payment_status == PaymentStatus::Paid {
            let expense = tx
                .find_cash_flow(reference, CashFlowCategory::Purchases)
                .await?;
            return Ok(PaymentOutcome {
                purchase_order: stored,
                expense,
                replayed: true,
            });
        }

        let version = stored.version;
        let mut po = PurchaseOrder::from_snapshot(stored)?;
        execute(
            &mut po,
            PurchaseOrderCommand::MarkPaid(MarkPaid {
                order_id: purchase_order_id,
                payment_method: payment_method.to_string(),
                occurred_at: at,
            }),
        )?;
        let snapshot = po.snapshot()?;
        tx.update_purchase_order(&snapshot, ExpectedVersion::Exact(version))
            .await?;

        let expense = mappers::purchase_expense(
            purchase_order_id,
            po.order_number(),
            po.total(),
            payment_method,
        );
        let expense = cash_flow::record_optional(tx, expense, at)
            .await?
            .map(|r| r.entry);

        Ok(PaymentOutcome {
            purchase_order: persisted_purchase_order(&snapshot),
            expense,
            replayed: false,
        })
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Current stock, average cost and last cost of a product.
    pub async fn product_stock(
        &self,
        product_id: ProductId,
    ) -> Result<ProductStock, ReconciliationError> {
        let mut tx = self.store.begin().await?;
        let result = get_product(tx.as_mut(), product_id).await;
        finish(tx, result).await
    }

    pub async fn product_ids(&self) -> Result<Vec<ProductId>, ReconciliationError> {
        let mut tx = self.store.begin().await?;
        let result = tx.product_ids().await.map_err(ReconciliationError::from);
        finish(tx, result).await
    }

    /// A product's movements, newest first.
    pub async fn movements(
        &self,
        product_id: ProductId,
        page: Pagination,
    ) -> Result<MovementPage, ReconciliationError> {
        let mut tx = self.store.begin().await?;
        let result: Result<MovementPage, ReconciliationError> = async {
            get_product(tx.as_mut(), product_id).await?;
            Ok(tx.movement_page(product_id, page).await?)
        }
        .await;
        finish(tx, result).await
    }

    /// Entries dated within `period` with their totals.
    pub async fn cash_flow_in_period(
        &self,
        period: CashFlowPeriod,
    ) -> Result<CashFlowReport, ReconciliationError> {
        let mut tx = self.store.begin().await?;
        let result = tx
            .cash_flow_in_period(period)
            .await
            .map_err(ReconciliationError::from);
        let entries = finish(tx, result).await?;
        let summary = CashFlowSummary::from_entries(&entries);
        Ok(CashFlowReport { entries, summary })
    }

    pub async fn purchase_order(
        &self,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<PurchaseOrderSnapshot, ReconciliationError> {
        let mut tx = self.store.begin().await?;
        let result: Result<PurchaseOrderSnapshot, ReconciliationError> = async {
            tx.get_purchase_order(purchase_order_id)
                .await?
                .ok_or_else(|| {
                    DomainError::not_found(format!("purchase order {purchase_order_id}")).into()
                })
        }
        .await;
        finish(tx, result).await
    }

    /// Replay a product's movements from its opening stock and compare with
    /// the stored stock.
    #[instrument(skip(self), err)]
    pub async fn verify_product_ledger(
        &self,
        product_id: ProductId,
    ) -> Result<LedgerVerification, ReconciliationError> {
        let mut tx = self.store.begin().await?;
        let result: Result<LedgerVerification, ReconciliationError> = async {
            let product = get_product(tx.as_mut(), product_id).await?;
            let movements = tx.product_movements(product_id).await?;
            Ok(verify_ledger(&product, &movements))
        }
        .await;
        let verification = finish(tx, result).await?;

        if !verification.is_consistent() {
            warn!(
                recorded_stock = verification.recorded_stock,
                replayed_stock = verification.replayed_stock,
                breaks = verification.breaks.len(),
                "stock ledger inconsistent"
            );
        }
        Ok(verification)
    }
}

/// Handle `command` and apply the resulting events.
fn execute(
    po: &mut PurchaseOrder,
    command: PurchaseOrderCommand,
) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
    let events = po.handle(&command)?;
    for event in &events {
        po.apply(event);
    }
    Ok(events)
}

async fn get_product(
    tx: &mut dyn LedgerTx,
    product_id: ProductId,
) -> Result<ProductStock, ReconciliationError> {
    tx.get_product(product_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("product {product_id}")).into())
}

async fn lock_purchase_order(
    tx: &mut dyn LedgerTx,
    purchase_order_id: PurchaseOrderId,
) -> Result<PurchaseOrderSnapshot, ReconciliationError> {
    tx.lock_purchase_order(purchase_order_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("purchase order {purchase_order_id}")).into())
}

async fn ensure_products_exist(
    tx: &mut dyn LedgerTx,
    po: &PurchaseOrderSnapshot,
) -> Result<(), ReconciliationError> {
    for item in &po.items {
        get_product(tx, item.product_id).await?;
    }
    Ok(())
}
