use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_core::{
    Aggregate, AggregateRoot, DomainError, ProductId, PurchaseOrderId, SupplierId, closed_enum,
    money::ensure_non_negative,
};
use stockbook_events::Event;

/// Purchase order receiving lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    Pending,
    PartiallyReceived,
    Received,
    Cancelled,
}

closed_enum!(PurchaseOrderStatus, "purchase order status", {
    PurchaseOrderStatus::Pending => "PENDING",
    PurchaseOrderStatus::PartiallyReceived => "PARTIALLY_RECEIVED",
    PurchaseOrderStatus::Received => "RECEIVED",
    PurchaseOrderStatus::Cancelled => "CANCELLED",
});

impl PurchaseOrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PurchaseOrderStatus::Received | PurchaseOrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
}

closed_enum!(PaymentStatus, "payment status", {
    PaymentStatus::Pending => "PENDING",
    PaymentStatus::Paid => "PAID",
});

/// Purchase order line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderItem {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity_ordered: i64,
    /// Never decreases; capped at `quantity_ordered`.
    pub quantity_received: i64,
    pub unit_price: Decimal,
}

impl PurchaseOrderItem {
    pub fn remaining(&self) -> i64 {
        self.quantity_ordered - self.quantity_received
    }

    pub fn line_total(&self) -> Decimal {
        Decimal::from(self.quantity_ordered) * self.unit_price
    }
}

/// A line as supplied on create/edit, before line numbers are assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Decimal,
}

/// Quantity received against one line. `unit_cost` defaults to the line's
/// unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub line_no: u32,
    pub quantity: i64,
    pub unit_cost: Option<Decimal>,
}

/// A receipt line resolved against the order: the product and cost the
/// valuation engine and stock ledger need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_cost: Decimal,
}

/// Status as a pure function of the received/ordered ratios.
pub fn derive_status(items: &[PurchaseOrderItem]) -> PurchaseOrderStatus {
    if !items.is_empty() && items.iter().all(|i| i.quantity_received >= i.quantity_ordered) {
        PurchaseOrderStatus::Received
    } else if items.iter().any(|i| i.quantity_received > 0) {
        PurchaseOrderStatus::PartiallyReceived
    } else {
        PurchaseOrderStatus::Pending
    }
}

/// Persisted shape of a purchase order (one row plus its items).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderSnapshot {
    pub id: PurchaseOrderId,
    pub order_number: String,
    pub supplier_id: SupplierId,
    pub status: PurchaseOrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub items: Vec<PurchaseOrderItem>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub ordered_at: DateTime<Utc>,
    pub expected_on: Option<NaiveDate>,
    pub paid_at: Option<DateTime<Utc>>,
    pub version: u64,
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    order_number: String,
    supplier_id: Option<SupplierId>,
    status: PurchaseOrderStatus,
    payment_status: PaymentStatus,
    payment_method: Option<String>,
    items: Vec<PurchaseOrderItem>,
    subtotal: Decimal,
    tax: Decimal,
    ordered_at: Option<DateTime<Utc>>,
    expected_on: Option<NaiveDate>,
    paid_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Not-yet-created instance; the target of `CreatePurchaseOrder`.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            order_number: String::new(),
            supplier_id: None,
            status: PurchaseOrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: None,
            items: Vec::new(),
            subtotal: Decimal::ZERO,
            tax: Decimal::ZERO,
            ordered_at: None,
            expected_on: None,
            paid_at: None,
            version: 0,
            created: false,
        }
    }

    /// Rebuild from storage. Status is re-derived rather than trusted unless
    /// the order was cancelled.
    pub fn from_snapshot(s: PurchaseOrderSnapshot) -> Result<Self, DomainError> {
        let status = match s.status {
            PurchaseOrderStatus::Cancelled => PurchaseOrderStatus::Cancelled,
            _ => derive_status(&s.items),
        };
        if status != s.status {
            return Err(DomainError::invariant(format!(
                "stored status {} disagrees with received quantities ({})",
                s.status, status
            )));
        }
        Ok(Self {
            id: s.id,
            order_number: s.order_number,
            supplier_id: Some(s.supplier_id),
            status,
            payment_status: s.payment_status,
            payment_method: s.payment_method,
            items: s.items,
            subtotal: s.subtotal,
            tax: s.tax,
            ordered_at: Some(s.ordered_at),
            expected_on: s.expected_on,
            paid_at: s.paid_at,
            version: s.version,
            created: true,
        })
    }

    pub fn snapshot(&self) -> Result<PurchaseOrderSnapshot, DomainError> {
        let (Some(supplier_id), Some(ordered_at)) = (self.supplier_id, self.ordered_at) else {
            return Err(DomainError::not_found(format!("purchase order {}", self.id)));
        };
        Ok(PurchaseOrderSnapshot {
            id: self.id,
            order_number: self.order_number.clone(),
            supplier_id,
            status: self.status,
            payment_status: self.payment_status,
            payment_method: self.payment_method.clone(),
            items: self.items.clone(),
            subtotal: self.subtotal,
            tax: self.tax,
            total: self.total(),
            ordered_at,
            expected_on: self.expected_on,
            paid_at: self.paid_at,
            version: self.version,
        })
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn items(&self) -> &[PurchaseOrderItem] {
        &self.items
    }

    pub fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    pub fn tax(&self) -> Decimal {
        self.tax
    }

    pub fn total(&self) -> Decimal {
        self.subtotal + self.tax
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    fn has_receipts(&self) -> bool {
        self.items.iter().any(|i| i.quantity_received > 0)
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub order_number: String,
    pub supplier_id: SupplierId,
    pub lines: Vec<NewLine>,
    pub tax: Decimal,
    pub expected_on: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: EditItems (replaces every line; PENDING with nothing received).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditItems {
    pub order_id: PurchaseOrderId,
    pub lines: Vec<NewLine>,
    pub tax: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveItems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveItems {
    pub order_id: PurchaseOrderId,
    pub lines: Vec<ReceiptLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkPaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPaid {
    pub order_id: PurchaseOrderId,
    pub payment_method: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    EditItems(EditItems),
    ReceiveItems(ReceiveItems),
    MarkPaid(MarkPaid),
    Cancel(Cancel),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub order_id: PurchaseOrderId,
    pub order_number: String,
    pub supplier_id: SupplierId,
    pub items: Vec<PurchaseOrderItem>,
    pub tax: Decimal,
    pub expected_on: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemsEdited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsEdited {
    pub order_id: PurchaseOrderId,
    pub items: Vec<PurchaseOrderItem>,
    pub tax: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemsReceived.
///
/// Carries the resolved product and unit cost per line so the caller can
/// drive valuation and the PURCHASE movements in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsReceived {
    pub order_id: PurchaseOrderId,
    pub lines: Vec<ReceivedLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderPaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderPaid {
    pub order_id: PurchaseOrderId,
    pub payment_method: String,
    pub total: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCancelled {
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    ItemsEdited(ItemsEdited),
    ItemsReceived(ItemsReceived),
    PurchaseOrderPaid(PurchaseOrderPaid),
    PurchaseOrderCancelled(PurchaseOrderCancelled),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.order.created",
            PurchaseOrderEvent::ItemsEdited(_) => "purchasing.order.items_edited",
            PurchaseOrderEvent::ItemsReceived(_) => "purchasing.order.items_received",
            PurchaseOrderEvent::PurchaseOrderPaid(_) => "purchasing.order.paid",
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => "purchasing.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::ItemsEdited(e) => e.occurred_at,
            PurchaseOrderEvent::ItemsReceived(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderPaid(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.order_id;
                self.order_number = e.order_number.clone();
                self.supplier_id = Some(e.supplier_id);
                self.status = PurchaseOrderStatus::Pending;
                self.payment_status = PaymentStatus::Pending;
                self.set_items(e.items.clone(), e.tax);
                self.ordered_at = Some(e.occurred_at);
                self.expected_on = e.expected_on;
                self.created = true;
            }
            PurchaseOrderEvent::ItemsEdited(e) => {
                self.set_items(e.items.clone(), e.tax);
            }
            PurchaseOrderEvent::ItemsReceived(e) => {
                for line in &e.lines {
                    if let Some(item) = self.items.iter_mut().find(|i| i.line_no == line.line_no) {
                        item.quantity_received =
                            (item.quantity_received + line.quantity).min(item.quantity_ordered);
                    }
                }
                self.status = derive_status(&self.items);
            }
            PurchaseOrderEvent::PurchaseOrderPaid(e) => {
                self.payment_status = PaymentStatus::Paid;
                self.payment_method = Some(e.payment_method.clone());
                self.paid_at = Some(e.occurred_at);
            }
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => {
                self.status = PurchaseOrderStatus::Cancelled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::EditItems(cmd) => self.handle_edit(cmd),
            PurchaseOrderCommand::ReceiveItems(cmd) => self.handle_receive(cmd),
            PurchaseOrderCommand::MarkPaid(cmd) => self.handle_mark_paid(cmd),
            PurchaseOrderCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

/// Validate lines and number them from 1.
fn number_lines(lines: &[NewLine]) -> Result<Vec<PurchaseOrderItem>, DomainError> {
    if lines.is_empty() {
        return Err(DomainError::validation("purchase order needs at least one line"));
    }
    lines
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            if line.quantity <= 0 {
                return Err(DomainError::validation("quantity must be positive"));
            }
            ensure_non_negative(line.unit_price, "unit price")?;
            Ok(PurchaseOrderItem {
                line_no: idx as u32 + 1,
                product_id: line.product_id,
                quantity_ordered: line.quantity,
                quantity_received: 0,
                unit_price: line.unit_price,
            })
        })
        .collect()
}

impl PurchaseOrder {
    fn set_items(&mut self, items: Vec<PurchaseOrderItem>, tax: Decimal) {
        self.subtotal = items.iter().map(PurchaseOrderItem::line_total).sum();
        self.tax = tax;
        self.items = items;
    }

    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("purchase order {}", self.id)));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    /// PENDING, nothing received, unpaid.
    fn ensure_untouched(&self, action: &str) -> Result<(), DomainError> {
        if self.status != PurchaseOrderStatus::Pending || self.has_receipts() {
            return Err(DomainError::invalid_transition(format!(
                "cannot {action} purchase order in status {}",
                self.status
            )));
        }
        if self.payment_status == PaymentStatus::Paid {
            return Err(DomainError::invalid_transition(format!(
                "cannot {action} a paid purchase order"
            )));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreatePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }
        self.ensure_order_id(cmd.order_id)?;
        if cmd.order_number.trim().is_empty() {
            return Err(DomainError::validation("order number cannot be empty"));
        }
        ensure_non_negative(cmd.tax, "tax")?;
        let items = number_lines(&cmd.lines)?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCreated(
            PurchaseOrderCreated {
                order_id: cmd.order_id,
                order_number: cmd.order_number.trim().to_string(),
                supplier_id: cmd.supplier_id,
                items,
                tax: cmd.tax,
                expected_on: cmd.expected_on,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_edit(&self, cmd: &EditItems) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_untouched("edit")?;
        ensure_non_negative(cmd.tax, "tax")?;
        let items = number_lines(&cmd.lines)?;

        Ok(vec![PurchaseOrderEvent::ItemsEdited(ItemsEdited {
            order_id: cmd.order_id,
            items,
            tax: cmd.tax,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(
        &self,
        cmd: &ReceiveItems,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "cannot receive against purchase order in status {}",
                self.status
            )));
        }

        let mut resolved: Vec<ReceivedLine> = Vec::new();
        for line in &cmd.lines {
            // Zero means "nothing for this line in this delivery".
            if line.quantity == 0 {
                continue;
            }
            if resolved.iter().any(|r| r.line_no == line.line_no) {
                return Err(DomainError::validation(format!(
                    "line {} appears twice in one receipt",
                    line.line_no
                )));
            }
            let item = self
                .items
                .iter()
                .find(|i| i.line_no == line.line_no)
                .ok_or_else(|| DomainError::not_found(format!("purchase order line {}", line.line_no)))?;

            if line.quantity < 0 || line.quantity > item.remaining() {
                return Err(DomainError::OverReceipt {
                    line_no: item.line_no,
                    remaining: item.remaining(),
                    attempted: line.quantity,
                });
            }
            let unit_cost = line.unit_cost.unwrap_or(item.unit_price);
            ensure_non_negative(unit_cost, "unit cost")?;

            resolved.push(ReceivedLine {
                line_no: item.line_no,
                product_id: item.product_id,
                quantity: line.quantity,
                unit_cost,
            });
        }

        if resolved.is_empty() {
            return Err(DomainError::validation("receipt has nothing to receive"));
        }

        Ok(vec![PurchaseOrderEvent::ItemsReceived(ItemsReceived {
            order_id: cmd.order_id,
            lines: resolved,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_paid(&self, cmd: &MarkPaid) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status == PurchaseOrderStatus::Cancelled {
            return Err(DomainError::invalid_transition(
                "cannot pay a cancelled purchase order",
            ));
        }
        if self.payment_status == PaymentStatus::Paid {
            return Err(DomainError::invalid_transition("purchase order is already paid"));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderPaid(PurchaseOrderPaid {
            order_id: cmd.order_id,
            payment_method: cmd.payment_method.clone(),
            total: self.total(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &Cancel) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_untouched("cancel")?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCancelled(
            PurchaseOrderCancelled {
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}
