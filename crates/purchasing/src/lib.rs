//! Purchasing domain module (purchase-order state machine).
//!
//! This crate contains business rules for purchase orders, implemented purely as
//! deterministic domain logic (no IO, no storage). Receipts resolve into
//! product/quantity/cost lines that the infra layer feeds to valuation and the
//! stock ledger inside one transaction.

pub mod order;

pub use order::{
    Cancel, CreatePurchaseOrder, EditItems, ItemsEdited, ItemsReceived, MarkPaid, NewLine,
    PaymentStatus, PurchaseOrder, PurchaseOrderCancelled, PurchaseOrderCommand,
    PurchaseOrderCreated, PurchaseOrderEvent, PurchaseOrderItem, PurchaseOrderPaid,
    PurchaseOrderSnapshot, PurchaseOrderStatus, ReceiptLine, ReceiveItems, ReceivedLine,
    derive_status,
};
