//! `stockbook-core` : domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the stock ledger,
//! the cash-flow ledger and purchasing (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod enumeration;
pub mod error;
pub mod id;
pub mod money;
pub mod reference;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    AdjustmentId, CashFlowEntryId, MovementId, OrderId, ProductId, PurchaseOrderId, ReceiptId,
    SupplierId,
};
pub use money::{round_money, MONEY_SCALE};
pub use reference::{Reference, ReferenceKind};
pub use value_object::ValueObject;
