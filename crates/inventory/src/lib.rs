//! Inventory domain module: stock ledger and valuation.
//!
//! Business rules for moving stock and valuing it, implemented purely as
//! deterministic domain logic (no IO, no storage). The infra layer wraps
//! these rules in transactions.

pub mod movement;
pub mod replay;
pub mod threshold;
pub mod valuation;

pub use movement::{MovementKind, MovementRequest, ProductStock, StockMovement};
pub use replay::{ChainBreak, LedgerVerification, verify_ledger};
pub use threshold::{AlertLevel, StockAlert, StockAlertRaised, StockThresholds};
pub use valuation::{ReceiptValuation, value_receipt, weighted_average_cost};
