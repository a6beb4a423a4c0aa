//! Accounting module (cash-flow ledger).
//!
//! Pure domain logic only: entry types, the mappers from business events to
//! entries, and period summaries. Persistence and idempotent insertion live in
//! the infra layer.

pub mod cash_flow;
pub mod mappers;
pub mod summary;

pub use cash_flow::{
    CashFlowCategory, CashFlowDirection, CashFlowEntry, IdempotencyKey, NewCashFlowEntry,
};
pub use summary::{CashFlowPeriod, CashFlowSummary};
