//! Reconciliation of stock, valuation, cash flow and purchase orders.
//!
//! ```text
//! business event
//!   ↓
//! 1. begin unit of work
//!   ↓
//! 2. lock the rows it mutates (products ascending by id, purchase order)
//!   ↓
//! 3. decide with the pure domain rules (movement plan, valuation, PO commands)
//!   ↓
//! 4. write movements, product rows, cash-flow entries, PO row
//!   ↓
//! 5. commit (or roll back everything on the first error)
//!   ↓
//! 6. publish stock alerts
//! ```

mod cash_flow;
mod coordinator;
mod inputs;
mod stock_ledger;

use tracing::warn;

use crate::error::ReconciliationError;
use crate::store::LedgerTx;

pub use coordinator::ReconciliationCoordinator;
pub use inputs::{
    AdjustmentOutcome, CashFlowReport, InventoryAdjustment, MovementOutcome, NewProduct,
    NewPurchaseOrder, PaymentOutcome, ReceiptOutcome, SaleCancellation, SaleLine, SaleOrder,
    SaleOutcome,
};

/// Commit on success; otherwise roll back and hand the original error back.
async fn finish<T>(
    tx: Box<dyn LedgerTx>,
    result: Result<T, ReconciliationError>,
) -> Result<T, ReconciliationError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}
