//! Infrastructure layer: transactional store, reconciliation coordinator,
//! alert publication, configuration.

pub mod alerts;
pub mod config;
pub mod error;
pub mod reconciliation;
pub mod store;

pub use alerts::{AlertEnvelope, AlertPublisher};
pub use config::{DatabaseSettings, Settings, ThresholdSettings, TransactionSettings};
pub use error::ReconciliationError;
pub use reconciliation::{
    AdjustmentOutcome, CashFlowReport, InventoryAdjustment, MovementOutcome, NewProduct,
    NewPurchaseOrder, PaymentOutcome, ReceiptOutcome, ReconciliationCoordinator,
    SaleCancellation, SaleLine, SaleOrder, SaleOutcome,
};
pub use store::{
    FailPoint, InMemoryStore, LedgerStore, LedgerTx, MovementPage, Pagination, PostgresStore,
    StoreError,
};
