//! Stock ledger audit: replays every product's movements from its opening
//! stock and reports products whose ledger and stock disagree.

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use stockbook_events::EventBus;
use stockbook_infra::{AlertEnvelope, LedgerStore, ReconciliationCoordinator, ReconciliationError};
use stockbook_inventory::LedgerVerification;

#[derive(Debug, Parser)]
#[command(name = "stockbook-audit")]
#[command(about = "Replay every product's stock ledger and report drift", long_about = None)]
pub struct Args {
    /// Apply the bundled schema migration before auditing.
    #[arg(long, default_value_t = false)]
    pub migrate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub products_checked: usize,
    pub inconsistent: Vec<LedgerVerification>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.inconsistent.is_empty()
    }
}

/// Verify every registered product.
pub async fn run<S, B>(
    coordinator: &ReconciliationCoordinator<S, B>,
) -> Result<AuditReport, ReconciliationError>
where
    S: LedgerStore,
    B: EventBus<AlertEnvelope>,
{
    let product_ids = coordinator.product_ids().await?;
    let mut inconsistent = Vec::new();

    for product_id in &product_ids {
        let verification = coordinator.verify_product_ledger(*product_id).await?;
        if !verification.is_consistent() {
            inconsistent.push(verification);
        }
    }

    if inconsistent.is_empty() {
        info!(products = product_ids.len(), "stock ledger audit clean");
    } else {
        warn!(
            products = product_ids.len(),
            inconsistent = inconsistent.len(),
            "stock ledger audit found inconsistencies"
        );
    }

    Ok(AuditReport {
        products_checked: product_ids.len(),
        inconsistent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rust_decimal_macros::dec;
    use stockbook_core::ProductId;
    use stockbook_events::InMemoryEventBus;
    use stockbook_infra::{InMemoryStore, NewProduct};
    use stockbook_inventory::{MovementKind, MovementRequest, StockThresholds};

    #[tokio::test]
    async fn clean_ledger_reports_nothing() {
        let coordinator = ReconciliationCoordinator::new(
            InMemoryStore::new(),
            InMemoryEventBus::<AlertEnvelope>::new(),
            StockThresholds::default(),
        );
        let product_id = ProductId::new();
        coordinator
            .register_product(NewProduct {
                product_id,
                opening_stock: 20,
                opening_cost: dec!(4),
                base_price: dec!(9),
            })
            .await
            .unwrap();
        coordinator
            .record_movement(MovementRequest::new(
                product_id,
                MovementKind::Adjustment,
                -5,
                "cycle count",
            ))
            .await
            .unwrap();

        let report = run(&coordinator).await.unwrap();

        assert_eq!(report.products_checked, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn migrate_flag_is_opt_in() {
        assert!(!Args::try_parse_from(["stockbook-audit"]).unwrap().migrate);
        assert!(Args::try_parse_from(["stockbook-audit", "--migrate"]).unwrap().migrate);
    }

    #[test]
    fn unknown_arguments_are_rejected() {
        assert!(Args::try_parse_from(["stockbook-audit", "--migrat"]).is_err());
    }
}
