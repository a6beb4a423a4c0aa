//! Ledger replay: a product's stock equals its opening stock plus the sum of
//! its movement deltas, and every movement's snapshot chains onto the last.

use serde::{Deserialize, Serialize};

use stockbook_core::{MovementId, ProductId};

use crate::movement::{ProductStock, StockMovement};

/// A point where the movement chain stops adding up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainBreak {
    /// `previous_stock` does not match the running total.
    Discontinuity {
        movement_id: MovementId,
        expected_previous: i64,
        recorded_previous: i64,
    },
    /// `new_stock != previous_stock + delta`.
    Arithmetic { movement_id: MovementId },
    /// Snapshot below zero.
    Negative { movement_id: MovementId, new_stock: i64 },
    ForeignProduct {
        movement_id: MovementId,
        product_id: ProductId,
    },
}

/// Result of replaying a product's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerVerification {
    pub product_id: ProductId,
    pub opening_stock: i64,
    pub recorded_stock: i64,
    pub replayed_stock: i64,
    pub movement_count: usize,
    pub breaks: Vec<ChainBreak>,
}

impl LedgerVerification {
    pub fn is_consistent(&self) -> bool {
        self.breaks.is_empty() && self.recorded_stock == self.replayed_stock
    }
}

/// Replay `movements` (oldest first) on top of the product's opening stock.
pub fn verify_ledger(product: &ProductStock, movements: &[StockMovement]) -> LedgerVerification {
    let mut running = product.opening_stock;
    let mut breaks = Vec::new();

    for m in movements {
        if m.product_id != product.product_id {
            breaks.push(ChainBreak::ForeignProduct {
                movement_id: m.id,
                product_id: m.product_id,
            });
            continue;
        }
        if m.previous_stock != running {
            breaks.push(ChainBreak::Discontinuity {
                movement_id: m.id,
                expected_previous: running,
                recorded_previous: m.previous_stock,
            });
        }
        if m.previous_stock.checked_add(m.delta) != Some(m.new_stock) {
            breaks.push(ChainBreak::Arithmetic { movement_id: m.id });
        }
        if m.new_stock < 0 {
            breaks.push(ChainBreak::Negative {
                movement_id: m.id,
                new_stock: m.new_stock,
            });
        }
        running = running.saturating_add(m.delta);
    }

    LedgerVerification {
        product_id: product.product_id,
        opening_stock: product.opening_stock,
        recorded_stock: product.stock,
        replayed_stock: running,
        movement_count: movements.len(),
        breaks,
    }
}
