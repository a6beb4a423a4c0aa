//! Cash-flow ledger writes inside an open unit of work.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use stockbook_accounting::{CashFlowEntry, NewCashFlowEntry};
use stockbook_core::{DomainError, round_money};

use crate::error::ReconciliationError;
use crate::store::LedgerTx;

/// Entry recorded by [`record`], or the one already holding its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Recorded {
    pub entry: CashFlowEntry,
    pub created: bool,
}

/// Record `new` unless its one-shot `(reference, category)` key is taken, in
/// which case the existing entry comes back unchanged.
///
/// The lookup is a fast path; the store's unique key settles races.
pub(crate) async fn record(
    tx: &mut dyn LedgerTx,
    new: NewCashFlowEntry,
    at: DateTime<Utc>,
) -> Result<Recorded, ReconciliationError> {
    new.validate()?;
    if round_money(new.amount) <= Decimal::ZERO {
        return Err(DomainError::validation("amount rounds to zero").into());
    }

    if let Some((reference, category)) = new.idempotency_key() {
        if let Some(existing) = tx.find_cash_flow(reference, category).await? {
            debug!(entry_id = %existing.id, %reference, %category, "cash-flow entry already recorded");
            return Ok(Recorded {
                entry: existing,
                created: false,
            });
        }
    }

    let entry = new.into_entry(at)?;
    let stored = tx.insert_cash_flow(&entry).await?;
    let created = stored.id == entry.id;
    if created {
        debug!(
            entry_id = %stored.id,
            direction = %stored.direction,
            category = %stored.category,
            amount = %stored.amount,
            "cash-flow entry recorded"
        );
    }
    Ok(Recorded {
        entry: stored,
        created,
    })
}

/// Like [`record`] for mapper output that may be empty or round to nothing.
pub(crate) async fn record_optional(
    tx: &mut dyn LedgerTx,
    new: Option<NewCashFlowEntry>,
    at: DateTime<Utc>,
) -> Result<Option<Recorded>, ReconciliationError> {
    match new {
        Some(new) if round_money(new.amount) > Decimal::ZERO => record(tx, new, at).await.map(Some),
        _ => Ok(None),
    }
}
