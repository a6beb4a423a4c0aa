//! Stock ledger writes inside an open unit of work.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use stockbook_core::{DomainError, ProductId};
use stockbook_inventory::{
    MovementRequest, ProductStock, StockAlert, StockMovement, StockThresholds,
};

use crate::error::ReconciliationError;
use crate::store::{LedgerTx, persisted_movement};

/// Lock `ids` in ascending order and index them. Duplicates are collapsed;
/// an unknown id is `NotFound`.
pub(crate) async fn lock_products(
    tx: &mut dyn LedgerTx,
    ids: impl IntoIterator<Item = ProductId>,
) -> Result<BTreeMap<ProductId, ProductStock>, ReconciliationError> {
    let ids: Vec<ProductId> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
    let locked: BTreeMap<ProductId, ProductStock> = tx
        .lock_products(&ids)
        .await?
        .into_iter()
        .map(|p| (p.product_id, p))
        .collect();

    if let Some(missing) = ids.iter().find(|id| !locked.contains_key(id)) {
        return Err(DomainError::not_found(format!("product {missing}")).into());
    }
    Ok(locked)
}

/// Lock a single product.
pub(crate) async fn lock_product(
    tx: &mut dyn LedgerTx,
    id: ProductId,
) -> Result<ProductStock, ReconciliationError> {
    let mut locked = lock_products(tx, [id]).await?;
    locked
        .remove(&id)
        .ok_or_else(|| DomainError::not_found(format!("product {id}")).into())
}

/// Plan, write and apply one movement against a locked product.
///
/// The product row is rewritten with the new stock; the returned alert is
/// for the caller to publish after commit.
pub(crate) async fn append_movement(
    tx: &mut dyn LedgerTx,
    product: &mut ProductStock,
    request: MovementRequest,
    thresholds: &StockThresholds,
    at: DateTime<Utc>,
) -> Result<(StockMovement, Option<StockAlert>), ReconciliationError> {
    let movement = match StockMovement::plan(product, request, at) {
        Ok(movement) => movement,
        Err(err) => {
            warn!(product_id = %product.product_id, stock = product.stock, error = %err, "movement rejected");
            return Err(err.into());
        }
    };

    tx.insert_movement(&movement).await?;
    let previous = product.stock;
    product.apply_movement(&movement)?;
    tx.update_product(product).await?;

    debug!(
        movement_id = %movement.id,
        product_id = %movement.product_id,
        kind = %movement.kind,
        delta = movement.delta,
        new_stock = movement.new_stock,
        "movement recorded"
    );

    let alert = StockAlert::detect(thresholds, product.product_id, previous, product.stock);
    Ok((persisted_movement(&movement), alert))
}
