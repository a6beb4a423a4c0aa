use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_core::{
    DomainError, Entity, MovementId, ProductId, Reference, closed_enum,
    money::ensure_non_negative,
};

/// Why stock changed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Purchase,
    Sale,
    Adjustment,
}

closed_enum!(MovementKind, "movement kind", {
    MovementKind::Purchase => "PURCHASE",
    MovementKind::Sale => "SALE",
    MovementKind::Adjustment => "ADJUSTMENT",
});

/// Stock/cost projection of a product.
///
/// The only mutable state the core owns for a product. It always equals the
/// opening values plus every recorded movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStock {
    pub product_id: ProductId,
    /// Stock at registration; replay starts here.
    pub opening_stock: i64,
    pub stock: i64,
    pub average_cost: Decimal,
    /// Most recent purchase unit cost, if the product was ever received.
    pub last_cost: Option<Decimal>,
    /// Catalogue sale price.
    pub base_price: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl ProductStock {
    pub fn new(
        product_id: ProductId,
        opening_stock: i64,
        average_cost: Decimal,
        base_price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if opening_stock < 0 {
            return Err(DomainError::validation("opening stock cannot be negative"));
        }
        ensure_non_negative(average_cost, "average cost")?;
        ensure_non_negative(base_price, "base price")?;

        Ok(Self {
            product_id,
            opening_stock,
            stock: opening_stock,
            average_cost,
            last_cost: None,
            base_price,
            updated_at: at,
        })
    }

    /// Move the stock projection to the movement's after-snapshot.
    pub fn apply_movement(&mut self, movement: &StockMovement) -> Result<(), DomainError> {
        if movement.product_id != self.product_id {
            return Err(DomainError::invariant("movement belongs to another product"));
        }
        if movement.previous_stock != self.stock {
            return Err(DomainError::invariant(format!(
                "stale movement snapshot (product stock {}, movement previous {})",
                self.stock, movement.previous_stock
            )));
        }
        self.stock = movement.new_stock;
        self.updated_at = movement.created_at;
        Ok(())
    }
}

/// Request to record one stock movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub product_id: ProductId,
    pub kind: MovementKind,
    /// Signed change: positive adds stock, negative removes it.
    pub delta: i64,
    pub reason: String,
    pub reference: Option<Reference>,
    pub unit_cost: Option<Decimal>,
    pub unit_price: Option<Decimal>,
}

impl MovementRequest {
    pub fn new(
        product_id: ProductId,
        kind: MovementKind,
        delta: i64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            kind,
            delta,
            reason: reason.into(),
            reference: None,
            unit_cost: None,
            unit_price: None,
        }
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_unit_cost(mut self, unit_cost: Decimal) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_unit_price(mut self, unit_price: Decimal) -> Self {
        self.unit_price = Some(unit_price);
        self
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }
        match self.kind {
            MovementKind::Purchase if self.delta < 0 => {
                return Err(DomainError::validation("purchase movements must add stock"));
            }
            MovementKind::Sale if self.delta > 0 => {
                return Err(DomainError::validation("sale movements must remove stock"));
            }
            _ => {}
        }
        if let Some(cost) = self.unit_cost {
            ensure_non_negative(cost, "unit cost")?;
        }
        if let Some(price) = self.unit_price {
            ensure_non_negative(price, "unit price")?;
        }
        Ok(())
    }
}

/// Immutable stock ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub kind: MovementKind,
    pub delta: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub unit_cost: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub total_value: Option<Decimal>,
    pub reference: Option<Reference>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl Entity for StockMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl StockMovement {
    /// Decide the movement for `request` against the product's current stock.
    ///
    /// Rejects with `InsufficientStock` when the result would be negative, for
    /// every kind including adjustments. Nothing is clamped.
    pub fn plan(
        product: &ProductStock,
        request: MovementRequest,
        at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if request.product_id != product.product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        request.validate()?;

        let new_stock = product
            .stock
            .checked_add(request.delta)
            .ok_or_else(|| DomainError::validation("stock quantity overflow"))?;
        if new_stock < 0 {
            return Err(DomainError::InsufficientStock {
                product_id: product.product_id,
                available: product.stock,
                delta: request.delta,
            });
        }

        let total_value = request
            .unit_cost
            .or(request.unit_price)
            .map(|unit| unit * Decimal::from(request.delta.unsigned_abs()));

        Ok(Self {
            id: MovementId::new(),
            product_id: request.product_id,
            kind: request.kind,
            delta: request.delta,
            previous_stock: product.stock,
            new_stock,
            unit_cost: request.unit_cost,
            unit_price: request.unit_price,
            total_value,
            reference: request.reference,
            reason: request.reason,
            created_at: at,
        })
    }

    /// `new_stock = previous_stock + delta` and `new_stock >= 0`.
    pub fn is_well_formed(&self) -> bool {
        self.new_stock >= 0 && self.previous_stock.checked_add(self.delta) == Some(self.new_stock)
    }
}
