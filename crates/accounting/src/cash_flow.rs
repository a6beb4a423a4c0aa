use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_core::{
    CashFlowEntryId, DomainError, Entity, Reference, closed_enum, money::ensure_positive,
};

/// Money in or money out.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashFlowDirection {
    Income,
    Expense,
}

closed_enum!(CashFlowDirection, "cash flow direction", {
    CashFlowDirection::Income => "INCOME",
    CashFlowDirection::Expense => "EXPENSE",
});

impl CashFlowDirection {
    /// Sign applied when aggregating: INCOME adds, EXPENSE subtracts.
    pub fn signed(self, amount: Decimal) -> Decimal {
        match self {
            CashFlowDirection::Income => amount,
            CashFlowDirection::Expense => -amount,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashFlowCategory {
    Sales,
    Purchases,
    Refunds,
    Salaries,
    Services,
    Taxes,
    Rent,
    Utilities,
    Shrinkage,
    Other,
}

closed_enum!(CashFlowCategory, "cash flow category", {
    CashFlowCategory::Sales => "SALES",
    CashFlowCategory::Purchases => "PURCHASES",
    CashFlowCategory::Refunds => "REFUNDS",
    CashFlowCategory::Salaries => "SALARIES",
    CashFlowCategory::Services => "SERVICES",
    CashFlowCategory::Taxes => "TAXES",
    CashFlowCategory::Rent => "RENT",
    CashFlowCategory::Utilities => "UTILITIES",
    CashFlowCategory::Shrinkage => "SHRINKAGE",
    CashFlowCategory::Other => "OTHER",
});

impl CashFlowCategory {
    /// Categories recorded by hand rather than derived from stock events.
    pub fn is_operating(self) -> bool {
        matches!(
            self,
            CashFlowCategory::Salaries
                | CashFlowCategory::Services
                | CashFlowCategory::Taxes
                | CashFlowCategory::Rent
                | CashFlowCategory::Utilities
                | CashFlowCategory::Other
        )
    }
}

/// Uniqueness key for one-shot sources.
pub type IdempotencyKey = (Reference, CashFlowCategory);

/// Immutable cash-flow ledger row. `amount` is always positive; the direction
/// carries the sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashFlowEntry {
    pub id: CashFlowEntryId,
    pub direction: CashFlowDirection,
    pub category: CashFlowCategory,
    pub amount: Decimal,
    pub description: String,
    pub payment_method: Option<String>,
    pub reference: Option<Reference>,
    pub value_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Entity for CashFlowEntry {
    type Id = CashFlowEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl CashFlowEntry {
    pub fn signed_amount(&self) -> Decimal {
        self.direction.signed(self.amount)
    }

    pub fn idempotency_key(&self) -> Option<IdempotencyKey> {
        idempotency_key(self.reference, self.category)
    }
}

fn idempotency_key(reference: Option<Reference>, category: CashFlowCategory) -> Option<IdempotencyKey> {
    reference
        .filter(Reference::is_one_shot)
        .map(|reference| (reference, category))
}

/// Request to record a cash-flow entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCashFlowEntry {
    pub direction: CashFlowDirection,
    pub category: CashFlowCategory,
    pub amount: Decimal,
    pub description: String,
    pub payment_method: Option<String>,
    pub reference: Option<Reference>,
    /// Defaults to the recording date.
    pub value_date: Option<NaiveDate>,
}

impl NewCashFlowEntry {
    pub fn new(
        direction: CashFlowDirection,
        category: CashFlowCategory,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            direction,
            category,
            amount,
            description: description.into(),
            payment_method: None,
            reference: None,
            value_date: None,
        }
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_payment_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = Some(method.into());
        self
    }

    pub fn with_value_date(mut self, date: NaiveDate) -> Self {
        self.value_date = Some(date);
        self
    }

    pub fn idempotency_key(&self) -> Option<IdempotencyKey> {
        idempotency_key(self.reference, self.category)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        ensure_positive(self.amount, "amount")?;
        if self.description.trim().is_empty() {
            return Err(DomainError::validation("description cannot be empty"));
        }
        Ok(())
    }

    /// Validate and stamp an id and creation time.
    pub fn into_entry(self, at: DateTime<Utc>) -> Result<CashFlowEntry, DomainError> {
        self.validate()?;
        Ok(CashFlowEntry {
            id: CashFlowEntryId::new(),
            direction: self.direction,
            category: self.category,
            amount: self.amount,
            description: self.description,
            payment_method: self.payment_method,
            reference: self.reference,
            value_date: self.value_date.unwrap_or_else(|| at.date_naive()),
            created_at: at,
        })
    }
}
