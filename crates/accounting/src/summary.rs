use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_core::{DomainError, ValueObject};

use crate::cash_flow::{CashFlowCategory, CashFlowDirection, CashFlowEntry};

/// Inclusive value-date range.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashFlowPeriod {
    from: NaiveDate,
    to: NaiveDate,
}

impl ValueObject for CashFlowPeriod {}

impl CashFlowPeriod {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, DomainError> {
        if to < from {
            return Err(DomainError::validation("period ends before it starts"));
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

/// Totals over a set of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashFlowSummary {
    pub income: Decimal,
    pub expense: Decimal,
    pub net: Decimal,
    /// Unsigned sums per category.
    pub by_category: BTreeMap<CashFlowCategory, Decimal>,
}

impl CashFlowSummary {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a CashFlowEntry>) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            match entry.direction {
                CashFlowDirection::Income => summary.income += entry.amount,
                CashFlowDirection::Expense => summary.expense += entry.amount,
            }
            *summary.by_category.entry(entry.category).or_default() += entry.amount;
        }
        summary.net = summary.income - summary.expense;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cash_flow::NewCashFlowEntry;
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn entry(direction: CashFlowDirection, category: CashFlowCategory, amount: Decimal) -> CashFlowEntry {
        NewCashFlowEntry::new(direction, category, amount, "t")
            .into_entry(Utc::now())
            .unwrap()
    }

    #[test]
    fn nets_income_against_expense() {
        let entries = vec![
            entry(CashFlowDirection::Income, CashFlowCategory::Sales, dec!(100)),
            entry(CashFlowDirection::Income, CashFlowCategory::Sales, dec!(50)),
            entry(CashFlowDirection::Expense, CashFlowCategory::Rent, dec!(30)),
            entry(CashFlowDirection::Expense, CashFlowCategory::Refunds, dec!(20)),
        ];
        let s = CashFlowSummary::from_entries(&entries);

        assert_eq!(s.income, dec!(150));
        assert_eq!(s.expense, dec!(50));
        assert_eq!(s.net, dec!(100));
        assert_eq!(s.by_category[&CashFlowCategory::Sales], dec!(150));
        assert_eq!(s.by_category.get(&CashFlowCategory::Taxes), None);
    }

    #[test]
    fn period_is_inclusive() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        let p = CashFlowPeriod::new(d(1), d(31)).unwrap();
        assert!(p.contains(d(1)) && p.contains(d(31)));
        assert!(CashFlowPeriod::new(d(2), d(1)).is_err());
    }

    proptest! {
        /// Property: net equals the sum of signed amounts, and category sums
        /// add up to income plus expense.
        #[test]
        fn net_is_sum_of_signed_amounts(
            rows in prop::collection::vec((any::<bool>(), 0usize..10, 1u32..1_000_000), 0..50)
        ) {
            let entries: Vec<CashFlowEntry> = rows
                .into_iter()
                .map(|(income, cat, cents)| {
                    let direction = if income { CashFlowDirection::Income } else { CashFlowDirection::Expense };
                    entry(direction, CashFlowCategory::ALL[cat], Decimal::new(cents as i64, 2))
                })
                .collect();
            let s = CashFlowSummary::from_entries(&entries);

            let signed: Decimal = entries.iter().map(CashFlowEntry::signed_amount).sum();
            prop_assert_eq!(s.net, signed);
            let by_cat: Decimal = s.by_category.values().copied().sum();
            prop_assert_eq!(by_cat, s.income + s.expense);
        }
    }
}
