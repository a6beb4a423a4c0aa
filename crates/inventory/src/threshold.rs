//! Stock threshold crossings.
//!
//! Classification is a pure function of `(previous, new, thresholds)`. The
//! coordinator collects the result inside the transaction and publishes it
//! only after commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockbook_core::{DomainError, ProductId, ValueObject, closed_enum};
use stockbook_events::Event;

/// Severity of a downward threshold crossing (ordered least to most severe).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Low,
    Critical,
    OutOfStock,
}

closed_enum!(AlertLevel, "alert level", {
    AlertLevel::Low => "LOW",
    AlertLevel::Critical => "CRITICAL",
    AlertLevel::OutOfStock => "OUT_OF_STOCK",
});

/// Configured low/critical stock levels (zero is implicit).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockThresholds {
    low: i64,
    critical: i64,
}

impl ValueObject for StockThresholds {}

impl Default for StockThresholds {
    fn default() -> Self {
        Self { low: 10, critical: 3 }
    }
}

impl StockThresholds {
    pub fn new(low: i64, critical: i64) -> Result<Self, DomainError> {
        if critical < 0 {
            return Err(DomainError::validation("critical threshold cannot be negative"));
        }
        if low < critical {
            return Err(DomainError::validation(
                "low threshold must be at least the critical threshold",
            ));
        }
        Ok(Self { low, critical })
    }

    pub fn low(&self) -> i64 {
        self.low
    }

    pub fn critical(&self) -> i64 {
        self.critical
    }

    /// Most severe level crossed going from `previous` down to `new`.
    ///
    /// A level is crossed when stock was above its bound and is now at or
    /// below it. Increases and moves that stay inside a band never alert.
    pub fn classify(&self, previous: i64, new: i64) -> Option<AlertLevel> {
        if new >= previous {
            return None;
        }
        let crossed = |bound: i64| previous > bound && new <= bound;

        if crossed(0) {
            Some(AlertLevel::OutOfStock)
        } else if crossed(self.critical) {
            Some(AlertLevel::Critical)
        } else if crossed(self.low) {
            Some(AlertLevel::Low)
        } else {
            None
        }
    }
}

/// A crossing detected for one product inside a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlert {
    pub product_id: ProductId,
    pub level: AlertLevel,
    pub previous_stock: i64,
    pub new_stock: i64,
}

impl StockAlert {
    pub fn detect(
        thresholds: &StockThresholds,
        product_id: ProductId,
        previous_stock: i64,
        new_stock: i64,
    ) -> Option<Self> {
        thresholds
            .classify(previous_stock, new_stock)
            .map(|level| Self {
                product_id,
                level,
                previous_stock,
                new_stock,
            })
    }
}

/// Event: StockAlertRaised (published post-commit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlertRaised {
    pub product_id: ProductId,
    pub level: AlertLevel,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub occurred_at: DateTime<Utc>,
}

impl StockAlertRaised {
    pub fn from_alert(alert: &StockAlert, occurred_at: DateTime<Utc>) -> Self {
        Self {
            product_id: alert.product_id,
            level: alert.level,
            previous_stock: alert.previous_stock,
            new_stock: alert.new_stock,
            occurred_at,
        }
    }
}

impl Event for StockAlertRaised {
    fn event_type(&self) -> &'static str {
        "inventory.stock.alert_raised"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> StockThresholds {
        StockThresholds::new(10, 3).unwrap()
    }

    #[test]
    fn reports_most_severe_level_crossed() {
        let t = thresholds();
        assert_eq!(t.classify(12, 9), Some(AlertLevel::Low));
        assert_eq!(t.classify(12, 2), Some(AlertLevel::Critical));
        assert_eq!(t.classify(12, 0), Some(AlertLevel::OutOfStock));
        assert_eq!(t.classify(3, 0), Some(AlertLevel::OutOfStock));
    }

    #[test]
    fn no_alert_without_a_crossing() {
        let t = thresholds();
        assert_eq!(t.classify(20, 11), None);
        assert_eq!(t.classify(9, 5), None);
        assert_eq!(t.classify(2, 1), None);
        assert_eq!(t.classify(0, 5), None);
        assert_eq!(t.classify(5, 5), None);
    }

    #[test]
    fn low_below_critical_is_rejected() {
        assert!(StockThresholds::new(2, 5).is_err());
        assert!(StockThresholds::new(5, -1).is_err());
    }
}
