//! Post-commit stock alert publication.

use chrono::Utc;
use tracing::{info, warn};

use stockbook_events::{EventBus, EventEnvelope};
use stockbook_inventory::{StockAlert, StockAlertRaised};

pub type AlertEnvelope = EventEnvelope<StockAlertRaised>;

const SUBJECT_TYPE: &str = "inventory.product";

/// Hands committed alerts to the bus. Never fails the caller.
pub struct AlertPublisher<B> {
    bus: B,
}

impl<B> AlertPublisher<B>
where
    B: EventBus<AlertEnvelope>,
{
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Publish each alert; a failed publish is logged and dropped.
    pub fn publish(&self, alerts: &[StockAlert]) {
        let now = Utc::now();
        for alert in alerts {
            let event = StockAlertRaised::from_alert(alert, now);
            let envelope = EventEnvelope::wrap(alert.product_id.into(), SUBJECT_TYPE, event);
            match self.bus.publish(envelope) {
                Ok(()) => info!(
                    product_id = %alert.product_id,
                    level = %alert.level,
                    new_stock = alert.new_stock,
                    "stock alert raised"
                ),
                Err(err) => warn!(
                    product_id = %alert.product_id,
                    level = %alert.level,
                    error = ?err,
                    "dropping stock alert: publish failed"
                ),
            }
        }
    }
}
