//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Uuid);

        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_newtype!(
    /// Identifier of a product (owned by the catalogue, referenced here).
    ProductId,
    "ProductId"
);
uuid_newtype!(
    /// Identifier of a customer order (sales side).
    OrderId,
    "OrderId"
);
uuid_newtype!(
    /// Identifier of a purchase order.
    PurchaseOrderId,
    "PurchaseOrderId"
);
uuid_newtype!(
    /// Identifier of a supplier (opaque foreign key).
    SupplierId,
    "SupplierId"
);
uuid_newtype!(
    /// Identifier of a manual inventory adjustment.
    AdjustmentId,
    "AdjustmentId"
);
uuid_newtype!(
    /// Client-supplied idempotency token for a purchase receipt.
    ReceiptId,
    "ReceiptId"
);
uuid_newtype!(MovementId, "MovementId");
uuid_newtype!(CashFlowEntryId, "CashFlowEntryId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_malformed_uuid_with_type_name() {
        let err = ProductId::from_str("not-a-uuid").unwrap_err();
        match err {
            DomainError::InvalidId(msg) => assert!(msg.starts_with("ProductId")),
            other => panic!("expected InvalidId, got {other:?}"),
        }
    }

    #[test]
    fn display_round_trips_through_from_str() {
        let id = PurchaseOrderId::new();
        let parsed: PurchaseOrderId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
