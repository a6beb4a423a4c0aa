//! Closed enumerations with a canonical text form.
//!
//! Kinds, categories and statuses are persisted as text. Parsing is
//! case-insensitive so legacy lowercase spellings normalise, while
//! [`as_str`](crate::closed_enum) always yields the canonical
//! `SCREAMING_SNAKE_CASE` form. Unknown values are rejected.

/// Implement `as_str`, `Display` and `FromStr` for a fieldless enum.
///
/// ```ignore
/// closed_enum!(MovementKind, "movement kind", {
///     MovementKind::Purchase => "PURCHASE",
///     MovementKind::Sale => "SALE",
/// });
/// ```
#[macro_export]
macro_rules! closed_enum {
    ($t:ty, $name:literal, { $($variant:path => $text:literal),+ $(,)? }) => {
        impl $t {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$t] = &[$($variant),+];

            /// Canonical persisted spelling.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($variant => $text),+
                }
            }
        }

        impl ::core::fmt::Display for $t {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::core::str::FromStr for $t {
            type Err = $crate::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                $(
                    if trimmed.eq_ignore_ascii_case($text) {
                        return Ok($variant);
                    }
                )+
                Err($crate::DomainError::validation(format!(
                    "unknown {}: '{}'",
                    $name, s
                )))
            }
        }
    };
}
