// spa_booking/src/models/mod.rs

//! Data structures for slots, orders, ledger entries and the catalog
//! records the orchestrator reads.

/// Implements `as_str` / `FromStr` / `Display` for the upper-case status
/// enums so the same spelling is used in JSON, SQL and logs.
macro_rules! string_enum {
  ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
    impl $name {
      pub fn as_str(&self) -> &'static str {
        match self {
          $($name::$variant => $text),+
        }
      }
    }

    impl std::str::FromStr for $name {
      type Err = crate::errors::AppError;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
          $($text => Ok($name::$variant),)+
          other => Err(crate::errors::AppError::Validation(format!(
            "unknown {} '{}'",
            stringify!($name),
            other
          ))),
        }
      }
    }

    impl std::fmt::Display for $name {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
      }
    }
  };
}

pub(crate) use string_enum;

pub mod catalog;
pub mod order;
pub mod slot;
pub mod transaction;

pub use catalog::{Branch, DurationTier, Product, Service};
pub use order::{CustomerContact, ItemType, Order, OrderDetail, OrderStatus, PaymentMethod, ServiceLine};
pub use slot::{SlotStatus, StaffSlot};
pub use transaction::{ProviderMetadata, ServiceBookingRef, Transaction, TransactionPatch, TransactionStatus};

/// Money is kept in the currency's smallest unit.
pub type Amount = i64;
