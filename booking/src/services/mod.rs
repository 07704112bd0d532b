// spa_booking/src/services/mod.rs

//! The booking & payment components. Each one receives its collaborators
//! at construction; none of them reach for globals.

pub mod cancellation;
pub mod confirmation;
pub mod ledger;
pub mod order_orchestrator;
pub mod slot_allocator;

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

pub use cancellation::{CancellationCompensator, CancellationOutcome};
pub use confirmation::{ConfirmationHandler, ConfirmationOutcome, Finalized};
pub use ledger::TransactionLedger;
pub use order_orchestrator::{CheckoutOutcome, OrderOrchestrator, OrderView, ProductOrderRequest, ServiceBookingRequest};
pub use slot_allocator::{GenerateSlots, NewSlot, SlotAllocator};

/// Who is asking. Identity itself is established outside this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Requester {
  Customer(Uuid),
  Staff(Uuid),
  /// Background jobs such as the hold-expiry sweep.
  System,
}

impl Requester {
  /// Customers only see their own orders; staff and the system see all.
  pub fn may_act_for(&self, customer_id: Uuid) -> bool {
    match self {
      Requester::Customer(id) => *id == customer_id,
      Requester::Staff(_) | Requester::System => true,
    }
  }
}

impl fmt::Display for Requester {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Requester::Customer(id) => write!(f, "customer {}", id),
      Requester::Staff(id) => write!(f, "staff {}", id),
      Requester::System => f.write_str("system"),
    }
  }
}
