// spa_booking/src/pipelines/contexts.rs

//! Data structs the pipelines run over. Each carries the collaborators its
//! steps need, so handlers only ever receive the `ContextData`.

use crate::catalog::Catalog;
use crate::models::{
  Branch, CustomerContact, Order, OrderDetail, PaymentMethod, ServiceBookingRef, StaffSlot, Transaction,
};
use crate::notifications::Notifier;
use crate::payments::{PaymentGateways, PaymentIntent};
use crate::services::ledger::TransactionLedger;
use crate::services::order_orchestrator::ProductLineRequest;
use crate::services::Requester;
use crate::store::Store;
use std::sync::Arc;
use uuid::Uuid;

pub use crate::services::ledger::RefundOutcome;

#[derive(Clone)]
pub struct CheckoutDeps {
  pub store: Arc<dyn Store>,
  pub catalog: Arc<dyn Catalog>,
  pub gateways: PaymentGateways,
  pub ledger: Arc<TransactionLedger>,
}

#[derive(Debug, Clone)]
pub enum CheckoutItems {
  Products(Vec<ProductLineRequest>),
  Service {
    service_id: Uuid,
    duration_minutes: i32,
    slot_id: Uuid,
  },
}

#[derive(Clone)]
pub struct CheckoutCtxData {
  pub deps: CheckoutDeps,
  /// Fixed before anything is written so every row links to it from the start.
  pub order_id: Uuid,
  pub customer_id: Uuid,
  pub branch_id: Uuid,
  pub contact: CustomerContact,
  pub payment_method: PaymentMethod,
  pub note: Option<String>,
  pub items: CheckoutItems,

  // Filled in by the steps.
  pub branch: Option<Branch>,
  pub lines: Vec<OrderDetail>,
  pub booking: Option<ServiceBookingRef>,
  pub reserved_slot: Option<StaffSlot>,
  pub order: Option<Order>,
  pub intent: Option<PaymentIntent>,
  pub ledger_entry: Option<Transaction>,
}

impl CheckoutCtxData {
  pub fn new(
    deps: CheckoutDeps,
    customer_id: Uuid,
    branch_id: Uuid,
    contact: CustomerContact,
    payment_method: PaymentMethod,
    note: Option<String>,
    items: CheckoutItems,
  ) -> Self {
    Self {
      deps,
      order_id: Uuid::new_v4(),
      customer_id,
      branch_id,
      contact,
      payment_method,
      note,
      items,
      branch: None,
      lines: Vec::new(),
      booking: None,
      reserved_slot: None,
      order: None,
      intent: None,
      ledger_entry: None,
    }
  }
}

#[derive(Clone)]
pub struct ConfirmationDeps {
  pub store: Arc<dyn Store>,
  pub notifier: Arc<dyn Notifier>,
}

#[derive(Clone)]
pub struct ConfirmationCtxData {
  pub deps: ConfirmationDeps,
  pub order_id: Uuid,
  pub intent_ref: String,
  pub payment_method_ref: Option<String>,

  pub entry: Option<Transaction>,
  pub order: Option<Order>,
  /// Set when an earlier delivery already finalized this payment.
  pub replayed: bool,
  pub notified: bool,
}

impl ConfirmationCtxData {
  pub fn new(deps: ConfirmationDeps, order_id: Uuid, intent_ref: &str, payment_method_ref: Option<String>) -> Self {
    Self {
      deps,
      order_id,
      intent_ref: intent_ref.to_string(),
      payment_method_ref,
      entry: None,
      order: None,
      replayed: false,
      notified: false,
    }
  }
}

#[derive(Clone)]
pub struct CancellationDeps {
  pub store: Arc<dyn Store>,
  pub gateways: PaymentGateways,
  pub ledger: Arc<TransactionLedger>,
}

#[derive(Clone)]
pub struct CancellationCtxData {
  pub deps: CancellationDeps,
  pub order_id: Uuid,
  pub requester: Requester,
  pub reason: String,

  pub order: Option<Order>,
  pub released_slots: Vec<StaffSlot>,
  /// COMPLETED entries that still need their money returned.
  pub settled_entries: Vec<Transaction>,
  /// PENDING entries written off by the cancellation; their intents are voided.
  pub abandoned_entries: Vec<Transaction>,
  pub refunds: Vec<RefundOutcome>,
}

impl CancellationCtxData {
  pub fn new(deps: CancellationDeps, order_id: Uuid, requester: Requester, reason: &str) -> Self {
    Self {
      deps,
      order_id,
      requester,
      reason: reason.to_string(),
      order: None,
      released_slots: Vec::new(),
      settled_entries: Vec::new(),
      abandoned_entries: Vec::new(),
      refunds: Vec::new(),
    }
  }
}
