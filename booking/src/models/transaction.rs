// spa_booking/src/models/transaction.rs

use super::{string_enum, Amount, PaymentMethod};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
  Pending,
  Completed,
  Refunded,
  Failed,
}

string_enum!(TransactionStatus {
  Pending => "PENDING",
  Completed => "COMPLETED",
  Refunded => "REFUNDED",
  Failed => "FAILED",
});

/// The slot context a service booking needs when its payment settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBookingRef {
  pub slot_id: Uuid,
  pub staff_id: Uuid,
  pub minutes: i32,
}

/// Provider-specific context stored with a ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderMetadata {
  Card {
    customer_id: Uuid,
    booking: Option<ServiceBookingRef>,
  },
  Wallet {
    /// Provider-side order identifier: `"{order_id}_{suffix}"`.
    order_ref: String,
    request_id: String,
    booking: Option<ServiceBookingRef>,
  },
}

impl ProviderMetadata {
  pub fn booking(&self) -> Option<&ServiceBookingRef> {
    match self {
      ProviderMetadata::Card { booking, .. } | ProviderMetadata::Wallet { booking, .. } => booking.as_ref(),
    }
  }

  pub fn provider(&self) -> &'static str {
    match self {
      ProviderMetadata::Card { .. } => "card",
      ProviderMetadata::Wallet { .. } => "wallet",
    }
  }
}

/// One payment attempt against an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
  pub id: Uuid,
  pub order_id: Uuid,
  pub payment_method: PaymentMethod,
  pub provider: String,
  pub amount: Amount,
  pub currency: String,
  pub status: TransactionStatus,
  /// Intent id (card) or provider order ref (wallet).
  pub intent_ref: String,
  pub payment_method_ref: Option<String>,
  pub refund_ref: Option<String>,
  pub refund_failure: Option<String>,
  pub failure_reason: Option<String>,
  pub metadata: ProviderMetadata,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Transaction {
  pub fn pending(
    order_id: Uuid,
    payment_method: PaymentMethod,
    amount: Amount,
    currency: &str,
    intent_ref: String,
    metadata: ProviderMetadata,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      order_id,
      payment_method,
      provider: metadata.provider().to_string(),
      amount,
      currency: currency.to_string(),
      status: TransactionStatus::Pending,
      intent_ref,
      payment_method_ref: None,
      refund_ref: None,
      refund_failure: None,
      failure_reason: None,
      metadata,
      created_at: now,
      updated_at: now,
    }
  }
}

/// Fields written alongside a ledger status change.
#[derive(Debug, Clone, Default)]
pub struct TransactionPatch {
  pub payment_method_ref: Option<String>,
  pub refund_ref: Option<String>,
  pub refund_failure: Option<String>,
  pub failure_reason: Option<String>,
}

impl TransactionPatch {
  pub fn apply(self, tx: &mut Transaction) {
    if self.payment_method_ref.is_some() {
      tx.payment_method_ref = self.payment_method_ref;
    }
    if self.refund_ref.is_some() {
      tx.refund_ref = self.refund_ref;
    }
    if self.refund_failure.is_some() {
      tx.refund_failure = self.refund_failure;
    }
    if self.failure_reason.is_some() {
      tx.failure_reason = self.failure_reason;
    }
    tx.updated_at = Utc::now();
  }
}
