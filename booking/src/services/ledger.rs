// spa_booking/src/services/ledger.rs

//! Durable record of payment attempts. Entries leave PENDING exactly once;
//! every transition is conditional on the status the caller expects, so a
//! losing concurrent caller sees `None` instead of overwriting the winner.

use crate::errors::{AppError, Result};
use crate::models::{Order, Transaction, TransactionPatch, TransactionStatus};
use crate::payments::{PaymentGateways, PaymentIntent};
use crate::store::{Store, StoreTx};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// What happened to one settled payment that had to be given back.
#[derive(Debug, Clone, Serialize)]
pub struct RefundOutcome {
  pub transaction_id: Uuid,
  pub refunded: bool,
  pub refund_ref: Option<String>,
  pub failure: Option<String>,
}

#[derive(Clone)]
pub struct TransactionLedger {
  store: Arc<dyn Store>,
  currency: String,
}

impl TransactionLedger {
  pub fn new(store: Arc<dyn Store>, currency: impl Into<String>) -> Self {
    Self {
      store,
      currency: currency.into(),
    }
  }

  pub fn currency(&self) -> &str {
    &self.currency
  }

  /// Writes the PENDING entry for a freshly created intent in its own commit.
  #[instrument(name = "ledger::record_pending", skip(self, order, intent), fields(order_id = %order.id))]
  pub async fn record_pending(&self, order: &Order, intent: &PaymentIntent) -> Result<Transaction> {
    let entry = Transaction::pending(
      order.id,
      order.payment_method,
      order.final_price,
      &self.currency,
      intent.provider_ref.clone(),
      intent.metadata.clone(),
    );
    let mut tx = self.store.begin().await?;
    tx.insert_transaction(&entry).await?;
    tx.commit().await?;
    info!(transaction_id = %entry.id, intent_ref = %entry.intent_ref, "Ledger entry recorded.");
    Ok(entry)
  }

  pub async fn entries_for(&self, order_id: Uuid) -> Result<Vec<Transaction>> {
    let mut tx = self.store.begin().await?;
    tx.transactions_for_order(order_id).await
  }

  /// The entry matching `(order_id, intent_ref)`; never guessed.
  pub async fn locate_in(tx: &mut dyn StoreTx, order_id: Uuid, intent_ref: &str) -> Result<Transaction> {
    tx.find_transaction(order_id, intent_ref).await?.ok_or_else(|| {
      AppError::NotFound(format!(
        "no payment for order '{}' with intent '{}'",
        order_id, intent_ref
      ))
    })
  }

  pub async fn complete_in(
    tx: &mut dyn StoreTx,
    entry_id: Uuid,
    payment_method_ref: Option<String>,
  ) -> Result<Option<Transaction>> {
    let patch = TransactionPatch {
      payment_method_ref,
      ..Default::default()
    };
    tx.update_transaction_status(entry_id, TransactionStatus::Pending, TransactionStatus::Completed, patch)
      .await
  }

  pub async fn fail_in(tx: &mut dyn StoreTx, entry_id: Uuid, reason: &str) -> Result<Option<Transaction>> {
    let patch = TransactionPatch {
      failure_reason: Some(reason.to_string()),
      ..Default::default()
    };
    tx.update_transaction_status(entry_id, TransactionStatus::Pending, TransactionStatus::Failed, patch)
      .await
  }

  /// A provider captured money on an attempt already written off as FAILED.
  /// The entry becomes COMPLETED so the capture is on record and refundable;
  /// the earlier failure reason is kept.
  pub async fn capture_late_in(
    tx: &mut dyn StoreTx,
    entry_id: Uuid,
    payment_method_ref: Option<String>,
  ) -> Result<Option<Transaction>> {
    let patch = TransactionPatch {
      payment_method_ref,
      ..Default::default()
    };
    tx.update_transaction_status(entry_id, TransactionStatus::Failed, TransactionStatus::Completed, patch)
      .await
  }

  /// Returns a COMPLETED entry's money through its provider. A provider
  /// failure is recorded on the entry and reported in the outcome, not raised.
  #[instrument(name = "ledger::refund", skip(self, gateways, entry), fields(transaction_id = %entry.id))]
  pub async fn refund(&self, gateways: &PaymentGateways, entry: &Transaction) -> Result<RefundOutcome> {
    let attempt = match gateways.get(entry.payment_method) {
      Ok(gateway) => gateway.refund(entry).await,
      Err(e) => Err(e),
    };
    match attempt {
      Ok(receipt) => {
        self.mark_refunded(entry.id, receipt.refund_ref.clone()).await?;
        info!(refund_ref = %receipt.refund_ref, "Payment refunded.");
        Ok(RefundOutcome {
          transaction_id: entry.id,
          refunded: true,
          refund_ref: Some(receipt.refund_ref),
          failure: None,
        })
      }
      Err(e) => {
        error!(error = %e, "Refund failed.");
        self.record_refund_failure(entry.id, e.to_string()).await?;
        Ok(RefundOutcome {
          transaction_id: entry.id,
          refunded: false,
          refund_ref: None,
          failure: Some(e.to_string()),
        })
      }
    }
  }

  pub async fn mark_refunded(&self, entry_id: Uuid, refund_ref: String) -> Result<Option<Transaction>> {
    let patch = TransactionPatch {
      refund_ref: Some(refund_ref),
      ..Default::default()
    };
    self.update(entry_id, TransactionStatus::Completed, TransactionStatus::Refunded, patch).await
  }

  /// The entry stays COMPLETED; only the failure is recorded.
  pub async fn record_refund_failure(&self, entry_id: Uuid, reason: String) -> Result<Option<Transaction>> {
    let patch = TransactionPatch {
      refund_failure: Some(reason),
      ..Default::default()
    };
    self.update(entry_id, TransactionStatus::Completed, TransactionStatus::Completed, patch).await
  }

  async fn update(
    &self,
    entry_id: Uuid,
    from: TransactionStatus,
    to: TransactionStatus,
    patch: TransactionPatch,
  ) -> Result<Option<Transaction>> {
    let mut tx = self.store.begin().await?;
    let updated = tx.update_transaction_status(entry_id, from, to, patch).await?;
    tx.commit().await?;
    Ok(updated)
  }
}
