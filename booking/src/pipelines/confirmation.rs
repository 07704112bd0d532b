// spa_booking/src/pipelines/confirmation.rs

//! Payment finalization. Every confirmation path (client report, card
//! webhook, wallet callback) converges here.

use crate::errors::{AppError, Result};
use crate::models::{ItemType, OrderStatus, SlotStatus, TransactionStatus};
use crate::notifications::{booking_code, BookingSummary};
use crate::pipelines::contexts::ConfirmationCtxData;
use crate::services::TransactionLedger;
use sagaflow::{ContextData, Pipeline, PipelineControl};
use tracing::{info, instrument, warn};

pub const LOCATE_LEDGER_ENTRY: &str = "locate_ledger_entry";
pub const APPLY_CONFIRMATION: &str = "apply_confirmation";
pub const NOTIFY_CUSTOMER: &str = "notify_customer";

pub fn build_confirmation_pipeline() -> Result<Pipeline<ConfirmationCtxData, AppError>> {
  let mut p = Pipeline::<ConfirmationCtxData, AppError>::new(&[
    (LOCATE_LEDGER_ENTRY, false, None),
    (APPLY_CONFIRMATION, false, None),
    (NOTIFY_CUSTOMER, false, None),
  ]);
  // A lost notification never undoes a confirmed payment.
  p.set_best_effort(NOTIFY_CUSTOMER, true)?;

  p.on_root(LOCATE_LEDGER_ENTRY, |ctx| Box::pin(locate_ledger_entry(ctx)));
  p.on_root(APPLY_CONFIRMATION, |ctx| Box::pin(apply_confirmation(ctx)));
  p.on_root(NOTIFY_CUSTOMER, |ctx| Box::pin(notify_customer(ctx)));
  Ok(p)
}

/// Stops the run when the entry is already COMPLETED: a repeated delivery
/// gets the current order back and nothing is applied twice.
#[instrument(name = "confirmation::locate_ledger_entry", skip(ctx_data), err)]
async fn locate_ledger_entry(ctx_data: ContextData<ConfirmationCtxData>) -> Result<PipelineControl> {
  let (deps, order_id, intent_ref) = {
    let guard = ctx_data.read();
    (guard.deps.clone(), guard.order_id, guard.intent_ref.clone())
  };

  let mut tx = deps.store.begin().await?;
  let entry = TransactionLedger::locate_in(tx.as_mut(), order_id, &intent_ref).await?;
  let control = match entry.status {
    TransactionStatus::Pending => PipelineControl::Continue,
    TransactionStatus::Completed => {
      info!(%order_id, %intent_ref, "Payment already finalized; nothing to apply.");
      let order = tx.get_order(order_id).await?.ok_or_else(|| AppError::not_found("Order", order_id))?;
      let mut guard = ctx_data.write();
      guard.order = Some(order);
      guard.replayed = true;
      PipelineControl::Stop
    }
    other => {
      return Err(AppError::Conflict(format!(
        "payment {} for order {} is {} and cannot be confirmed",
        intent_ref, order_id, other
      )))
    }
  };
  ctx_data.write().entry = Some(entry);
  Ok(control)
}

/// Ledger COMPLETED, order CONFIRMED and slot RESERVED in one commit.
#[instrument(name = "confirmation::apply_confirmation", skip(ctx_data), err)]
async fn apply_confirmation(ctx_data: ContextData<ConfirmationCtxData>) -> Result<PipelineControl> {
  let (deps, order_id, intent_ref, entry, payment_method_ref) = {
    let guard = ctx_data.read();
    (
      guard.deps.clone(),
      guard.order_id,
      guard.intent_ref.clone(),
      guard.entry.clone(),
      guard.payment_method_ref.clone(),
    )
  };
  let entry = entry.ok_or_else(|| AppError::Internal("ledger entry missing before confirmation".to_string()))?;

  let mut tx = deps.store.begin().await?;
  let Some(completed) = TransactionLedger::complete_in(tx.as_mut(), entry.id, payment_method_ref).await? else {
    // Lost the race to a concurrent delivery of the same confirmation.
    let current = TransactionLedger::locate_in(tx.as_mut(), order_id, &intent_ref).await?;
    if current.status != TransactionStatus::Completed {
      return Err(AppError::Conflict(format!(
        "payment {} moved to {} while confirming",
        intent_ref, current.status
      )));
    }
    let order = tx.get_order(order_id).await?.ok_or_else(|| AppError::not_found("Order", order_id))?;
    let mut guard = ctx_data.write();
    guard.order = Some(order);
    guard.replayed = true;
    return Ok(PipelineControl::Stop);
  };

  let order = tx
    .update_order_status(order_id, &[OrderStatus::Pending], OrderStatus::Confirmed, None)
    .await?
    .ok_or_else(|| AppError::Conflict(format!("order {} is no longer awaiting payment", order_id)))?;

  for line in order.service_lines() {
    let moved = tx
      .update_slot_status(line.slot_id, &[SlotStatus::Pending, SlotStatus::Reserved], SlotStatus::Reserved)
      .await?;
    if moved.is_none() {
      warn!(slot_id = %line.slot_id, %order_id, "Slot was not PENDING at confirmation; left as is.");
    }
  }
  tx.commit().await?;
  info!(%order_id, transaction_id = %completed.id, "Payment finalized.");

  let mut guard = ctx_data.write();
  guard.entry = Some(completed);
  guard.order = Some(order);
  Ok(PipelineControl::Continue)
}

#[instrument(name = "confirmation::notify_customer", skip(ctx_data), err)]
async fn notify_customer(ctx_data: ContextData<ConfirmationCtxData>) -> Result<PipelineControl> {
  let (deps, order) = {
    let guard = ctx_data.read();
    (guard.deps.clone(), guard.order.clone())
  };
  let Some(order) = order else {
    return Ok(PipelineControl::Continue);
  };

  let receipt = if order.items.iter().any(|d| d.item_type == ItemType::Service) {
    let summary = BookingSummary {
      order_id: order.id,
      branch_id: order.branch_id,
      lines: order.items.clone(),
      final_price: order.final_price,
    };
    deps
      .notifier
      .send_booking_confirmation(&order.contact, &summary, &booking_code(order.id))
      .await?
  } else {
    deps
      .notifier
      .send_purchase_receipt(&order.contact, &order.items, order.final_price)
      .await?
  };
  info!(order_id = %order.id, message_id = %receipt.message_id, "Customer notified.");
  ctx_data.write().notified = true;
  Ok(PipelineControl::Continue)
}
