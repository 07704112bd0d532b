// spa_booking/src/pipelines/cancellation.rs

use crate::errors::{AppError, Result};
use crate::models::{OrderStatus, TransactionStatus};
use crate::pipelines::contexts::CancellationCtxData;
use crate::services::{Requester, SlotAllocator, TransactionLedger};
use sagaflow::{ContextData, Pipeline, PipelineControl};
use tracing::{info, instrument, warn};

pub const LOAD_ORDER: &str = "load_order";
pub const CANCEL_ORDER: &str = "cancel_order";
pub const SETTLE_PAYMENT: &str = "settle_payment";

const CANCELLABLE: [OrderStatus; 2] = [OrderStatus::Pending, OrderStatus::Confirmed];

pub fn build_cancellation_pipeline() -> Result<Pipeline<CancellationCtxData, AppError>> {
  let mut p = Pipeline::<CancellationCtxData, AppError>::new(&[
    (LOAD_ORDER, false, None),
    (CANCEL_ORDER, false, None),
    (SETTLE_PAYMENT, false, None),
  ]);
  // The cancellation is committed before any refund is attempted.
  p.set_best_effort(SETTLE_PAYMENT, true)?;

  p.on_root(LOAD_ORDER, |ctx| Box::pin(load_order(ctx)));
  p.on_root(CANCEL_ORDER, |ctx| Box::pin(cancel_order(ctx)));
  p.on_root(SETTLE_PAYMENT, |ctx| Box::pin(settle_payment(ctx)));
  Ok(p)
}

#[instrument(name = "cancellation::load_order", skip(ctx_data), err)]
async fn load_order(ctx_data: ContextData<CancellationCtxData>) -> Result<PipelineControl> {
  let (deps, order_id, requester) = {
    let guard = ctx_data.read();
    (guard.deps.clone(), guard.order_id, guard.requester)
  };

  let order = {
    let mut tx = deps.store.begin().await?;
    tx.get_order(order_id).await?
  }
  .filter(|o| requester.may_act_for(o.customer_id))
  .ok_or_else(|| AppError::not_found("Order", order_id))?;

  if !order.status.is_cancellable() {
    return Err(AppError::Conflict(format!(
      "order {} is {} and can no longer be cancelled",
      order_id, order.status
    )));
  }
  ctx_data.write().order = Some(order);
  Ok(PipelineControl::Continue)
}

/// Slots released, open payments failed and the order cancelled, in one commit.
#[instrument(name = "cancellation::cancel_order", skip(ctx_data), err)]
async fn cancel_order(ctx_data: ContextData<CancellationCtxData>) -> Result<PipelineControl> {
  let (deps, order_id, requester, reason) = {
    let guard = ctx_data.read();
    (guard.deps.clone(), guard.order_id, guard.requester, guard.reason.clone())
  };
  let note = format!("Cancelled by {}: {}", requester, reason);

  let mut tx = deps.store.begin().await?;
  let cancelled = tx
    .update_order_status(order_id, &CANCELLABLE, OrderStatus::Cancelled, Some(&note))
    .await?
    .ok_or_else(|| AppError::Conflict(format!("order {} changed state during cancellation", order_id)))?;

  let mut released = Vec::new();
  for line in cancelled.service_lines() {
    released.push(SlotAllocator::release_in(tx.as_mut(), line.slot_id, line.duration_minutes, order_id).await?);
  }

  let mut settled = Vec::new();
  let mut abandoned = Vec::new();
  for entry in tx.transactions_for_order(order_id).await? {
    match entry.status {
      TransactionStatus::Pending => {
        if let Some(failed) = TransactionLedger::fail_in(tx.as_mut(), entry.id, "order cancelled").await? {
          abandoned.push(failed);
        }
      }
      TransactionStatus::Completed => settled.push(entry),
      TransactionStatus::Refunded | TransactionStatus::Failed => {}
    }
  }
  tx.commit().await?;
  info!(%order_id, released_slots = released.len(), to_refund = settled.len(), "Order cancelled.");

  let mut guard = ctx_data.write();
  guard.order = Some(cancelled);
  guard.released_slots = released;
  guard.settled_entries = settled;
  guard.abandoned_entries = abandoned;
  Ok(PipelineControl::Continue)
}

/// Voids the provider intents of abandoned payments and refunds settled
/// ones. Refund failures are recorded on the entry, never raised.
#[instrument(name = "cancellation::settle_payment", skip(ctx_data), err)]
async fn settle_payment(ctx_data: ContextData<CancellationCtxData>) -> Result<PipelineControl> {
  let (deps, settled, abandoned) = {
    let guard = ctx_data.read();
    (guard.deps.clone(), guard.settled_entries.clone(), guard.abandoned_entries.clone())
  };

  for entry in &abandoned {
    let voided = match deps.gateways.get(entry.payment_method) {
      Ok(gateway) => gateway.cancel_intent(&entry.intent_ref).await,
      Err(e) => Err(e),
    };
    if let Err(e) = voided {
      // A capture that still slips through is refunded on confirmation.
      warn!(transaction_id = %entry.id, intent = %entry.intent_ref, error = %e, "Could not void payment intent.");
    }
  }

  let mut outcomes = Vec::new();
  for entry in &settled {
    outcomes.push(deps.ledger.refund(&deps.gateways, entry).await?);
  }

  ctx_data.write().refunds = outcomes;
  Ok(PipelineControl::Continue)
}
