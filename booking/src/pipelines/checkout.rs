// spa_booking/src/pipelines/checkout.rs

//! Order placement as a saga:
//!
//! 1. `validate_request`     read-only checks against catalog and slot.
//! 2. `price_items`          order lines from catalog prices.
//! 3. `reserve_and_persist`  slot reservation + order insert, one commit.
//!                           Compensated by releasing the slot and cancelling the order.
//! 4. `create_payment_intent` provider call, outside any store transaction.
//!                           Compensated by voiding the intent with the provider.
//! 5. `record_ledger_entry`  PENDING ledger entry, its own commit.
//!
//! Steps 4 and 5 are skipped for methods that need no upfront intent.

use crate::errors::{AppError, Result};
use crate::models::{ItemType, Order, OrderDetail, OrderStatus, ServiceBookingRef, ServiceLine};
use crate::payments::IntentRequest;
use crate::pipelines::contexts::{CheckoutCtxData, CheckoutItems};
use crate::services::SlotAllocator;
use chrono::{Duration, Utc};
use sagaflow::{ContextData, Pipeline, PipelineControl, SkipCondition};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const VALIDATE_REQUEST: &str = "validate_request";
pub const PRICE_ITEMS: &str = "price_items";
pub const RESERVE_AND_PERSIST: &str = "reserve_and_persist";
pub const CREATE_PAYMENT_INTENT: &str = "create_payment_intent";
pub const RECORD_LEDGER_ENTRY: &str = "record_ledger_entry";

const INTENT_FAILURE_NOTE: &str = "Cancelled: payment initialization failed";

pub fn build_checkout_pipeline() -> Pipeline<CheckoutCtxData, AppError> {
  let no_intent: SkipCondition<CheckoutCtxData> =
    Arc::new(|ctx: ContextData<CheckoutCtxData>| !ctx.read().payment_method.requires_intent());

  let mut p = Pipeline::<CheckoutCtxData, AppError>::new(&[
    (VALIDATE_REQUEST, false, None),
    (PRICE_ITEMS, false, None),
    (RESERVE_AND_PERSIST, false, None),
    (CREATE_PAYMENT_INTENT, false, Some(no_intent.clone())),
    (RECORD_LEDGER_ENTRY, false, Some(no_intent)),
  ]);

  p.on_root(VALIDATE_REQUEST, |ctx| Box::pin(validate_request(ctx)));
  p.on_root(PRICE_ITEMS, |ctx| Box::pin(price_items(ctx)));
  p.on_root(RESERVE_AND_PERSIST, |ctx| Box::pin(reserve_and_persist(ctx)));
  p.compensate_root(RESERVE_AND_PERSIST, |ctx| Box::pin(undo_reservation(ctx)));
  p.on_root(CREATE_PAYMENT_INTENT, |ctx| Box::pin(create_payment_intent(ctx)));
  p.compensate_root(CREATE_PAYMENT_INTENT, |ctx| Box::pin(void_payment_intent(ctx)));
  p.on_root(RECORD_LEDGER_ENTRY, |ctx| Box::pin(record_ledger_entry(ctx)));
  p
}

#[instrument(name = "checkout::validate_request", skip(ctx_data), err)]
async fn validate_request(ctx_data: ContextData<CheckoutCtxData>) -> Result<PipelineControl> {
  let (deps, branch_id, payment_method, items, contact_name) = {
    let guard = ctx_data.read();
    (
      guard.deps.clone(),
      guard.branch_id,
      guard.payment_method,
      guard.items.clone(),
      guard.contact.name.clone(),
    )
  };

  if contact_name.trim().is_empty() {
    return Err(AppError::Validation("contact name is required".to_string()));
  }
  if payment_method.requires_intent() {
    deps.gateways.get(payment_method)?;
  }

  let branch = deps.catalog.branch(branch_id).await?;
  if !branch.active {
    return Err(AppError::Validation(format!("branch '{}' is not active", branch.name)));
  }

  match &items {
    CheckoutItems::Products(lines) => {
      if lines.is_empty() {
        return Err(AppError::Validation("order contains no items".to_string()));
      }
      if let Some(bad) = lines.iter().find(|l| l.quantity <= 0) {
        return Err(AppError::Validation(format!("quantity for product {} must be positive", bad.product_id)));
      }
    }
    CheckoutItems::Service {
      service_id,
      duration_minutes,
      slot_id,
    } => {
      if *duration_minutes <= 0 {
        return Err(AppError::Validation("duration must be positive".to_string()));
      }
      let service = deps.catalog.service(*service_id).await?;
      if !service.offered_at(branch_id) {
        return Err(AppError::Validation(format!(
          "service '{}' is not offered at branch '{}'",
          service.name, branch.name
        )));
      }
      if service.tier(*duration_minutes).is_none() {
        return Err(AppError::Validation(format!(
          "service '{}' has no {} minute option",
          service.name, duration_minutes
        )));
      }
      let slot = {
        let mut tx = deps.store.begin().await?;
        tx.get_slot(*slot_id).await?.ok_or_else(|| AppError::not_found("Slot", slot_id))?
      };
      if slot.date < Utc::now().date_naive() {
        return Err(AppError::Validation(format!("slot {} is in the past", slot.id)));
      }
      if *duration_minutes > slot.duration_minutes() {
        return Err(AppError::Validation(format!(
          "a {} minute service does not fit a {} minute slot",
          duration_minutes,
          slot.duration_minutes()
        )));
      }
    }
  }

  ctx_data.write().branch = Some(branch);
  Ok(PipelineControl::Continue)
}

#[instrument(name = "checkout::price_items", skip(ctx_data), err)]
async fn price_items(ctx_data: ContextData<CheckoutCtxData>) -> Result<PipelineControl> {
  let (deps, order_id, items) = {
    let guard = ctx_data.read();
    (guard.deps.clone(), guard.order_id, guard.items.clone())
  };

  let mut lines = Vec::new();
  let mut booking = None;
  match items {
    CheckoutItems::Products(requested) => {
      for line in requested {
        let product = deps.catalog.product(line.product_id).await?;
        if !product.active {
          return Err(AppError::Validation(format!("product '{}' is not available", product.name)));
        }
        lines.push(OrderDetail {
          id: Uuid::new_v4(),
          order_id,
          item_type: ItemType::Product,
          item_id: product.id,
          item_name: product.name,
          price: product.price,
          discount_price: product.discount_price,
          quantity: line.quantity,
          service: None,
        });
      }
    }
    CheckoutItems::Service {
      service_id,
      duration_minutes,
      slot_id,
    } => {
      let service = deps.catalog.service(service_id).await?;
      let tier = service
        .tier(duration_minutes)
        .cloned()
        .ok_or_else(|| AppError::Validation(format!("service has no {} minute option", duration_minutes)))?;
      let slot = {
        let mut tx = deps.store.begin().await?;
        tx.get_slot(slot_id).await?.ok_or_else(|| AppError::not_found("Slot", slot_id))?
      };
      // Placeholder window; the real offset inside the slot is known once minutes are taken.
      let end_time = slot.start_time + Duration::minutes(duration_minutes as i64);
      lines.push(OrderDetail {
        id: Uuid::new_v4(),
        order_id,
        item_type: ItemType::Service,
        item_id: service.id,
        item_name: format!("{} ({} min)", service.name, duration_minutes),
        price: tier.price,
        discount_price: tier.discount_price,
        quantity: 1,
        service: Some(ServiceLine {
          slot_id: slot.id,
          staff_id: slot.staff_id,
          date: slot.date,
          start_time: slot.start_time,
          end_time,
          duration_minutes,
        }),
      });
      booking = Some(ServiceBookingRef {
        slot_id: slot.id,
        staff_id: slot.staff_id,
        minutes: duration_minutes,
      });
    }
  }

  let mut guard = ctx_data.write();
  guard.lines = lines;
  guard.booking = booking;
  Ok(PipelineControl::Continue)
}

#[instrument(name = "checkout::reserve_and_persist", skip(ctx_data), err)]
async fn reserve_and_persist(ctx_data: ContextData<CheckoutCtxData>) -> Result<PipelineControl> {
  let (deps, order_id, booking, mut lines, customer_id, branch_id, contact, payment_method, note) = {
    let guard = ctx_data.read();
    (
      guard.deps.clone(),
      guard.order_id,
      guard.booking,
      guard.lines.clone(),
      guard.customer_id,
      guard.branch_id,
      guard.contact.clone(),
      guard.payment_method,
      guard.note.clone(),
    )
  };

  let mut tx = deps.store.begin().await?;
  let mut reserved_slot = None;
  if let Some(booking) = booking {
    let slot = SlotAllocator::reserve_in(tx.as_mut(), booking.slot_id, booking.minutes, order_id).await?;
    let mut taken = Vec::new();
    for held_by in slot.order_ids.iter().filter(|id| **id != order_id) {
      if let Some(held) = tx.get_order(*held_by).await? {
        taken.extend(
          held
            .service_lines()
            .filter(|l| l.slot_id == slot.id)
            .map(|l| (l.start_time, l.end_time)),
        );
      }
    }
    // Free minutes can be split by a cancelled booking; the unit is dropped
    // uncommitted, so the reservation above is discarded.
    let start = slot.earliest_gap(&taken, booking.minutes).ok_or_else(|| {
      AppError::Capacity(format!(
        "slot {} has no continuous {} minute window left",
        slot.id, booking.minutes
      ))
    })?;
    for line in lines.iter_mut().filter_map(|l| l.service.as_mut()) {
      line.start_time = start;
      line.end_time = line.start_time + Duration::minutes(line.duration_minutes as i64);
    }
    reserved_slot = Some(slot);
  }

  let order = Order::new(order_id, customer_id, branch_id, contact, lines, payment_method, note);
  tx.insert_order(&order).await?;
  tx.commit().await?;
  info!(%order_id, final_price = order.final_price, "Order persisted.");

  let mut guard = ctx_data.write();
  guard.reserved_slot = reserved_slot;
  guard.order = Some(order);
  Ok(PipelineControl::Continue)
}

/// Gives the reserved minutes back and closes the order, in one commit.
#[instrument(name = "checkout::undo_reservation", skip(ctx_data), err)]
async fn undo_reservation(ctx_data: ContextData<CheckoutCtxData>) -> Result<()> {
  let (deps, order_id, booking, persisted) = {
    let guard = ctx_data.read();
    (guard.deps.clone(), guard.order_id, guard.booking, guard.order.is_some())
  };
  if !persisted {
    return Ok(());
  }

  let mut tx = deps.store.begin().await?;
  if let Some(booking) = booking {
    SlotAllocator::release_in(tx.as_mut(), booking.slot_id, booking.minutes, order_id).await?;
  }
  let cancelled = tx
    .update_order_status(order_id, &[OrderStatus::Pending], OrderStatus::Cancelled, Some(INTENT_FAILURE_NOTE))
    .await?;
  tx.commit().await?;

  if cancelled.is_none() {
    warn!(%order_id, "Order had already left PENDING during compensation.");
  }
  let mut guard = ctx_data.write();
  if let Some(order) = cancelled {
    guard.order = Some(order);
  }
  Ok(())
}

#[instrument(name = "checkout::create_payment_intent", skip(ctx_data), err)]
async fn create_payment_intent(ctx_data: ContextData<CheckoutCtxData>) -> Result<PipelineControl> {
  let (deps, order, customer_id, booking) = {
    let guard = ctx_data.read();
    (guard.deps.clone(), guard.order.clone(), guard.customer_id, guard.booking)
  };
  let order = order.ok_or_else(|| AppError::Internal("order missing before intent creation".to_string()))?;

  let gateway = deps.gateways.get(order.payment_method)?;
  let request = IntentRequest {
    order_id: order.id,
    customer_id,
    amount: order.final_price,
    currency: deps.ledger.currency().to_string(),
    contact: order.contact.clone(),
    description: format!("Order {}", order.id),
    booking,
  };
  let intent = gateway.create_intent(&request).await?;

  ctx_data.write().intent = Some(intent);
  Ok(PipelineControl::Continue)
}

/// Runs when the ledger write fails after the provider already issued the
/// intent, so the customer cannot pay for an order that was just cancelled.
#[instrument(name = "checkout::void_payment_intent", skip(ctx_data), err)]
async fn void_payment_intent(ctx_data: ContextData<CheckoutCtxData>) -> Result<()> {
  let (deps, payment_method, intent) = {
    let guard = ctx_data.read();
    (guard.deps.clone(), guard.payment_method, guard.intent.clone())
  };
  let Some(intent) = intent else {
    return Ok(());
  };
  deps.gateways.get(payment_method)?.cancel_intent(&intent.provider_ref).await?;
  info!(intent = %intent.provider_ref, "Payment intent voided.");
  Ok(())
}

#[instrument(name = "checkout::record_ledger_entry", skip(ctx_data), err)]
async fn record_ledger_entry(ctx_data: ContextData<CheckoutCtxData>) -> Result<PipelineControl> {
  let (deps, order, intent) = {
    let guard = ctx_data.read();
    (guard.deps.clone(), guard.order.clone(), guard.intent.clone())
  };
  let (Some(order), Some(intent)) = (order, intent) else {
    return Err(AppError::Internal("order or intent missing before ledger write".to_string()));
  };

  let entry = deps.ledger.record_pending(&order, &intent).await?;
  ctx_data.write().ledger_entry = Some(entry);
  Ok(PipelineControl::Continue)
}
