// tests/confirmation_tests.rs
mod common;

use chrono::Utc;
use common::*;
use futures_util::future::join;
use serde_json::json;
use spa_booking::errors::AppError;
use spa_booking::models::{OrderStatus, PaymentMethod, SlotStatus, TransactionStatus};
use spa_booking::payments::card::sign_webhook_payload;
use spa_booking::payments::IntentStatus;
use spa_booking::services::{CheckoutOutcome, ConfirmationOutcome, Requester};
use serial_test::serial;

async fn card_booking(h: &Harness) -> CheckoutOutcome {
  let slot = h.slot(t(9, 0), t(11, 0)).await;
  h.state
    .orders
    .book_service(h.fx.customer_id, h.booking(slot.id, 60, PaymentMethod::Card))
    .await
    .unwrap()
}

fn intent_ref(outcome: &CheckoutOutcome) -> String {
  outcome.payment.as_ref().unwrap().provider_ref.clone()
}

#[tokio::test]
#[serial]
async fn test_repeated_card_confirmation_is_idempotent() {
  let h = Harness::new();
  let outcome = card_booking(&h).await;
  let order_id = outcome.order.id;
  let intent = intent_ref(&outcome);
  h.card.set_status(IntentStatus::Succeeded {
    payment_method_ref: Some("pm_visa".to_string()),
  });

  let first = h.state.confirmations.confirm_card_payment(order_id, &intent, None).await.unwrap();
  let ConfirmationOutcome::Confirmed(first) = first else {
    panic!("expected confirmation, got {:?}", first);
  };
  assert!(!first.replayed);
  assert!(first.notified);
  assert_eq!(first.order.status, OrderStatus::Confirmed);

  let second = h.state.confirmations.confirm_card_payment(order_id, &intent, None).await.unwrap();
  let ConfirmationOutcome::Confirmed(second) = second else {
    panic!("expected confirmation, got {:?}", second);
  };
  assert!(second.replayed);
  assert_eq!(second.order, first.order);

  let view = h.state.orders.get_order(order_id, Requester::System).await.unwrap();
  assert_eq!(view.transactions.len(), 1);
  assert_eq!(view.transactions[0].status, TransactionStatus::Completed);
  assert_eq!(view.transactions[0].payment_method_ref.as_deref(), Some("pm_visa"));

  let slot_id = outcome.order.items[0].service.as_ref().unwrap().slot_id;
  let slot = h.state.slots.get(slot_id).await.unwrap();
  assert_eq!(slot.status, SlotStatus::Reserved);
  assert_eq!(slot.available_minutes, 60);

  // One notification, carrying the booking code.
  let sent = h.notifier.sent.lock().clone();
  assert_eq!(sent.len(), 1);
  assert_eq!(sent[0].1, order_id);
  assert!(sent[0].0.starts_with("BK-"));
}

#[tokio::test]
#[serial]
async fn test_concurrent_finalize_applies_once() {
  let h = Harness::new();
  let outcome = card_booking(&h).await;
  let order_id = outcome.order.id;
  let intent = intent_ref(&outcome);

  let (a, b) = join(
    h.state.confirmations.finalize(order_id, &intent, None),
    h.state.confirmations.finalize(order_id, &intent, None),
  )
  .await;
  let (a, b) = (a.unwrap(), b.unwrap());
  assert_ne!(a.replayed, b.replayed);
  assert_eq!(a.order.status, OrderStatus::Confirmed);
  assert_eq!(b.order.status, OrderStatus::Confirmed);
  assert_eq!(h.notifier.sent.lock().len(), 1);
}

#[tokio::test]
#[serial]
async fn test_unknown_intent_is_not_found() {
  let h = Harness::new();
  let outcome = card_booking(&h).await;

  let err = h
    .state
    .confirmations
    .finalize(outcome.order.id, "pi_somebody_else", None)
    .await
    .unwrap_err();
  assert!(matches!(err, AppError::NotFound(_)));
  let view = h.state.orders.get_order(outcome.order.id, Requester::System).await.unwrap();
  assert_eq!(view.order.status, OrderStatus::Pending);
}

#[tokio::test]
#[serial]
async fn test_unfinished_card_payment_is_a_conflict() {
  let h = Harness::new();
  let outcome = card_booking(&h).await;

  let err = h
    .state
    .confirmations
    .confirm_card_payment(outcome.order.id, &intent_ref(&outcome), None)
    .await
    .unwrap_err();
  assert!(matches!(err, AppError::Conflict(_)));
  let view = h.state.orders.get_order(outcome.order.id, Requester::System).await.unwrap();
  assert_eq!(view.order.status, OrderStatus::Pending);
  assert_eq!(view.transactions[0].status, TransactionStatus::Pending);
}

#[tokio::test]
#[serial]
async fn test_declined_card_cancels_order_and_frees_slot() {
  let h = Harness::new();
  let outcome = card_booking(&h).await;
  let order_id = outcome.order.id;
  h.card.set_status(IntentStatus::Failed("card declined".to_string()));

  let result = h
    .state
    .confirmations
    .confirm_card_payment(order_id, &intent_ref(&outcome), None)
    .await
    .unwrap();
  assert!(matches!(result, ConfirmationOutcome::Failed { .. }));

  let view = h.state.orders.get_order(order_id, Requester::System).await.unwrap();
  assert_eq!(view.order.status, OrderStatus::Cancelled);
  assert_eq!(view.transactions[0].status, TransactionStatus::Failed);
  assert_eq!(view.transactions[0].failure_reason.as_deref(), Some("card declined"));

  let slot_id = outcome.order.items[0].service.as_ref().unwrap().slot_id;
  let slot = h.state.slots.get(slot_id).await.unwrap();
  assert_eq!(slot.status, SlotStatus::Available);
  assert_eq!(slot.available_minutes, 120);

  // A late success cannot revive the order; the capture is sent back.
  let err = h
    .state
    .confirmations
    .finalize(order_id, &intent_ref(&outcome), None)
    .await
    .unwrap_err();
  assert!(matches!(err, AppError::Conflict(_)));
  assert_eq!(*h.card.refunded.lock(), vec![intent_ref(&outcome)]);
  let view = h.state.orders.get_order(order_id, Requester::System).await.unwrap();
  assert_eq!(view.order.status, OrderStatus::Cancelled);
  assert_eq!(view.transactions[0].status, TransactionStatus::Refunded);
}

#[tokio::test]
#[serial]
async fn test_signed_card_webhook_confirms_payment() {
  let h = Harness::new();
  let outcome = card_booking(&h).await;
  let order_id = outcome.order.id;
  let body = json!({
    "type": "payment_intent.succeeded",
    "data": { "object": {
      "id": intent_ref(&outcome),
      "payment_method": "pm_webhook",
      "metadata": { "order_id": order_id.to_string() }
    }}
  })
  .to_string();

  let header = sign_webhook_payload(body.as_bytes(), WEBHOOK_SECRET, Utc::now().timestamp()).unwrap();
  let result = h.state.confirmations.handle_card_webhook(body.as_bytes(), &header).await.unwrap();
  assert!(matches!(result, ConfirmationOutcome::Confirmed(_)));

  let view = h.state.orders.get_order(order_id, Requester::System).await.unwrap();
  assert_eq!(view.order.status, OrderStatus::Confirmed);
  assert_eq!(view.transactions[0].payment_method_ref.as_deref(), Some("pm_webhook"));
}

#[tokio::test]
#[serial]
async fn test_forged_card_webhook_changes_nothing() {
  let h = Harness::new();
  let outcome = card_booking(&h).await;
  let body = json!({
    "type": "payment_intent.succeeded",
    "data": { "object": {
      "id": intent_ref(&outcome),
      "metadata": { "order_id": outcome.order.id.to_string() }
    }}
  })
  .to_string();

  let header = sign_webhook_payload(body.as_bytes(), "whsec_forged", Utc::now().timestamp()).unwrap();
  let err = h
    .state
    .confirmations
    .handle_card_webhook(body.as_bytes(), &header)
    .await
    .unwrap_err();
  assert!(matches!(err, AppError::PaymentProvider(_)));

  let view = h.state.orders.get_order(outcome.order.id, Requester::System).await.unwrap();
  assert_eq!(view.order.status, OrderStatus::Pending);
}

#[tokio::test]
#[serial]
async fn test_unhandled_webhook_event_is_ignored() {
  let h = Harness::new();
  let body = json!({ "type": "charge.updated", "data": { "object": {} } }).to_string();
  let header = sign_webhook_payload(body.as_bytes(), WEBHOOK_SECRET, Utc::now().timestamp()).unwrap();

  let result = h.state.confirmations.handle_card_webhook(body.as_bytes(), &header).await.unwrap();
  assert!(matches!(result, ConfirmationOutcome::Ignored { .. }));
}

#[tokio::test]
#[serial]
async fn test_notification_failure_does_not_undo_confirmation() {
  let h = Harness::new();
  let outcome = h
    .state
    .orders
    .place_product_order(h.fx.customer_id, h.product_order(PaymentMethod::Card))
    .await
    .unwrap();
  h.notifier.fail(true);

  let finalized = h
    .state
    .confirmations
    .finalize(outcome.order.id, &intent_ref(&outcome), Some("pm_1".to_string()))
    .await
    .unwrap();
  assert!(!finalized.notified);
  assert!(!finalized.replayed);
  assert_eq!(finalized.order.status, OrderStatus::Confirmed);
  assert!(h.notifier.receipts.lock().is_empty());
}

#[tokio::test]
#[serial]
async fn test_product_order_gets_a_purchase_receipt() {
  let h = Harness::new();
  let outcome = h
    .state
    .orders
    .place_product_order(h.fx.customer_id, h.product_order(PaymentMethod::Card))
    .await
    .unwrap();

  let finalized = h
    .state
    .confirmations
    .finalize(outcome.order.id, &intent_ref(&outcome), None)
    .await
    .unwrap();
  assert!(finalized.notified);
  assert_eq!(*h.notifier.receipts.lock(), vec![280_000]);
  assert!(h.notifier.sent.lock().is_empty());
}
