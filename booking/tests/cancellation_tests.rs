// tests/cancellation_tests.rs
mod common;

use chrono::{Duration, Utc};
use common::*;
use spa_booking::errors::AppError;
use spa_booking::models::{OrderStatus, PaymentMethod, SlotStatus, TransactionStatus};
use spa_booking::payments::IntentStatus;
use spa_booking::services::{CheckoutOutcome, ConfirmationOutcome, Requester};
use serial_test::serial;
use uuid::Uuid;

async fn confirmed_card_booking(h: &Harness) -> CheckoutOutcome {
  let slot = h.slot(t(9, 0), t(11, 0)).await;
  let outcome = h
    .state
    .orders
    .book_service(h.fx.customer_id, h.booking(slot.id, 60, PaymentMethod::Card))
    .await
    .unwrap();
  let intent = outcome.payment.as_ref().unwrap().provider_ref.clone();
  h.state
    .confirmations
    .finalize(outcome.order.id, &intent, Some("pm_visa".to_string()))
    .await
    .unwrap();
  outcome
}

fn slot_of(outcome: &CheckoutOutcome) -> Uuid {
  outcome.order.items[0].service.as_ref().unwrap().slot_id
}

#[tokio::test]
#[serial]
async fn test_cancelling_a_paid_booking_refunds_and_frees_the_slot() {
  let h = Harness::new();
  let outcome = confirmed_card_booking(&h).await;
  let order_id = outcome.order.id;

  let cancelled = h
    .state
    .cancellations
    .cancel(order_id, Requester::Customer(h.fx.customer_id), "change of plans")
    .await
    .unwrap();

  assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
  let note = cancelled.order.note.clone().unwrap_or_default();
  assert!(note.contains("Cancelled by customer"));
  assert!(note.contains("change of plans"));

  assert_eq!(cancelled.refunds.len(), 1);
  assert!(cancelled.refunds[0].refunded);
  assert_eq!(cancelled.refunds[0].refund_ref.as_deref(), Some("re_pi_fake_1"));
  assert_eq!(*h.card.refunded.lock(), vec!["pi_fake_1".to_string()]);

  let view = h.state.orders.get_order(order_id, Requester::System).await.unwrap();
  assert_eq!(view.transactions[0].status, TransactionStatus::Refunded);
  assert_eq!(view.transactions[0].refund_ref.as_deref(), Some("re_pi_fake_1"));

  let slot = h.state.slots.get(slot_of(&outcome)).await.unwrap();
  assert_eq!(slot.available_minutes, 120);
  assert_eq!(slot.used_minutes, 0);
  assert!(slot.order_ids.is_empty());
  assert_eq!(slot.status, SlotStatus::Available);
}

#[tokio::test]
#[serial]
async fn test_refund_failure_keeps_cancellation_and_records_the_failure() {
  let h = Harness::new();
  let outcome = confirmed_card_booking(&h).await;
  h.card.fail_refunds(true);

  let cancelled = h
    .state
    .cancellations
    .cancel(outcome.order.id, Requester::Staff(Uuid::new_v4()), "therapist unavailable")
    .await
    .unwrap();

  assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
  assert!(!cancelled.refunds[0].refunded);
  assert!(cancelled.refunds[0].failure.as_deref().unwrap_or_default().contains("refund declined"));

  let view = h.state.orders.get_order(outcome.order.id, Requester::System).await.unwrap();
  let entry = &view.transactions[0];
  assert_eq!(entry.status, TransactionStatus::Completed);
  assert!(entry.refund_failure.is_some());
  assert!(entry.refund_ref.is_none());

  let slot = h.state.slots.get(slot_of(&outcome)).await.unwrap();
  assert_eq!(slot.available_minutes, 120);
}

#[tokio::test]
#[serial]
async fn test_cancelling_an_unpaid_order_fails_its_open_payment() {
  let h = Harness::new();
  let slot = h.slot(t(9, 0), t(11, 0)).await;
  let outcome = h
    .state
    .orders
    .book_service(h.fx.customer_id, h.booking(slot.id, 60, PaymentMethod::Card))
    .await
    .unwrap();

  let cancelled = h
    .state
    .cancellations
    .cancel(outcome.order.id, Requester::Customer(h.fx.customer_id), "booked by mistake")
    .await
    .unwrap();
  assert!(cancelled.refunds.is_empty());
  assert!(h.card.refunded.lock().is_empty());

  let view = h.state.orders.get_order(outcome.order.id, Requester::System).await.unwrap();
  assert_eq!(view.transactions[0].status, TransactionStatus::Failed);
  assert_eq!(view.transactions[0].failure_reason.as_deref(), Some("order cancelled"));
  assert_eq!(*h.card.voided.lock(), vec!["pi_fake_1".to_string()]);
}

#[tokio::test]
#[serial]
async fn test_payment_captured_after_expiry_is_recorded_and_refunded() {
  let h = Harness::new();
  let slot = h.slot(t(9, 0), t(11, 0)).await;
  let outcome = h
    .state
    .orders
    .book_service(h.fx.customer_id, h.booking(slot.id, 60, PaymentMethod::Card))
    .await
    .unwrap();
  let order_id = outcome.order.id;
  let intent = outcome.payment.as_ref().unwrap().provider_ref.clone();

  let expired = h
    .state
    .cancellations
    .expire_stale(Utc::now() + Duration::minutes(1))
    .await
    .unwrap();
  assert_eq!(expired, vec![order_id]);

  // The payer finishes on the provider's page anyway.
  let err = h
    .state
    .confirmations
    .finalize(order_id, &intent, Some("pm_visa".to_string()))
    .await
    .unwrap_err();
  assert!(matches!(err, AppError::Conflict(_)));

  let view = h.state.orders.get_order(order_id, Requester::System).await.unwrap();
  assert_eq!(view.order.status, OrderStatus::Cancelled);
  let entry = &view.transactions[0];
  assert_eq!(entry.status, TransactionStatus::Refunded);
  assert_eq!(entry.payment_method_ref.as_deref(), Some("pm_visa"));
  assert_eq!(entry.refund_ref.as_deref(), Some("re_pi_fake_1"));
  assert_eq!(entry.failure_reason.as_deref(), Some("order cancelled"));
  assert_eq!(*h.card.refunded.lock(), vec!["pi_fake_1".to_string()]);

  // A repeated delivery refunds nothing twice and leaves the slot free.
  let again = h.state.confirmations.finalize(order_id, &intent, None).await.unwrap_err();
  assert!(matches!(again, AppError::Conflict(_)));
  assert_eq!(h.card.refunded.lock().len(), 1);
  let slot = h.state.slots.get(slot.id).await.unwrap();
  assert_eq!(slot.status, SlotStatus::Available);
  assert_eq!(slot.available_minutes, 120);
}

#[tokio::test]
#[serial]
async fn test_late_capture_reported_by_provider_yields_refunded_outcome() {
  let h = Harness::new();
  let outcome = h
    .state
    .orders
    .place_product_order(h.fx.customer_id, h.product_order(PaymentMethod::Card))
    .await
    .unwrap();
  let order_id = outcome.order.id;
  let intent = outcome.payment.as_ref().unwrap().provider_ref.clone();
  h.state
    .cancellations
    .cancel(order_id, Requester::Customer(h.fx.customer_id), "ordered twice")
    .await
    .unwrap();

  h.card.fail_refunds(true);
  h.card.set_status(IntentStatus::Succeeded {
    payment_method_ref: Some("pm_master".to_string()),
  });
  let result = h
    .state
    .confirmations
    .confirm_card_payment(order_id, &intent, None)
    .await
    .unwrap();
  let ConfirmationOutcome::Refunded { order_id: refunded_order, refund } = result else {
    panic!("expected a refunded outcome, got {:?}", result);
  };
  assert_eq!(refunded_order, order_id);
  assert!(!refund.refunded);
  assert!(refund.failure.as_deref().unwrap_or_default().contains("refund declined"));

  // The capture stays on record so staff can settle it by hand.
  let view = h.state.orders.get_order(order_id, Requester::System).await.unwrap();
  assert_eq!(view.transactions[0].status, TransactionStatus::Completed);
  assert!(view.transactions[0].refund_failure.is_some());
  assert_eq!(view.order.status, OrderStatus::Cancelled);
}

#[tokio::test]
#[serial]
async fn test_booking_after_cancellation_reuses_the_freed_window() {
  let h = Harness::new();
  let slot = h.slot(t(9, 0), t(12, 0)).await;
  let book = |customer| {
    let request = h.booking(slot.id, 60, PaymentMethod::Cash);
    let orders = h.state.orders.clone();
    async move { orders.book_service(customer, request).await.unwrap() }
  };

  let first = book(h.fx.customer_id).await;
  let second = book(Uuid::new_v4()).await;
  h.state
    .cancellations
    .cancel(first.order.id, Requester::Staff(Uuid::new_v4()), "therapist swap")
    .await
    .unwrap();
  let third = book(Uuid::new_v4()).await;

  let window = |o: &CheckoutOutcome| {
    let line = o.order.items[0].service.as_ref().unwrap();
    (line.start_time, line.end_time)
  };
  let (b_start, b_end) = window(&second);
  let (c_start, c_end) = window(&third);
  assert_eq!((b_start, b_end), (t(10, 0), t(11, 0)));
  assert_eq!((c_start, c_end), (t(9, 0), t(10, 0)));
  assert!(c_end <= b_start || c_start >= b_end);

  // 60 free minutes remain, but none of them continuous enough for 90.
  h.state
    .cancellations
    .cancel(third.order.id, Requester::Staff(Uuid::new_v4()), "moved")
    .await
    .unwrap();
  let err = h
    .state
    .orders
    .book_service(Uuid::new_v4(), h.booking(slot.id, 90, PaymentMethod::Cash))
    .await
    .unwrap_err();
  assert!(matches!(err, AppError::Capacity(_)));
  let slot = h.state.slots.get(slot.id).await.unwrap();
  assert_eq!(slot.order_ids, vec![second.order.id]);
  assert_eq!(slot.available_minutes, 120);
}

#[tokio::test]
#[serial]
async fn test_cancellation_guards() {
  let h = Harness::new();
  let outcome = h
    .state
    .orders
    .place_product_order(h.fx.customer_id, h.product_order(PaymentMethod::Cash))
    .await
    .unwrap();
  let order_id = outcome.order.id;

  let stranger = h
    .state
    .cancellations
    .cancel(order_id, Requester::Customer(Uuid::new_v4()), "not mine")
    .await
    .unwrap_err();
  assert!(matches!(stranger, AppError::NotFound(_)));

  let blank = h
    .state
    .cancellations
    .cancel(order_id, Requester::Customer(h.fx.customer_id), "   ")
    .await
    .unwrap_err();
  assert!(matches!(blank, AppError::Validation(_)));

  h.state
    .cancellations
    .cancel(order_id, Requester::Customer(h.fx.customer_id), "no longer needed")
    .await
    .unwrap();
  let twice = h
    .state
    .cancellations
    .cancel(order_id, Requester::Customer(h.fx.customer_id), "no longer needed")
    .await
    .unwrap_err();
  assert!(matches!(twice, AppError::Conflict(_)));

  let missing = h
    .state
    .cancellations
    .cancel(Uuid::new_v4(), Requester::System, "cleanup")
    .await
    .unwrap_err();
  assert!(matches!(missing, AppError::NotFound(_)));
}

#[tokio::test]
#[serial]
async fn test_expire_stale_releases_only_pending_holds() {
  let h = Harness::new();
  let morning = h.slot(t(9, 0), t(11, 0)).await;
  let afternoon = h.slot(t(14, 0), t(16, 0)).await;

  let held = h
    .state
    .orders
    .book_service(h.fx.customer_id, h.booking(morning.id, 60, PaymentMethod::Cash))
    .await
    .unwrap();
  let unpaid = h
    .state
    .orders
    .book_service(Uuid::new_v4(), h.booking(afternoon.id, 90, PaymentMethod::Wallet))
    .await
    .unwrap();
  let paid = confirmed_card_booking_on(&h, morning.id).await;

  // Nothing is older than a cutoff in the past.
  let none = h
    .state
    .cancellations
    .expire_stale(Utc::now() - Duration::minutes(15))
    .await
    .unwrap();
  assert!(none.is_empty());

  let mut expired = h
    .state
    .cancellations
    .expire_stale(Utc::now() + Duration::minutes(1))
    .await
    .unwrap();
  expired.sort();
  let mut expected = vec![held.order.id, unpaid.order.id];
  expected.sort();
  assert_eq!(expired, expected);

  for id in &expected {
    let view = h.state.orders.get_order(*id, Requester::System).await.unwrap();
    assert_eq!(view.order.status, OrderStatus::Cancelled);
    assert!(view.order.note.unwrap_or_default().contains("payment hold expired"));
  }
  let paid_view = h.state.orders.get_order(paid, Requester::System).await.unwrap();
  assert_eq!(paid_view.order.status, OrderStatus::Confirmed);

  let morning = h.state.slots.get(morning.id).await.unwrap();
  assert_eq!(morning.order_ids, vec![paid]);
  assert_eq!(morning.available_minutes, 60);
  let afternoon = h.state.slots.get(afternoon.id).await.unwrap();
  assert_eq!(afternoon.available_minutes, 120);
  assert_eq!(afternoon.status, SlotStatus::Available);
}

async fn confirmed_card_booking_on(h: &Harness, slot_id: Uuid) -> Uuid {
  let outcome = h
    .state
    .orders
    .book_service(h.fx.customer_id, h.booking(slot_id, 60, PaymentMethod::Card))
    .await
    .unwrap();
  let intent = outcome.payment.as_ref().unwrap().provider_ref.clone();
  h.state.confirmations.finalize(outcome.order.id, &intent, None).await.unwrap();
  outcome.order.id
}
