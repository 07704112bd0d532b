// spa_booking/src/services/order_orchestrator.rs

use crate::catalog::Catalog;
use crate::errors::{AppError, Result};
use crate::models::{CustomerContact, Order, PaymentMethod, Transaction};
use crate::payments::{Handoff, PaymentGateways};
use crate::pipelines::checkout::build_checkout_pipeline;
use crate::pipelines::contexts::{CheckoutCtxData, CheckoutDeps, CheckoutItems};
use crate::services::{Requester, TransactionLedger};
use crate::store::Store;
use sagaflow::{ContextData, Pipeline, PipelineResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct ProductLineRequest {
  pub product_id: Uuid,
  pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductOrderRequest {
  pub branch_id: Uuid,
  pub items: Vec<ProductLineRequest>,
  pub contact: CustomerContact,
  pub payment_method: PaymentMethod,
  #[serde(default)]
  pub note: Option<String>,
}

/// A service booking always names its slot; slots are never picked automatically.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceBookingRequest {
  pub branch_id: Uuid,
  pub service_id: Uuid,
  pub duration_minutes: i32,
  pub slot_id: Uuid,
  pub contact: CustomerContact,
  pub payment_method: PaymentMethod,
  #[serde(default)]
  pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentHandoff {
  pub transaction_id: Uuid,
  pub provider_ref: String,
  #[serde(flatten)]
  pub handoff: Handoff,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
  pub order: Order,
  /// Absent for methods settled outside the system (cash).
  pub payment: Option<PaymentHandoff>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
  pub order: Order,
  pub transactions: Vec<Transaction>,
}

pub struct OrderOrchestrator {
  deps: CheckoutDeps,
  pipeline: Pipeline<CheckoutCtxData, AppError>,
}

impl OrderOrchestrator {
  pub fn new(
    store: Arc<dyn Store>,
    catalog: Arc<dyn Catalog>,
    gateways: PaymentGateways,
    ledger: Arc<TransactionLedger>,
  ) -> Self {
    Self {
      deps: CheckoutDeps {
        store,
        catalog,
        gateways,
        ledger,
      },
      pipeline: build_checkout_pipeline(),
    }
  }

  #[instrument(name = "orders::place_product_order", skip(self, request), fields(branch_id = %request.branch_id))]
  pub async fn place_product_order(&self, customer_id: Uuid, request: ProductOrderRequest) -> Result<CheckoutOutcome> {
    let ctx = CheckoutCtxData::new(
      self.deps.clone(),
      customer_id,
      request.branch_id,
      request.contact,
      request.payment_method,
      request.note,
      CheckoutItems::Products(request.items),
    );
    self.checkout(ctx).await
  }

  #[instrument(
    name = "orders::book_service",
    skip(self, request),
    fields(slot_id = %request.slot_id, service_id = %request.service_id)
  )]
  pub async fn book_service(&self, customer_id: Uuid, request: ServiceBookingRequest) -> Result<CheckoutOutcome> {
    let ctx = CheckoutCtxData::new(
      self.deps.clone(),
      customer_id,
      request.branch_id,
      request.contact,
      request.payment_method,
      request.note,
      CheckoutItems::Service {
        service_id: request.service_id,
        duration_minutes: request.duration_minutes,
        slot_id: request.slot_id,
      },
    );
    self.checkout(ctx).await
  }

  async fn checkout(&self, ctx: CheckoutCtxData) -> Result<CheckoutOutcome> {
    let order_id = ctx.order_id;
    let ctx_data = ContextData::new(ctx);
    match self.pipeline.run(ctx_data.clone()).await? {
      PipelineResult::Completed => {}
      PipelineResult::Stopped => {
        return Err(AppError::Internal(format!("checkout for order {} stopped unexpectedly", order_id)));
      }
    }

    let guard = ctx_data.read();
    let order = guard
      .order
      .clone()
      .ok_or_else(|| AppError::Internal(format!("checkout for order {} produced no order", order_id)))?;
    let payment = match (&guard.ledger_entry, &guard.intent) {
      (Some(entry), Some(intent)) => Some(PaymentHandoff {
        transaction_id: entry.id,
        provider_ref: intent.provider_ref.clone(),
        handoff: intent.handoff.clone(),
      }),
      _ => None,
    };
    info!(%order_id, status = %order.status, with_payment = payment.is_some(), "Checkout completed.");
    Ok(CheckoutOutcome { order, payment })
  }

  /// Customers asking for someone else's order get NotFound, not Forbidden.
  pub async fn get_order(&self, order_id: Uuid, requester: Requester) -> Result<OrderView> {
    let mut tx = self.deps.store.begin().await?;
    let order = tx
      .get_order(order_id)
      .await?
      .filter(|o| requester.may_act_for(o.customer_id))
      .ok_or_else(|| AppError::not_found("Order", order_id))?;
    let transactions = tx.transactions_for_order(order_id).await?;
    Ok(OrderView { order, transactions })
  }
}
