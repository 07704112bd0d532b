// spa_booking/src/services/cancellation.rs

use crate::errors::{AppError, Result};
use crate::models::Order;
use crate::payments::PaymentGateways;
use crate::pipelines::cancellation::build_cancellation_pipeline;
use crate::pipelines::contexts::{CancellationCtxData, CancellationDeps, RefundOutcome};
use crate::services::{Requester, TransactionLedger};
use crate::store::Store;
use chrono::{DateTime, Utc};
use sagaflow::{ContextData, Pipeline};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct CancellationOutcome {
  pub order: Order,
  pub refunds: Vec<RefundOutcome>,
}

pub struct CancellationCompensator {
  deps: CancellationDeps,
  pipeline: Pipeline<CancellationCtxData, AppError>,
}

impl CancellationCompensator {
  pub fn new(store: Arc<dyn Store>, gateways: PaymentGateways, ledger: Arc<TransactionLedger>) -> Result<Self> {
    Ok(Self {
      deps: CancellationDeps {
        store,
        gateways,
        ledger,
      },
      pipeline: build_cancellation_pipeline()?,
    })
  }

  #[instrument(name = "cancellation::cancel", skip(self, reason), fields(requester = %requester))]
  pub async fn cancel(&self, order_id: Uuid, requester: Requester, reason: &str) -> Result<CancellationOutcome> {
    let reason = reason.trim();
    if reason.is_empty() {
      return Err(AppError::Validation("a cancellation reason is required".to_string()));
    }

    let ctx_data = ContextData::new(CancellationCtxData::new(self.deps.clone(), order_id, requester, reason));
    self.pipeline.run(ctx_data.clone()).await?;

    let guard = ctx_data.read();
    let order = guard
      .order
      .clone()
      .ok_or_else(|| AppError::Internal(format!("cancellation of {} produced no order", order_id)))?;
    Ok(CancellationOutcome {
      order,
      refunds: guard.refunds.clone(),
    })
  }

  /// Cancels every order still PENDING that was created before `cutoff`.
  /// Called by an external scheduler; orders that move on in the meantime
  /// are skipped.
  #[instrument(name = "cancellation::expire_stale", skip(self))]
  pub async fn expire_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
    let stale = {
      let mut tx = self.deps.store.begin().await?;
      tx.pending_orders_created_before(cutoff).await?
    };

    let mut expired = Vec::new();
    for order_id in stale {
      match self.cancel(order_id, Requester::System, "payment hold expired").await {
        Ok(_) => expired.push(order_id),
        Err(AppError::Conflict(m)) => debug!(%order_id, reason = %m, "Order left PENDING before expiry; skipped."),
        Err(e) => warn!(%order_id, error = %e, "Could not expire order."),
      }
    }
    if !expired.is_empty() {
      info!(count = expired.len(), "Expired stale holds.");
    }
    Ok(expired)
  }
}
