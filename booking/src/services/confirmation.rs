// spa_booking/src/services/confirmation.rs

use crate::errors::{AppError, Result};
use crate::models::{Order, OrderStatus, PaymentMethod, TransactionStatus};
use crate::notifications::Notifier;
use crate::payments::card::{verify_webhook_signature, CardWebhookEvent};
use crate::payments::wallet::{decode_extra_data, parse_order_ref, WalletCallback, WalletSigner};
use crate::payments::{IntentStatus, PaymentGateways};
use crate::pipelines::confirmation::build_confirmation_pipeline;
use crate::pipelines::contexts::{ConfirmationCtxData, ConfirmationDeps};
use crate::services::ledger::RefundOutcome;
use crate::services::{SlotAllocator, TransactionLedger};
use crate::store::Store;
use chrono::Utc;
use sagaflow::{ContextData, Pipeline};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Result of a successful finalize. `replayed` is true when an earlier
/// delivery had already applied it; the order is the same either way.
#[derive(Debug, Clone, Serialize)]
pub struct Finalized {
  pub order: Order,
  pub replayed: bool,
  pub notified: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmationOutcome {
  Confirmed(Finalized),
  Failed { order_id: Uuid, reason: String },
  /// The money arrived after the order was cancelled and was sent back.
  Refunded { order_id: Uuid, refund: RefundOutcome },
  /// Nothing was changed; `reason` is for logs, not for the caller.
  Ignored { reason: String },
}

enum Settled {
  Confirmed(Finalized),
  Refunded(RefundOutcome),
}

impl Settled {
  fn into_outcome(self, order_id: Uuid) -> ConfirmationOutcome {
    match self {
      Settled::Confirmed(finalized) => ConfirmationOutcome::Confirmed(finalized),
      Settled::Refunded(refund) => ConfirmationOutcome::Refunded { order_id, refund },
    }
  }
}

pub struct ConfirmationHandler {
  deps: ConfirmationDeps,
  gateways: PaymentGateways,
  ledger: Arc<TransactionLedger>,
  card_webhook_secret: String,
  wallet_signer: WalletSigner,
  pipeline: Pipeline<ConfirmationCtxData, AppError>,
}

impl ConfirmationHandler {
  pub fn new(
    store: Arc<dyn Store>,
    gateways: PaymentGateways,
    ledger: Arc<TransactionLedger>,
    notifier: Arc<dyn Notifier>,
    card_webhook_secret: impl Into<String>,
    wallet_signer: WalletSigner,
  ) -> Result<Self> {
    Ok(Self {
      deps: ConfirmationDeps { store, notifier },
      gateways,
      ledger,
      card_webhook_secret: card_webhook_secret.into(),
      wallet_signer,
      pipeline: build_confirmation_pipeline()?,
    })
  }

  /// Idempotent: a second call with the same `(order_id, intent_ref)`
  /// returns the same order and applies nothing.
  ///
  /// A success for a payment whose order was already cancelled cannot
  /// confirm anything: the capture is recorded, refunded, and the call
  /// still fails with `Conflict`.
  #[instrument(name = "confirmation::finalize", skip(self, payment_method_ref))]
  pub async fn finalize(
    &self,
    order_id: Uuid,
    intent_ref: &str,
    payment_method_ref: Option<String>,
  ) -> Result<Finalized> {
    match self.settle_success(order_id, intent_ref, payment_method_ref).await? {
      Settled::Confirmed(finalized) => Ok(finalized),
      Settled::Refunded(refund) => Err(AppError::Conflict(format!(
        "order {} was cancelled before payment {} arrived; refund {}",
        order_id,
        intent_ref,
        refund.refund_ref.as_deref().unwrap_or("failed")
      ))),
    }
  }

  /// Provider-reported success, as seen by every confirmation path.
  async fn settle_success(
    &self,
    order_id: Uuid,
    intent_ref: &str,
    payment_method_ref: Option<String>,
  ) -> Result<Settled> {
    match self.apply_finalize(order_id, intent_ref, payment_method_ref.clone()).await {
      Ok(finalized) => Ok(Settled::Confirmed(finalized)),
      Err(AppError::Conflict(message)) => {
        match self.refund_late_capture(order_id, intent_ref, payment_method_ref).await? {
          Some(refund) => Ok(Settled::Refunded(refund)),
          None => Err(AppError::Conflict(message)),
        }
      }
      Err(e) => Err(e),
    }
  }

  /// Acts only on a FAILED entry whose order is CANCELLED; `None` otherwise.
  #[instrument(name = "confirmation::refund_late_capture", skip(self, payment_method_ref))]
  async fn refund_late_capture(
    &self,
    order_id: Uuid,
    intent_ref: &str,
    payment_method_ref: Option<String>,
  ) -> Result<Option<RefundOutcome>> {
    let captured = {
      let mut tx = self.deps.store.begin().await?;
      let entry = TransactionLedger::locate_in(tx.as_mut(), order_id, intent_ref).await?;
      if entry.status != TransactionStatus::Failed {
        return Ok(None);
      }
      let cancelled = tx
        .get_order(order_id)
        .await?
        .map_or(false, |o| o.status == OrderStatus::Cancelled);
      if !cancelled {
        return Ok(None);
      }
      let Some(captured) = TransactionLedger::capture_late_in(tx.as_mut(), entry.id, payment_method_ref).await? else {
        return Ok(None);
      };
      tx.commit().await?;
      captured
    };

    warn!(%order_id, %intent_ref, amount = captured.amount, "Payment captured for a cancelled order; refunding.");
    let refund = self.ledger.refund(&self.gateways, &captured).await?;
    Ok(Some(refund))
  }

  async fn apply_finalize(
    &self,
    order_id: Uuid,
    intent_ref: &str,
    payment_method_ref: Option<String>,
  ) -> Result<Finalized> {
    let ctx_data = ContextData::new(ConfirmationCtxData::new(
      self.deps.clone(),
      order_id,
      intent_ref,
      payment_method_ref,
    ));
    self.pipeline.run(ctx_data.clone()).await?;

    let guard = ctx_data.read();
    let order = guard
      .order
      .clone()
      .ok_or_else(|| AppError::Internal(format!("finalize for order {} produced no order", order_id)))?;
    Ok(Finalized {
      order,
      replayed: guard.replayed,
      notified: guard.notified,
    })
  }

  /// Marks the attempt FAILED and cancels the still-PENDING order, releasing
  /// its slots, in one commit. Repeats and late failures after success are no-ops.
  #[instrument(name = "confirmation::fail_payment", skip(self))]
  pub async fn fail_payment(&self, order_id: Uuid, intent_ref: &str, reason: &str) -> Result<ConfirmationOutcome> {
    let mut tx = self.deps.store.begin().await?;
    let entry = TransactionLedger::locate_in(tx.as_mut(), order_id, intent_ref).await?;
    match entry.status {
      TransactionStatus::Pending => {}
      TransactionStatus::Failed => {
        return Ok(ConfirmationOutcome::Failed {
          order_id,
          reason: entry.failure_reason.unwrap_or_else(|| reason.to_string()),
        })
      }
      other => {
        warn!(%order_id, %intent_ref, status = %other, "Failure report for a settled payment ignored.");
        return Ok(ConfirmationOutcome::Ignored {
          reason: format!("payment already {}", other),
        });
      }
    }

    if TransactionLedger::fail_in(tx.as_mut(), entry.id, reason).await?.is_none() {
      return Ok(ConfirmationOutcome::Ignored {
        reason: "payment changed state concurrently".to_string(),
      });
    }
    let note = format!("Cancelled: payment failed ({})", reason);
    if let Some(order) = tx
      .update_order_status(order_id, &[OrderStatus::Pending], OrderStatus::Cancelled, Some(&note))
      .await?
    {
      for line in order.service_lines() {
        SlotAllocator::release_in(tx.as_mut(), line.slot_id, line.duration_minutes, order_id).await?;
      }
    }
    tx.commit().await?;
    info!(%order_id, %intent_ref, reason, "Payment failed; order cancelled.");
    Ok(ConfirmationOutcome::Failed {
      order_id,
      reason: reason.to_string(),
    })
  }

  /// Client-reported card confirmation. The provider is asked for the
  /// intent's real status; the client's word alone finalizes nothing.
  #[instrument(name = "confirmation::confirm_card_payment", skip(self, payment_method_ref))]
  pub async fn confirm_card_payment(
    &self,
    order_id: Uuid,
    intent_id: &str,
    payment_method_ref: Option<String>,
  ) -> Result<ConfirmationOutcome> {
    {
      let mut tx = self.deps.store.begin().await?;
      let entry = TransactionLedger::locate_in(tx.as_mut(), order_id, intent_id).await?;
      if entry.payment_method != PaymentMethod::Card {
        return Err(AppError::Validation(format!("payment {} is not a card payment", intent_id)));
      }
    }

    let gateway = self.gateways.get(PaymentMethod::Card)?;
    match gateway.intent_status(intent_id).await? {
      IntentStatus::Succeeded {
        payment_method_ref: provider_ref,
      } => Ok(
        self
          .settle_success(order_id, intent_id, provider_ref.or(payment_method_ref))
          .await?
          .into_outcome(order_id),
      ),
      IntentStatus::Failed(reason) => self.fail_payment(order_id, intent_id, &reason).await,
      IntentStatus::Pending(status) => Err(AppError::Conflict(format!(
        "payment {} is not complete yet (provider status '{}')",
        intent_id, status
      ))),
    }
  }

  /// Signature failures surface as `PaymentProvider` errors with no side effects.
  #[instrument(name = "confirmation::card_webhook", skip_all)]
  pub async fn handle_card_webhook(&self, payload: &[u8], signature_header: &str) -> Result<ConfirmationOutcome> {
    verify_webhook_signature(payload, signature_header, &self.card_webhook_secret, Utc::now().timestamp())?;
    match CardWebhookEvent::parse(payload)? {
      CardWebhookEvent::Succeeded {
        order_id,
        intent_id,
        payment_method_ref,
      } => Ok(
        self
          .settle_success(order_id, &intent_id, payment_method_ref)
          .await?
          .into_outcome(order_id),
      ),
      CardWebhookEvent::Failed {
        order_id,
        intent_id,
        reason,
      } => self.fail_payment(order_id, &intent_id, &reason).await,
      CardWebhookEvent::Ignored(kind) => Ok(ConfirmationOutcome::Ignored {
        reason: format!("unhandled event type '{}'", kind),
      }),
    }
  }

  /// Untrusted input: anything that does not verify, parse, or match the
  /// ledger is logged and dropped without touching state.
  #[instrument(name = "confirmation::wallet_callback", skip_all, fields(order_ref = %callback.order_id, result_code = callback.result_code))]
  pub async fn handle_wallet_callback(&self, callback: &WalletCallback) -> Result<ConfirmationOutcome> {
    if !self.wallet_signer.verify_callback(callback) {
      warn!("Wallet callback signature mismatch; dropped.");
      return Ok(ignored("signature mismatch"));
    }
    let order_id = match parse_order_ref(&callback.order_id) {
      Ok(id) => id,
      Err(e) => {
        warn!(error = %e, "Wallet callback carries an unusable order ref; dropped.");
        return Ok(ignored("unusable order ref"));
      }
    };
    if let Some(extra) = decode_extra_data(&callback.extra_data) {
      if extra.order_id != order_id {
        warn!(%order_id, extra_order = %extra.order_id, "Wallet callback context disagrees with its order ref; dropped.");
        return Ok(ignored("context mismatch"));
      }
    }

    let entry = {
      let mut tx = self.deps.store.begin().await?;
      tx.find_transaction(order_id, &callback.order_id).await?
    };
    let Some(entry) = entry else {
      warn!(%order_id, "Wallet callback for an unknown payment; dropped.");
      return Ok(ignored("unknown payment"));
    };
    if entry.payment_method != PaymentMethod::Wallet || entry.amount != callback.amount {
      warn!(
        %order_id,
        expected = entry.amount,
        received = callback.amount,
        "Wallet callback does not match the recorded payment; dropped."
      );
      return Ok(ignored("amount mismatch"));
    }

    if callback.succeeded() {
      Ok(
        self
          .settle_success(order_id, &callback.order_id, Some(callback.trans_id.to_string()))
          .await?
          .into_outcome(order_id),
      )
    } else {
      let reason = format!("wallet result {}: {}", callback.result_code, callback.message);
      self.fail_payment(order_id, &callback.order_id, &reason).await
    }
  }
}

fn ignored(reason: &str) -> ConfirmationOutcome {
  ConfirmationOutcome::Ignored {
    reason: reason.to_string(),
  }
}
