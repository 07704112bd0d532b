// spa_booking/src/web/handlers/payment_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::payments::WalletCallback;
use crate::services::Requester;
use crate::state::AppState;
use crate::web::identity::Customer;

pub const CARD_SIGNATURE_HEADER: &str = "Card-Signature";

#[derive(Debug, Deserialize)]
pub struct CardConfirmPayload {
  pub order_id: Uuid,
  pub intent_id: String,
  #[serde(default)]
  pub payment_method_ref: Option<String>,
}

#[instrument(name = "handler::confirm_card_payment", skip(app_state, payload), fields(customer = %customer.0, order_id = %payload.order_id))]
pub async fn confirm_card_handler(
  app_state: web::Data<AppState>,
  customer: Customer,
  payload: web::Json<CardConfirmPayload>,
) -> Result<HttpResponse, AppError> {
  let payload = payload.into_inner();
  // Ownership check before anything reaches the provider.
  app_state
    .orders
    .get_order(payload.order_id, Requester::Customer(customer.0))
    .await?;
  let outcome = app_state
    .confirmations
    .confirm_card_payment(payload.order_id, &payload.intent_id, payload.payment_method_ref)
    .await?;
  Ok(HttpResponse::Ok().json(outcome))
}

#[instrument(name = "handler::card_webhook", skip(app_state, req, body), fields(size = body.len()))]
pub async fn card_webhook_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  body: web::Bytes,
) -> Result<HttpResponse, AppError> {
  let signature = req
    .headers()
    .get(CARD_SIGNATURE_HEADER)
    .and_then(|h| h.to_str().ok())
    .ok_or_else(|| AppError::PaymentProvider("missing webhook signature".to_string()))?;
  let outcome = app_state.confirmations.handle_card_webhook(&body, signature).await?;
  info!(?outcome, "Card webhook processed.");
  Ok(HttpResponse::Ok().json(serde_json::json!({ "received": true })))
}

/// Always 204: the caller is untrusted and learns nothing from the response.
#[instrument(name = "handler::wallet_ipn", skip(app_state, body), fields(size = body.len()))]
pub async fn wallet_ipn_handler(app_state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
  match serde_json::from_slice::<WalletCallback>(&body) {
    Ok(callback) => match app_state.confirmations.handle_wallet_callback(&callback).await {
      Ok(outcome) => info!(?outcome, "Wallet callback processed."),
      Err(e) => warn!(error = %e, "Wallet callback could not be applied."),
    },
    Err(e) => warn!(error = %e, "Wallet callback body is not a valid notification."),
  }
  HttpResponse::NoContent().finish()
}
