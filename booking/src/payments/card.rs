// spa_booking/src/payments/card.rs

//! Card-intent provider spoken to over its REST API (no SDK).

use super::{verify_hmac_sha256_hex, Handoff, IntentRequest, IntentStatus, PaymentGateway, PaymentIntent, RefundReceipt};
use crate::config::CardProviderConfig;
use crate::errors::{AppError, Result};
use crate::models::{PaymentMethod, ProviderMetadata, Transaction};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Events older (or newer) than this are refused as replays.
const WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct CardGateway {
  client: reqwest::Client,
  config: CardProviderConfig,
}

impl CardGateway {
  pub fn new(config: CardProviderConfig) -> Self {
    Self {
      client: reqwest::Client::new(),
      config,
    }
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
  }

  async fn call(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Value> {
    let resp: Value = request.bearer_auth(&self.config.secret_key).send().await?.json().await?;
    if let Some(message) = resp["error"]["message"].as_str() {
      return Err(AppError::PaymentProvider(format!("card {} failed: {}", what, message)));
    }
    Ok(resp)
  }
}

#[async_trait]
impl PaymentGateway for CardGateway {
  fn method(&self) -> PaymentMethod {
    PaymentMethod::Card
  }

  #[instrument(name = "card::create_intent", skip(self, request), fields(order_id = %request.order_id, amount = request.amount))]
  async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent> {
    let amount = request.amount.to_string();
    let currency = request.currency.to_lowercase();
    let order_id = request.order_id.to_string();
    let customer_id = request.customer_id.to_string();
    let mut form: Vec<(&str, String)> = vec![
      ("amount", amount),
      ("currency", currency),
      ("description", request.description.clone()),
      ("automatic_payment_methods[enabled]", "true".to_string()),
      ("metadata[order_id]", order_id),
      ("metadata[customer_id]", customer_id),
    ];
    if let Some(email) = &request.contact.email {
      form.push(("receipt_email", email.clone()));
    }
    if let Some(booking) = &request.booking {
      form.push(("metadata[slot_id]", booking.slot_id.to_string()));
      form.push(("metadata[staff_id]", booking.staff_id.to_string()));
    }

    let resp = self.call(self.client.post(self.url("/v1/payment_intents")).form(&form), "create intent").await?;
    let (Some(id), Some(secret)) = (resp["id"].as_str(), resp["client_secret"].as_str()) else {
      return Err(AppError::PaymentProvider(format!("card create intent returned no intent: {}", resp)));
    };
    info!(intent_id = id, "Card payment intent created.");

    Ok(PaymentIntent {
      provider_ref: id.to_string(),
      handoff: Handoff::Sync {
        client_secret: secret.to_string(),
      },
      metadata: ProviderMetadata::Card {
        customer_id: request.customer_id,
        booking: request.booking,
      },
    })
  }

  #[instrument(name = "card::intent_status", skip(self))]
  async fn intent_status(&self, provider_ref: &str) -> Result<IntentStatus> {
    let path = format!("/v1/payment_intents/{}", provider_ref);
    let resp = self.call(self.client.get(self.url(&path)), "retrieve intent").await?;
    Ok(intent_status_from(&resp))
  }

  #[instrument(name = "card::cancel_intent", skip(self))]
  async fn cancel_intent(&self, provider_ref: &str) -> Result<()> {
    let path = format!("/v1/payment_intents/{}/cancel", provider_ref);
    let form = [("cancellation_reason", "abandoned")];
    self.call(self.client.post(self.url(&path)).form(&form), "cancel intent").await?;
    info!(intent_id = provider_ref, "Card payment intent cancelled.");
    Ok(())
  }

  #[instrument(name = "card::refund", skip(self, tx), fields(order_id = %tx.order_id, intent = %tx.intent_ref))]
  async fn refund(&self, tx: &Transaction) -> Result<RefundReceipt> {
    let form = [("payment_intent", tx.intent_ref.as_str())];
    let resp = self.call(self.client.post(self.url("/v1/refunds")).form(&form), "refund").await?;
    let refund_ref = resp["id"]
      .as_str()
      .map(String::from)
      .ok_or_else(|| AppError::PaymentProvider(format!("card refund returned no id: {}", resp)))?;
    Ok(RefundReceipt { refund_ref })
  }
}

fn intent_status_from(resp: &Value) -> IntentStatus {
  match resp["status"].as_str().unwrap_or_default() {
    "succeeded" => IntentStatus::Succeeded {
      payment_method_ref: resp["payment_method"].as_str().map(String::from),
    },
    "canceled" => IntentStatus::Failed("intent was canceled".to_string()),
    "requires_payment_method" if resp["last_payment_error"].is_object() => IntentStatus::Failed(
      resp["last_payment_error"]["message"].as_str().unwrap_or("payment declined").to_string(),
    ),
    other => IntentStatus::Pending(other.to_string()),
  }
}

/// Checks a `t=<unix>,v1=<hex>` signature header against the raw body.
pub fn verify_webhook_signature(payload: &[u8], sig_header: &str, secret: &str, now: i64) -> Result<()> {
  let mut timestamp = "";
  let mut signature = "";
  for part in sig_header.split(',') {
    if let Some(t) = part.trim().strip_prefix("t=") {
      timestamp = t;
    } else if let Some(v) = part.trim().strip_prefix("v1=") {
      signature = v;
    }
  }
  if timestamp.is_empty() || signature.is_empty() {
    return Err(AppError::PaymentProvider("malformed webhook signature header".to_string()));
  }

  let body = std::str::from_utf8(payload)
    .map_err(|_| AppError::PaymentProvider("webhook payload is not UTF-8".to_string()))?;
  let signed_payload = format!("{}.{}", timestamp, body);
  if !verify_hmac_sha256_hex(secret, &signed_payload, signature) {
    warn!("Card webhook signature mismatch.");
    return Err(AppError::PaymentProvider("webhook signature mismatch".to_string()));
  }

  let ts: i64 = timestamp
    .parse()
    .map_err(|_| AppError::PaymentProvider("invalid webhook timestamp".to_string()))?;
  if (now - ts).abs() > WEBHOOK_TOLERANCE_SECS {
    return Err(AppError::PaymentProvider("webhook timestamp outside tolerance".to_string()));
  }
  Ok(())
}

/// Builds the header a provider would send for `payload` at `timestamp`.
pub fn sign_webhook_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String> {
  let body = String::from_utf8_lossy(payload);
  let signature = super::hmac_sha256_hex(secret, &format!("{}.{}", timestamp, body))?;
  Ok(format!("t={},v1={}", timestamp, signature))
}

/// The parts of a webhook event the confirmation path acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum CardWebhookEvent {
  Succeeded {
    order_id: Uuid,
    intent_id: String,
    payment_method_ref: Option<String>,
  },
  Failed {
    order_id: Uuid,
    intent_id: String,
    reason: String,
  },
  /// Any other event type; acknowledged and dropped.
  Ignored(String),
}

impl CardWebhookEvent {
  pub fn parse(payload: &[u8]) -> Result<Self> {
    let event: Value = serde_json::from_slice(payload)
      .map_err(|e| AppError::Validation(format!("webhook body is not JSON: {}", e)))?;
    let kind = event["type"].as_str().unwrap_or_default().to_string();
    let object = &event["data"]["object"];

    let order_and_intent = || -> Result<(Uuid, String)> {
      let intent_id = object["id"]
        .as_str()
        .ok_or_else(|| AppError::Validation("webhook event has no intent id".to_string()))?;
      let order_id = object["metadata"]["order_id"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| AppError::Validation(format!("intent {} carries no order_id", intent_id)))?;
      Ok((order_id, intent_id.to_string()))
    };

    Ok(match kind.as_str() {
      "payment_intent.succeeded" => {
        let (order_id, intent_id) = order_and_intent()?;
        CardWebhookEvent::Succeeded {
          order_id,
          intent_id,
          payment_method_ref: object["payment_method"].as_str().map(String::from),
        }
      }
      "payment_intent.payment_failed" => {
        let (order_id, intent_id) = order_and_intent()?;
        CardWebhookEvent::Failed {
          order_id,
          intent_id,
          reason: object["last_payment_error"]["message"]
            .as_str()
            .unwrap_or("payment failed")
            .to_string(),
        }
      }
      _ => CardWebhookEvent::Ignored(kind),
    })
  }
}
