// spa_booking/src/payments/wallet.rs

//! Redirect/wallet provider. Requests and callbacks are signed with
//! HMAC-SHA256 over `key=value&...` strings whose keys are in a fixed
//! alphabetical order.

use super::{hmac_sha256_hex, verify_hmac_sha256_hex, Handoff, IntentRequest, PaymentGateway, PaymentIntent, RefundReceipt};
use crate::config::WalletProviderConfig;
use crate::errors::{AppError, Result};
use crate::models::{PaymentMethod, ProviderMetadata, ServiceBookingRef, Transaction};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

const REQUEST_TYPE: &str = "captureWallet";

/// Shared-secret signing for requests and callbacks.
#[derive(Debug, Clone)]
pub struct WalletSigner {
  pub partner_code: String,
  pub access_key: String,
  pub secret_key: String,
}

impl WalletSigner {
  pub fn from_config(config: &WalletProviderConfig) -> Self {
    Self {
      partner_code: config.partner_code.clone(),
      access_key: config.access_key.clone(),
      secret_key: config.secret_key.clone(),
    }
  }

  pub fn sign(&self, raw: &str) -> Result<String> {
    hmac_sha256_hex(&self.secret_key, raw)
  }

  fn callback_raw(&self, cb: &WalletCallback) -> String {
    format!(
      "accessKey={}&amount={}&extraData={}&message={}&orderId={}&orderInfo={}&orderType={}&partnerCode={}&payType={}&requestId={}&responseTime={}&resultCode={}&transId={}",
      self.access_key,
      cb.amount,
      cb.extra_data,
      cb.message,
      cb.order_id,
      cb.order_info,
      cb.order_type,
      cb.partner_code,
      cb.pay_type,
      cb.request_id,
      cb.response_time,
      cb.result_code,
      cb.trans_id
    )
  }

  /// Recomputes the callback signature and compares in constant time.
  pub fn verify_callback(&self, cb: &WalletCallback) -> bool {
    cb.partner_code == self.partner_code && verify_hmac_sha256_hex(&self.secret_key, &self.callback_raw(cb), &cb.signature)
  }

  /// Fills in `signature` the way the provider does.
  pub fn sign_callback(&self, cb: &mut WalletCallback) -> Result<()> {
    cb.signature = self.sign(&self.callback_raw(cb))?;
    Ok(())
  }
}

/// Asynchronous payment notification (IPN) body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletCallback {
  pub partner_code: String,
  pub order_id: String,
  pub request_id: String,
  pub amount: i64,
  #[serde(default)]
  pub order_info: String,
  #[serde(default)]
  pub order_type: String,
  pub trans_id: i64,
  pub result_code: i32,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub pay_type: String,
  #[serde(default)]
  pub response_time: i64,
  #[serde(default)]
  pub extra_data: String,
  pub signature: String,
}

impl WalletCallback {
  pub fn succeeded(&self) -> bool {
    self.result_code == 0
  }
}

/// Context round-tripped through the provider in `extraData`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletExtraData {
  pub order_id: Uuid,
  #[serde(default)]
  pub booking: Option<ServiceBookingRef>,
}

pub fn encode_extra_data(extra: &WalletExtraData) -> Result<String> {
  let raw = serde_json::to_vec(extra).map_err(|e| AppError::Internal(format!("cannot encode extraData: {}", e)))?;
  Ok(BASE64.encode(raw))
}

/// `None` for empty or undecodable input; the ledger stays authoritative.
pub fn decode_extra_data(encoded: &str) -> Option<WalletExtraData> {
  if encoded.is_empty() {
    return None;
  }
  let raw = BASE64.decode(encoded).ok()?;
  serde_json::from_slice(&raw).ok()
}

/// Provider order ref: `"{order_id}_{suffix}"`.
pub fn order_ref_for(order_id: Uuid, suffix: i64) -> String {
  format!("{}_{}", order_id, suffix)
}

pub fn parse_order_ref(order_ref: &str) -> Result<Uuid> {
  let (order_part, suffix) = order_ref
    .rsplit_once('_')
    .ok_or_else(|| AppError::Validation(format!("malformed wallet order ref '{}'", order_ref)))?;
  if suffix.is_empty() {
    return Err(AppError::Validation(format!("malformed wallet order ref '{}'", order_ref)));
  }
  Uuid::parse_str(order_part).map_err(|_| AppError::Validation(format!("malformed wallet order ref '{}'", order_ref)))
}

#[derive(Debug, Clone)]
pub struct WalletGateway {
  client: reqwest::Client,
  config: WalletProviderConfig,
  signer: WalletSigner,
}

impl WalletGateway {
  pub fn new(config: WalletProviderConfig) -> Self {
    Self {
      client: reqwest::Client::new(),
      signer: WalletSigner::from_config(&config),
      config,
    }
  }

  pub fn signer(&self) -> &WalletSigner {
    &self.signer
  }

  async fn post(&self, path: &str, body: &Value, what: &str) -> Result<Value> {
    let url = format!("{}{}", self.config.endpoint.trim_end_matches('/'), path);
    let resp: Value = self.client.post(url).json(body).send().await?.json().await?;
    match resp["resultCode"].as_i64() {
      Some(0) => Ok(resp),
      code => Err(AppError::PaymentProvider(format!(
        "wallet {} failed (resultCode {:?}): {}",
        what,
        code,
        resp["message"].as_str().unwrap_or("no message")
      ))),
    }
  }
}

#[async_trait]
impl PaymentGateway for WalletGateway {
  fn method(&self) -> PaymentMethod {
    PaymentMethod::Wallet
  }

  #[instrument(name = "wallet::create_intent", skip(self, request), fields(order_id = %request.order_id, amount = request.amount))]
  async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent> {
    let order_ref = order_ref_for(request.order_id, Utc::now().timestamp_millis());
    let request_id = order_ref.clone();
    let extra_data = encode_extra_data(&WalletExtraData {
      order_id: request.order_id,
      booking: request.booking,
    })?;

    let raw = format!(
      "accessKey={}&amount={}&extraData={}&ipnUrl={}&orderId={}&orderInfo={}&partnerCode={}&redirectUrl={}&requestId={}&requestType={}",
      self.signer.access_key,
      request.amount,
      extra_data,
      self.config.ipn_url,
      order_ref,
      request.description,
      self.signer.partner_code,
      self.config.redirect_url,
      request_id,
      REQUEST_TYPE
    );
    let body = json!({
      "partnerCode": self.signer.partner_code,
      "accessKey": self.signer.access_key,
      "requestId": request_id,
      "amount": request.amount,
      "orderId": order_ref,
      "orderInfo": request.description,
      "redirectUrl": self.config.redirect_url,
      "ipnUrl": self.config.ipn_url,
      "extraData": extra_data,
      "requestType": REQUEST_TYPE,
      "signature": self.signer.sign(&raw)?,
      "lang": "vi",
    });

    let resp = self.post("/create", &body, "create payment").await?;
    let pay_url = resp["payUrl"]
      .as_str()
      .ok_or_else(|| AppError::PaymentProvider(format!("wallet create payment returned no payUrl: {}", resp)))?;
    info!(order_ref = %order_ref, "Wallet payment created.");

    Ok(PaymentIntent {
      provider_ref: order_ref.clone(),
      handoff: Handoff::Redirect { url: pay_url.to_string() },
      metadata: ProviderMetadata::Wallet {
        order_ref,
        request_id,
        booking: request.booking,
      },
    })
  }

  #[instrument(name = "wallet::refund", skip(self, tx), fields(order_id = %tx.order_id, order_ref = %tx.intent_ref))]
  async fn refund(&self, tx: &Transaction) -> Result<RefundReceipt> {
    let trans_id = provider_trans_id(tx)?;
    let refund_ref = order_ref_for(tx.order_id, Utc::now().timestamp_millis());
    let description = format!("Refund for order {}", tx.order_id);
    let raw = format!(
      "accessKey={}&amount={}&description={}&orderId={}&partnerCode={}&requestId={}&transId={}",
      self.signer.access_key, tx.amount, description, refund_ref, self.signer.partner_code, refund_ref, trans_id
    );
    let body = json!({
      "partnerCode": self.signer.partner_code,
      "orderId": refund_ref,
      "requestId": refund_ref,
      "amount": tx.amount,
      "transId": trans_id,
      "lang": "vi",
      "description": description,
      "signature": self.signer.sign(&raw)?,
    });
    self.post("/refund", &body, "refund").await?;
    Ok(RefundReceipt { refund_ref })
  }
}

/// The provider's numeric transaction id, recorded when the payment settled.
fn provider_trans_id(tx: &Transaction) -> Result<i64> {
  let Some(raw) = tx.payment_method_ref.as_deref() else {
    warn!(order_ref = %tx.intent_ref, "Wallet refund requested without a provider transaction id.");
    return Err(AppError::PaymentProvider(format!(
      "no provider transaction id recorded for {}",
      tx.intent_ref
    )));
  };
  raw.parse::<i64>().map_err(|_| {
    AppError::PaymentProvider(format!(
      "recorded provider transaction id '{}' for {} is not numeric",
      raw, tx.intent_ref
    ))
  })
}
