// spa_booking/src/payments/mod.rs

//! Payment providers behind one interface. The orchestrator never knows
//! which provider it talks to beyond the `PaymentMethod` it was asked for.

pub mod card;
pub mod wallet;

use crate::errors::{AppError, Result};
use crate::models::{Amount, CustomerContact, PaymentMethod, ProviderMetadata, ServiceBookingRef, Transaction};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub use card::{CardGateway, CardWebhookEvent};
pub use wallet::{WalletCallback, WalletGateway, WalletSigner};

#[derive(Debug, Clone)]
pub struct IntentRequest {
  pub order_id: Uuid,
  pub customer_id: Uuid,
  pub amount: Amount,
  pub currency: String,
  pub contact: CustomerContact,
  pub description: String,
  /// Present for service bookings so the settlement path can find the slot.
  pub booking: Option<ServiceBookingRef>,
}

/// How the client continues the payment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Handoff {
  /// Confirm directly with the provider using this secret.
  Sync { client_secret: String },
  /// Send the customer to the provider's page.
  Redirect { url: String },
}

#[derive(Debug, Clone)]
pub struct PaymentIntent {
  /// Stored as the ledger entry's `intent_ref`.
  pub provider_ref: String,
  pub handoff: Handoff,
  pub metadata: ProviderMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntentStatus {
  Succeeded { payment_method_ref: Option<String> },
  /// Still waiting on the payer or the provider; carries the provider's status word.
  Pending(String),
  Failed(String),
}

#[derive(Debug, Clone)]
pub struct RefundReceipt {
  pub refund_ref: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
  fn method(&self) -> PaymentMethod;

  async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent>;

  /// Providers that only report through callbacks cannot be polled.
  async fn intent_status(&self, provider_ref: &str) -> Result<IntentStatus> {
    Err(AppError::PaymentProvider(format!(
      "{} payments cannot be polled (intent {})",
      self.method(),
      provider_ref
    )))
  }

  /// Voids an intent nobody will pay any more. Redirect providers let an
  /// unpaid link lapse on their side, so the default does nothing.
  async fn cancel_intent(&self, _provider_ref: &str) -> Result<()> {
    Ok(())
  }

  async fn refund(&self, tx: &Transaction) -> Result<RefundReceipt>;
}

/// Gateways by payment method.
#[derive(Clone, Default)]
pub struct PaymentGateways {
  gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl PaymentGateways {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
    self.gateways.insert(gateway.method(), gateway);
    self
  }

  pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentGateway>> {
    self
      .gateways
      .get(&method)
      .cloned()
      .ok_or_else(|| AppError::Validation(format!("payment method {} is not available", method)))
  }
}

impl std::fmt::Debug for PaymentGateways {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PaymentGateways").field("methods", &self.gateways.keys().collect::<Vec<_>>()).finish()
  }
}

type HmacSha256 = Hmac<Sha256>;

pub(crate) fn hmac_sha256_hex(key: &str, message: &str) -> Result<String> {
  let mut mac = HmacSha256::new_from_slice(key.as_bytes())
    .map_err(|e| AppError::Config(format!("invalid signing key: {}", e)))?;
  mac.update(message.as_bytes());
  Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison of a hex signature against `message`.
pub(crate) fn verify_hmac_sha256_hex(key: &str, message: &str, signature_hex: &str) -> bool {
  let Ok(expected) = hex::decode(signature_hex) else {
    return false;
  };
  let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else {
    return false;
  };
  mac.update(message.as_bytes());
  mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hmac_round_trip_and_tamper() {
    let sig = hmac_sha256_hex("secret", "amount=1000&orderId=x").unwrap();
    assert_eq!(sig.len(), 64);
    assert!(verify_hmac_sha256_hex("secret", "amount=1000&orderId=x", &sig));
    assert!(!verify_hmac_sha256_hex("secret", "amount=1001&orderId=x", &sig));
    assert!(!verify_hmac_sha256_hex("other", "amount=1000&orderId=x", &sig));
    assert!(!verify_hmac_sha256_hex("secret", "amount=1000&orderId=x", "not-hex"));
  }

  #[test]
  fn missing_gateway_is_a_validation_error() {
    let gateways = PaymentGateways::new();
    assert!(matches!(gateways.get(PaymentMethod::Card), Err(AppError::Validation(_))));
  }
}
