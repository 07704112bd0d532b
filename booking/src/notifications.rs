// spa_booking/src/notifications.rs

use crate::errors::Result;
use crate::models::{Amount, CustomerContact, OrderDetail};
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// What a booking confirmation tells the customer.
#[derive(Debug, Clone)]
pub struct BookingSummary {
  pub order_id: Uuid,
  pub branch_id: Uuid,
  pub lines: Vec<OrderDetail>,
  pub final_price: Amount,
}

#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
  pub recipient: String,
  pub message_id: String,
}

/// Outbound delivery (email, SMS) lives outside this service. Callers treat
/// every method as fire-and-forget.
#[async_trait]
pub trait Notifier: Send + Sync {
  /// `proof` is the artifact the customer shows at the counter.
  async fn send_booking_confirmation(
    &self,
    contact: &CustomerContact,
    details: &BookingSummary,
    proof: &str,
  ) -> Result<DeliveryReceipt>;

  async fn send_purchase_receipt(
    &self,
    contact: &CustomerContact,
    items: &[OrderDetail],
    total: Amount,
  ) -> Result<DeliveryReceipt>;
}

/// Short code printed on the confirmation and checked at the front desk.
pub fn booking_code(order_id: Uuid) -> String {
  let simple = order_id.simple().to_string().to_uppercase();
  format!("BK-{}", &simple[..10])
}

/// Simulated delivery that only writes to the log.
#[derive(Debug, Clone)]
pub struct LogNotifier {
  sender: String,
}

impl LogNotifier {
  pub fn new(sender: impl Into<String>) -> Self {
    Self { sender: sender.into() }
  }

  fn receipt(&self, contact: &CustomerContact) -> DeliveryReceipt {
    let recipient = contact.primary().unwrap_or(contact.name.as_str()).to_string();
    let message_id = format!("log_notice_{}", Uuid::new_v4());
    info!(from = %self.sender, to = %recipient, %message_id, "Notification recorded.");
    DeliveryReceipt { recipient, message_id }
  }
}

#[async_trait]
impl Notifier for LogNotifier {
  async fn send_booking_confirmation(
    &self,
    contact: &CustomerContact,
    details: &BookingSummary,
    proof: &str,
  ) -> Result<DeliveryReceipt> {
    info!(
      order_id = %details.order_id,
      lines = details.lines.len(),
      total = details.final_price,
      proof,
      "Sending booking confirmation"
    );
    Ok(self.receipt(contact))
  }

  async fn send_purchase_receipt(
    &self,
    contact: &CustomerContact,
    items: &[OrderDetail],
    total: Amount,
  ) -> Result<DeliveryReceipt> {
    info!(lines = items.len(), total, "Sending purchase receipt");
    Ok(self.receipt(contact))
  }
}
