// spa_booking/src/models/order.rs

use super::{string_enum, Amount};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
  Pending,
  Confirmed,
  Cancelled,
  Completed,
}

string_enum!(OrderStatus {
  Pending => "PENDING",
  Confirmed => "CONFIRMED",
  Cancelled => "CANCELLED",
  Completed => "COMPLETED",
});

impl OrderStatus {
  pub fn is_cancellable(self) -> bool {
    matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
  /// Paid at the counter; no provider involvement.
  Cash,
  /// Synchronous card-intent provider.
  Card,
  /// Redirect/wallet provider confirmed through a signed callback.
  Wallet,
}

string_enum!(PaymentMethod {
  Cash => "CASH",
  Card => "CARD",
  Wallet => "WALLET",
});

impl PaymentMethod {
  pub fn requires_intent(self) -> bool {
    !matches!(self, PaymentMethod::Cash)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
  Product,
  Service,
}

string_enum!(ItemType {
  Product => "PRODUCT",
  Service => "SERVICE",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerContact {
  pub name: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub phone: Option<String>,
}

impl CustomerContact {
  /// Preferred address for notifications and provider receipts.
  pub fn primary(&self) -> Option<&str> {
    self.email.as_deref().or(self.phone.as_deref())
  }
}

/// Scheduling data carried only by service lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceLine {
  pub slot_id: Uuid,
  pub staff_id: Uuid,
  pub date: NaiveDate,
  pub start_time: NaiveTime,
  pub end_time: NaiveTime,
  pub duration_minutes: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
  pub id: Uuid,
  pub order_id: Uuid,
  pub item_type: ItemType,
  pub item_id: Uuid,
  pub item_name: String,
  /// Unit price before discount.
  pub price: Amount,
  pub discount_price: Option<Amount>,
  pub quantity: i32,
  pub service: Option<ServiceLine>,
}

impl OrderDetail {
  pub fn line_total(&self) -> Amount {
    self.price * self.quantity as Amount
  }

  /// Discount only counts when it actually lowers the price.
  pub fn line_discount(&self) -> Amount {
    match self.discount_price {
      Some(d) if d >= 0 && d < self.price => (self.price - d) * self.quantity as Amount,
      _ => 0,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
  pub id: Uuid,
  pub customer_id: Uuid,
  pub branch_id: Uuid,
  pub contact: CustomerContact,
  pub items: Vec<OrderDetail>,
  pub total_price: Amount,
  pub discount_amount: Amount,
  pub final_price: Amount,
  pub payment_method: PaymentMethod,
  pub status: OrderStatus,
  pub booking_date: Option<NaiveDate>,
  pub start_time: Option<NaiveTime>,
  pub end_time: Option<NaiveTime>,
  pub note: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Order {
  /// Builds a PENDING order; prices are derived from the lines so that
  /// `final_price == total_price - discount_amount` holds by construction.
  pub fn new(
    id: Uuid,
    customer_id: Uuid,
    branch_id: Uuid,
    contact: CustomerContact,
    items: Vec<OrderDetail>,
    payment_method: PaymentMethod,
    note: Option<String>,
  ) -> Self {
    let total_price: Amount = items.iter().map(OrderDetail::line_total).sum();
    let discount_amount: Amount = items.iter().map(OrderDetail::line_discount).sum();
    let schedule = items.iter().find_map(|d| d.service.as_ref());
    let now = Utc::now();
    Self {
      id,
      customer_id,
      branch_id,
      contact,
      total_price,
      discount_amount,
      final_price: total_price - discount_amount,
      payment_method,
      status: OrderStatus::Pending,
      booking_date: schedule.map(|s| s.date),
      start_time: schedule.map(|s| s.start_time),
      end_time: schedule.map(|s| s.end_time),
      note,
      created_at: now,
      updated_at: now,
      items,
    }
  }

  pub fn service_lines(&self) -> impl Iterator<Item = &ServiceLine> {
    self.items.iter().filter_map(|d| d.service.as_ref())
  }

  pub fn has_service_line(&self) -> bool {
    self.service_lines().next().is_some()
  }

  pub fn append_note(&mut self, text: &str) {
    self.note = Some(match self.note.take() {
      Some(existing) if !existing.is_empty() => format!("{}\n{}", existing, text),
      _ => text.to_string(),
    });
  }
}
