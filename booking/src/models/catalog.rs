// spa_booking/src/models/catalog.rs

use super::Amount;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
  pub id: Uuid,
  pub name: String,
  #[serde(default = "default_true")]
  pub active: bool,
}

/// One bookable length of a service with its price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurationTier {
  pub minutes: i32,
  pub price: Amount,
  #[serde(default)]
  pub discount_price: Option<Amount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
  pub id: Uuid,
  pub name: String,
  pub branch_ids: Vec<Uuid>,
  pub durations: Vec<DurationTier>,
}

impl Service {
  pub fn tier(&self, minutes: i32) -> Option<&DurationTier> {
    self.durations.iter().find(|t| t.minutes == minutes)
  }

  pub fn offered_at(&self, branch_id: Uuid) -> bool {
    self.branch_ids.contains(&branch_id)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
  pub id: Uuid,
  pub name: String,
  pub price: Amount,
  #[serde(default)]
  pub discount_price: Option<Amount>,
  #[serde(default = "default_true")]
  pub active: bool,
}

fn default_true() -> bool {
  true
}
