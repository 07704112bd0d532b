// spa_booking/src/store/mod.rs

//! Persistence boundary. Every mutation happens inside a `StoreTx` unit of
//! work; dropping the unit without `commit()` discards it.
//!
//! Slot and ledger updates are conditional (compare-and-set) so that the
//! check and the write are a single store-level operation: two concurrent
//! reservations of the same slot can never both pass a capacity check that
//! only one of them fits.

pub mod memory;
pub mod postgres;

use crate::errors::Result;
use crate::models::{
  Order, OrderStatus, SlotStatus, StaffSlot, Transaction, TransactionPatch, TransactionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Default)]
pub struct SlotFilter {
  pub staff_id: Option<Uuid>,
  pub date_from: Option<NaiveDate>,
  pub date_to: Option<NaiveDate>,
  pub status: Option<SlotStatus>,
}

impl SlotFilter {
  pub fn matches(&self, slot: &StaffSlot) -> bool {
    self.staff_id.map_or(true, |id| slot.staff_id == id)
      && self.date_from.map_or(true, |d| slot.date >= d)
      && self.date_to.map_or(true, |d| slot.date <= d)
      && self.status.map_or(true, |s| slot.status == s)
  }
}

/// Result of a conditional slot reservation.
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
  Reserved(StaffSlot),
  /// The condition did not hold; carries the slot as it currently is so
  /// the caller can report why.
  Rejected(StaffSlot),
  Missing,
}

#[async_trait]
pub trait Store: Send + Sync {
  async fn begin(&self) -> Result<Box<dyn StoreTx>>;
}

#[async_trait]
pub trait StoreTx: Send {
  // --- slots ---
  async fn get_slot(&mut self, id: Uuid) -> Result<Option<StaffSlot>>;
  async fn find_overlapping_slot(
    &mut self,
    staff_id: Uuid,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    exclude: Option<Uuid>,
  ) -> Result<Option<StaffSlot>>;
  async fn list_slots(&mut self, filter: &SlotFilter) -> Result<Vec<StaffSlot>>;
  async fn insert_slot(&mut self, slot: &StaffSlot) -> Result<()>;
  /// Takes `minutes` only if the slot accepts reservations and has the capacity.
  async fn reserve_slot(&mut self, id: Uuid, minutes: i32, order_id: Uuid) -> Result<ReserveOutcome>;
  /// Restores `minutes` only if `order_id` is linked; otherwise returns the slot unchanged.
  async fn release_slot(&mut self, id: Uuid, minutes: i32, order_id: Uuid) -> Result<Option<StaffSlot>>;
  /// Sets `to` if the current status is one of `from`; `None` when it is not.
  async fn update_slot_status(&mut self, id: Uuid, from: &[SlotStatus], to: SlotStatus) -> Result<Option<StaffSlot>>;
  /// Deletes only when no order is linked. Returns whether a row was removed.
  async fn delete_unlinked_slot(&mut self, id: Uuid) -> Result<bool>;

  // --- orders ---
  async fn insert_order(&mut self, order: &Order) -> Result<()>;
  async fn get_order(&mut self, id: Uuid) -> Result<Option<Order>>;
  /// Sets `to` (appending `note` if given) if the status is one of `from`.
  async fn update_order_status(
    &mut self,
    id: Uuid,
    from: &[OrderStatus],
    to: OrderStatus,
    note: Option<&str>,
  ) -> Result<Option<Order>>;
  async fn pending_orders_created_before(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>>;

  // --- ledger ---
  /// Fails with `Conflict` when a PENDING entry already exists for the same
  /// `(order_id, payment_method)`.
  async fn insert_transaction(&mut self, tx: &Transaction) -> Result<()>;
  async fn find_transaction(&mut self, order_id: Uuid, intent_ref: &str) -> Result<Option<Transaction>>;
  async fn transactions_for_order(&mut self, order_id: Uuid) -> Result<Vec<Transaction>>;
  async fn update_transaction_status(
    &mut self,
    id: Uuid,
    from: TransactionStatus,
    to: TransactionStatus,
    patch: TransactionPatch,
  ) -> Result<Option<Transaction>>;

  async fn commit(self: Box<Self>) -> Result<()>;
}
