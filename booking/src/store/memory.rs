// spa_booking/src/store/memory.rs

//! In-process store. A unit of work holds the store-wide lock for its whole
//! life and edits a copy of the state, so transactions are serialisable and
//! a dropped unit leaves no trace.

use super::{ReserveOutcome, SlotFilter, Store, StoreTx};
use crate::errors::{AppError, Result};
use crate::models::{
  Order, OrderStatus, SlotStatus, StaffSlot, Transaction, TransactionPatch, TransactionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
  slots: HashMap<Uuid, StaffSlot>,
  orders: HashMap<Uuid, Order>,
  transactions: HashMap<Uuid, Transaction>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn begin(&self) -> Result<Box<dyn StoreTx>> {
    let guard = self.state.clone().lock_owned().await;
    let working = guard.clone();
    Ok(Box::new(MemoryTx { guard, working }))
  }
}

struct MemoryTx {
  guard: OwnedMutexGuard<MemoryState>,
  working: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
  async fn get_slot(&mut self, id: Uuid) -> Result<Option<StaffSlot>> {
    Ok(self.working.slots.get(&id).cloned())
  }

  async fn find_overlapping_slot(
    &mut self,
    staff_id: Uuid,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    exclude: Option<Uuid>,
  ) -> Result<Option<StaffSlot>> {
    Ok(
      self
        .working
        .slots
        .values()
        .filter(|s| s.staff_id == staff_id && Some(s.id) != exclude)
        .find(|s| s.overlaps(date, start, end))
        .cloned(),
    )
  }

  async fn list_slots(&mut self, filter: &SlotFilter) -> Result<Vec<StaffSlot>> {
    let mut slots: Vec<StaffSlot> = self.working.slots.values().filter(|s| filter.matches(s)).cloned().collect();
    slots.sort_by_key(|s| (s.date, s.start_time, s.staff_id));
    Ok(slots)
  }

  async fn insert_slot(&mut self, slot: &StaffSlot) -> Result<()> {
    if self.working.slots.contains_key(&slot.id) {
      return Err(AppError::Conflict(format!("slot {} already exists", slot.id)));
    }
    self.working.slots.insert(slot.id, slot.clone());
    Ok(())
  }

  async fn reserve_slot(&mut self, id: Uuid, minutes: i32, order_id: Uuid) -> Result<ReserveOutcome> {
    let Some(slot) = self.working.slots.get_mut(&id) else {
      return Ok(ReserveOutcome::Missing);
    };
    match slot.apply_reservation(minutes, order_id) {
      Ok(()) => Ok(ReserveOutcome::Reserved(slot.clone())),
      Err(AppError::Validation(m)) => Err(AppError::Validation(m)),
      Err(_) => Ok(ReserveOutcome::Rejected(slot.clone())),
    }
  }

  async fn release_slot(&mut self, id: Uuid, minutes: i32, order_id: Uuid) -> Result<Option<StaffSlot>> {
    Ok(self.working.slots.get_mut(&id).map(|slot| {
      slot.apply_release(minutes, order_id);
      slot.clone()
    }))
  }

  async fn update_slot_status(&mut self, id: Uuid, from: &[SlotStatus], to: SlotStatus) -> Result<Option<StaffSlot>> {
    Ok(self.working.slots.get_mut(&id).and_then(|slot| {
      if !from.contains(&slot.status) {
        return None;
      }
      slot.status = to;
      slot.updated_at = Utc::now();
      Some(slot.clone())
    }))
  }

  async fn delete_unlinked_slot(&mut self, id: Uuid) -> Result<bool> {
    match self.working.slots.get(&id) {
      Some(slot) if slot.order_ids.is_empty() => {
        self.working.slots.remove(&id);
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn insert_order(&mut self, order: &Order) -> Result<()> {
    if self.working.orders.contains_key(&order.id) {
      return Err(AppError::Conflict(format!("order {} already exists", order.id)));
    }
    self.working.orders.insert(order.id, order.clone());
    Ok(())
  }

  async fn get_order(&mut self, id: Uuid) -> Result<Option<Order>> {
    Ok(self.working.orders.get(&id).cloned())
  }

  async fn update_order_status(
    &mut self,
    id: Uuid,
    from: &[OrderStatus],
    to: OrderStatus,
    note: Option<&str>,
  ) -> Result<Option<Order>> {
    Ok(self.working.orders.get_mut(&id).and_then(|order| {
      if !from.contains(&order.status) {
        return None;
      }
      order.status = to;
      if let Some(text) = note {
        order.append_note(text);
      }
      order.updated_at = Utc::now();
      Some(order.clone())
    }))
  }

  async fn pending_orders_created_before(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
    Ok(
      self
        .working
        .orders
        .values()
        .filter(|o| o.status == OrderStatus::Pending && o.created_at < cutoff)
        .map(|o| o.id)
        .collect(),
    )
  }

  async fn insert_transaction(&mut self, tx: &Transaction) -> Result<()> {
    let duplicate = self.working.transactions.values().any(|t| {
      t.order_id == tx.order_id
        && t.payment_method == tx.payment_method
        && t.status == TransactionStatus::Pending
        && tx.status == TransactionStatus::Pending
    });
    if duplicate {
      return Err(AppError::Conflict(format!(
        "order {} already has a pending {} payment",
        tx.order_id, tx.payment_method
      )));
    }
    self.working.transactions.insert(tx.id, tx.clone());
    Ok(())
  }

  async fn find_transaction(&mut self, order_id: Uuid, intent_ref: &str) -> Result<Option<Transaction>> {
    Ok(
      self
        .working
        .transactions
        .values()
        .find(|t| t.order_id == order_id && t.intent_ref == intent_ref)
        .cloned(),
    )
  }

  async fn transactions_for_order(&mut self, order_id: Uuid) -> Result<Vec<Transaction>> {
    let mut entries: Vec<Transaction> =
      self.working.transactions.values().filter(|t| t.order_id == order_id).cloned().collect();
    entries.sort_by_key(|t| t.created_at);
    Ok(entries)
  }

  async fn update_transaction_status(
    &mut self,
    id: Uuid,
    from: TransactionStatus,
    to: TransactionStatus,
    patch: TransactionPatch,
  ) -> Result<Option<Transaction>> {
    Ok(self.working.transactions.get_mut(&id).and_then(|tx| {
      if tx.status != from {
        return None;
      }
      tx.status = to;
      patch.apply(tx);
      Some(tx.clone())
    }))
  }

  async fn commit(self: Box<Self>) -> Result<()> {
    let MemoryTx { mut guard, working } = *self;
    *guard = working;
    Ok(())
  }
}
