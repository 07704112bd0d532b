// spa_booking/src/services/slot_allocator.rs

//! Owner of staff capacity. Nothing else writes slot rows.

use crate::errors::{AppError, Result};
use crate::models::{SlotStatus, StaffSlot};
use crate::store::{ReserveOutcome, SlotFilter, Store, StoreTx};
use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct NewSlot {
  pub staff_id: Uuid,
  pub date: NaiveDate,
  pub start_time: NaiveTime,
  pub end_time: NaiveTime,
}

/// Working-hours template expanded over a date range.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateSlots {
  pub staff_id: Uuid,
  pub date_from: NaiveDate,
  pub date_to: NaiveDate,
  /// ISO weekday numbers, Monday = 1 ... Sunday = 7.
  pub working_days: Vec<u32>,
  pub work_start: NaiveTime,
  pub work_end: NaiveTime,
  pub slot_minutes: i64,
}

impl GenerateSlots {
  /// Windows of `slot_minutes` laid end to end from `work_start`; a trailing
  /// step that would run past `work_end` is dropped.
  pub fn windows(&self) -> Result<Vec<NewSlot>> {
    if self.slot_minutes <= 0 {
      return Err(AppError::Validation("slot_minutes must be positive".to_string()));
    }
    if self.work_end <= self.work_start {
      return Err(AppError::Validation("working hours end must be after start".to_string()));
    }
    if self.date_to < self.date_from {
      return Err(AppError::Validation("date_to must not be before date_from".to_string()));
    }
    if self.working_days.is_empty() || self.working_days.iter().any(|d| !(1..=7).contains(d)) {
      return Err(AppError::Validation("working_days must be ISO weekday numbers 1-7".to_string()));
    }

    let step = Duration::minutes(self.slot_minutes);
    let mut windows = Vec::new();
    for date in self.date_from.iter_days().take_while(|d| *d <= self.date_to) {
      if !self.working_days.contains(&date.weekday().number_from_monday()) {
        continue;
      }
      let mut start = self.work_start;
      loop {
        // `overflowing_add_signed` wraps past midnight; a wrapped end is never valid.
        let (end, wrapped) = start.overflowing_add_signed(step);
        if wrapped != 0 || end > self.work_end || end <= start {
          break;
        }
        windows.push(NewSlot {
          staff_id: self.staff_id,
          date,
          start_time: start,
          end_time: end,
        });
        start = end;
      }
    }
    Ok(windows)
  }
}

#[derive(Clone)]
pub struct SlotAllocator {
  store: Arc<dyn Store>,
}

impl SlotAllocator {
  pub fn new(store: Arc<dyn Store>) -> Self {
    Self { store }
  }

  #[instrument(name = "slots::create", skip(self, new), fields(staff_id = %new.staff_id, date = %new.date))]
  pub async fn create_slot(&self, new: NewSlot) -> Result<StaffSlot> {
    let mut created = self.insert_all(vec![new]).await?;
    created.pop().ok_or_else(|| AppError::Internal("slot insert returned nothing".to_string()))
  }

  /// All-or-nothing: one overlap (with stored slots or inside the batch) rejects every slot.
  #[instrument(name = "slots::create_batch", skip(self, batch), fields(count = batch.len()))]
  pub async fn create_batch(&self, batch: Vec<NewSlot>) -> Result<Vec<StaffSlot>> {
    if batch.is_empty() {
      return Err(AppError::Validation("batch contains no slots".to_string()));
    }
    self.insert_all(batch).await
  }

  #[instrument(name = "slots::generate", skip(self, template), fields(staff_id = %template.staff_id))]
  pub async fn generate(&self, template: GenerateSlots) -> Result<Vec<StaffSlot>> {
    let windows = template.windows()?;
    if windows.is_empty() {
      return Err(AppError::Validation("template produces no slots".to_string()));
    }
    self.insert_all(windows).await
  }

  async fn insert_all(&self, batch: Vec<NewSlot>) -> Result<Vec<StaffSlot>> {
    let slots = batch
      .into_iter()
      .map(|n| StaffSlot::new(n.staff_id, n.date, n.start_time, n.end_time))
      .collect::<Result<Vec<_>>>()?;

    for (i, slot) in slots.iter().enumerate() {
      if let Some(other) = slots[..i]
        .iter()
        .find(|o| o.staff_id == slot.staff_id && o.overlaps(slot.date, slot.start_time, slot.end_time))
      {
        return Err(AppError::Conflict(format!(
          "slots {}-{} and {}-{} on {} overlap",
          other.start_time, other.end_time, slot.start_time, slot.end_time, slot.date
        )));
      }
    }

    let mut tx = self.store.begin().await?;
    for slot in &slots {
      if let Some(existing) = tx
        .find_overlapping_slot(slot.staff_id, slot.date, slot.start_time, slot.end_time, None)
        .await?
      {
        return Err(AppError::Conflict(format!(
          "slot {}-{} on {} overlaps existing slot {}",
          slot.start_time, slot.end_time, slot.date, existing.id
        )));
      }
      tx.insert_slot(slot).await?;
    }
    tx.commit().await?;
    info!(count = slots.len(), "Slots created.");
    Ok(slots)
  }

  pub async fn find_overlapping(
    &self,
    staff_id: Uuid,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    exclude: Option<Uuid>,
  ) -> Result<Option<StaffSlot>> {
    let mut tx = self.store.begin().await?;
    tx.find_overlapping_slot(staff_id, date, start, end, exclude).await
  }

  pub async fn get(&self, slot_id: Uuid) -> Result<StaffSlot> {
    let mut tx = self.store.begin().await?;
    tx.get_slot(slot_id).await?.ok_or_else(|| AppError::not_found("Slot", slot_id))
  }

  pub async fn list(&self, filter: &SlotFilter) -> Result<Vec<StaffSlot>> {
    let mut tx = self.store.begin().await?;
    tx.list_slots(filter).await
  }

  /// Reserves in its own unit of work.
  pub async fn reserve(&self, slot_id: Uuid, minutes: i32, order_id: Uuid) -> Result<StaffSlot> {
    let mut tx = self.store.begin().await?;
    let slot = Self::reserve_in(tx.as_mut(), slot_id, minutes, order_id).await?;
    tx.commit().await?;
    Ok(slot)
  }

  /// Reserves as part of the caller's unit of work. A rejected reservation
  /// reports the precise reason (capacity, status, duplicate link).
  #[instrument(name = "slots::reserve", skip(tx))]
  pub async fn reserve_in(tx: &mut dyn StoreTx, slot_id: Uuid, minutes: i32, order_id: Uuid) -> Result<StaffSlot> {
    match tx.reserve_slot(slot_id, minutes, order_id).await? {
      ReserveOutcome::Reserved(slot) => {
        debug!(available = slot.available_minutes, "Slot reserved.");
        Ok(slot)
      }
      ReserveOutcome::Rejected(slot) => {
        let mut probe = slot;
        Err(
          probe
            .apply_reservation(minutes, order_id)
            .err()
            .unwrap_or_else(|| AppError::Conflict(format!("slot {} changed during reservation", slot_id))),
        )
      }
      ReserveOutcome::Missing => Err(AppError::not_found("Slot", slot_id)),
    }
  }

  /// Idempotent: releasing for an order the slot no longer holds changes nothing.
  pub async fn release(&self, slot_id: Uuid, minutes: i32, order_id: Uuid) -> Result<StaffSlot> {
    let mut tx = self.store.begin().await?;
    let slot = Self::release_in(tx.as_mut(), slot_id, minutes, order_id).await?;
    tx.commit().await?;
    Ok(slot)
  }

  #[instrument(name = "slots::release", skip(tx))]
  pub async fn release_in(tx: &mut dyn StoreTx, slot_id: Uuid, minutes: i32, order_id: Uuid) -> Result<StaffSlot> {
    let slot = tx
      .release_slot(slot_id, minutes, order_id)
      .await?
      .ok_or_else(|| AppError::not_found("Slot", slot_id))?;
    if slot.is_linked_to(order_id) {
      warn!("Slot still lists the order after release.");
    }
    Ok(slot)
  }

  #[instrument(name = "slots::transition", skip(self))]
  pub async fn transition(&self, slot_id: Uuid, to: SlotStatus) -> Result<StaffSlot> {
    let mut tx = self.store.begin().await?;
    let slot = Self::transition_in(tx.as_mut(), slot_id, to).await?;
    tx.commit().await?;
    Ok(slot)
  }

  pub async fn transition_in(tx: &mut dyn StoreTx, slot_id: Uuid, to: SlotStatus) -> Result<StaffSlot> {
    let from: Vec<SlotStatus> = [
      SlotStatus::Available,
      SlotStatus::Pending,
      SlotStatus::Reserved,
      SlotStatus::Confirmed,
      SlotStatus::Cancelled,
    ]
    .into_iter()
    .filter(|s| s.can_transition_to(to))
    .collect();

    if let Some(slot) = tx.update_slot_status(slot_id, &from, to).await? {
      return Ok(slot);
    }
    match tx.get_slot(slot_id).await? {
      Some(slot) => Err(AppError::Conflict(format!(
        "slot {} cannot move from {} to {}",
        slot_id, slot.status, to
      ))),
      None => Err(AppError::not_found("Slot", slot_id)),
    }
  }

  /// Refused while any order still holds capacity in the slot.
  #[instrument(name = "slots::delete", skip(self))]
  pub async fn delete(&self, slot_id: Uuid) -> Result<()> {
    let mut tx = self.store.begin().await?;
    if tx.delete_unlinked_slot(slot_id).await? {
      tx.commit().await?;
      return Ok(());
    }
    match tx.get_slot(slot_id).await? {
      Some(_) => Err(AppError::Conflict(format!("slot {} is linked to an order", slot_id))),
      None => Err(AppError::not_found("Slot", slot_id)),
    }
  }
}
