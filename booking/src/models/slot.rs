// spa_booking/src/models/slot.rs

use super::string_enum;
use crate::errors::{AppError, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
  Available,
  Pending,
  Reserved,
  Confirmed,
  Cancelled,
}

string_enum!(SlotStatus {
  Available => "AVAILABLE",
  Pending => "PENDING",
  Reserved => "RESERVED",
  Confirmed => "CONFIRMED",
  Cancelled => "CANCELLED",
});

impl SlotStatus {
  /// Capacity may be taken while the slot is still open for bookings.
  pub fn accepts_reservation(self) -> bool {
    matches!(self, SlotStatus::Available | SlotStatus::Pending | SlotStatus::Reserved)
  }

  /// Explicit transitions. Re-applying the current status is allowed so
  /// repeated calls stay idempotent.
  pub fn can_transition_to(self, next: SlotStatus) -> bool {
    use SlotStatus::*;
    self == next
      || matches!(
        (self, next),
        (Available, Pending) | (Pending, Reserved) | (Reserved, Confirmed) | (Pending, Cancelled) | (Reserved, Cancelled)
      )
  }
}

/// A window `[start_time, end_time)` of one staff member's time on one date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaffSlot {
  pub id: Uuid,
  pub staff_id: Uuid,
  pub date: NaiveDate,
  pub start_time: NaiveTime,
  pub end_time: NaiveTime,
  pub status: SlotStatus,
  pub available_minutes: i32,
  pub used_minutes: i32,
  pub order_ids: Vec<Uuid>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl StaffSlot {
  pub fn new(staff_id: Uuid, date: NaiveDate, start_time: NaiveTime, end_time: NaiveTime) -> Result<Self> {
    if end_time <= start_time {
      return Err(AppError::Validation(format!(
        "slot end {} must be after start {}",
        end_time, start_time
      )));
    }
    let now = Utc::now();
    let minutes = (end_time - start_time).num_minutes() as i32;
    Ok(Self {
      id: Uuid::new_v4(),
      staff_id,
      date,
      start_time,
      end_time,
      status: SlotStatus::Available,
      available_minutes: minutes,
      used_minutes: 0,
      order_ids: Vec::new(),
      created_at: now,
      updated_at: now,
    })
  }

  pub fn duration_minutes(&self) -> i32 {
    (self.end_time - self.start_time).num_minutes() as i32
  }

  /// Half-open interval test: touching windows do not conflict.
  pub fn overlaps(&self, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> bool {
    self.date == date && start < self.end_time && end > self.start_time
  }

  /// Earliest start inside the slot where `minutes` fit between the
  /// windows already `taken`. Bookings are packed from the start of the slot,
  /// so a window freed by a cancellation is reused before later time.
  pub fn earliest_gap(&self, taken: &[(NaiveTime, NaiveTime)], minutes: i32) -> Option<NaiveTime> {
    let needed = Duration::minutes(minutes as i64);
    let mut windows: Vec<(NaiveTime, NaiveTime)> = taken
      .iter()
      .copied()
      .filter(|(start, end)| *start < self.end_time && *end > self.start_time)
      .collect();
    windows.sort();

    let mut cursor = self.start_time;
    for (start, end) in windows {
      if start > cursor && start - cursor >= needed {
        return Some(cursor);
      }
      if end > cursor {
        cursor = end;
      }
    }
    (self.end_time - cursor >= needed).then_some(cursor)
  }

  pub fn is_linked_to(&self, order_id: Uuid) -> bool {
    self.order_ids.contains(&order_id)
  }

  /// Takes `minutes` of capacity for `order_id`. The slot is untouched on error.
  pub fn apply_reservation(&mut self, minutes: i32, order_id: Uuid) -> Result<()> {
    if minutes <= 0 {
      return Err(AppError::Validation("reserved minutes must be positive".to_string()));
    }
    if !self.status.accepts_reservation() {
      return Err(AppError::Conflict(format!("slot {} is {} and cannot be reserved", self.id, self.status)));
    }
    if self.is_linked_to(order_id) {
      return Err(AppError::Conflict(format!("order {} already holds slot {}", order_id, self.id)));
    }
    if self.available_minutes < minutes {
      return Err(AppError::Capacity(format!(
        "slot {} has {} minutes available, {} requested",
        self.id, self.available_minutes, minutes
      )));
    }
    self.available_minutes -= minutes;
    self.used_minutes += minutes;
    self.order_ids.push(order_id);
    if self.status == SlotStatus::Available {
      self.status = SlotStatus::Pending;
    }
    self.updated_at = Utc::now();
    Ok(())
  }

  /// Gives back the capacity held by `order_id`. Returns `false` (and changes
  /// nothing) when the order holds nothing here, which makes repeated
  /// releases harmless.
  pub fn apply_release(&mut self, minutes: i32, order_id: Uuid) -> bool {
    let Some(pos) = self.order_ids.iter().position(|id| *id == order_id) else {
      return false;
    };
    self.order_ids.remove(pos);
    let restored = minutes.clamp(0, self.used_minutes);
    self.available_minutes += restored;
    self.used_minutes -= restored;
    if self.order_ids.is_empty() && self.status != SlotStatus::Cancelled {
      self.status = SlotStatus::Available;
    }
    self.updated_at = Utc::now();
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn slot_9_to_11() -> StaffSlot {
    StaffSlot::new(
      Uuid::new_v4(),
      NaiveDate::from_ymd_opt(2030, 3, 4).unwrap(),
      NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
      NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
    )
    .unwrap()
  }

  fn assert_balanced(slot: &StaffSlot) {
    assert!(slot.available_minutes >= 0);
    assert_eq!(slot.available_minutes + slot.used_minutes, slot.duration_minutes());
  }

  #[test]
  fn reservation_moves_minutes_and_marks_pending() {
    let mut slot = slot_9_to_11();
    let order = Uuid::new_v4();
    slot.apply_reservation(60, order).unwrap();
    assert_eq!(slot.available_minutes, 60);
    assert_eq!(slot.used_minutes, 60);
    assert_eq!(slot.status, SlotStatus::Pending);
    assert_eq!(slot.order_ids, vec![order]);
    assert_balanced(&slot);
  }

  #[test]
  fn reservation_beyond_capacity_leaves_slot_unchanged() {
    let mut slot = slot_9_to_11();
    slot.apply_reservation(60, Uuid::new_v4()).unwrap();
    let before = slot.clone();
    let err = slot.apply_reservation(90, Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, AppError::Capacity(_)));
    assert_eq!(slot, before);
  }

  #[test]
  fn release_is_idempotent_and_resets_when_empty() {
    let mut slot = slot_9_to_11();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    slot.apply_reservation(30, first).unwrap();
    slot.apply_reservation(45, second).unwrap();

    assert!(slot.apply_release(30, first));
    assert!(!slot.apply_release(30, first));
    assert_eq!(slot.status, SlotStatus::Pending);
    assert_balanced(&slot);

    assert!(slot.apply_release(45, second));
    assert_eq!(slot.status, SlotStatus::Available);
    assert_eq!(slot.available_minutes, 120);
    assert_balanced(&slot);
  }

  #[test]
  fn terminal_slots_reject_reservations() {
    let mut slot = slot_9_to_11();
    slot.status = SlotStatus::Confirmed;
    assert!(matches!(slot.apply_reservation(10, Uuid::new_v4()), Err(AppError::Conflict(_))));
  }

  #[test]
  fn overlap_uses_half_open_windows() {
    let slot = slot_9_to_11();
    let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
    assert!(slot.overlaps(slot.date, t(10, 30), t(11, 30)));
    assert!(slot.overlaps(slot.date, t(8, 0), t(12, 0)));
    assert!(!slot.overlaps(slot.date, t(11, 0), t(12, 0)));
    assert!(!slot.overlaps(slot.date, t(8, 0), t(9, 0)));
    assert!(!slot.overlaps(slot.date.succ_opt().unwrap(), t(9, 0), t(10, 0)));
  }

  #[test]
  fn earliest_gap_reuses_freed_windows_first() {
    let slot = StaffSlot::new(
      Uuid::new_v4(),
      NaiveDate::from_ymd_opt(2030, 3, 4).unwrap(),
      NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
      NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
    )
    .unwrap();
    let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();

    assert_eq!(slot.earliest_gap(&[], 60), Some(t(9, 0)));
    assert_eq!(slot.earliest_gap(&[(t(9, 0), t(10, 0))], 60), Some(t(10, 0)));
    // 09:00-10:00 was given back; 10:00-11:00 is still held.
    assert_eq!(slot.earliest_gap(&[(t(10, 0), t(11, 0))], 60), Some(t(9, 0)));
    assert_eq!(slot.earliest_gap(&[(t(10, 0), t(11, 0))], 90), None);
    assert_eq!(slot.earliest_gap(&[(t(9, 30), t(10, 0)), (t(11, 0), t(12, 0))], 60), Some(t(10, 0)));
    assert_eq!(slot.earliest_gap(&[(t(9, 0), t(12, 0))], 15), None);
  }

  #[test]
  fn transition_table() {
    use SlotStatus::*;
    assert!(Pending.can_transition_to(Reserved));
    assert!(Reserved.can_transition_to(Confirmed));
    assert!(Reserved.can_transition_to(Cancelled));
    assert!(Reserved.can_transition_to(Reserved));
    assert!(!Available.can_transition_to(Reserved));
    assert!(!Confirmed.can_transition_to(Pending));
    assert!(!Cancelled.can_transition_to(Available));
    assert_eq!("RESERVED".parse::<SlotStatus>().unwrap(), Reserved);
  }

  #[test]
  fn inverted_window_is_rejected() {
    let t = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
    let date = NaiveDate::from_ymd_opt(2030, 3, 4).unwrap();
    assert!(StaffSlot::new(Uuid::new_v4(), date, t(11), t(9)).is_err());
    assert!(StaffSlot::new(Uuid::new_v4(), date, t(9), t(9)).is_err());
  }
}
