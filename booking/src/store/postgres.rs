// spa_booking/src/store/postgres.rs

//! PostgreSQL store. Conditional updates are single
//! `UPDATE ... WHERE <condition> RETURNING` statements, so concurrent
//! reservations are arbitrated by the row lock Postgres takes for the update.

use super::{ReserveOutcome, SlotFilter, Store, StoreTx};
use crate::errors::{AppError, Result};
use crate::models::{
  CustomerContact, Order, OrderDetail, OrderStatus, ProviderMetadata, ServiceLine, SlotStatus, StaffSlot,
  Transaction, TransactionPatch, TransactionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres};
use tracing::info;
use uuid::Uuid;

const SLOT_COLUMNS: &str =
  "id, staff_id, date, start_time, end_time, status, available_minutes, used_minutes, order_ids, created_at, updated_at";

const ORDER_COLUMNS: &str = "id, customer_id, branch_id, contact_name, contact_email, contact_phone, total_price, \
   discount_amount, final_price, payment_method, status, booking_date, start_time, end_time, note, created_at, updated_at";

const DETAIL_COLUMNS: &str = "id, order_id, item_type, item_id, item_name, price, discount_price, quantity, slot_id, \
   staff_id, service_date, start_time, end_time, duration_minutes";

const TX_COLUMNS: &str = "id, order_id, payment_method, provider, amount, currency, status, intent_ref, \
   payment_method_ref, refund_ref, refund_failure, failure_reason, metadata, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub async fn connect(database_url: &str) -> Result<Self> {
    let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
    info!("Successfully connected to the database.");
    Ok(Self { pool })
  }

  pub fn from_pool(pool: PgPool) -> Self {
    Self { pool }
  }

  /// Applies `schema.sql`. Safe to run on every start.
  pub async fn migrate(&self) -> Result<()> {
    sqlx::raw_sql(include_str!("../../schema.sql")).execute(&self.pool).await?;
    info!("Database schema is up to date.");
    Ok(())
  }
}

#[async_trait]
impl Store for PgStore {
  async fn begin(&self) -> Result<Box<dyn StoreTx>> {
    let tx = self.pool.begin().await?;
    Ok(Box::new(PgTx { tx }))
  }
}

struct PgTx {
  tx: sqlx::Transaction<'static, Postgres>,
}

// --- row mapping ---

#[derive(FromRow)]
struct SlotRow {
  id: Uuid,
  staff_id: Uuid,
  date: NaiveDate,
  start_time: NaiveTime,
  end_time: NaiveTime,
  status: String,
  available_minutes: i32,
  used_minutes: i32,
  order_ids: Vec<Uuid>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl TryFrom<SlotRow> for StaffSlot {
  type Error = AppError;

  fn try_from(row: SlotRow) -> Result<Self> {
    Ok(StaffSlot {
      id: row.id,
      staff_id: row.staff_id,
      date: row.date,
      start_time: row.start_time,
      end_time: row.end_time,
      status: row.status.parse()?,
      available_minutes: row.available_minutes,
      used_minutes: row.used_minutes,
      order_ids: row.order_ids,
      created_at: row.created_at,
      updated_at: row.updated_at,
    })
  }
}

#[derive(FromRow)]
struct OrderRow {
  id: Uuid,
  customer_id: Uuid,
  branch_id: Uuid,
  contact_name: String,
  contact_email: Option<String>,
  contact_phone: Option<String>,
  total_price: i64,
  discount_amount: i64,
  final_price: i64,
  payment_method: String,
  status: String,
  booking_date: Option<NaiveDate>,
  start_time: Option<NaiveTime>,
  end_time: Option<NaiveTime>,
  note: Option<String>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct DetailRow {
  id: Uuid,
  order_id: Uuid,
  item_type: String,
  item_id: Uuid,
  item_name: String,
  price: i64,
  discount_price: Option<i64>,
  quantity: i32,
  slot_id: Option<Uuid>,
  staff_id: Option<Uuid>,
  service_date: Option<NaiveDate>,
  start_time: Option<NaiveTime>,
  end_time: Option<NaiveTime>,
  duration_minutes: Option<i32>,
}

impl TryFrom<DetailRow> for OrderDetail {
  type Error = AppError;

  fn try_from(row: DetailRow) -> Result<Self> {
    let service = match (row.slot_id, row.staff_id, row.service_date, row.start_time, row.end_time) {
      (Some(slot_id), Some(staff_id), Some(date), Some(start_time), Some(end_time)) => Some(ServiceLine {
        slot_id,
        staff_id,
        date,
        start_time,
        end_time,
        duration_minutes: row.duration_minutes.unwrap_or_default(),
      }),
      _ => None,
    };
    Ok(OrderDetail {
      id: row.id,
      order_id: row.order_id,
      item_type: row.item_type.parse()?,
      item_id: row.item_id,
      item_name: row.item_name,
      price: row.price,
      discount_price: row.discount_price,
      quantity: row.quantity,
      service,
    })
  }
}

impl OrderRow {
  fn into_order(self, items: Vec<OrderDetail>) -> Result<Order> {
    Ok(Order {
      id: self.id,
      customer_id: self.customer_id,
      branch_id: self.branch_id,
      contact: CustomerContact {
        name: self.contact_name,
        email: self.contact_email,
        phone: self.contact_phone,
      },
      items,
      total_price: self.total_price,
      discount_amount: self.discount_amount,
      final_price: self.final_price,
      payment_method: self.payment_method.parse()?,
      status: self.status.parse()?,
      booking_date: self.booking_date,
      start_time: self.start_time,
      end_time: self.end_time,
      note: self.note,
      created_at: self.created_at,
      updated_at: self.updated_at,
    })
  }
}

#[derive(FromRow)]
struct TxRow {
  id: Uuid,
  order_id: Uuid,
  payment_method: String,
  provider: String,
  amount: i64,
  currency: String,
  status: String,
  intent_ref: String,
  payment_method_ref: Option<String>,
  refund_ref: Option<String>,
  refund_failure: Option<String>,
  failure_reason: Option<String>,
  metadata: Json<ProviderMetadata>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl TryFrom<TxRow> for Transaction {
  type Error = AppError;

  fn try_from(row: TxRow) -> Result<Self> {
    Ok(Transaction {
      id: row.id,
      order_id: row.order_id,
      payment_method: row.payment_method.parse()?,
      provider: row.provider,
      amount: row.amount,
      currency: row.currency,
      status: row.status.parse()?,
      intent_ref: row.intent_ref,
      payment_method_ref: row.payment_method_ref,
      refund_ref: row.refund_ref,
      refund_failure: row.refund_failure,
      failure_reason: row.failure_reason,
      metadata: row.metadata.0,
      created_at: row.created_at,
      updated_at: row.updated_at,
    })
  }
}

fn status_list<S: ToString>(statuses: &[S]) -> Vec<String> {
  statuses.iter().map(ToString::to_string).collect()
}

fn unique_violation(err: &sqlx::Error) -> bool {
  matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// SQLSTATE 23P01, raised by `staff_slots_no_overlap`.
fn exclusion_violation(err: &sqlx::Error) -> bool {
  matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23P01"))
}

impl PgTx {
  async fn slot_by_id(&mut self, id: Uuid) -> Result<Option<StaffSlot>> {
    let row: Option<SlotRow> = sqlx::query_as(&format!("SELECT {} FROM staff_slots WHERE id = $1", SLOT_COLUMNS))
      .bind(id)
      .fetch_optional(&mut *self.tx)
      .await?;
    row.map(StaffSlot::try_from).transpose()
  }
}

#[async_trait]
impl StoreTx for PgTx {
  async fn get_slot(&mut self, id: Uuid) -> Result<Option<StaffSlot>> {
    self.slot_by_id(id).await
  }

  async fn find_overlapping_slot(
    &mut self,
    staff_id: Uuid,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    exclude: Option<Uuid>,
  ) -> Result<Option<StaffSlot>> {
    let row: Option<SlotRow> = sqlx::query_as(&format!(
      "SELECT {} FROM staff_slots
       WHERE staff_id = $1 AND date = $2 AND start_time < $4 AND end_time > $3
         AND ($5::uuid IS NULL OR id <> $5)
       ORDER BY start_time
       LIMIT 1",
      SLOT_COLUMNS
    ))
    .bind(staff_id)
    .bind(date)
    .bind(start)
    .bind(end)
    .bind(exclude)
    .fetch_optional(&mut *self.tx)
    .await?;
    row.map(StaffSlot::try_from).transpose()
  }

  async fn list_slots(&mut self, filter: &SlotFilter) -> Result<Vec<StaffSlot>> {
    let rows: Vec<SlotRow> = sqlx::query_as(&format!(
      "SELECT {} FROM staff_slots
       WHERE ($1::uuid IS NULL OR staff_id = $1)
         AND ($2::date IS NULL OR date >= $2)
         AND ($3::date IS NULL OR date <= $3)
         AND ($4::text IS NULL OR status = $4)
       ORDER BY date, start_time, staff_id",
      SLOT_COLUMNS
    ))
    .bind(filter.staff_id)
    .bind(filter.date_from)
    .bind(filter.date_to)
    .bind(filter.status.map(|s| s.as_str()))
    .fetch_all(&mut *self.tx)
    .await?;
    rows.into_iter().map(StaffSlot::try_from).collect()
  }

  async fn insert_slot(&mut self, slot: &StaffSlot) -> Result<()> {
    sqlx::query(
      "INSERT INTO staff_slots
         (id, staff_id, date, start_time, end_time, status, available_minutes, used_minutes, order_ids, created_at, updated_at)
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(slot.id)
    .bind(slot.staff_id)
    .bind(slot.date)
    .bind(slot.start_time)
    .bind(slot.end_time)
    .bind(slot.status.as_str())
    .bind(slot.available_minutes)
    .bind(slot.used_minutes)
    .bind(&slot.order_ids)
    .bind(slot.created_at)
    .bind(slot.updated_at)
    .execute(&mut *self.tx)
    .await
    .map_err(|e| {
      if unique_violation(&e) {
        AppError::Conflict(format!("slot {} already exists", slot.id))
      } else if exclusion_violation(&e) {
        AppError::Conflict(format!(
          "slot {} {}-{} on {} overlaps another slot of staff {}",
          slot.id, slot.start_time, slot.end_time, slot.date, slot.staff_id
        ))
      } else {
        AppError::Sqlx(e)
      }
    })?;
    Ok(())
  }

  async fn reserve_slot(&mut self, id: Uuid, minutes: i32, order_id: Uuid) -> Result<ReserveOutcome> {
    if minutes <= 0 {
      return Err(AppError::Validation("reserved minutes must be positive".to_string()));
    }
    let row: Option<SlotRow> = sqlx::query_as(&format!(
      "UPDATE staff_slots
       SET available_minutes = available_minutes - $2,
           used_minutes = used_minutes + $2,
           order_ids = array_append(order_ids, $3),
           status = CASE WHEN status = 'AVAILABLE' THEN 'PENDING' ELSE status END,
           updated_at = now()
       WHERE id = $1
         AND status IN ('AVAILABLE', 'PENDING', 'RESERVED')
         AND available_minutes >= $2
         AND NOT ($3 = ANY(order_ids))
       RETURNING {}",
      SLOT_COLUMNS
    ))
    .bind(id)
    .bind(minutes)
    .bind(order_id)
    .fetch_optional(&mut *self.tx)
    .await?;

    match row {
      Some(row) => Ok(ReserveOutcome::Reserved(row.try_into()?)),
      None => Ok(match self.slot_by_id(id).await? {
        Some(slot) => ReserveOutcome::Rejected(slot),
        None => ReserveOutcome::Missing,
      }),
    }
  }

  async fn release_slot(&mut self, id: Uuid, minutes: i32, order_id: Uuid) -> Result<Option<StaffSlot>> {
    // SET expressions all see the pre-update row.
    let row: Option<SlotRow> = sqlx::query_as(&format!(
      "UPDATE staff_slots
       SET available_minutes = available_minutes + LEAST(GREATEST($2, 0), used_minutes),
           used_minutes = used_minutes - LEAST(GREATEST($2, 0), used_minutes),
           order_ids = array_remove(order_ids, $3),
           status = CASE
             WHEN cardinality(array_remove(order_ids, $3)) = 0 AND status <> 'CANCELLED' THEN 'AVAILABLE'
             ELSE status
           END,
           updated_at = now()
       WHERE id = $1 AND $3 = ANY(order_ids)
       RETURNING {}",
      SLOT_COLUMNS
    ))
    .bind(id)
    .bind(minutes)
    .bind(order_id)
    .fetch_optional(&mut *self.tx)
    .await?;

    match row {
      Some(row) => Ok(Some(row.try_into()?)),
      None => self.slot_by_id(id).await,
    }
  }

  async fn update_slot_status(&mut self, id: Uuid, from: &[SlotStatus], to: SlotStatus) -> Result<Option<StaffSlot>> {
    let row: Option<SlotRow> = sqlx::query_as(&format!(
      "UPDATE staff_slots SET status = $2, updated_at = now()
       WHERE id = $1 AND status = ANY($3)
       RETURNING {}",
      SLOT_COLUMNS
    ))
    .bind(id)
    .bind(to.as_str())
    .bind(status_list(from))
    .fetch_optional(&mut *self.tx)
    .await?;
    row.map(StaffSlot::try_from).transpose()
  }

  async fn delete_unlinked_slot(&mut self, id: Uuid) -> Result<bool> {
    let done = sqlx::query("DELETE FROM staff_slots WHERE id = $1 AND cardinality(order_ids) = 0")
      .bind(id)
      .execute(&mut *self.tx)
      .await?;
    Ok(done.rows_affected() == 1)
  }

  async fn insert_order(&mut self, order: &Order) -> Result<()> {
    sqlx::query(
      "INSERT INTO orders
         (id, customer_id, branch_id, contact_name, contact_email, contact_phone, total_price, discount_amount,
          final_price, payment_method, status, booking_date, start_time, end_time, note, created_at, updated_at)
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
    )
    .bind(order.id)
    .bind(order.customer_id)
    .bind(order.branch_id)
    .bind(&order.contact.name)
    .bind(&order.contact.email)
    .bind(&order.contact.phone)
    .bind(order.total_price)
    .bind(order.discount_amount)
    .bind(order.final_price)
    .bind(order.payment_method.as_str())
    .bind(order.status.as_str())
    .bind(order.booking_date)
    .bind(order.start_time)
    .bind(order.end_time)
    .bind(&order.note)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *self.tx)
    .await?;

    for (position, detail) in order.items.iter().enumerate() {
      let service = detail.service.as_ref();
      sqlx::query(
        "INSERT INTO order_details
           (id, order_id, position, item_type, item_id, item_name, price, discount_price, quantity,
            slot_id, staff_id, service_date, start_time, end_time, duration_minutes)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
      )
      .bind(detail.id)
      .bind(order.id)
      .bind(position as i32)
      .bind(detail.item_type.as_str())
      .bind(detail.item_id)
      .bind(&detail.item_name)
      .bind(detail.price)
      .bind(detail.discount_price)
      .bind(detail.quantity)
      .bind(service.map(|s| s.slot_id))
      .bind(service.map(|s| s.staff_id))
      .bind(service.map(|s| s.date))
      .bind(service.map(|s| s.start_time))
      .bind(service.map(|s| s.end_time))
      .bind(service.map(|s| s.duration_minutes))
      .execute(&mut *self.tx)
      .await?;
    }
    Ok(())
  }

  async fn get_order(&mut self, id: Uuid) -> Result<Option<Order>> {
    let row: Option<OrderRow> = sqlx::query_as(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
      .bind(id)
      .fetch_optional(&mut *self.tx)
      .await?;
    let Some(row) = row else {
      return Ok(None);
    };
    let details: Vec<DetailRow> = sqlx::query_as(&format!(
      "SELECT {} FROM order_details WHERE order_id = $1 ORDER BY position",
      DETAIL_COLUMNS
    ))
    .bind(id)
    .fetch_all(&mut *self.tx)
    .await?;
    let items = details.into_iter().map(OrderDetail::try_from).collect::<Result<Vec<_>>>()?;
    row.into_order(items).map(Some)
  }

  async fn update_order_status(
    &mut self,
    id: Uuid,
    from: &[OrderStatus],
    to: OrderStatus,
    note: Option<&str>,
  ) -> Result<Option<Order>> {
    let updated: Option<(Uuid,)> = sqlx::query_as(
      "UPDATE orders
       SET status = $2,
           note = CASE
             WHEN $3::text IS NULL THEN note
             WHEN note IS NULL OR note = '' THEN $3
             ELSE note || E'\\n' || $3
           END,
           updated_at = now()
       WHERE id = $1 AND status = ANY($4)
       RETURNING id",
    )
    .bind(id)
    .bind(to.as_str())
    .bind(note)
    .bind(status_list(from))
    .fetch_optional(&mut *self.tx)
    .await?;

    match updated {
      Some(_) => self.get_order(id).await,
      None => Ok(None),
    }
  }

  async fn pending_orders_created_before(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> =
      sqlx::query_as("SELECT id FROM orders WHERE status = 'PENDING' AND created_at < $1 ORDER BY created_at")
        .bind(cutoff)
        .fetch_all(&mut *self.tx)
        .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
  }

  async fn insert_transaction(&mut self, tx: &Transaction) -> Result<()> {
    sqlx::query(
      "INSERT INTO transactions
         (id, order_id, payment_method, provider, amount, currency, status, intent_ref, payment_method_ref,
          refund_ref, refund_failure, failure_reason, metadata, created_at, updated_at)
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(tx.id)
    .bind(tx.order_id)
    .bind(tx.payment_method.as_str())
    .bind(&tx.provider)
    .bind(tx.amount)
    .bind(&tx.currency)
    .bind(tx.status.as_str())
    .bind(&tx.intent_ref)
    .bind(&tx.payment_method_ref)
    .bind(&tx.refund_ref)
    .bind(&tx.refund_failure)
    .bind(&tx.failure_reason)
    .bind(Json(&tx.metadata))
    .bind(tx.created_at)
    .bind(tx.updated_at)
    .execute(&mut *self.tx)
    .await
    .map_err(|e| {
      if unique_violation(&e) {
        AppError::Conflict(format!(
          "order {} already has a pending {} payment",
          tx.order_id, tx.payment_method
        ))
      } else {
        AppError::Sqlx(e)
      }
    })?;
    Ok(())
  }

  async fn find_transaction(&mut self, order_id: Uuid, intent_ref: &str) -> Result<Option<Transaction>> {
    let row: Option<TxRow> = sqlx::query_as(&format!(
      "SELECT {} FROM transactions WHERE order_id = $1 AND intent_ref = $2 ORDER BY created_at DESC LIMIT 1",
      TX_COLUMNS
    ))
    .bind(order_id)
    .bind(intent_ref)
    .fetch_optional(&mut *self.tx)
    .await?;
    row.map(Transaction::try_from).transpose()
  }

  async fn transactions_for_order(&mut self, order_id: Uuid) -> Result<Vec<Transaction>> {
    let rows: Vec<TxRow> = sqlx::query_as(&format!(
      "SELECT {} FROM transactions WHERE order_id = $1 ORDER BY created_at",
      TX_COLUMNS
    ))
    .bind(order_id)
    .fetch_all(&mut *self.tx)
    .await?;
    rows.into_iter().map(Transaction::try_from).collect()
  }

  async fn update_transaction_status(
    &mut self,
    id: Uuid,
    from: TransactionStatus,
    to: TransactionStatus,
    patch: TransactionPatch,
  ) -> Result<Option<Transaction>> {
    let row: Option<TxRow> = sqlx::query_as(&format!(
      "UPDATE transactions
       SET status = $3,
           payment_method_ref = COALESCE($4, payment_method_ref),
           refund_ref = COALESCE($5, refund_ref),
           refund_failure = COALESCE($6, refund_failure),
           failure_reason = COALESCE($7, failure_reason),
           updated_at = now()
       WHERE id = $1 AND status = $2
       RETURNING {}",
      TX_COLUMNS
    ))
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(patch.payment_method_ref)
    .bind(patch.refund_ref)
    .bind(patch.refund_failure)
    .bind(patch.failure_reason)
    .fetch_optional(&mut *self.tx)
    .await?;
    row.map(Transaction::try_from).transpose()
  }

  async fn commit(self: Box<Self>) -> Result<()> {
    self.tx.commit().await?;
    Ok(())
  }
}
