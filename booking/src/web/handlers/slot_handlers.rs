// spa_booking/src/web/handlers/slot_handlers.rs

use actix_web::{web, HttpResponse};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::SlotStatus;
use crate::services::{GenerateSlots, NewSlot};
use crate::state::AppState;
use crate::store::SlotFilter;
use crate::web::identity::Staff;

#[derive(Debug, Deserialize)]
pub struct BatchPayload {
  pub slots: Vec<NewSlot>,
}

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
  pub staff_id: Option<Uuid>,
  pub date_from: Option<NaiveDate>,
  pub date_to: Option<NaiveDate>,
  pub status: Option<SlotStatus>,
}

#[derive(Debug, Deserialize)]
pub struct StatusPayload {
  pub status: SlotStatus,
}

#[instrument(name = "handler::create_slot", skip(app_state, payload), fields(staff = %staff.0))]
pub async fn create_slot_handler(
  app_state: web::Data<AppState>,
  staff: Staff,
  payload: web::Json<NewSlot>,
) -> Result<HttpResponse, AppError> {
  let slot = app_state.slots.create_slot(payload.into_inner()).await?;
  Ok(HttpResponse::Created().json(slot))
}

#[instrument(name = "handler::create_slot_batch", skip(app_state, payload), fields(staff = %staff.0))]
pub async fn create_batch_handler(
  app_state: web::Data<AppState>,
  staff: Staff,
  payload: web::Json<BatchPayload>,
) -> Result<HttpResponse, AppError> {
  let slots = app_state.slots.create_batch(payload.into_inner().slots).await?;
  Ok(HttpResponse::Created().json(json!({ "created": slots.len(), "slots": slots })))
}

#[instrument(name = "handler::generate_slots", skip(app_state, payload), fields(staff = %staff.0))]
pub async fn generate_slots_handler(
  app_state: web::Data<AppState>,
  staff: Staff,
  payload: web::Json<GenerateSlots>,
) -> Result<HttpResponse, AppError> {
  let slots = app_state.slots.generate(payload.into_inner()).await?;
  info!(count = slots.len(), "Slots generated from template.");
  Ok(HttpResponse::Created().json(json!({ "created": slots.len(), "slots": slots })))
}

#[instrument(name = "handler::list_slots", skip(app_state))]
pub async fn list_slots_handler(
  app_state: web::Data<AppState>,
  query: web::Query<SlotQuery>,
) -> Result<HttpResponse, AppError> {
  let query = query.into_inner();
  let filter = SlotFilter {
    staff_id: query.staff_id,
    date_from: query.date_from,
    date_to: query.date_to,
    status: query.status,
  };
  Ok(HttpResponse::Ok().json(app_state.slots.list(&filter).await?))
}

#[instrument(name = "handler::get_slot", skip(app_state))]
pub async fn get_slot_handler(
  app_state: web::Data<AppState>,
  slot_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
  Ok(HttpResponse::Ok().json(app_state.slots.get(slot_id.into_inner()).await?))
}

#[instrument(name = "handler::update_slot_status", skip(app_state, payload), fields(staff = %staff.0))]
pub async fn update_slot_status_handler(
  app_state: web::Data<AppState>,
  staff: Staff,
  slot_id: web::Path<Uuid>,
  payload: web::Json<StatusPayload>,
) -> Result<HttpResponse, AppError> {
  let slot = app_state.slots.transition(slot_id.into_inner(), payload.status).await?;
  Ok(HttpResponse::Ok().json(slot))
}

#[instrument(name = "handler::delete_slot", skip(app_state), fields(staff = %staff.0))]
pub async fn delete_slot_handler(
  app_state: web::Data<AppState>,
  staff: Staff,
  slot_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
  app_state.slots.delete(slot_id.into_inner()).await?;
  Ok(HttpResponse::NoContent().finish())
}
