// spa_booking/src/web/handlers/order_handlers.rs

use actix_web::{web, HttpResponse};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::services::{ProductOrderRequest, ServiceBookingRequest};
use crate::state::AppState;
use crate::web::identity::{Caller, Customer, Staff};

#[derive(Debug, Deserialize)]
pub struct CancelPayload {
  pub reason: String,
}

#[instrument(name = "handler::place_product_order", skip(app_state, payload), fields(customer = %customer.0))]
pub async fn place_product_order_handler(
  app_state: web::Data<AppState>,
  customer: Customer,
  payload: web::Json<ProductOrderRequest>,
) -> Result<HttpResponse, AppError> {
  let outcome = app_state.orders.place_product_order(customer.0, payload.into_inner()).await?;
  info!(order_id = %outcome.order.id, "Product order placed.");
  Ok(HttpResponse::Created().json(outcome))
}

#[instrument(name = "handler::book_service", skip(app_state, payload), fields(customer = %customer.0))]
pub async fn book_service_handler(
  app_state: web::Data<AppState>,
  customer: Customer,
  payload: web::Json<ServiceBookingRequest>,
) -> Result<HttpResponse, AppError> {
  let outcome = app_state.orders.book_service(customer.0, payload.into_inner()).await?;
  info!(order_id = %outcome.order.id, "Service booked.");
  Ok(HttpResponse::Created().json(outcome))
}

#[instrument(name = "handler::get_order", skip(app_state, caller))]
pub async fn get_order_handler(
  app_state: web::Data<AppState>,
  caller: Caller,
  order_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
  let view = app_state.orders.get_order(order_id.into_inner(), caller.0).await?;
  Ok(HttpResponse::Ok().json(view))
}

#[instrument(name = "handler::cancel_order", skip(app_state, caller, payload))]
pub async fn cancel_order_handler(
  app_state: web::Data<AppState>,
  caller: Caller,
  order_id: web::Path<Uuid>,
  payload: web::Json<CancelPayload>,
) -> Result<HttpResponse, AppError> {
  let outcome = app_state
    .cancellations
    .cancel(order_id.into_inner(), caller.0, &payload.reason)
    .await?;
  Ok(HttpResponse::Ok().json(outcome))
}

/// Triggered by the external scheduler.
#[instrument(name = "handler::expire_holds", skip(app_state), fields(staff = %staff.0))]
pub async fn expire_holds_handler(app_state: web::Data<AppState>, staff: Staff) -> Result<HttpResponse, AppError> {
  let cutoff = Utc::now() - Duration::minutes(app_state.config.hold_minutes);
  let expired = app_state.cancellations.expire_stale(cutoff).await?;
  Ok(HttpResponse::Ok().json(json!({ "cutoff": cutoff, "expired": expired })))
}
