// spa_booking/src/web/identity.rs

//! Caller identity. Authentication happens upstream; by the time a request
//! reaches this service the gateway has set one of these headers.

use crate::errors::AppError;
use crate::services::Requester;
use actix_web::{dev::Payload, FromRequest, HttpRequest};
use futures_util::future::{ready, Ready};
use tracing::warn;
use uuid::Uuid;

pub const CUSTOMER_HEADER: &str = "X-Customer-Id";
pub const STAFF_HEADER: &str = "X-Staff-Id";

fn header_id(req: &HttpRequest, name: &str) -> Result<Option<Uuid>, AppError> {
  let Some(value) = req.headers().get(name) else {
    return Ok(None);
  };
  value
    .to_str()
    .ok()
    .and_then(|s| Uuid::parse_str(s.trim()).ok())
    .map(Some)
    .ok_or_else(|| AppError::Auth(format!("{} header is not a valid id", name)))
}

#[derive(Debug, Clone, Copy)]
pub struct Customer(pub Uuid);

impl FromRequest for Customer {
  type Error = AppError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
    ready(match header_id(req, CUSTOMER_HEADER) {
      Ok(Some(id)) => Ok(Customer(id)),
      Ok(None) => {
        warn!("Customer identity missing.");
        Err(AppError::Auth(format!("{} header is required", CUSTOMER_HEADER)))
      }
      Err(e) => Err(e),
    })
  }
}

#[derive(Debug, Clone, Copy)]
pub struct Staff(pub Uuid);

impl FromRequest for Staff {
  type Error = AppError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
    ready(match header_id(req, STAFF_HEADER) {
      Ok(Some(id)) => Ok(Staff(id)),
      Ok(None) => {
        warn!("Staff identity missing.");
        Err(AppError::Auth(format!("{} header is required", STAFF_HEADER)))
      }
      Err(e) => Err(e),
    })
  }
}

/// Staff if the staff header is present, otherwise the customer.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Requester);

impl FromRequest for Caller {
  type Error = AppError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
    let resolved = header_id(req, STAFF_HEADER).and_then(|staff| match staff {
      Some(id) => Ok(Requester::Staff(id)),
      None => match header_id(req, CUSTOMER_HEADER)? {
        Some(id) => Ok(Requester::Customer(id)),
        None => Err(AppError::Auth(format!(
          "{} or {} header is required",
          STAFF_HEADER, CUSTOMER_HEADER
        ))),
      },
    });
    ready(resolved.map(Caller))
  }
}
