// spa_booking/src/pipelines/mod.rs

//! Saga definitions for the booking workflows. Each pipeline is built once
//! by its owning service and run per request over a fresh context.

pub mod contexts;

pub mod cancellation;
pub mod checkout;
pub mod confirmation;
