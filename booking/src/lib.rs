// spa_booking/src/lib.rs

pub mod catalog;
pub mod config;
pub mod errors;
pub mod models;
pub mod notifications;
pub mod payments;
pub mod pipelines;
pub mod services;
pub mod state;
pub mod store;
pub mod web;
