// spa_booking/src/web/handlers/mod.rs

pub mod order_handlers;
pub mod payment_handlers;
pub mod slot_handlers;
