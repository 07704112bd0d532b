// spa_booking/src/web/routes.rs

use actix_web::web;

use crate::web::handlers::{order_handlers, payment_handlers, slot_handlers};

async fn health_check_handler() -> actix_web::HttpResponse {
  actix_web::HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg.service(
    web::scope("/api/v1")
      .route("/health", web::get().to(health_check_handler))
      .service(
        web::scope("/slots")
          .route("", web::post().to(slot_handlers::create_slot_handler))
          .route("", web::get().to(slot_handlers::list_slots_handler))
          .route("/batch", web::post().to(slot_handlers::create_batch_handler))
          .route("/generate", web::post().to(slot_handlers::generate_slots_handler))
          .route("/{slot_id}", web::get().to(slot_handlers::get_slot_handler))
          .route("/{slot_id}", web::delete().to(slot_handlers::delete_slot_handler))
          .route("/{slot_id}/status", web::patch().to(slot_handlers::update_slot_status_handler)),
      )
      .service(
        web::scope("/orders")
          .route("/products", web::post().to(order_handlers::place_product_order_handler))
          .route("/bookings", web::post().to(order_handlers::book_service_handler))
          .route("/{order_id}", web::get().to(order_handlers::get_order_handler))
          .route("/{order_id}/cancel", web::post().to(order_handlers::cancel_order_handler)),
      )
      .service(
        web::scope("/payments")
          .route("/card/confirm", web::post().to(payment_handlers::confirm_card_handler))
          .route("/card/webhook", web::post().to(payment_handlers::card_webhook_handler))
          .route("/wallet/ipn", web::post().to(payment_handlers::wallet_ipn_handler)),
      )
      .route("/maintenance/expire-holds", web::post().to(order_handlers::expire_holds_handler)),
  );
}
