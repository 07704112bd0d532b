// spa_booking/src/main.rs

use actix_web::{web as actix_data, App, HttpServer};
use spa_booking::config::AppConfig;
use spa_booking::state::AppState;
use spa_booking::web::configure_app_routes;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

fn startup_error(context: &str, e: impl std::fmt::Display) -> std::io::Error {
  tracing::error!(error = %e, "{}", context);
  std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, e))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_span_events(FmtSpan::CLOSE)
    .init();

  tracing::info!("Starting spa booking server...");

  let app_config = AppConfig::from_env().map_err(|e| startup_error("Failed to load application configuration", e))?;
  let server_address = format!("{}:{}", app_config.server_host, app_config.server_port);

  let app_state = AppState::from_config(app_config)
    .await
    .map_err(|e| startup_error("Failed to initialize application state", e))?;

  tracing::info!("Attempting to bind server to {}...", server_address);

  HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(app_state.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(configure_app_routes)
  })
  .bind(&server_address)?
  .run()
  .await
}
