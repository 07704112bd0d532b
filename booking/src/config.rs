// spa_booking/src/config.rs

use crate::errors::{AppError, Result};
use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct CardProviderConfig {
  pub api_base: String,
  pub secret_key: String,
  pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct WalletProviderConfig {
  pub endpoint: String,
  pub partner_code: String,
  pub access_key: String,
  pub secret_key: String,
  pub redirect_url: String,
  pub ipn_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  /// Absent means the in-memory store is used.
  pub database_url: Option<String>,
  pub app_base_url: String,
  pub currency: String,
  /// How long a PENDING order may hold slot capacity before the sweep releases it.
  pub hold_minutes: i64,
  pub catalog_path: Option<String>,
  pub card: CardProviderConfig,
  pub wallet: WalletProviderConfig,
  pub notify_sender: String,
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok();

    let get_env = |var_name: &str| {
      env::var(var_name).map_err(|e| AppError::Config(format!("Missing environment variable '{}': {}", var_name, e)))
    };
    let get_or = |var_name: &str, default: &str| get_env(var_name).unwrap_or_else(|_| default.to_string());
    // Provider credentials have no usable default; a blank value counts as missing.
    let get_secret = |var_name: &str| {
      get_env(var_name).and_then(|value| {
        if value.trim().is_empty() {
          Err(AppError::Config(format!("Environment variable '{}' is empty", var_name)))
        } else {
          Ok(value)
        }
      })
    };

    let server_host = get_or("SERVER_HOST", "127.0.0.1");
    let server_port = get_or("SERVER_PORT", "8080")
      .parse::<u16>()
      .map_err(|e| AppError::Config(format!("Invalid SERVER_PORT: {}", e)))?;
    let database_url = get_env("DATABASE_URL").ok();
    let app_base_url = get_or("APP_BASE_URL", &format!("http://{}:{}", server_host, server_port));
    let currency = get_or("CURRENCY", "VND");
    let hold_minutes = get_or("HOLD_MINUTES", "15")
      .parse::<i64>()
      .map_err(|e| AppError::Config(format!("Invalid HOLD_MINUTES: {}", e)))?;
    if hold_minutes <= 0 {
      return Err(AppError::Config("HOLD_MINUTES must be positive".to_string()));
    }

    let card = CardProviderConfig {
      api_base: get_or("CARD_API_BASE", "https://api.stripe.com"),
      secret_key: get_secret("CARD_SECRET_KEY")?,
      webhook_secret: get_secret("CARD_WEBHOOK_SECRET")?,
    };
    let wallet = WalletProviderConfig {
      endpoint: get_or("WALLET_ENDPOINT", "https://test-payment.momo.vn/v2/gateway/api"),
      partner_code: get_or("WALLET_PARTNER_CODE", "MOMO"),
      access_key: get_secret("WALLET_ACCESS_KEY")?,
      secret_key: get_secret("WALLET_SECRET_KEY")?,
      redirect_url: get_or("WALLET_REDIRECT_URL", &format!("{}/payments/wallet/return", app_base_url)),
      ipn_url: get_or("WALLET_IPN_URL", &format!("{}/api/v1/payments/wallet/ipn", app_base_url)),
    };

    tracing::info!(
      in_memory_store = database_url.is_none(),
      currency = %currency,
      hold_minutes,
      "Application configuration loaded successfully."
    );

    Ok(Self {
      server_host,
      server_port,
      database_url,
      app_base_url,
      currency,
      hold_minutes,
      catalog_path: get_env("CATALOG_PATH").ok(),
      card,
      wallet,
      notify_sender: get_or("NOTIFY_SENDER", "bookings@example.com"),
    })
  }
}
