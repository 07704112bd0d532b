// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use spa_booking::catalog::StaticCatalog;
use spa_booking::config::{AppConfig, CardProviderConfig, WalletProviderConfig};
use spa_booking::errors::{AppError, Result};
use spa_booking::models::{
  Amount, Branch, CustomerContact, DurationTier, OrderDetail, PaymentMethod, Product, ProviderMetadata, Service,
  StaffSlot, Transaction,
};
use spa_booking::notifications::{BookingSummary, DeliveryReceipt, Notifier};
use spa_booking::payments::wallet::order_ref_for;
use spa_booking::payments::{
  Handoff, IntentRequest, IntentStatus, PaymentGateway, PaymentGateways, PaymentIntent, RefundReceipt, WalletSigner,
};
use spa_booking::services::order_orchestrator::ProductLineRequest;
use spa_booking::services::{NewSlot, ProductOrderRequest, ServiceBookingRequest};
use spa_booking::state::AppState;
use spa_booking::store::{MemoryStore, Store};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tracing::Level;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

pub fn t(h: u32, m: u32) -> NaiveTime {
  NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// A Monday well in the future so no slot is ever "in the past".
pub fn day() -> NaiveDate {
  NaiveDate::from_ymd_opt(2030, 3, 4).unwrap()
}

pub fn contact() -> CustomerContact {
  CustomerContact {
    name: "Mai Tran".to_string(),
    email: Some("mai@example.com".to_string()),
    phone: None,
  }
}

/// Scriptable stand-in for a payment provider.
pub struct FakeGateway {
  method: PaymentMethod,
  counter: AtomicI64,
  fail_intents: AtomicBool,
  fail_refunds: AtomicBool,
  status: Mutex<IntentStatus>,
  pub refunded: Mutex<Vec<String>>,
  pub voided: Mutex<Vec<String>>,
}

impl FakeGateway {
  pub fn new(method: PaymentMethod) -> Self {
    Self {
      method,
      counter: AtomicI64::new(0),
      fail_intents: AtomicBool::new(false),
      fail_refunds: AtomicBool::new(false),
      status: Mutex::new(IntentStatus::Pending("requires_confirmation".to_string())),
      refunded: Mutex::new(Vec::new()),
      voided: Mutex::new(Vec::new()),
    }
  }

  pub fn fail_intents(&self, fail: bool) {
    self.fail_intents.store(fail, Ordering::SeqCst);
  }

  pub fn fail_refunds(&self, fail: bool) {
    self.fail_refunds.store(fail, Ordering::SeqCst);
  }

  pub fn set_status(&self, status: IntentStatus) {
    *self.status.lock() = status;
  }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
  fn method(&self) -> PaymentMethod {
    self.method
  }

  async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent> {
    if self.fail_intents.load(Ordering::SeqCst) {
      return Err(AppError::PaymentProvider("provider unavailable".to_string()));
    }
    let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
    Ok(match self.method {
      PaymentMethod::Wallet => {
        let order_ref = order_ref_for(request.order_id, n);
        PaymentIntent {
          provider_ref: order_ref.clone(),
          handoff: Handoff::Redirect {
            url: format!("https://wallet.test/pay/{}", order_ref),
          },
          metadata: ProviderMetadata::Wallet {
            request_id: order_ref.clone(),
            order_ref,
            booking: request.booking,
          },
        }
      }
      _ => PaymentIntent {
        provider_ref: format!("pi_fake_{}", n),
        handoff: Handoff::Sync {
          client_secret: format!("pi_fake_{}_secret", n),
        },
        metadata: ProviderMetadata::Card {
          customer_id: request.customer_id,
          booking: request.booking,
        },
      },
    })
  }

  async fn intent_status(&self, _provider_ref: &str) -> Result<IntentStatus> {
    Ok(self.status.lock().clone())
  }

  async fn cancel_intent(&self, provider_ref: &str) -> Result<()> {
    self.voided.lock().push(provider_ref.to_string());
    Ok(())
  }

  async fn refund(&self, tx: &Transaction) -> Result<RefundReceipt> {
    if self.fail_refunds.load(Ordering::SeqCst) {
      return Err(AppError::PaymentProvider("refund declined".to_string()));
    }
    self.refunded.lock().push(tx.intent_ref.clone());
    Ok(RefundReceipt {
      refund_ref: format!("re_{}", tx.intent_ref),
    })
  }
}

#[derive(Default)]
pub struct RecordingNotifier {
  pub sent: Mutex<Vec<(String, Uuid)>>,
  pub receipts: Mutex<Vec<Amount>>,
  fail: AtomicBool,
}

impl RecordingNotifier {
  pub fn fail(&self, fail: bool) {
    self.fail.store(fail, Ordering::SeqCst);
  }
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn send_booking_confirmation(
    &self,
    contact: &CustomerContact,
    details: &BookingSummary,
    proof: &str,
  ) -> Result<DeliveryReceipt> {
    if self.fail.load(Ordering::SeqCst) {
      return Err(AppError::Internal("mail relay down".to_string()));
    }
    self.sent.lock().push((proof.to_string(), details.order_id));
    Ok(DeliveryReceipt {
      recipient: contact.name.clone(),
      message_id: format!("msg_{}", details.order_id),
    })
  }

  async fn send_purchase_receipt(
    &self,
    contact: &CustomerContact,
    _items: &[OrderDetail],
    total: Amount,
  ) -> Result<DeliveryReceipt> {
    if self.fail.load(Ordering::SeqCst) {
      return Err(AppError::Internal("mail relay down".to_string()));
    }
    self.receipts.lock().push(total);
    Ok(DeliveryReceipt {
      recipient: contact.name.clone(),
      message_id: "msg_receipt".to_string(),
    })
  }
}

pub struct Fixtures {
  pub branch_id: Uuid,
  pub closed_branch_id: Uuid,
  pub massage_id: Uuid,
  pub oil_id: Uuid,
  pub candle_id: Uuid,
  pub staff_id: Uuid,
  pub customer_id: Uuid,
}

pub struct Harness {
  pub state: AppState,
  pub store: Arc<dyn Store>,
  pub card: Arc<FakeGateway>,
  pub wallet: Arc<FakeGateway>,
  pub notifier: Arc<RecordingNotifier>,
  pub signer: WalletSigner,
  pub fx: Fixtures,
}

fn test_config() -> AppConfig {
  AppConfig {
    server_host: "127.0.0.1".to_string(),
    server_port: 0,
    database_url: None,
    app_base_url: "http://localhost".to_string(),
    currency: "VND".to_string(),
    hold_minutes: 15,
    catalog_path: None,
    card: CardProviderConfig {
      api_base: "http://card.invalid".to_string(),
      secret_key: "sk_test".to_string(),
      webhook_secret: WEBHOOK_SECRET.to_string(),
    },
    wallet: WalletProviderConfig {
      endpoint: "http://wallet.invalid".to_string(),
      partner_code: "PARTNER".to_string(),
      access_key: "access_test".to_string(),
      secret_key: "wallet_secret_test".to_string(),
      redirect_url: "http://localhost/return".to_string(),
      ipn_url: "http://localhost/ipn".to_string(),
    },
    notify_sender: "bookings@test".to_string(),
  }
}

fn fixture_catalog() -> (StaticCatalog, Fixtures) {
  let fx = Fixtures {
    branch_id: Uuid::new_v4(),
    closed_branch_id: Uuid::new_v4(),
    massage_id: Uuid::new_v4(),
    oil_id: Uuid::new_v4(),
    candle_id: Uuid::new_v4(),
    staff_id: Uuid::new_v4(),
    customer_id: Uuid::new_v4(),
  };
  let catalog = StaticCatalog::new();
  catalog.add_branch(Branch {
    id: fx.branch_id,
    name: "Riverside".to_string(),
    active: true,
  });
  catalog.add_branch(Branch {
    id: fx.closed_branch_id,
    name: "Old Quarter".to_string(),
    active: false,
  });
  catalog.add_service(Service {
    id: fx.massage_id,
    name: "Hot stone massage".to_string(),
    branch_ids: vec![fx.branch_id],
    durations: vec![
      DurationTier {
        minutes: 60,
        price: 500_000,
        discount_price: Some(450_000),
      },
      DurationTier {
        minutes: 90,
        price: 700_000,
        discount_price: None,
      },
    ],
  });
  catalog.add_product(Product {
    id: fx.oil_id,
    name: "Lavender oil".to_string(),
    price: 120_000,
    discount_price: Some(100_000),
    active: true,
  });
  catalog.add_product(Product {
    id: fx.candle_id,
    name: "Soy candle".to_string(),
    price: 80_000,
    discount_price: None,
    active: true,
  });
  (catalog, fx)
}

impl Harness {
  pub fn new() -> Self {
    Self::with_store(Arc::new(MemoryStore::new()))
  }

  /// Same wiring over any store; fixture ids are fresh per harness, so a
  /// shared database needs no cleanup between runs.
  pub fn with_store(store: Arc<dyn Store>) -> Self {
    setup_tracing();
    let config = test_config();
    let (catalog, fx) = fixture_catalog();
    let card = Arc::new(FakeGateway::new(PaymentMethod::Card));
    let wallet = Arc::new(FakeGateway::new(PaymentMethod::Wallet));
    let notifier = Arc::new(RecordingNotifier::default());
    let signer = WalletSigner::from_config(&config.wallet);

    let card_dyn: Arc<dyn PaymentGateway> = card.clone();
    let wallet_dyn: Arc<dyn PaymentGateway> = wallet.clone();
    let notifier_dyn: Arc<dyn Notifier> = notifier.clone();
    let state = AppState::assemble(
      config,
      store.clone(),
      Arc::new(catalog),
      PaymentGateways::new().with(card_dyn).with(wallet_dyn),
      notifier_dyn,
      signer.clone(),
    )
    .expect("state assembles");

    Self {
      state,
      store,
      card,
      wallet,
      notifier,
      signer,
      fx,
    }
  }

  pub async fn slot(&self, start: NaiveTime, end: NaiveTime) -> StaffSlot {
    self
      .state
      .slots
      .create_slot(NewSlot {
        staff_id: self.fx.staff_id,
        date: day(),
        start_time: start,
        end_time: end,
      })
      .await
      .expect("slot created")
  }

  pub fn booking(&self, slot_id: Uuid, minutes: i32, method: PaymentMethod) -> ServiceBookingRequest {
    ServiceBookingRequest {
      branch_id: self.fx.branch_id,
      service_id: self.fx.massage_id,
      duration_minutes: minutes,
      slot_id,
      contact: contact(),
      payment_method: method,
      note: None,
    }
  }

  pub fn product_order(&self, method: PaymentMethod) -> ProductOrderRequest {
    ProductOrderRequest {
      branch_id: self.fx.branch_id,
      items: vec![
        ProductLineRequest {
          product_id: self.fx.oil_id,
          quantity: 2,
        },
        ProductLineRequest {
          product_id: self.fx.candle_id,
          quantity: 1,
        },
      ],
      contact: contact(),
      payment_method: method,
      note: Some("gift wrap".to_string()),
    }
  }
}
