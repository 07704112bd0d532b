// spa_booking/src/state.rs

use crate::catalog::{Catalog, StaticCatalog};
use crate::config::AppConfig;
use crate::errors::Result;
use crate::notifications::{LogNotifier, Notifier};
use crate::payments::{CardGateway, PaymentGateways, WalletGateway, WalletSigner};
use crate::services::{
  CancellationCompensator, ConfirmationHandler, OrderOrchestrator, SlotAllocator, TransactionLedger,
};
use crate::store::{MemoryStore, PgStore, Store};
use std::sync::Arc;
use tracing::info;

/// Everything the handlers need, wired once at startup.
#[derive(Clone)]
pub struct AppState {
  pub config: Arc<AppConfig>,
  pub slots: Arc<SlotAllocator>,
  pub orders: Arc<OrderOrchestrator>,
  pub confirmations: Arc<ConfirmationHandler>,
  pub cancellations: Arc<CancellationCompensator>,
}

impl AppState {
  /// Chooses the store from `DATABASE_URL` and the real provider adapters.
  pub async fn from_config(config: AppConfig) -> Result<Self> {
    let store: Arc<dyn Store> = match &config.database_url {
      Some(url) => {
        let pg = PgStore::connect(url).await?;
        pg.migrate().await?;
        Arc::new(pg)
      }
      None => {
        info!("DATABASE_URL not set; using the in-memory store.");
        Arc::new(MemoryStore::new())
      }
    };
    let catalog: Arc<dyn Catalog> = match &config.catalog_path {
      Some(path) => Arc::new(StaticCatalog::load(path)?),
      None => {
        info!("CATALOG_PATH not set; starting with an empty catalog.");
        Arc::new(StaticCatalog::new())
      }
    };
    let gateways = PaymentGateways::new()
      .with(Arc::new(CardGateway::new(config.card.clone())))
      .with(Arc::new(WalletGateway::new(config.wallet.clone())));
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new(config.notify_sender.clone()));
    let wallet_signer = WalletSigner::from_config(&config.wallet);

    Self::assemble(config, store, catalog, gateways, notifier, wallet_signer)
  }

  /// Wires the components over explicit collaborators; tests swap in fakes here.
  pub fn assemble(
    config: AppConfig,
    store: Arc<dyn Store>,
    catalog: Arc<dyn Catalog>,
    gateways: PaymentGateways,
    notifier: Arc<dyn Notifier>,
    wallet_signer: WalletSigner,
  ) -> Result<Self> {
    let ledger = Arc::new(TransactionLedger::new(store.clone(), config.currency.clone()));
    let slots = Arc::new(SlotAllocator::new(store.clone()));
    let orders = Arc::new(OrderOrchestrator::new(store.clone(), catalog, gateways.clone(), ledger.clone()));
    let confirmations = Arc::new(ConfirmationHandler::new(
      store.clone(),
      gateways.clone(),
      ledger.clone(),
      notifier,
      config.card.webhook_secret.clone(),
      wallet_signer,
    )?);
    let cancellations = Arc::new(CancellationCompensator::new(store, gateways, ledger)?);

    Ok(Self {
      config: Arc::new(config),
      slots,
      orders,
      confirmations,
      cancellations,
    })
  }
}
