// spa_booking/src/catalog.rs

//! Read-only catalog lookups. Branches, services and products are owned by
//! another part of the system; the orchestrator only resolves them by id.

use crate::errors::{AppError, Result};
use crate::models::{Branch, Product, Service};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

#[async_trait]
pub trait Catalog: Send + Sync {
  async fn branch(&self, id: Uuid) -> Result<Branch>;
  async fn service(&self, id: Uuid) -> Result<Service>;
  async fn product(&self, id: Uuid) -> Result<Product>;
}

/// On-disk layout of a catalog file.
#[derive(Debug, Default, Deserialize)]
pub struct CatalogSnapshot {
  #[serde(default)]
  pub branches: Vec<Branch>,
  #[serde(default)]
  pub services: Vec<Service>,
  #[serde(default)]
  pub products: Vec<Product>,
}

#[derive(Debug, Default)]
struct Records {
  branches: HashMap<Uuid, Branch>,
  services: HashMap<Uuid, Service>,
  products: HashMap<Uuid, Product>,
}

#[derive(Debug, Default)]
pub struct StaticCatalog {
  records: RwLock<Records>,
}

impl StaticCatalog {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
    let catalog = Self::new();
    {
      let mut records = catalog.records.write();
      records.branches = snapshot.branches.into_iter().map(|b| (b.id, b)).collect();
      records.services = snapshot.services.into_iter().map(|s| (s.id, s)).collect();
      records.products = snapshot.products.into_iter().map(|p| (p.id, p)).collect();
    }
    catalog
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
      .map_err(|e| AppError::Config(format!("cannot read catalog file {}: {}", path.display(), e)))?;
    let snapshot: CatalogSnapshot = serde_json::from_str(&raw)
      .map_err(|e| AppError::Config(format!("invalid catalog file {}: {}", path.display(), e)))?;
    tracing::info!(
      branches = snapshot.branches.len(),
      services = snapshot.services.len(),
      products = snapshot.products.len(),
      "Catalog loaded from {}",
      path.display()
    );
    Ok(Self::from_snapshot(snapshot))
  }

  pub fn add_branch(&self, branch: Branch) {
    self.records.write().branches.insert(branch.id, branch);
  }

  pub fn add_service(&self, service: Service) {
    self.records.write().services.insert(service.id, service);
  }

  pub fn add_product(&self, product: Product) {
    self.records.write().products.insert(product.id, product);
  }
}

#[async_trait]
impl Catalog for StaticCatalog {
  async fn branch(&self, id: Uuid) -> Result<Branch> {
    self.records.read().branches.get(&id).cloned().ok_or_else(|| AppError::not_found("Branch", id))
  }

  async fn service(&self, id: Uuid) -> Result<Service> {
    self.records.read().services.get(&id).cloned().ok_or_else(|| AppError::not_found("Service", id))
  }

  async fn product(&self, id: Uuid) -> Result<Product> {
    self.records.read().products.get(&id).cloned().ok_or_else(|| AppError::not_found("Product", id))
  }
}
