use std::sync::Arc;

use tracing::info;

use proposal_core::audit::{AuditAction, AuditEntry, ENTITY_PRODUCT};
use proposal_core::domain::product::{Product, ProductId};
use proposal_core::errors::ApplicationError;
use proposal_db::repositories::ProductRepository;

use crate::repository_failure;

const PRODUCT_ENTITY: &str = "product";

/// Read access to the product catalog plus manual activation toggles.
#[derive(Clone)]
pub struct CatalogService {
    products: Arc<dyn ProductRepository>,
}

impl CatalogService {
    pub fn new(products: Arc<dyn ProductRepository>) -> Self {
        Self { products }
    }

    /// Active products ordered by category then name.
    pub async fn list_active(&self) -> Result<Vec<Product>, ApplicationError> {
        self.products.list_active().await.map_err(|failure| repository_failure("list_products", failure))
    }

    pub async fn get(&self, id: ProductId) -> Result<Product, ApplicationError> {
        self.products
            .find_by_id(id)
            .await
            .map_err(|failure| repository_failure("get_product", failure))?
            .ok_or_else(|| ApplicationError::not_found(PRODUCT_ENTITY, id))
    }

    pub async fn get_by_sku(&self, sku: &str) -> Result<Product, ApplicationError> {
        self.products
            .find_by_sku(sku.trim())
            .await
            .map_err(|failure| repository_failure("get_product", failure))?
            .ok_or_else(|| ApplicationError::not_found(PRODUCT_ENTITY, sku.trim()))
    }

    /// Products in the id set, active or not. Unknown ids are ignored.
    pub async fn by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, ApplicationError> {
        self.products.find_by_ids(ids).await.map_err(|failure| repository_failure("get_products", failure))
    }

    /// Existing quotes keep their snapshot; only new pricing stops seeing the product.
    pub async fn deactivate(&self, id: ProductId, actor: &str) -> Result<Product, ApplicationError> {
        self.set_active(id, false, actor).await
    }

    pub async fn reactivate(&self, id: ProductId, actor: &str) -> Result<Product, ApplicationError> {
        self.set_active(id, true, actor).await
    }

    async fn set_active(&self, id: ProductId, active: bool, actor: &str) -> Result<Product, ApplicationError> {
        let product = self.get(id).await?;
        if product.active == active {
            return Ok(product);
        }

        let (action, verb) = if active {
            (AuditAction::ProductReactivated, "reactivated")
        } else {
            (AuditAction::ProductDeactivated, "deactivated")
        };
        let audit = AuditEntry::new(action, ENTITY_PRODUCT, Some(id.to_string()), actor)
            .with_detail(format!("Product {} ({}) {verb}", product.sku, product.name));
        let found = self
            .products
            .set_active(id, active, audit)
            .await
            .map_err(|failure| repository_failure("set_product_active", failure))?;
        if !found {
            return Err(ApplicationError::not_found(PRODUCT_ENTITY, id));
        }

        info!(event_name = "catalog.product.toggled", product_id = %id, sku = %product.sku, active, actor, "product {verb}");
        self.get(id).await
    }
}
