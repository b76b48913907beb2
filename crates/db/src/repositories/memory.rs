use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use proposal_core::audit::AuditEntry;
use proposal_core::domain::product::{NewProduct, Product, ProductId};
use proposal_core::domain::quote::{Quote, QuoteId, QuoteNumber, QuoteStatus};

use super::{
    AuditRepository, CatalogBatch, ProductRepository, QuoteFilter, QuoteRepository,
    RepositoryError,
};

#[derive(Default)]
pub struct InMemoryAuditRepository {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditRepository {
    pub async fn all(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, mut entry: AuditEntry) -> Result<AuditEntry, RepositoryError> {
        let mut entries = self.entries.write().await;
        entry.id = Some(entries.len() as i64 + 1);
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<AuditEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut matching: Vec<_> = entries
            .iter()
            .filter(|entry| {
                entry.entity_type == entity_type && entry.entity_id.as_deref() == Some(entity_id)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }
}

fn catalog_order(a: &Product, b: &Product) -> std::cmp::Ordering {
    a.category.cmp(&b.category).then_with(|| a.name.cmp(&b.name)).then(a.id.cmp(&b.id))
}

pub struct InMemoryProductRepository {
    products: RwLock<BTreeMap<ProductId, Product>>,
    audit: Arc<InMemoryAuditRepository>,
}

impl InMemoryProductRepository {
    pub fn new(audit: Arc<InMemoryAuditRepository>) -> Self {
        Self { products: RwLock::new(BTreeMap::new()), audit }
    }
}

impl Default for InMemoryProductRepository {
    fn default() -> Self {
        Self::new(Arc::default())
    }
}

fn materialize(products: &mut BTreeMap<ProductId, Product>, product: NewProduct) -> Result<Product, RepositoryError> {
    if products.values().any(|existing| existing.sku == product.sku) {
        return Err(RepositoryError::Conflict(format!("sku `{}` already exists", product.sku)));
    }

    let id = ProductId(products.keys().next_back().map_or(1, |last| last.0 + 1));
    let now = Utc::now();
    let stored = Product {
        id,
        sku: product.sku,
        name: product.name,
        description: product.description,
        category: product.category,
        unit_price: product.unit_price,
        currency: product.currency,
        commitment_term: product.commitment_term,
        billing_frequency: product.billing_frequency,
        active: true,
        created_at: now,
        updated_at: now,
    };
    products.insert(id, stored.clone());
    Ok(stored)
}

#[async_trait::async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.products.read().await.get(&id).cloned())
    }

    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(products.values().find(|product| product.sku == sku).cloned())
    }

    async fn find_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError> {
        let products = self.products.read().await;
        let mut found: Vec<_> = products.values().filter(|p| ids.contains(&p.id)).cloned().collect();
        found.sort_by(catalog_order);
        Ok(found)
    }

    async fn list_active(&self) -> Result<Vec<Product>, RepositoryError> {
        let products = self.products.read().await;
        let mut active: Vec<_> = products.values().filter(|p| p.active).cloned().collect();
        active.sort_by(catalog_order);
        Ok(active)
    }

    async fn insert(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        let mut products = self.products.write().await;
        materialize(&mut products, product)
    }

    async fn apply_batch(
        &self,
        batch: CatalogBatch,
        audit: AuditEntry,
    ) -> Result<(), RepositoryError> {
        let mut products = self.products.write().await;
        // Stage on a copy so a failing row leaves the catalog untouched.
        let mut staged = products.clone();
        for product in batch.updates {
            if !staged.contains_key(&product.id) {
                return Err(RepositoryError::Conflict(format!(
                    "product {} disappeared during the update",
                    product.id
                )));
            }
            staged.insert(product.id, product);
        }
        for product in batch.inserts {
            materialize(&mut staged, product)?;
        }

        *products = staged;
        self.audit.append(audit).await?;
        Ok(())
    }

    async fn set_active(
        &self,
        id: ProductId,
        active: bool,
        audit: AuditEntry,
    ) -> Result<bool, RepositoryError> {
        let mut products = self.products.write().await;
        let Some(product) = products.get_mut(&id) else {
            return Ok(false);
        };
        product.active = active;
        product.updated_at = Utc::now();
        self.audit.append(audit).await?;
        Ok(true)
    }
}

pub struct InMemoryQuoteRepository {
    quotes: RwLock<BTreeMap<QuoteId, Quote>>,
    audit: Arc<InMemoryAuditRepository>,
}

impl InMemoryQuoteRepository {
    pub fn new(audit: Arc<InMemoryAuditRepository>) -> Self {
        Self { quotes: RwLock::new(BTreeMap::new()), audit }
    }
}

impl Default for InMemoryQuoteRepository {
    fn default() -> Self {
        Self::new(Arc::default())
    }
}

fn with_entity(audit: AuditEntry, id: QuoteId) -> AuditEntry {
    if audit.entity_id.is_some() {
        return audit;
    }
    AuditEntry { entity_id: Some(id.to_string()), ..audit }
}

#[async_trait::async_trait]
impl QuoteRepository for InMemoryQuoteRepository {
    async fn find_by_id(&self, id: QuoteId) -> Result<Option<Quote>, RepositoryError> {
        Ok(self.quotes.read().await.get(&id).cloned())
    }

    async fn find_by_number(&self, number: &QuoteNumber) -> Result<Option<Quote>, RepositoryError> {
        let quotes = self.quotes.read().await;
        Ok(quotes.values().find(|quote| &quote.quote_number == number).cloned())
    }

    async fn list(&self, filter: &QuoteFilter) -> Result<Vec<Quote>, RepositoryError> {
        let quotes = self.quotes.read().await;
        let mut listed: Vec<_> = quotes
            .values()
            .filter(|quote| filter.created_by.as_ref().map_or(true, |user| &quote.created_by == user))
            .filter(|quote| filter.status.map_or(true, |status| quote.status == status))
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(listed)
    }

    async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Quote>, RepositoryError> {
        let quotes = self.quotes.read().await;
        let mut overdue: Vec<_> = quotes.values().filter(|quote| quote.is_overdue(now)).cloned().collect();
        overdue.sort_by(|a, b| a.valid_until.cmp(&b.valid_until).then(a.id.cmp(&b.id)));
        Ok(overdue)
    }

    async fn insert(&self, quote: Quote, audit: AuditEntry) -> Result<Quote, RepositoryError> {
        let mut quotes = self.quotes.write().await;
        if quotes.values().any(|existing| existing.quote_number == quote.quote_number) {
            return Err(RepositoryError::Conflict(format!(
                "quote number `{}` is already taken",
                quote.quote_number
            )));
        }

        let id = QuoteId(quotes.keys().next_back().map_or(1, |last| last.0 + 1));
        let stored = Quote { id: Some(id), ..quote };
        quotes.insert(id, stored.clone());
        self.audit.append(with_entity(audit, id)).await?;
        Ok(stored)
    }

    async fn update(
        &self,
        quote: &Quote,
        expected: QuoteStatus,
        audit: AuditEntry,
    ) -> Result<(), RepositoryError> {
        let mut quotes = self.quotes.write().await;
        let slot = quote
            .id
            .and_then(|id| quotes.get_mut(&id))
            .filter(|stored| stored.status == expected)
            .ok_or_else(|| {
                RepositoryError::Conflict(format!(
                    "quote {} is no longer in status {expected}",
                    quote.quote_number
                ))
            })?;

        *slot = quote.clone();
        let id = slot.id.unwrap_or(QuoteId(0));
        self.audit.append(with_entity(audit, id)).await?;
        Ok(())
    }

    async fn delete(
        &self,
        id: QuoteId,
        expected: QuoteStatus,
        audit: AuditEntry,
    ) -> Result<bool, RepositoryError> {
        let mut quotes = self.quotes.write().await;
        if quotes.get(&id).map(|quote| quote.status) != Some(expected) {
            return Ok(false);
        }
        quotes.remove(&id);
        self.audit.append(with_entity(audit, id)).await?;
        Ok(true)
    }
}
