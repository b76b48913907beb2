use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use proposal_core::audit::AuditEntry;
use proposal_core::domain::product::{NewProduct, Product, ProductId};
use proposal_core::domain::quote::{Quote, QuoteId, QuoteNumber, QuoteStatus};

pub mod audit;
pub mod memory;
pub mod product;
pub mod quote;

pub use audit::SqlAuditRepository;
pub use memory::{InMemoryAuditRepository, InMemoryProductRepository, InMemoryQuoteRepository};
pub use product::SqlProductRepository;
pub use quote::SqlQuoteRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuoteFilter {
    pub created_by: Option<String>,
    pub status: Option<QuoteStatus>,
}

/// Catalog changes staged by one price import. Applied atomically together with the
/// import's audit entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatalogBatch {
    pub inserts: Vec<NewProduct>,
    pub updates: Vec<Product>,
}

impl CatalogBatch {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;
    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, RepositoryError>;
    /// Matching products regardless of the active flag, ordered by category then name.
    async fn find_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError>;
    /// Active products ordered by category then name.
    async fn list_active(&self) -> Result<Vec<Product>, RepositoryError>;
    async fn insert(&self, product: NewProduct) -> Result<Product, RepositoryError>;
    async fn apply_batch(
        &self,
        batch: CatalogBatch,
        audit: AuditEntry,
    ) -> Result<(), RepositoryError>;
    /// Returns `false` when no product has this id.
    async fn set_active(
        &self,
        id: ProductId,
        active: bool,
        audit: AuditEntry,
    ) -> Result<bool, RepositoryError>;
}

/// Quote persistence. Every mutation carries the audit entry describing it and the
/// two are committed together. An audit entry without an `entity_id` receives the
/// quote's id.
#[async_trait]
pub trait QuoteRepository: Send + Sync {
    async fn find_by_id(&self, id: QuoteId) -> Result<Option<Quote>, RepositoryError>;
    async fn find_by_number(&self, number: &QuoteNumber) -> Result<Option<Quote>, RepositoryError>;
    /// Newest first; ties on creation time fall back to id, highest first.
    async fn list(&self, filter: &QuoteFilter) -> Result<Vec<Quote>, RepositoryError>;
    /// Finalized quotes whose validity deadline is before `now`.
    async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Quote>, RepositoryError>;
    /// Fails with [`RepositoryError::Conflict`] when the quote number is taken.
    async fn insert(&self, quote: Quote, audit: AuditEntry) -> Result<Quote, RepositoryError>;
    /// Replaces header and lines, provided the stored status still equals `expected`.
    /// A mismatch, or a missing row, is a [`RepositoryError::Conflict`].
    async fn update(
        &self,
        quote: &Quote,
        expected: QuoteStatus,
        audit: AuditEntry,
    ) -> Result<(), RepositoryError>;
    /// Deletes the quote and its lines if the stored status still equals `expected`.
    async fn delete(
        &self,
        id: QuoteId,
        expected: QuoteStatus,
        audit: AuditEntry,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<AuditEntry, RepositoryError>;
    /// Oldest first.
    async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<AuditEntry>, RepositoryError>;
}

/// Fixed-width so lexical order in SQL matches chronological order.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: `{value}` ({error})")))
}

pub(crate) fn decode_decimal(column: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("{column}: `{value}` ({error})")))
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_error) if db_error.is_unique_violation())
}
