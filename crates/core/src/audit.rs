use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::quote::Quote;
use crate::errors::DomainError;

pub const ENTITY_QUOTE: &str = "Quote";
pub const ENTITY_PRODUCT: &str = "Product";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    QuoteCreated,
    QuoteUpdated,
    QuoteFinalized,
    QuoteApproved,
    QuoteRejected,
    QuoteExpired,
    QuoteDeleted,
    PriceImport,
    ProductDeactivated,
    ProductReactivated,
}

impl AuditAction {
    pub const ALL: [AuditAction; 10] = [
        AuditAction::QuoteCreated,
        AuditAction::QuoteUpdated,
        AuditAction::QuoteFinalized,
        AuditAction::QuoteApproved,
        AuditAction::QuoteRejected,
        AuditAction::QuoteExpired,
        AuditAction::QuoteDeleted,
        AuditAction::PriceImport,
        AuditAction::ProductDeactivated,
        AuditAction::ProductReactivated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::QuoteCreated => "QuoteCreated",
            Self::QuoteUpdated => "QuoteUpdated",
            Self::QuoteFinalized => "QuoteFinalized",
            Self::QuoteApproved => "QuoteApproved",
            Self::QuoteRejected => "QuoteRejected",
            Self::QuoteExpired => "QuoteExpired",
            Self::QuoteDeleted => "QuoteDeleted",
            Self::PriceImport => "PriceImport",
            Self::ProductDeactivated => "ProductDeactivated",
            Self::ProductReactivated => "ProductReactivated",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == value)
            .ok_or_else(|| DomainError::validation("action", format!("unknown audit action `{value}`")))
    }
}

/// Append-only audit record. Entities are referenced by type and id only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Option<i64>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub user_id: String,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        entity_type: impl Into<String>,
        entity_id: Option<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            action,
            entity_type: entity_type.into(),
            entity_id,
            user_id: user_id.into(),
            detail: None,
            occurred_at: Utc::now(),
        }
    }

    /// Entry for a stored quote; the quote id becomes the entity id.
    pub fn for_quote(action: AuditAction, quote: &Quote, user_id: impl Into<String>) -> Self {
        Self::new(action, ENTITY_QUOTE, quote.id.map(|id| id.to_string()), user_id)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}
