use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::customer::CustomerDetails;
use crate::domain::product::ProductId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteId(pub i64);

impl fmt::Display for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-readable quote number: `Q-YYYYMMDD-XXXXXXXXXX`.
///
/// The suffix is ten uppercase hex characters taken from a v4 UUID, so two numbers
/// generated in the same tick collide with negligible probability. The store's unique
/// index is the backstop.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteNumber(pub String);

impl QuoteNumber {
    pub const PREFIX: &'static str = "Q";
    const SUFFIX_LEN: usize = 10;

    pub fn generate(now: DateTime<Utc>) -> Self {
        let random = Uuid::new_v4().simple().to_string();
        let suffix = random[..Self::SUFFIX_LEN].to_ascii_uppercase();
        Self(format!("{}-{}-{suffix}", Self::PREFIX, now.format("%Y%m%d")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage path of the rendered document for a given version.
    pub fn artifact_path(&self, version: u32) -> String {
        format!("{number}/v{version}/{number}.pdf", number = self.0)
    }
}

impl fmt::Display for QuoteNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuoteStatus {
    Draft,
    Preview,
    Finalized,
    Approved,
    Rejected,
    Expired,
}

impl QuoteStatus {
    pub const ALL: [QuoteStatus; 6] = [
        QuoteStatus::Draft,
        QuoteStatus::Preview,
        QuoteStatus::Finalized,
        QuoteStatus::Approved,
        QuoteStatus::Rejected,
        QuoteStatus::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Preview => "Preview",
            Self::Finalized => "Finalized",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Expired => "Expired",
        }
    }

    /// Pricing and line items may only change while this holds.
    pub fn is_editable(self) -> bool {
        matches!(self, Self::Draft | Self::Preview)
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuoteStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| DomainError::validation("status", format!("unknown quote status `{value}`")))
    }
}

/// Priced snapshot of one product at the time the quote was priced. Nothing here is
/// re-read from the catalog afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLineItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub sku: String,
    pub commitment_term: Option<String>,
    pub billing_frequency: Option<String>,
    pub currency: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub line_total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// `None` until the quote has been stored.
    pub id: Option<QuoteId>,
    pub quote_number: QuoteNumber,
    pub version: u32,
    pub status: QuoteStatus,
    pub customer: CustomerDetails,
    pub valid_until: DateTime<Utc>,
    pub currency: String,
    pub total_amount: Decimal,
    pub notes: Option<String>,
    pub artifact_path: Option<String>,
    pub template_name: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub line_items: Vec<QuoteLineItem>,
}

impl Quote {
    pub fn can_transition_to(&self, next: QuoteStatus) -> bool {
        matches!(
            (self.status, next),
            (QuoteStatus::Draft, QuoteStatus::Preview)
                | (QuoteStatus::Draft, QuoteStatus::Finalized)
                | (QuoteStatus::Preview, QuoteStatus::Finalized)
                | (QuoteStatus::Finalized, QuoteStatus::Approved)
                | (QuoteStatus::Finalized, QuoteStatus::Rejected)
                | (QuoteStatus::Finalized, QuoteStatus::Expired)
        )
    }

    pub fn transition_to(&mut self, next: QuoteStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidQuoteTransition { from: self.status, to: next })
    }

    pub fn ensure_deletable(&self) -> Result<(), DomainError> {
        if self.status == QuoteStatus::Draft {
            Ok(())
        } else {
            Err(DomainError::DeletionForbidden { status: self.status })
        }
    }

    /// Deadline measured from creation, not from the finalize call.
    pub fn validity_deadline(&self, validity_days: u32) -> DateTime<Utc> {
        self.created_at + Duration::days(i64::from(validity_days))
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == QuoteStatus::Finalized && now > self.valid_until
    }

    pub fn expected_artifact_path(&self) -> String {
        self.quote_number.artifact_path(self.version)
    }

    /// `None` when the stored line totals cannot be summed within the `Decimal` range.
    pub fn lines_total(&self) -> Option<Decimal> {
        self.line_items
            .iter()
            .try_fold(Decimal::ZERO, |sum, line| sum.checked_add(line.line_total))
    }

    pub fn ensure_total_consistent(&self) -> Result<(), DomainError> {
        let Some(expected) = self.lines_total() else {
            return Err(DomainError::InvariantViolation(format!(
                "quote {} line totals overflow the amount range",
                self.quote_number
            )));
        };
        if expected == self.total_amount {
            return Ok(());
        }

        Err(DomainError::InvariantViolation(format!(
            "quote {} total {} does not match line sum {}",
            self.quote_number, self.total_amount, expected
        )))
    }
}
