//! Typed merge record handed to templates.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use proposal_core::cpq::round_money;
use proposal_core::domain::quote::{Quote, QuoteLineItem};

pub const DOCUMENT_LABEL: &str = "Business Proposal";
pub const CONFIDENTIALITY_NOTICE: &str =
    "Confidential. Prepared for the named customer only; prices are valid until the date shown.";

const DATE_FORMAT: &str = "%d %B %Y";
const MISSING: &str = "-";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuoteDocument {
    pub brand_name: String,
    pub document_label: String,
    pub preview: bool,
    pub quote_number: String,
    pub version: u32,
    pub status: String,
    pub created_on: String,
    pub valid_until: String,
    pub prepared_by: Option<String>,
    pub customer: DocumentCustomer,
    pub currency: String,
    pub total: String,
    pub lines: Vec<DocumentLine>,
    /// Note paragraphs, blank lines removed. Empty when the quote has no notes.
    pub notes: Vec<String>,
    pub confidentiality_notice: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DocumentCustomer {
    pub name: String,
    pub email: Option<String>,
    pub company: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DocumentLine {
    pub position: usize,
    pub product_name: String,
    pub sku: String,
    pub quantity: u32,
    pub commitment_term: String,
    pub billing_frequency: String,
    pub unit_price: String,
    pub discount: String,
    pub line_total: String,
}

impl QuoteDocument {
    pub fn from_quote(quote: &Quote, brand_name: &str, preview: bool) -> Self {
        Self {
            brand_name: brand_name.to_string(),
            document_label: DOCUMENT_LABEL.to_string(),
            preview,
            quote_number: quote.quote_number.to_string(),
            version: quote.version,
            status: quote.status.to_string(),
            created_on: format_date(quote.created_at),
            valid_until: format_date(quote.valid_until),
            prepared_by: Some(quote.created_by.clone()).filter(|user| !user.trim().is_empty()),
            customer: DocumentCustomer {
                name: quote.customer.name.clone(),
                email: quote.customer.email.clone(),
                company: quote.customer.company.clone(),
            },
            currency: quote.currency.clone(),
            total: format_money(quote.total_amount),
            lines: quote
                .line_items
                .iter()
                .enumerate()
                .map(|(index, line)| DocumentLine::from_line(index + 1, line))
                .collect(),
            notes: quote
                .notes
                .as_deref()
                .unwrap_or_default()
                .lines()
                .map(str::trim)
                .filter(|paragraph| !paragraph.is_empty())
                .map(str::to_string)
                .collect(),
            confidentiality_notice: CONFIDENTIALITY_NOTICE.to_string(),
        }
    }
}

impl DocumentLine {
    fn from_line(position: usize, line: &QuoteLineItem) -> Self {
        Self {
            position,
            product_name: line.product_name.clone(),
            sku: line.sku.clone(),
            quantity: line.quantity,
            commitment_term: line.commitment_term.clone().unwrap_or_else(|| MISSING.to_string()),
            billing_frequency: line
                .billing_frequency
                .clone()
                .unwrap_or_else(|| MISSING.to_string()),
            unit_price: format_money(line.unit_price),
            discount: format_percent(line.discount_percent),
            line_total: format_money(line.line_total),
        }
    }
}

fn format_date(value: DateTime<Utc>) -> String {
    value.format(DATE_FORMAT).to_string()
}

/// Two decimals with thousands grouping, e.g. `12,500.00`.
pub fn format_money(value: Decimal) -> String {
    let fixed = format!("{:.2}", round_money(value));
    let (sign, digits) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed.as_str()),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, ch) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{sign}{grouped}.{fraction}")
}

pub fn format_percent(value: Decimal) -> String {
    format!("{}%", value.normalize())
}
