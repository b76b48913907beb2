use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::cpq::catalog::Catalog;
use crate::domain::product::ProductId;
use crate::domain::quote::QuoteLineItem;
use crate::errors::DomainError;

/// Money amounts carry two decimal places.
pub const MONEY_SCALE: u32 = 2;

/// One requested line: which product, how many, and the discount in percent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRequest {
    pub product_id: ProductId,
    pub quantity: i64,
    #[serde(default)]
    pub discount_percent: Option<Decimal>,
}

impl LineRequest {
    pub fn new(product_id: ProductId, quantity: i64, discount_percent: Decimal) -> Self {
        Self { product_id, quantity, discount_percent: Some(discount_percent) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedQuote {
    pub line_items: Vec<QuoteLineItem>,
    pub currency: String,
    pub total: Decimal,
}

pub trait PricingEngine: Send + Sync {
    fn price(
        &self,
        requests: &[LineRequest],
        catalog: &Catalog,
        default_currency: &str,
    ) -> Result<PricedQuote, DomainError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DeterministicPricingEngine;

impl PricingEngine for DeterministicPricingEngine {
    fn price(
        &self,
        requests: &[LineRequest],
        catalog: &Catalog,
        default_currency: &str,
    ) -> Result<PricedQuote, DomainError> {
        price_line_items(requests, catalog, default_currency)
    }
}

/// Half-up to two places: `10.005` becomes `10.01`, `-10.005` becomes `-10.01`.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `round(unit_price * quantity * (1 - discount / 100), 2)`, rounded exactly once.
///
/// Returns `None` when an intermediate value leaves the `Decimal` range.
pub fn compute_line_total(
    unit_price: Decimal,
    quantity: u32,
    discount_percent: Decimal,
) -> Option<Decimal> {
    let gross = unit_price.checked_mul(Decimal::from(quantity))?;
    if discount_percent.is_zero() {
        return Some(round_money(gross));
    }

    let discounted = gross
        .checked_mul(Decimal::ONE_HUNDRED - discount_percent)?
        .checked_div(Decimal::ONE_HUNDRED)?;
    Some(round_money(discounted))
}

/// Prices every request against the catalog snapshot, preserving request order.
///
/// The quote total is the sum of the already-rounded line totals and is never rounded
/// again. All lines must share one currency; an empty request list yields a zero total in
/// `default_currency`.
pub fn price_line_items(
    requests: &[LineRequest],
    catalog: &Catalog,
    default_currency: &str,
) -> Result<PricedQuote, DomainError> {
    let mut line_items = Vec::with_capacity(requests.len());
    let mut currency: Option<String> = None;

    for (index, request) in requests.iter().enumerate() {
        let quantity = validate_quantity(index, request.quantity)?;
        let discount_percent = validate_discount(index, request.discount_percent)?;

        let product =
            catalog.find(&request.product_id).ok_or(DomainError::ProductNotFound(request.product_id))?;

        match &currency {
            Some(expected) if expected != &product.currency => {
                return Err(DomainError::validation(
                    format!("line_items[{index}].product_id"),
                    format!(
                        "product {} is priced in {} but the quote is in {expected}",
                        product.id, product.currency
                    ),
                ));
            }
            Some(_) => {}
            None => currency = Some(product.currency.clone()),
        }

        let line_total = compute_line_total(product.unit_price, quantity, discount_percent)
            .ok_or_else(|| {
                DomainError::validation(
                    format!("line_items[{index}].quantity"),
                    format!(
                        "{quantity} x {} exceeds the supported amount range",
                        product.unit_price
                    ),
                )
            })?;

        line_items.push(QuoteLineItem {
            product_id: product.id,
            product_name: product.name.clone(),
            sku: product.sku.clone(),
            commitment_term: product.commitment_term.clone(),
            billing_frequency: product.billing_frequency.clone(),
            currency: product.currency.clone(),
            quantity,
            unit_price: product.unit_price,
            discount_percent,
            line_total,
        });
    }

    let total = line_items
        .iter()
        .try_fold(Decimal::ZERO, |sum, line| sum.checked_add(line.line_total))
        .ok_or_else(|| {
            DomainError::validation("line_items", "quote total exceeds the supported amount range")
        })?;
    Ok(PricedQuote {
        line_items,
        currency: currency.unwrap_or_else(|| default_currency.to_string()),
        total,
    })
}

fn validate_quantity(index: usize, quantity: i64) -> Result<u32, DomainError> {
    if quantity < 1 {
        return Err(DomainError::validation(
            format!("line_items[{index}].quantity"),
            format!("must be at least 1, got {quantity}"),
        ));
    }

    u32::try_from(quantity).map_err(|_| {
        DomainError::validation(
            format!("line_items[{index}].quantity"),
            format!("must not exceed {}, got {quantity}", u32::MAX),
        )
    })
}

fn validate_discount(index: usize, discount: Option<Decimal>) -> Result<Decimal, DomainError> {
    let discount = discount.unwrap_or(Decimal::ZERO);
    if discount < Decimal::ZERO || discount > Decimal::ONE_HUNDRED {
        return Err(DomainError::validation(
            format!("line_items[{index}].discount_percent"),
            format!("must be between 0 and 100, got {discount}"),
        ));
    }
    Ok(discount)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{
        compute_line_total, price_line_items, round_money, DeterministicPricingEngine,
        LineRequest, PricingEngine,
    };
    use crate::cpq::catalog::Catalog;
    use crate::domain::product::{Product, ProductId};
    use crate::errors::DomainError;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).expect("decimal literal")
    }

    fn product(id: i64, price: &str, currency: &str) -> Product {
        let now = Utc::now();
        Product {
            id: ProductId(id),
            sku: format!("SKU-{id}"),
            name: format!("Product {id}"),
            description: None,
            category: Some("Voice".to_string()),
            unit_price: dec(price),
            currency: currency.to_string(),
            commitment_term: Some("12 months".to_string()),
            billing_frequency: Some("Monthly".to_string()),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn catalog() -> Catalog {
        Catalog::new(vec![
            product(1, "15.00", "EUR"),
            product(2, "25.00", "EUR"),
            product(3, "10.005", "EUR"),
            product(4, "99.00", "USD"),
        ])
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(compute_line_total(dec("10.005"), 1, Decimal::ZERO), Some(dec("10.01")));
        assert_eq!(round_money(dec("2.675")), dec("2.68"));
        assert_eq!(round_money(dec("2.674")), dec("2.67"));
        assert_eq!(round_money(dec("-10.005")), dec("-10.01"));
    }

    #[test]
    fn line_total_is_deterministic() {
        let first = compute_line_total(dec("19.99"), 7, dec("12.5"));
        for _ in 0..100 {
            assert_eq!(compute_line_total(dec("19.99"), 7, dec("12.5")), first);
        }
        assert_eq!(first, Some(dec("122.44")));
    }

    #[test]
    fn zero_discount_is_identity() {
        assert_eq!(compute_line_total(dec("15.00"), 10, Decimal::ZERO), Some(dec("150.00")));
        assert_eq!(compute_line_total(dec("0.10"), 3, Decimal::ZERO), Some(dec("0.30")));
    }

    #[test]
    fn full_discount_is_free() {
        assert_eq!(compute_line_total(dec("500.00"), 4, Decimal::ONE_HUNDRED), Some(Decimal::ZERO));
    }

    #[test]
    fn total_sums_rounded_lines_without_rerounding() {
        // 3 x 0.335 = 1.005 rounds to 1.01 per line; the raw sum 2.010 would give 2.01.
        let catalog = Catalog::new(vec![product(9, "0.335", "EUR")]);
        let priced = price_line_items(
            &[
                LineRequest::new(ProductId(9), 3, Decimal::ZERO),
                LineRequest::new(ProductId(9), 3, Decimal::ZERO),
            ],
            &catalog,
            "EUR",
        )
        .expect("priced");

        assert_eq!(priced.line_items[0].line_total, dec("1.01"));
        assert_eq!(priced.total, dec("2.02"));
    }

    #[test]
    fn acme_line_prices_to_135() {
        let priced = DeterministicPricingEngine
            .price(&[LineRequest::new(ProductId(1), 10, dec("10"))], &catalog(), "EUR")
            .expect("priced");

        assert_eq!(priced.line_items.len(), 1);
        assert_eq!(priced.line_items[0].line_total, dec("135.00"));
        assert_eq!(priced.total, dec("135.00"));
        assert_eq!(priced.currency, "EUR");
        assert_eq!(priced.line_items[0].sku, "SKU-1");
    }

    #[test]
    fn duplicate_products_stay_separate_lines() {
        let priced = price_line_items(
            &[
                LineRequest::new(ProductId(2), 1, Decimal::ZERO),
                LineRequest::new(ProductId(2), 2, dec("50")),
            ],
            &catalog(),
            "EUR",
        )
        .expect("priced");

        assert_eq!(priced.line_items.len(), 2);
        assert_eq!(priced.line_items[1].line_total, dec("25.00"));
        assert_eq!(priced.total, dec("50.00"));
    }

    #[test]
    fn empty_request_prices_to_zero_in_default_currency() {
        let priced = price_line_items(&[], &catalog(), "GBP").expect("priced");
        assert!(priced.line_items.is_empty());
        assert_eq!(priced.total, Decimal::ZERO);
        assert_eq!(priced.currency, "GBP");
    }

    #[test]
    fn invalid_quantity_and_discount_name_the_line() {
        let quantity = price_line_items(
            &[
                LineRequest::new(ProductId(1), 1, Decimal::ZERO),
                LineRequest::new(ProductId(1), 0, Decimal::ZERO),
            ],
            &catalog(),
            "EUR",
        )
        .expect_err("zero quantity");
        assert!(matches!(
            quantity,
            DomainError::Validation { ref field, .. } if field == "line_items[1].quantity"
        ));

        let discount =
            price_line_items(&[LineRequest::new(ProductId(1), 1, dec("100.01"))], &catalog(), "EUR")
                .expect_err("discount above 100");
        assert!(matches!(
            discount,
            DomainError::Validation { ref field, .. } if field == "line_items[0].discount_percent"
        ));
    }

    #[test]
    fn oversized_line_totals_are_rejected_instead_of_overflowing() {
        assert_eq!(compute_line_total(dec("100000000000000000000"), 4_000_000_000, Decimal::ZERO), None);

        let catalog = Catalog::new(vec![product(5, "100000000000000000000", "EUR")]);
        let error = price_line_items(
            &[LineRequest::new(ProductId(5), 4_000_000_000, Decimal::ZERO)],
            &catalog,
            "EUR",
        )
        .expect_err("line overflow");
        assert!(matches!(
            error,
            DomainError::Validation { ref field, .. } if field == "line_items[0].quantity"
        ));
    }

    #[test]
    fn oversized_quote_totals_are_rejected_instead_of_overflowing() {
        // Each line fits on its own; their sum does not.
        let catalog = Catalog::new(vec![product(6, "10000000000000000000000000", "EUR")]);
        let line = LineRequest::new(ProductId(6), 7_000, Decimal::ZERO);
        let error = price_line_items(&[line.clone(), line.clone(), line], &catalog, "EUR")
            .expect_err("total overflow");
        assert!(matches!(
            error,
            DomainError::Validation { ref field, .. } if field == "line_items"
        ));
    }

    #[test]
    fn unknown_product_is_reported_by_id() {
        let error = price_line_items(&[LineRequest::new(ProductId(77), 1, Decimal::ZERO)], &catalog(), "EUR")
            .expect_err("unknown product");
        assert_eq!(error, DomainError::ProductNotFound(ProductId(77)));
    }

    #[test]
    fn mixed_currencies_are_rejected() {
        let error = price_line_items(
            &[
                LineRequest::new(ProductId(1), 1, Decimal::ZERO),
                LineRequest::new(ProductId(4), 1, Decimal::ZERO),
            ],
            &catalog(),
            "EUR",
        )
        .expect_err("mixed currencies");
        assert!(matches!(
            error,
            DomainError::Validation { ref field, .. } if field == "line_items[1].product_id"
        ));
    }
}
