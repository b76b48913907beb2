pub mod audit;
pub mod config;
pub mod cpq;
pub mod domain;
pub mod errors;

pub use audit::{AuditAction, AuditEntry};
pub use cpq::{Catalog, DeterministicPricingEngine, LineRequest, PricedQuote, PricingEngine};
pub use domain::customer::CustomerDetails;
pub use domain::product::{NewProduct, Product, ProductId};
pub use domain::quote::{Quote, QuoteId, QuoteLineItem, QuoteNumber, QuoteStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError};
