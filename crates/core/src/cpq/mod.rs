pub mod catalog;
pub mod pricing;

pub use catalog::Catalog;
pub use pricing::{
    compute_line_total, round_money, DeterministicPricingEngine, LineRequest, PricedQuote,
    PricingEngine,
};
