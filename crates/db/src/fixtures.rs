use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// SKU, category and unit price of every product in the reference catalog.
const SEED_PRODUCTS: &[SeedProduct] = &[
    SeedProduct { sku: "VOD-EV-001", category: "Voice", unit_price: "15.00" },
    SeedProduct { sku: "VOD-EV-002", category: "Voice", unit_price: "25.00" },
    SeedProduct { sku: "VOD-NW-001", category: "Network", unit_price: "250.00" },
    SeedProduct { sku: "VOD-NW-002", category: "Network", unit_price: "500.00" },
    SeedProduct { sku: "VOD-SEC-001", category: "Security", unit_price: "8.50" },
    SeedProduct { sku: "VOD-IOT-001", category: "IoT", unit_price: "2.50" },
    SeedProduct { sku: "VOD-UC-001", category: "Collaboration", unit_price: "35.00" },
    SeedProduct { sku: "VOD-DIA-001", category: "Network", unit_price: "350.00" },
];

/// Reference product catalog used by demos, local development and integration tests.
pub struct CatalogSeed;

impl CatalogSeed {
    pub const SQL: &str = include_str!("../fixtures/catalog_seed.sql");

    /// Loads the catalog. Products whose SKU already exists are left untouched.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let before = Self::product_count(pool).await?;

        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let after = Self::product_count(pool).await?;
        let inserted = usize::try_from(after - before).unwrap_or_default();
        Ok(SeedResult { inserted, skipped: SEED_PRODUCTS.len().saturating_sub(inserted) })
    }

    /// Checks that every reference SKU exists, is active and still carries its seeded price.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::with_capacity(SEED_PRODUCTS.len());

        for product in SEED_PRODUCTS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM product
                               WHERE sku = ?1 AND category = ?2 AND unit_price = ?3 AND active = 1)",
            )
            .bind(product.sku)
            .bind(product.category)
            .bind(product.unit_price)
            .fetch_one(pool)
            .await?;
            checks.push((product.sku, present == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    pub fn skus() -> impl Iterator<Item = &'static str> {
        SEED_PRODUCTS.iter().map(|product| product.sku)
    }

    async fn product_count(pool: &DbPool) -> Result<i64, RepositoryError> {
        Ok(sqlx::query_scalar("SELECT COUNT(1) FROM product").fetch_one(pool).await?)
    }
}

struct SeedProduct {
    sku: &'static str,
    category: &'static str,
    unit_price: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub inserted: usize,
    pub skipped: usize,
}

#[derive(Clone, Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
