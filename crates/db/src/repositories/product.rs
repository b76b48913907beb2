use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use proposal_core::audit::AuditEntry;
use proposal_core::domain::product::{NewProduct, Product, ProductId};

use super::audit::insert_entry;
use super::{
    decode_decimal, decode_timestamp, encode_timestamp, is_unique_violation, CatalogBatch,
    ProductRepository, RepositoryError,
};
use crate::DbPool;

const PRODUCT_COLUMNS: &str = "id, sku, name, description, category, unit_price, currency,
    commitment_term, billing_frequency, active, created_at, updated_at";

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_product(row: &SqliteRow) -> Result<Product, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let sku: String = row.try_get("sku").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let description: Option<String> =
        row.try_get("description").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let category: Option<String> =
        row.try_get("category").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let unit_price: String =
        row.try_get("unit_price").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let currency: String =
        row.try_get("currency").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let commitment_term: Option<String> =
        row.try_get("commitment_term").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let billing_frequency: Option<String> =
        row.try_get("billing_frequency").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let active: bool = row.try_get("active").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Product {
        id: ProductId(id),
        sku,
        name,
        description,
        category,
        unit_price: decode_decimal("unit_price", &unit_price)?,
        currency,
        commitment_term,
        billing_frequency,
        active,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

async fn insert_product(
    conn: &mut SqliteConnection,
    product: NewProduct,
) -> Result<Product, RepositoryError> {
    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO product (sku, name, description, category, unit_price, currency,
                              commitment_term, billing_frequency, active, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(&product.sku)
    .bind(&product.name)
    .bind(&product.description)
    .bind(&product.category)
    .bind(product.unit_price.to_string())
    .bind(&product.currency)
    .bind(&product.commitment_term)
    .bind(&product.billing_frequency)
    .bind(encode_timestamp(now))
    .bind(encode_timestamp(now))
    .execute(&mut *conn)
    .await
    .map_err(|error| {
        if is_unique_violation(&error) {
            RepositoryError::Conflict(format!("sku `{}` already exists", product.sku))
        } else {
            RepositoryError::Database(error)
        }
    })?;

    Ok(Product {
        id: ProductId(result.last_insert_rowid()),
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
    })
}

async fn update_product(conn: &mut SqliteConnection, product: &Product) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE product SET
             name = ?, description = ?, category = ?, unit_price = ?, currency = ?,
             commitment_term = ?, billing_frequency = ?, active = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&product.name)
    .bind(&product.description)
    .bind(&product.category)
    .bind(product.unit_price.to_string())
    .bind(&product.currency)
    .bind(&product.commitment_term)
    .bind(&product.billing_frequency)
    .bind(product.active)
    .bind(encode_timestamp(product.updated_at))
    .bind(product.id.0)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "product {} disappeared during the update",
            product.id
        )));
    }
    Ok(())
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM product WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM product WHERE sku = ?"))
            .bind(sku)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn find_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {PRODUCT_COLUMNS} FROM product WHERE id IN ("));
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id.0);
        }
        separated.push_unseparated(") ORDER BY category, name, id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_product).collect()
    }

    async fn list_active(&self) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM product WHERE active = 1 ORDER BY category, name, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_product).collect()
    }

    async fn insert(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_product(&mut conn, product).await
    }

    async fn apply_batch(
        &self,
        batch: CatalogBatch,
        audit: AuditEntry,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        for product in &batch.updates {
            update_product(&mut tx, product).await?;
        }
        for product in batch.inserts {
            insert_product(&mut tx, product).await?;
        }
        insert_entry(&mut tx, audit).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_active(
        &self,
        id: ProductId,
        active: bool,
        audit: AuditEntry,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE product SET active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(encode_timestamp(Utc::now()))
            .bind(id.0)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        insert_entry(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(true)
    }
}
