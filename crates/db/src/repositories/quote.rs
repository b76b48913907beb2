use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use proposal_core::audit::AuditEntry;
use proposal_core::domain::customer::CustomerDetails;
use proposal_core::domain::product::ProductId;
use proposal_core::domain::quote::{Quote, QuoteId, QuoteLineItem, QuoteNumber, QuoteStatus};

use super::audit::insert_entry;
use super::{
    decode_decimal, decode_timestamp, encode_timestamp, is_unique_violation, QuoteFilter,
    QuoteRepository, RepositoryError,
};
use crate::DbPool;

const QUOTE_COLUMNS: &str = "id, quote_number, version, status, customer_name, customer_email,
    customer_company, valid_until, currency, total_amount, notes, artifact_path, template_name,
    created_by, created_at, updated_at, finalized_at";

pub struct SqlQuoteRepository {
    pool: DbPool,
}

impl SqlQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, rows: Vec<SqliteRow>) -> Result<Vec<Quote>, RepositoryError> {
        let mut quotes = Vec::with_capacity(rows.len());
        let mut conn = self.pool.acquire().await?;
        for row in &rows {
            let mut quote = row_to_quote(row)?;
            if let Some(id) = quote.id {
                quote.line_items = load_lines(&mut conn, id).await?;
            }
            quotes.push(quote);
        }
        Ok(quotes)
    }
}

fn row_to_quote(row: &SqliteRow) -> Result<Quote, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let quote_number: String =
        row.try_get("quote_number").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let version: i64 = row.try_get("version").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let customer_name: String =
        row.try_get("customer_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let customer_email: Option<String> =
        row.try_get("customer_email").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let customer_company: Option<String> =
        row.try_get("customer_company").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let valid_until: String =
        row.try_get("valid_until").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let currency: String =
        row.try_get("currency").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let total_amount: String =
        row.try_get("total_amount").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let notes: Option<String> =
        row.try_get("notes").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let artifact_path: Option<String> =
        row.try_get("artifact_path").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let template_name: Option<String> =
        row.try_get("template_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_by: String =
        row.try_get("created_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let finalized_at: Option<String> =
        row.try_get("finalized_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Quote {
        id: Some(QuoteId(id)),
        quote_number: QuoteNumber(quote_number),
        version: u32::try_from(version)
            .map_err(|_| RepositoryError::Decode(format!("version: `{version}` out of range")))?,
        status: status
            .parse::<QuoteStatus>()
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        customer: CustomerDetails { name: customer_name, email: customer_email, company: customer_company },
        valid_until: decode_timestamp("valid_until", &valid_until)?,
        currency,
        total_amount: decode_decimal("total_amount", &total_amount)?,
        notes,
        artifact_path,
        template_name,
        created_by,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
        finalized_at: finalized_at
            .map(|value| decode_timestamp("finalized_at", &value))
            .transpose()?,
        line_items: Vec::new(),
    })
}

fn row_to_line(row: &SqliteRow) -> Result<QuoteLineItem, RepositoryError> {
    let product_id: i64 =
        row.try_get("product_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let product_name: String =
        row.try_get("product_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let sku: String = row.try_get("sku").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let commitment_term: Option<String> =
        row.try_get("commitment_term").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let billing_frequency: Option<String> =
        row.try_get("billing_frequency").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let currency: String =
        row.try_get("currency").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let quantity: i64 =
        row.try_get("quantity").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let unit_price: String =
        row.try_get("unit_price").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let discount_percent: String =
        row.try_get("discount_percent").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let line_total: String =
        row.try_get("line_total").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(QuoteLineItem {
        product_id: ProductId(product_id),
        product_name,
        sku,
        commitment_term,
        billing_frequency,
        currency,
        quantity: u32::try_from(quantity)
            .map_err(|_| RepositoryError::Decode(format!("quantity: `{quantity}` out of range")))?,
        unit_price: decode_decimal("unit_price", &unit_price)?,
        discount_percent: decode_decimal("discount_percent", &discount_percent)?,
        line_total: decode_decimal("line_total", &line_total)?,
    })
}

async fn load_lines(
    conn: &mut SqliteConnection,
    quote_id: QuoteId,
) -> Result<Vec<QuoteLineItem>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT product_id, product_name, sku, commitment_term, billing_frequency, currency,
                quantity, unit_price, discount_percent, line_total
         FROM quote_line_item WHERE quote_id = ? ORDER BY position",
    )
    .bind(quote_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_line).collect()
}

async fn insert_lines(
    conn: &mut SqliteConnection,
    quote_id: QuoteId,
    lines: &[QuoteLineItem],
) -> Result<(), RepositoryError> {
    for (position, line) in lines.iter().enumerate() {
        sqlx::query(
            "INSERT INTO quote_line_item (quote_id, position, product_id, product_name, sku,
                                          commitment_term, billing_frequency, currency, quantity,
                                          unit_price, discount_percent, line_total)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(quote_id.0)
        .bind(position as i64)
        .bind(line.product_id.0)
        .bind(&line.product_name)
        .bind(&line.sku)
        .bind(&line.commitment_term)
        .bind(&line.billing_frequency)
        .bind(&line.currency)
        .bind(i64::from(line.quantity))
        .bind(line.unit_price.to_string())
        .bind(line.discount_percent.to_string())
        .bind(line.line_total.to_string())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

fn with_entity(audit: AuditEntry, id: QuoteId) -> AuditEntry {
    if audit.entity_id.is_some() {
        return audit;
    }
    AuditEntry { entity_id: Some(id.to_string()), ..audit }
}

#[async_trait::async_trait]
impl QuoteRepository for SqlQuoteRepository {
    async fn find_by_id(&self, id: QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {QUOTE_COLUMNS} FROM quote WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(self.hydrate(row.into_iter().collect()).await?.pop())
    }

    async fn find_by_number(&self, number: &QuoteNumber) -> Result<Option<Quote>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {QUOTE_COLUMNS} FROM quote WHERE quote_number = ?"))
            .bind(number.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(self.hydrate(row.into_iter().collect()).await?.pop())
    }

    async fn list(&self, filter: &QuoteFilter) -> Result<Vec<Quote>, RepositoryError> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {QUOTE_COLUMNS} FROM quote WHERE 1 = 1"));
        if let Some(created_by) = &filter.created_by {
            builder.push(" AND created_by = ").push_bind(created_by.clone());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY created_at DESC, id DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        self.hydrate(rows).await
    }

    async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Quote>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quote
             WHERE status = 'Finalized' AND valid_until < ?
             ORDER BY valid_until, id"
        ))
        .bind(encode_timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn insert(&self, quote: Quote, audit: AuditEntry) -> Result<Quote, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO quote (quote_number, version, status, customer_name, customer_email,
                                customer_company, valid_until, currency, total_amount, notes,
                                artifact_path, template_name, created_by, created_at, updated_at,
                                finalized_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(quote.quote_number.as_str())
        .bind(i64::from(quote.version))
        .bind(quote.status.as_str())
        .bind(&quote.customer.name)
        .bind(&quote.customer.email)
        .bind(&quote.customer.company)
        .bind(encode_timestamp(quote.valid_until))
        .bind(&quote.currency)
        .bind(quote.total_amount.to_string())
        .bind(&quote.notes)
        .bind(&quote.artifact_path)
        .bind(&quote.template_name)
        .bind(&quote.created_by)
        .bind(encode_timestamp(quote.created_at))
        .bind(encode_timestamp(quote.updated_at))
        .bind(quote.finalized_at.map(encode_timestamp))
        .execute(&mut *tx)
        .await
        .map_err(|error| {
            if is_unique_violation(&error) {
                RepositoryError::Conflict(format!(
                    "quote number `{}` is already taken",
                    quote.quote_number
                ))
            } else {
                RepositoryError::Database(error)
            }
        })?;

        let id = QuoteId(result.last_insert_rowid());
        insert_lines(&mut tx, id, &quote.line_items).await?;
        insert_entry(&mut tx, with_entity(audit, id)).await?;
        tx.commit().await?;

        Ok(Quote { id: Some(id), ..quote })
    }

    async fn update(
        &self,
        quote: &Quote,
        expected: QuoteStatus,
        audit: AuditEntry,
    ) -> Result<(), RepositoryError> {
        let id = quote
            .id
            .ok_or_else(|| RepositoryError::Conflict("cannot update a quote that was never stored".into()))?;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE quote SET
                 version = ?, status = ?, customer_name = ?, customer_email = ?,
                 customer_company = ?, valid_until = ?, currency = ?, total_amount = ?, notes = ?,
                 artifact_path = ?, template_name = ?, updated_at = ?, finalized_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(i64::from(quote.version))
        .bind(quote.status.as_str())
        .bind(&quote.customer.name)
        .bind(&quote.customer.email)
        .bind(&quote.customer.company)
        .bind(encode_timestamp(quote.valid_until))
        .bind(&quote.currency)
        .bind(quote.total_amount.to_string())
        .bind(&quote.notes)
        .bind(&quote.artifact_path)
        .bind(&quote.template_name)
        .bind(encode_timestamp(quote.updated_at))
        .bind(quote.finalized_at.map(encode_timestamp))
        .bind(id.0)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "quote {} is no longer in status {expected}",
                quote.quote_number
            )));
        }

        sqlx::query("DELETE FROM quote_line_item WHERE quote_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        insert_lines(&mut tx, id, &quote.line_items).await?;
        insert_entry(&mut tx, with_entity(audit, id)).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn delete(
        &self,
        id: QuoteId,
        expected: QuoteStatus,
        audit: AuditEntry,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM quote WHERE id = ? AND status = ?")
            .bind(id.0)
            .bind(expected.as_str())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        insert_entry(&mut tx, with_entity(audit, id)).await?;
        tx.commit().await?;
        Ok(true)
    }
}
