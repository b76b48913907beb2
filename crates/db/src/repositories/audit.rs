use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use proposal_core::audit::{AuditAction, AuditEntry};

use super::{decode_timestamp, encode_timestamp, AuditRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditRepository {
    pool: DbPool,
}

impl SqlAuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Inserts `entry` on an open connection or transaction and returns it with its row id.
pub(crate) async fn insert_entry(
    conn: &mut SqliteConnection,
    mut entry: AuditEntry,
) -> Result<AuditEntry, RepositoryError> {
    let result = sqlx::query(
        "INSERT INTO audit_log (action, entity_type, entity_id, user_id, detail, occurred_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.action.as_str())
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(&entry.user_id)
    .bind(&entry.detail)
    .bind(encode_timestamp(entry.occurred_at))
    .execute(&mut *conn)
    .await?;

    entry.id = Some(result.last_insert_rowid());
    Ok(entry)
}

fn row_to_entry(row: &SqliteRow) -> Result<AuditEntry, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let action: String =
        row.try_get("action").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let entity_type: String =
        row.try_get("entity_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let entity_id: Option<String> =
        row.try_get("entity_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let user_id: String =
        row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let detail: Option<String> =
        row.try_get("detail").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let occurred_at: String =
        row.try_get("occurred_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(AuditEntry {
        id: Some(id),
        action: action
            .parse::<AuditAction>()
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        entity_type,
        entity_id,
        user_id,
        detail,
        occurred_at: decode_timestamp("occurred_at", &occurred_at)?,
    })
}

#[async_trait::async_trait]
impl AuditRepository for SqlAuditRepository {
    async fn append(&self, entry: AuditEntry) -> Result<AuditEntry, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_entry(&mut conn, entry).await
    }

    async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<AuditEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, action, entity_type, entity_id, user_id, detail, occurred_at
             FROM audit_log
             WHERE entity_type = ? AND entity_id = ?
             ORDER BY occurred_at ASC, id ASC",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }
}
