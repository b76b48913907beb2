use std::path::PathBuf;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use proposal_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    artifact_root: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub storage: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, artifact_root: PathBuf) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, artifact_root })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let storage = storage_check(&state.artifact_root).await;
    let ready = database.status == "ready" && storage.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "proposal-server runtime initialized".to_string(),
        },
        database,
        storage,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

// The store creates its root on first write, so a missing directory is still ready.
async fn storage_check(root: &std::path::Path) -> HealthCheck {
    match tokio::fs::metadata(root).await {
        Ok(metadata) if metadata.is_dir() => HealthCheck {
            status: "ready",
            detail: format!("artifact root {} is available", root.display()),
        },
        Ok(_) => HealthCheck {
            status: "degraded",
            detail: format!("artifact root {} is not a directory", root.display()),
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => HealthCheck {
            status: "ready",
            detail: format!("artifact root {} will be created on first write", root.display()),
        },
        Err(error) => HealthCheck {
            status: "degraded",
            detail: format!("artifact root {} is unreadable: {error}", root.display()),
        },
    }
}
