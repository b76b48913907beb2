use std::sync::Arc;

use chrono::Duration;
use proposal_core::config::{AppConfig, ConfigError, LoadOptions};
use proposal_db::repositories::{SqlProductRepository, SqlQuoteRepository};
use proposal_db::{connect_with_settings, migrations, DbPool};
use proposal_documents::{DocumentAssembler, DocumentError};
use proposal_engine::{
    CatalogService, FilesystemArtifactStore, LifecycleSettings, LinkSigner, PriceImportPipeline,
    QuoteLifecycle,
};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub api: ApiState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("document templates could not be loaded: {0}")]
    Documents(#[source] DocumentError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let api = services(&config, db_pool.clone())?;
    info!(
        event_name = "system.bootstrap.services_ready",
        correlation_id = "bootstrap",
        artifact_root = %config.storage.root.display(),
        templates = ?api.lifecycle.templates(),
        "quote services wired"
    );

    Ok(Application { config, db_pool, api })
}

/// Wires the SQL stores, filesystem artifact store and document assembler into the
/// services behind the HTTP routes.
pub fn services(config: &AppConfig, db_pool: DbPool) -> Result<ApiState, BootstrapError> {
    let products = Arc::new(SqlProductRepository::new(db_pool.clone()));
    let quotes = Arc::new(SqlQuoteRepository::new(db_pool));
    let artifacts = Arc::new(FilesystemArtifactStore::new(config.storage.root.clone()));
    let renderer = Arc::new(DocumentAssembler::from_config(&config.documents).map_err(BootstrapError::Documents)?);
    let signer = LinkSigner::new(
        config.storage.signing_key.clone(),
        config.storage.public_base_url.clone(),
        Duration::hours(i64::from(config.storage.link_ttl_hours)),
    );

    let lifecycle = QuoteLifecycle::new(
        products.clone(),
        quotes,
        renderer,
        artifacts.clone(),
        signer.clone(),
        LifecycleSettings::from_config(config),
    );

    Ok(ApiState {
        lifecycle: Arc::new(lifecycle),
        catalog: CatalogService::new(products.clone()),
        imports: Arc::new(PriceImportPipeline::new(products, config.quotes.default_currency.clone())),
        artifacts,
        signer,
        import: config.import.clone(),
    })
}
