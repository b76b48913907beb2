//! JSON and PDF routes over the quote services.
//!
//! - `GET    /api/products`: active catalog, or `?ids=1,2` for specific products
//! - `GET    /api/products/{id}`: one product, active or not
//! - `POST   /api/products/{id}/deactivate`: hide from new pricing
//! - `POST   /api/products/{id}/activate`: make priceable again
//! - `GET    /api/templates`: document template names
//! - `POST   /api/quotes/preview`: watermarked PDF, nothing stored
//! - `POST   /api/quotes`: create a draft
//! - `POST   /api/quotes/finalize`: create and finalize in one call
//! - `GET    /api/quotes`: list, `?created_by=&status=`
//! - `GET    /api/quotes/{id}`: one quote
//! - `PUT    /api/quotes/{id}`: re-price a draft
//! - `DELETE /api/quotes/{id}`: delete a draft
//! - `GET    /api/quotes/{id}/preview`: watermarked PDF of a stored draft
//! - `POST   /api/quotes/{id}/finalize`: finalize a stored draft
//! - `POST   /api/quotes/{id}/approve`: record approval
//! - `POST   /api/quotes/{id}/reject`: record rejection
//! - `GET    /api/quotes/{id}/pdf`: finalized document
//! - `GET    /api/quotes/{id}/link`: fresh signed download link
//! - `GET    /api/price-imports`: importable files in the import folder
//! - `POST   /api/price-imports`: import a file from the import folder
//! - `POST   /api/price-imports/upload`: import a CSV request body
//! - `GET    /artifacts/{*path}`: signed artifact download

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use proposal_core::config::ImportConfig;
use proposal_core::domain::product::{Product, ProductId};
use proposal_core::domain::quote::{Quote, QuoteId, QuoteStatus};
use proposal_core::errors::{ApplicationError, DomainError, InterfaceError};
use proposal_db::repositories::QuoteFilter;
use proposal_engine::import::{decode_price_list, list_import_files};
use proposal_engine::{
    ArtifactError, ArtifactStore, CatalogService, DownloadLink, FinalizeOutcome, ImportReport,
    LinkError, LinkSigner, PreviewOutcome, PriceImportPipeline, QuoteLifecycle, QuoteRequest,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const ACTOR_HEADER: &str = "x-user-id";
pub const DEFAULT_ACTOR: &str = "api-user";

#[derive(Clone)]
pub struct ApiState {
    pub lifecycle: Arc<QuoteLifecycle>,
    pub catalog: CatalogService,
    pub imports: Arc<PriceImportPipeline>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub signer: LinkSigner,
    pub import: ImportConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub correlation_id: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Serialize)]
pub struct LinkResponse {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl From<DownloadLink> for LinkResponse {
    fn from(link: DownloadLink) -> Self {
        Self { url: link.url, expires_at: link.expires_at }
    }
}

#[derive(Debug, Serialize)]
pub struct FinalizeResponse {
    pub quote: Quote,
    pub download: LinkResponse,
    pub already_finalized: bool,
}

impl From<FinalizeOutcome> for FinalizeResponse {
    fn from(outcome: FinalizeOutcome) -> Self {
        Self {
            quote: outcome.quote,
            download: outcome.download.into(),
            already_finalized: outcome.already_finalized,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductListQuery {
    /// Comma-separated product ids.
    pub ids: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuoteListQuery {
    pub created_by: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImportFileRequest {
    pub file: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImportFilesResponse {
    pub folder: String,
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ArtifactQuery {
    pub expires: i64,
    pub signature: String,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/products", get(list_products))
        .route("/api/products/{id}", get(get_product))
        .route("/api/products/{id}/deactivate", post(deactivate_product))
        .route("/api/products/{id}/activate", post(activate_product))
        .route("/api/templates", get(list_templates))
        .route("/api/quotes/preview", post(preview_quote))
        .route("/api/quotes/finalize", post(create_and_finalize))
        .route("/api/quotes", get(list_quotes).post(create_quote))
        .route("/api/quotes/{id}", get(get_quote).put(update_quote).delete(delete_quote))
        .route("/api/quotes/{id}/preview", get(preview_stored_quote))
        .route("/api/quotes/{id}/finalize", post(finalize_quote))
        .route("/api/quotes/{id}/approve", post(approve_quote))
        .route("/api/quotes/{id}/reject", post(reject_quote))
        .route("/api/quotes/{id}/pdf", get(download_pdf))
        .route("/api/quotes/{id}/link", get(download_link))
        .route("/api/price-imports", get(list_price_imports).post(import_price_file))
        .route("/api/price-imports/upload", post(upload_price_list))
        .route("/artifacts/{*path}", get(signed_artifact))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

async fn list_products(
    State(state): State<ApiState>,
    Query(query): Query<ProductListQuery>,
) -> ApiResult<Json<Vec<Product>>> {
    match parse_product_ids(query.ids.as_deref()).map_err(|error| api_error(error.into()))? {
        Some(ids) => state.catalog.by_ids(&ids).await.map(Json).map_err(api_error),
        None => state.catalog.list_active().await.map(Json).map_err(api_error),
    }
}

/// `None` when no ids were given, so the caller lists the active catalog instead.
fn parse_product_ids(raw: Option<&str>) -> Result<Option<Vec<ProductId>>, DomainError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    raw.split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<i64>().map(ProductId).map_err(|_| {
                DomainError::validation("ids", format!("'{part}' is not a product id"))
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

async fn get_product(Path(id): Path<i64>, State(state): State<ApiState>) -> ApiResult<Json<Product>> {
    state.catalog.get(ProductId(id)).await.map(Json).map_err(api_error)
}

async fn deactivate_product(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Product>> {
    state.catalog.deactivate(ProductId(id), &actor(&headers)).await.map(Json).map_err(api_error)
}

async fn activate_product(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Product>> {
    state.catalog.reactivate(ProductId(id), &actor(&headers)).await.map(Json).map_err(api_error)
}

async fn list_templates(State(state): State<ApiState>) -> Json<Vec<String>> {
    Json(state.lifecycle.templates())
}

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

async fn preview_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<QuoteRequest>,
) -> ApiResult<Response> {
    let outcome = state.lifecycle.preview(request, &actor(&headers)).await.map_err(api_error)?;
    Ok(preview_response(outcome))
}

async fn create_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<QuoteRequest>,
) -> ApiResult<(StatusCode, Json<Quote>)> {
    let quote = state.lifecycle.create_draft(request, &actor(&headers)).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(quote)))
}

async fn create_and_finalize(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<QuoteRequest>,
) -> ApiResult<(StatusCode, Json<FinalizeResponse>)> {
    let outcome = state.lifecycle.finalize_new(request, &actor(&headers)).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}

async fn list_quotes(
    State(state): State<ApiState>,
    Query(query): Query<QuoteListQuery>,
) -> ApiResult<Json<Vec<Quote>>> {
    let status = match query.status.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        Some(raw) => Some(QuoteStatus::from_str(raw).map_err(|error| api_error(error.into()))?),
        None => None,
    };
    let filter = QuoteFilter {
        created_by: query.created_by.map(|value| value.trim().to_string()).filter(|value| !value.is_empty()),
        status,
    };
    state.lifecycle.list(&filter).await.map(Json).map_err(api_error)
}

async fn get_quote(Path(id): Path<i64>, State(state): State<ApiState>) -> ApiResult<Json<Quote>> {
    state.lifecycle.get(QuoteId(id)).await.map(Json).map_err(api_error)
}

async fn update_quote(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<QuoteRequest>,
) -> ApiResult<Json<Quote>> {
    state
        .lifecycle
        .update_draft(QuoteId(id), request, &actor(&headers))
        .await
        .map(Json)
        .map_err(api_error)
}

async fn delete_quote(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state.lifecycle.delete(QuoteId(id), &actor(&headers)).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn preview_stored_quote(Path(id): Path<i64>, State(state): State<ApiState>) -> ApiResult<Response> {
    let outcome = state.lifecycle.preview_quote(QuoteId(id)).await.map_err(api_error)?;
    Ok(preview_response(outcome))
}

async fn finalize_quote(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<FinalizeResponse>> {
    let outcome = state.lifecycle.finalize(QuoteId(id), &actor(&headers)).await.map_err(api_error)?;
    Ok(Json(outcome.into()))
}

async fn approve_quote(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Quote>> {
    state.lifecycle.approve(QuoteId(id), &actor(&headers)).await.map(Json).map_err(api_error)
}

async fn reject_quote(
    Path(id): Path<i64>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Quote>> {
    state.lifecycle.reject(QuoteId(id), &actor(&headers)).await.map(Json).map_err(api_error)
}

async fn download_pdf(Path(id): Path<i64>, State(state): State<ApiState>) -> ApiResult<Response> {
    let download = state.lifecycle.download_pdf(QuoteId(id)).await.map_err(api_error)?;
    Ok(pdf_response(download.bytes, &download.file_name, "attachment"))
}

async fn download_link(Path(id): Path<i64>, State(state): State<ApiState>) -> ApiResult<Json<LinkResponse>> {
    state.lifecycle.download_link(QuoteId(id)).await.map(|link| Json(link.into())).map_err(api_error)
}

// ---------------------------------------------------------------------------
// Price imports
// ---------------------------------------------------------------------------

async fn list_price_imports(State(state): State<ApiState>) -> ApiResult<Json<ImportFilesResponse>> {
    let files = list_import_files(&state.import).map_err(api_error)?;
    Ok(Json(ImportFilesResponse { folder: state.import.folder.display().to_string(), files }))
}

async fn import_price_file(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<ImportFileRequest>,
) -> ApiResult<Json<ImportReport>> {
    let file = request.file.trim();
    let plain_name = !file.is_empty() && !file.contains(['/', '\\']) && file != "." && file != "..";
    if !plain_name {
        return Err(api_error(ApplicationError::Domain(DomainError::validation(
            "file",
            "must be a file name inside the import folder",
        ))));
    }

    let path = state.import.folder.join(file);
    if !state.import.accepts(&path) {
        return Err(api_error(ApplicationError::Domain(DomainError::validation(
            "file",
            format!("extension not allowed; expected one of {:?}", state.import.allowed_extensions),
        ))));
    }
    state.imports.import_file(&path, &actor(&headers)).await.map(Json).map_err(api_error)
}

async fn upload_price_list(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<Json<ImportReport>> {
    let rows = decode_price_list(body.as_ref()).map_err(api_error)?;
    let source = query.file_name.unwrap_or_else(|| "upload.csv".to_string());
    state.imports.import(&source, rows, &actor(&headers)).await.map(Json).map_err(api_error)
}

// ---------------------------------------------------------------------------
// Signed artifact downloads
// ---------------------------------------------------------------------------

async fn signed_artifact(
    Path(path): Path<String>,
    State(state): State<ApiState>,
    Query(query): Query<ArtifactQuery>,
) -> ApiResult<Response> {
    let correlation_id = correlation_id();
    if let Err(rejection) = state.signer.verify(&path, query.expires, &query.signature, Utc::now()) {
        warn!(
            event_name = "api.artifact.link_rejected",
            correlation_id = %correlation_id,
            path = %path,
            reason = %rejection,
            "artifact link rejected"
        );
        let status = match rejection {
            LinkError::Expired => StatusCode::GONE,
            LinkError::BadSignature => StatusCode::FORBIDDEN,
        };
        return Err((status, Json(ApiError { error: rejection.to_string(), detail: None, correlation_id })));
    }

    match state.artifacts.retrieve(&path).await {
        Ok(bytes) => {
            info!(event_name = "api.artifact.served", correlation_id = %correlation_id, path = %path, size = bytes.len(), "artifact served");
            let file_name = path.rsplit('/').next().unwrap_or("document.pdf").to_string();
            Ok(pdf_response(bytes, &file_name, "attachment"))
        }
        Err(ArtifactError::NotFound(missing)) => Err(api_error(ApplicationError::ArtifactMissing(missing))),
        Err(failure) => Err(api_error(ApplicationError::Dependency(failure.to_string()))),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn actor(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_ACTOR)
        .to_string()
}

fn correlation_id() -> String {
    format!("req-{}", Uuid::new_v4().simple())
}

fn api_error(error: ApplicationError) -> (StatusCode, Json<ApiError>) {
    let retryable = error.is_retryable();
    let interface = error.into_interface(correlation_id());
    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(
            event_name = "api.request.failed",
            correlation_id = %interface.correlation_id(),
            status = status.as_u16(),
            error = %interface,
            "request failed"
        );
    } else {
        warn!(
            event_name = "api.request.rejected",
            correlation_id = %interface.correlation_id(),
            status = status.as_u16(),
            retryable,
            error = %interface,
            "request rejected"
        );
    }

    let body = ApiError {
        error: interface.user_message().to_string(),
        detail: interface.public_detail().map(str::to_string),
        correlation_id: interface.correlation_id().to_string(),
    };
    (status, Json(body))
}

fn preview_response(outcome: PreviewOutcome) -> Response {
    let file_name = format!("{}-preview.pdf", outcome.quote.quote_number);
    let mut response = pdf_response(outcome.document.bytes, &file_name, "inline");
    if let Ok(value) = outcome.quote.quote_number.as_str().parse() {
        response.headers_mut().insert("x-quote-number", value);
    }
    response
}

fn pdf_response(bytes: Vec<u8>, file_name: &str, disposition: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, format!("{disposition}; filename=\"{file_name}\"")),
        ],
        bytes,
    )
        .into_response()
}
