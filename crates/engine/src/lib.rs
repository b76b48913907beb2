//! Quote orchestration: lifecycle transitions, artifact storage, download links and
//! catalog price imports, wired over the repository and renderer seams.

use tracing::{error, warn};

use proposal_core::errors::ApplicationError;
use proposal_db::repositories::RepositoryError;
use proposal_documents::DocumentError;

pub mod artifacts;
pub mod catalog;
pub mod import;
pub mod lifecycle;
pub mod locks;

pub use artifacts::{
    ArtifactError, ArtifactStore, DownloadLink, FilesystemArtifactStore, InMemoryArtifactStore,
    LinkError, LinkSigner,
};
pub use catalog::CatalogService;
pub use import::{ImportReport, PriceImportPipeline, PriceRecord, PriceRow};
pub use lifecycle::{
    FinalizeOutcome, LifecycleSettings, PreviewOutcome, QuoteDownload, QuoteLifecycle, QuoteRequest,
};

/// Acting user recorded for transitions the service performs on its own.
pub const SYSTEM_ACTOR: &str = "system";

pub(crate) fn repository_failure(operation: &'static str, failure: RepositoryError) -> ApplicationError {
    match failure {
        RepositoryError::Conflict(message) => {
            warn!(event_name = "engine.persistence.conflict", operation, %message, "store rejected a stale write");
            ApplicationError::Conflict(message)
        }
        other => {
            error!(event_name = "engine.persistence.failed", operation, error = %other, "store operation failed");
            ApplicationError::Persistence(other.to_string())
        }
    }
}

pub(crate) fn document_failure(
    operation: &'static str,
    quote_number: &str,
    failure: DocumentError,
) -> ApplicationError {
    error!(
        event_name = "engine.documents.failed",
        operation,
        quote_number,
        error = %failure,
        "document rendering failed"
    );
    ApplicationError::Dependency(format!("document rendering failed: {failure}"))
}

pub(crate) fn artifact_failure(
    operation: &'static str,
    quote_number: &str,
    failure: ArtifactError,
) -> ApplicationError {
    match failure {
        ArtifactError::NotFound(path) => {
            error!(
                event_name = "engine.artifacts.missing",
                operation,
                quote_number,
                path = %path,
                "finalized quote points at a missing artifact"
            );
            ApplicationError::ArtifactMissing(path)
        }
        other => {
            error!(
                event_name = "engine.artifacts.failed",
                operation,
                quote_number,
                error = %other,
                "artifact store operation failed"
            );
            ApplicationError::Dependency(format!("artifact storage failed: {other}"))
        }
    }
}
