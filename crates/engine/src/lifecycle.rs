//! Quote lifecycle: draft, preview, finalize, approve/reject, expire and delete.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use proposal_core::audit::{AuditAction, AuditEntry};
use proposal_core::config::AppConfig;
use proposal_core::cpq::{Catalog, DeterministicPricingEngine, LineRequest, PricedQuote, PricingEngine};
use proposal_core::domain::customer::CustomerDetails;
use proposal_core::domain::product::ProductId;
use proposal_core::domain::quote::{Quote, QuoteId, QuoteNumber, QuoteStatus};
use proposal_core::errors::{ApplicationError, DomainError};
use proposal_db::repositories::{ProductRepository, QuoteFilter, QuoteRepository, RepositoryError};
use proposal_documents::{QuoteRenderer, RenderedDocument};

use crate::artifacts::{ArtifactStore, DownloadLink, LinkSigner};
use crate::locks::KeyedLocks;
use crate::{artifact_failure, document_failure, repository_failure, SYSTEM_ACTOR};

const QUOTE_ENTITY: &str = "quote";
const QUOTE_NUMBER_ATTEMPTS: usize = 3;
const MAX_VALIDITY_DAYS: u32 = 365;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub default_validity_days: u32,
    pub default_currency: String,
    pub default_template: String,
}

impl LifecycleSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_validity_days: config.quotes.default_validity_days,
            default_currency: config.quotes.default_currency.clone(),
            default_template: config.documents.default_template.clone(),
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            default_validity_days: 30,
            default_currency: "EUR".to_string(),
            default_template: "standard".to_string(),
        }
    }
}

/// Everything a caller supplies to create, preview or edit a quote.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub customer: CustomerDetails,
    #[serde(default)]
    pub line_items: Vec<LineRequest>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub validity_days: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct PreviewOutcome {
    pub quote: Quote,
    pub document: RenderedDocument,
}

#[derive(Clone, Debug)]
pub struct FinalizeOutcome {
    pub quote: Quote,
    pub download: DownloadLink,
    /// The quote was already finalized; nothing was rendered or written.
    pub already_finalized: bool,
}

#[derive(Clone, Debug)]
pub struct QuoteDownload {
    pub quote_number: QuoteNumber,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

struct ValidRequest {
    customer: CustomerDetails,
    line_items: Vec<LineRequest>,
    currency: Option<String>,
    template_name: Option<String>,
    notes: Option<String>,
    validity_days: u32,
}

pub struct QuoteLifecycle {
    products: Arc<dyn ProductRepository>,
    quotes: Arc<dyn QuoteRepository>,
    renderer: Arc<dyn QuoteRenderer>,
    artifacts: Arc<dyn ArtifactStore>,
    signer: LinkSigner,
    pricing: DeterministicPricingEngine,
    locks: KeyedLocks<QuoteId>,
    settings: LifecycleSettings,
}

impl QuoteLifecycle {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        quotes: Arc<dyn QuoteRepository>,
        renderer: Arc<dyn QuoteRenderer>,
        artifacts: Arc<dyn ArtifactStore>,
        signer: LinkSigner,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            products,
            quotes,
            renderer,
            artifacts,
            signer,
            pricing: DeterministicPricingEngine,
            locks: KeyedLocks::default(),
            settings,
        }
    }

    pub fn templates(&self) -> Vec<String> {
        self.renderer.templates()
    }

    /// Prices and renders a watermarked document without persisting anything.
    pub async fn preview(
        &self,
        request: QuoteRequest,
        actor: &str,
    ) -> Result<PreviewOutcome, ApplicationError> {
        let request = self.validate(request)?;
        let now = Utc::now();
        let mut quote = self.price_new(&request, actor, now).await?;
        quote.transition_to(QuoteStatus::Preview)?;

        let document = self
            .renderer
            .render(&quote, true)
            .map_err(|failure| document_failure("preview", quote.quote_number.as_str(), failure))?;
        Ok(PreviewOutcome { quote, document })
    }

    pub async fn create_draft(&self, request: QuoteRequest, actor: &str) -> Result<Quote, ApplicationError> {
        let request = self.validate(request)?;
        let now = Utc::now();
        let draft = self.price_new(&request, actor, now).await?;
        let stored = self.insert_with_fresh_number(draft, actor).await?;

        info!(
            event_name = "quote.created",
            quote_id = ?stored.id,
            quote_number = %stored.quote_number,
            actor,
            "draft quote created"
        );
        Ok(stored)
    }

    /// Re-prices a draft against the current catalog.
    pub async fn update_draft(
        &self,
        id: QuoteId,
        request: QuoteRequest,
        actor: &str,
    ) -> Result<Quote, ApplicationError> {
        let request = self.validate(request)?;
        let _guard = self.locks.lock(&id).await;
        let mut quote = self.load(id).await?;
        if !quote.status.is_editable() {
            return Err(DomainError::validation(
                "status",
                format!("quote {} is {} and can no longer be edited", quote.quote_number, quote.status),
            )
            .into());
        }

        let now = Utc::now();
        let catalog = self.catalog_for(request.line_items.iter().map(|line| line.product_id)).await?;
        let priced = self.price(&request, &catalog)?;
        quote.customer = request.customer;
        quote.currency = priced.currency;
        quote.total_amount = priced.total;
        quote.line_items = priced.line_items;
        quote.notes = request.notes;
        quote.template_name = request.template_name;
        quote.valid_until = quote.validity_deadline(request.validity_days);
        quote.updated_at = now;

        let audit = AuditEntry::for_quote(AuditAction::QuoteUpdated, &quote, actor)
            .with_detail(format!(
                "Quote {} updated. Total: {} {}",
                quote.quote_number, quote.total_amount, quote.currency
            ))
            .at(now);
        self.quotes
            .update(&quote, QuoteStatus::Draft, audit)
            .await
            .map_err(|failure| repository_failure("update_draft", failure))?;
        Ok(quote)
    }

    /// Renders a stored draft with the preview watermark. The draft is not modified.
    pub async fn preview_quote(&self, id: QuoteId) -> Result<PreviewOutcome, ApplicationError> {
        let mut quote = self.load(id).await?;
        quote.transition_to(QuoteStatus::Preview)?;

        let document = self
            .renderer
            .render(&quote, true)
            .map_err(|failure| document_failure("preview_quote", quote.quote_number.as_str(), failure))?;
        Ok(PreviewOutcome { quote, document })
    }

    /// Freezes a draft: renders the final document, stores it at its versioned path and
    /// persists the quote with its artifact reference and audit entry.
    ///
    /// Concurrent calls for one quote run one at a time; later callers receive the
    /// already-finalized quote with a fresh link.
    pub async fn finalize(&self, id: QuoteId, actor: &str) -> Result<FinalizeOutcome, ApplicationError> {
        let _guard = self.locks.lock(&id).await;
        let mut quote = self.load(id).await?;
        let now = Utc::now();

        match quote.status {
            QuoteStatus::Draft | QuoteStatus::Preview => {}
            QuoteStatus::Finalized => {
                info!(
                    event_name = "quote.finalize.idempotent",
                    quote_id = %id,
                    quote_number = %quote.quote_number,
                    "quote already finalized"
                );
                let download = self.link_for(&quote, now).await?;
                return Ok(FinalizeOutcome { quote, download, already_finalized: true });
            }
            other => {
                return Err(DomainError::InvalidQuoteTransition { from: other, to: QuoteStatus::Finalized }.into())
            }
        }

        self.ensure_products_available(&quote).await?;
        quote.ensure_total_consistent()?;
        quote.transition_to(QuoteStatus::Finalized)?;
        quote.finalized_at = Some(now);
        quote.updated_at = now;
        let path = quote.expected_artifact_path();
        quote.artifact_path = Some(path.clone());

        let rendered = self
            .renderer
            .render(&quote, false)
            .map_err(|failure| document_failure("finalize", quote.quote_number.as_str(), failure))?;
        let artifact = self
            .artifacts
            .store(&path, &rendered.bytes)
            .await
            .map_err(|failure| artifact_failure("finalize", quote.quote_number.as_str(), failure))?;

        let audit = AuditEntry::for_quote(AuditAction::QuoteFinalized, &quote, actor)
            .with_detail(format!(
                "Quote {} finalized for {}. Total: {} {}",
                quote.quote_number, quote.customer.name, quote.total_amount, quote.currency
            ))
            .at(now);
        self.quotes
            .update(&quote, QuoteStatus::Draft, audit)
            .await
            .map_err(|failure| repository_failure("finalize", failure))?;

        info!(
            event_name = "quote.finalized",
            quote_id = %id,
            quote_number = %quote.quote_number,
            artifact = %artifact.path,
            size = artifact.size,
            template = %rendered.template,
            "quote finalized"
        );
        let download = self.signer.issue(&path, now);
        Ok(FinalizeOutcome { quote, download, already_finalized: false })
    }

    /// Creates the draft and finalizes it in one call.
    pub async fn finalize_new(
        &self,
        request: QuoteRequest,
        actor: &str,
    ) -> Result<FinalizeOutcome, ApplicationError> {
        let draft = self.create_draft(request, actor).await?;
        let id = draft
            .id
            .ok_or_else(|| ApplicationError::Persistence("stored quote has no id".to_string()))?;
        self.finalize(id, actor).await
    }

    /// Fetches a quote, expiring it first when its validity deadline has passed.
    pub async fn get(&self, id: QuoteId) -> Result<Quote, ApplicationError> {
        let quote = self.load(id).await?;
        self.expire_if_due(quote, Utc::now()).await
    }

    /// Newest first. Overdue quotes are expired before they are returned.
    pub async fn list(&self, filter: &QuoteFilter) -> Result<Vec<Quote>, ApplicationError> {
        self.list_at(filter, Utc::now()).await
    }

    async fn list_at(
        &self,
        filter: &QuoteFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Quote>, ApplicationError> {
        // Overdue quotes stay stored as Finalized until something expires them.
        let stored = match filter.status {
            Some(QuoteStatus::Expired) => QuoteFilter { status: None, ..filter.clone() },
            _ => filter.clone(),
        };
        let listed =
            self.quotes.list(&stored).await.map_err(|failure| repository_failure("list", failure))?;

        let mut quotes = Vec::with_capacity(listed.len());
        for quote in listed {
            quotes.push(self.expire_if_due(quote, now).await?);
        }
        quotes.retain(|quote| filter.status.map_or(true, |status| quote.status == status));
        Ok(quotes)
    }

    pub async fn delete(&self, id: QuoteId, actor: &str) -> Result<(), ApplicationError> {
        let _guard = self.locks.lock(&id).await;
        let quote = self.load(id).await?;
        quote.ensure_deletable()?;

        let audit = AuditEntry::for_quote(AuditAction::QuoteDeleted, &quote, actor)
            .with_detail(format!("Quote {} deleted", quote.quote_number));
        let deleted = self
            .quotes
            .delete(id, QuoteStatus::Draft, audit)
            .await
            .map_err(|failure| repository_failure("delete", failure))?;
        if !deleted {
            return Err(ApplicationError::Conflict(format!(
                "quote {} changed while it was being deleted",
                quote.quote_number
            )));
        }

        info!(event_name = "quote.deleted", quote_id = %id, quote_number = %quote.quote_number, actor, "draft deleted");
        Ok(())
    }

    pub async fn approve(&self, id: QuoteId, actor: &str) -> Result<Quote, ApplicationError> {
        self.decide(id, QuoteStatus::Approved, AuditAction::QuoteApproved, actor).await
    }

    pub async fn reject(&self, id: QuoteId, actor: &str) -> Result<Quote, ApplicationError> {
        self.decide(id, QuoteStatus::Rejected, AuditAction::QuoteRejected, actor).await
    }

    pub async fn download_pdf(&self, id: QuoteId) -> Result<QuoteDownload, ApplicationError> {
        let quote = self.get(id).await?;
        let path = Self::artifact_path(&quote)?;
        let bytes = self
            .artifacts
            .retrieve(path)
            .await
            .map_err(|failure| artifact_failure("download_pdf", quote.quote_number.as_str(), failure))?;

        Ok(QuoteDownload {
            file_name: format!("{}.pdf", quote.quote_number),
            quote_number: quote.quote_number,
            bytes,
        })
    }

    pub async fn download_link(&self, id: QuoteId) -> Result<DownloadLink, ApplicationError> {
        let quote = self.get(id).await?;
        self.link_for(&quote, Utc::now()).await
    }

    /// Expires every finalized quote whose deadline is before `now`. Returns how many
    /// were expired; individual failures are logged and skipped.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize, ApplicationError> {
        let overdue = self
            .quotes
            .list_overdue(now)
            .await
            .map_err(|failure| repository_failure("expire_overdue", failure))?;

        let mut expired = 0;
        for quote in overdue {
            let quote_number = quote.quote_number.clone();
            match self.expire_if_due(quote, now).await {
                Ok(updated) if updated.status == QuoteStatus::Expired => expired += 1,
                Ok(_) => {}
                Err(failure) => warn!(
                    event_name = "quote.expiry.failed",
                    quote_number = %quote_number,
                    error = %failure,
                    "could not expire overdue quote"
                ),
            }
        }
        Ok(expired)
    }

    async fn decide(
        &self,
        id: QuoteId,
        next: QuoteStatus,
        action: AuditAction,
        actor: &str,
    ) -> Result<Quote, ApplicationError> {
        let _guard = self.locks.lock(&id).await;
        let now = Utc::now();
        let mut quote = self.expire_locked(self.load(id).await?, now).await?;
        quote.transition_to(next)?;
        quote.updated_at = now;

        let audit = AuditEntry::for_quote(action, &quote, actor)
            .with_detail(format!("Quote {} {} by {actor}", quote.quote_number, next.as_str().to_lowercase()))
            .at(now);
        self.quotes
            .update(&quote, QuoteStatus::Finalized, audit)
            .await
            .map_err(|failure| repository_failure("decide", failure))?;

        info!(
            event_name = "quote.decided",
            quote_id = %id,
            quote_number = %quote.quote_number,
            status = %quote.status,
            actor,
            "quote decision recorded"
        );
        Ok(quote)
    }

    async fn expire_if_due(&self, quote: Quote, now: DateTime<Utc>) -> Result<Quote, ApplicationError> {
        let Some(id) = quote.id.filter(|_| quote.is_overdue(now)) else {
            return Ok(quote);
        };
        let _guard = self.locks.lock(&id).await;
        let current = self.load(id).await?;
        self.expire_locked(current, now).await
    }

    /// Caller holds the quote's lock.
    async fn expire_locked(&self, mut quote: Quote, now: DateTime<Utc>) -> Result<Quote, ApplicationError> {
        if !quote.is_overdue(now) {
            return Ok(quote);
        }
        quote.transition_to(QuoteStatus::Expired)?;
        quote.updated_at = now;

        let audit = AuditEntry::for_quote(AuditAction::QuoteExpired, &quote, SYSTEM_ACTOR)
            .with_detail(format!(
                "Quote {} expired; it was valid until {}",
                quote.quote_number,
                quote.valid_until.format("%Y-%m-%d")
            ))
            .at(now);
        self.quotes
            .update(&quote, QuoteStatus::Finalized, audit)
            .await
            .map_err(|failure| repository_failure("expire", failure))?;

        info!(event_name = "quote.expired", quote_id = ?quote.id, quote_number = %quote.quote_number, "quote expired");
        Ok(quote)
    }

    async fn load(&self, id: QuoteId) -> Result<Quote, ApplicationError> {
        self.quotes
            .find_by_id(id)
            .await
            .map_err(|failure| repository_failure("load", failure))?
            .ok_or_else(|| ApplicationError::not_found(QUOTE_ENTITY, id))
    }

    fn artifact_path(quote: &Quote) -> Result<&str, ApplicationError> {
        match (&quote.artifact_path, quote.status) {
            (Some(path), status) if status != QuoteStatus::Draft => Ok(path.as_str()),
            _ => Err(ApplicationError::NotFinalized(quote.quote_number.to_string())),
        }
    }

    async fn link_for(&self, quote: &Quote, now: DateTime<Utc>) -> Result<DownloadLink, ApplicationError> {
        let path = Self::artifact_path(quote)?;
        let present = self
            .artifacts
            .exists(path)
            .await
            .map_err(|failure| artifact_failure("download_link", quote.quote_number.as_str(), failure))?;
        if !present {
            return Err(artifact_failure(
                "download_link",
                quote.quote_number.as_str(),
                crate::artifacts::ArtifactError::NotFound(path.to_string()),
            ));
        }
        Ok(self.signer.issue(path, now))
    }

    fn validate(&self, request: QuoteRequest) -> Result<ValidRequest, DomainError> {
        let customer = request.customer.normalized()?;
        if request.line_items.is_empty() {
            return Err(DomainError::validation("line_items", "at least one line item is required"));
        }

        let validity_days = request.validity_days.unwrap_or(self.settings.default_validity_days);
        if validity_days == 0 || validity_days > MAX_VALIDITY_DAYS {
            return Err(DomainError::validation(
                "validity_days",
                format!("must be between 1 and {MAX_VALIDITY_DAYS}"),
            ));
        }

        let currency = match request.currency.as_deref().map(str::trim).filter(|code| !code.is_empty()) {
            Some(code) if code.len() == 3 && code.chars().all(|ch| ch.is_ascii_alphabetic()) => {
                Some(code.to_ascii_uppercase())
            }
            Some(code) => {
                return Err(DomainError::validation(
                    "currency",
                    format!("`{code}` is not a three-letter currency code"),
                ))
            }
            None => None,
        };

        let non_blank = |value: Option<String>| {
            value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
        };

        Ok(ValidRequest {
            customer,
            line_items: request.line_items,
            currency,
            template_name: non_blank(request.template_name),
            notes: non_blank(request.notes),
            validity_days,
        })
    }

    /// Point-in-time snapshot of the active products the request refers to.
    async fn catalog_for(
        &self,
        ids: impl IntoIterator<Item = ProductId>,
    ) -> Result<Catalog, ApplicationError> {
        let ids: Vec<_> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let products = self
            .products
            .find_by_ids(&ids)
            .await
            .map_err(|failure| repository_failure("catalog_snapshot", failure))?;
        Ok(Catalog::new(products))
    }

    fn price(
        &self,
        request: &ValidRequest,
        catalog: &Catalog,
    ) -> Result<PricedQuote, DomainError> {
        let default_currency = request.currency.as_deref().unwrap_or(&self.settings.default_currency);
        let priced = self.pricing.price(&request.line_items, catalog, default_currency)?;
        if let Some(requested) = &request.currency {
            if &priced.currency != requested {
                return Err(DomainError::validation(
                    "currency",
                    format!("lines are priced in {} but {requested} was requested", priced.currency),
                ));
            }
        }
        Ok(priced)
    }

    async fn price_new(
        &self,
        request: &ValidRequest,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Quote, ApplicationError> {
        let catalog = self.catalog_for(request.line_items.iter().map(|line| line.product_id)).await?;
        let priced = self.price(request, &catalog)?;

        Ok(Quote {
            id: None,
            quote_number: QuoteNumber::generate(now),
            version: 1,
            status: QuoteStatus::Draft,
            customer: request.customer.clone(),
            valid_until: now + Duration::days(i64::from(request.validity_days)),
            currency: priced.currency,
            total_amount: priced.total,
            notes: request.notes.clone(),
            artifact_path: None,
            template_name: request.template_name.clone(),
            created_by: actor.to_string(),
            created_at: now,
            updated_at: now,
            finalized_at: None,
            line_items: priced.line_items,
        })
    }

    async fn insert_with_fresh_number(&self, mut draft: Quote, actor: &str) -> Result<Quote, ApplicationError> {
        let mut attempt = 1;
        loop {
            let audit = AuditEntry::for_quote(AuditAction::QuoteCreated, &draft, actor)
                .with_detail(format!(
                    "Quote {} created for {}. Total: {} {}",
                    draft.quote_number, draft.customer.name, draft.total_amount, draft.currency
                ))
                .at(draft.created_at);

            match self.quotes.insert(draft.clone(), audit).await {
                Ok(stored) => return Ok(stored),
                Err(RepositoryError::Conflict(message)) if attempt < QUOTE_NUMBER_ATTEMPTS => {
                    warn!(
                        event_name = "quote.number.collision",
                        quote_number = %draft.quote_number,
                        attempt,
                        %message,
                        "quote number taken, generating another"
                    );
                    draft.quote_number = QuoteNumber::generate(Utc::now());
                    attempt += 1;
                }
                Err(failure) => return Err(repository_failure("create_draft", failure)),
            }
        }
    }

    async fn ensure_products_available(&self, quote: &Quote) -> Result<(), ApplicationError> {
        let catalog = self.catalog_for(quote.line_items.iter().map(|line| line.product_id)).await?;
        for line in &quote.line_items {
            if catalog.find(&line.product_id).is_none() {
                return Err(DomainError::ProductNotFound(line.product_id).into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use secrecy::SecretString;

    use proposal_core::audit::{AuditAction, ENTITY_QUOTE};
    use proposal_core::cpq::LineRequest;
    use proposal_core::domain::customer::CustomerDetails;
    use proposal_core::domain::product::{NewProduct, ProductId};
    use proposal_core::domain::quote::QuoteStatus;
    use proposal_core::errors::{ApplicationError, DomainError};
    use proposal_db::repositories::{
        AuditRepository, InMemoryAuditRepository, InMemoryProductRepository,
        InMemoryQuoteRepository, ProductRepository, QuoteFilter, QuoteRepository,
    };
    use proposal_documents::{DocumentAssembler, TemplateLibrary};

    use super::{LifecycleSettings, QuoteLifecycle, QuoteRequest};
    use crate::artifacts::{ArtifactError, ArtifactRef, ArtifactStore, InMemoryArtifactStore, LinkSigner};

    struct Harness {
        lifecycle: Arc<QuoteLifecycle>,
        products: Arc<InMemoryProductRepository>,
        quotes: Arc<InMemoryQuoteRepository>,
        audit: Arc<InMemoryAuditRepository>,
        artifacts: Arc<dyn ArtifactStore>,
        voice: ProductId,
    }

    /// Store whose writes always fail.
    struct UnavailableStore;

    #[async_trait]
    impl ArtifactStore for UnavailableStore {
        async fn store(&self, path: &str, _bytes: &[u8]) -> Result<ArtifactRef, ArtifactError> {
            Err(ArtifactError::Io {
                path: path.into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "bucket offline"),
            })
        }
        async fn retrieve(&self, path: &str) -> Result<Vec<u8>, ArtifactError> {
            Err(ArtifactError::NotFound(path.to_string()))
        }
        async fn exists(&self, _path: &str) -> Result<bool, ArtifactError> {
            Ok(false)
        }
        async fn list(&self, _prefix: &str) -> Result<Vec<String>, ArtifactError> {
            Ok(Vec::new())
        }
        async fn delete(&self, _path: &str) -> Result<bool, ArtifactError> {
            Ok(false)
        }
    }

    async fn harness_with(artifacts: Arc<dyn ArtifactStore>) -> Harness {
        let audit = Arc::new(InMemoryAuditRepository::default());
        let products = Arc::new(InMemoryProductRepository::new(audit.clone()));
        let quotes = Arc::new(InMemoryQuoteRepository::new(audit.clone()));
        let voice = products
            .insert(NewProduct {
                sku: "VOD-EV-001".to_string(),
                name: "Enterprise Voice Standard".to_string(),
                description: None,
                category: Some("Voice".to_string()),
                unit_price: Decimal::new(1500, 2),
                currency: "EUR".to_string(),
                commitment_term: Some("12 months".to_string()),
                billing_frequency: Some("Monthly".to_string()),
            })
            .await
            .expect("seed product")
            .id;

        let lifecycle = QuoteLifecycle::new(
            products.clone(),
            quotes.clone(),
            Arc::new(DocumentAssembler::new(TemplateLibrary::default(), "Business Proposals", "standard")),
            artifacts.clone(),
            LinkSigner::new(
                SecretString::from("test-signing-key-0123456789".to_string()),
                "http://127.0.0.1:8080",
                Duration::hours(24),
            ),
            LifecycleSettings::default(),
        );
        Harness { lifecycle: Arc::new(lifecycle), products, quotes, audit, artifacts, voice }
    }

    async fn harness() -> Harness {
        harness_with(Arc::new(InMemoryArtifactStore::default())).await
    }

    fn acme(product: ProductId) -> QuoteRequest {
        QuoteRequest {
            customer: CustomerDetails::new("Acme").with_email("buyer@acme.test"),
            line_items: vec![LineRequest::new(product, 10, Decimal::new(10, 0))],
            ..QuoteRequest::default()
        }
    }

    #[tokio::test]
    async fn acme_quote_is_priced_finalized_and_audited() {
        let h = harness().await;
        let outcome = h.lifecycle.finalize_new(acme(h.voice), "alice").await.expect("finalize");

        let quote = outcome.quote;
        assert_eq!(quote.status, QuoteStatus::Finalized);
        assert_eq!(quote.total_amount.to_string(), "135.00");
        assert_eq!(quote.line_items[0].line_total.to_string(), "135.00");
        let path = quote.artifact_path.clone().expect("artifact path");
        assert_eq!(path, format!("{0}/v1/{0}.pdf", quote.quote_number));
        assert!(h.artifacts.retrieve(&path).await.expect("stored pdf").starts_with(b"%PDF"));
        assert!(outcome.download.url.contains(&path));
        assert!(!outcome.already_finalized);

        let id = quote.id.expect("id").to_string();
        let trail = h.audit.list_for_entity(ENTITY_QUOTE, &id).await.expect("trail");
        let actions: Vec<_> = trail.iter().map(|entry| entry.action).collect();
        assert_eq!(actions, vec![AuditAction::QuoteCreated, AuditAction::QuoteFinalized]);
        assert_eq!(
            trail[1].detail.as_deref(),
            Some(format!("Quote {} finalized for Acme. Total: 135.00 EUR", quote.quote_number).as_str())
        );
    }

    #[tokio::test]
    async fn preview_never_persists() {
        let h = harness().await;
        let preview = h.lifecycle.preview(acme(h.voice), "alice").await.expect("preview");

        assert_eq!(preview.quote.status, QuoteStatus::Preview);
        assert!(preview.quote.id.is_none());
        assert!(preview.document.bytes.starts_with(b"%PDF"));
        assert!(h.quotes.list(&QuoteFilter::default()).await.expect("list").is_empty());
        assert!(h.artifacts.list("").await.expect("artifacts").is_empty());
        assert!(h.audit.all().await.is_empty());
    }

    #[tokio::test]
    async fn stored_draft_preview_leaves_draft_unchanged() {
        let h = harness().await;
        let draft = h.lifecycle.create_draft(acme(h.voice), "alice").await.expect("draft");
        let id = draft.id.expect("id");

        let preview = h.lifecycle.preview_quote(id).await.expect("preview");
        assert_eq!(preview.quote.status, QuoteStatus::Preview);
        assert_eq!(h.lifecycle.get(id).await.expect("get").status, QuoteStatus::Draft);
    }

    #[tokio::test]
    async fn draft_cannot_skip_to_approved() {
        let h = harness().await;
        let draft = h.lifecycle.create_draft(acme(h.voice), "alice").await.expect("draft");

        let error = h.lifecycle.approve(draft.id.expect("id"), "bob").await.expect_err("skip");
        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::InvalidQuoteTransition {
                from: QuoteStatus::Draft,
                to: QuoteStatus::Approved,
            })
        );
    }

    #[tokio::test]
    async fn concurrent_finalize_yields_one_record_and_one_artifact() {
        let h = harness().await;
        let draft = h.lifecycle.create_draft(acme(h.voice), "alice").await.expect("draft");
        let id = draft.id.expect("id");

        let mut handles = Vec::new();
        for _ in 0..6 {
            let lifecycle = h.lifecycle.clone();
            handles.push(tokio::spawn(async move { lifecycle.finalize(id, "alice").await }));
        }
        let mut fresh = 0;
        for handle in handles {
            let outcome = handle.await.expect("task").expect("finalize");
            assert_eq!(outcome.quote.status, QuoteStatus::Finalized);
            if !outcome.already_finalized {
                fresh += 1;
            }
        }

        assert_eq!(fresh, 1);
        assert_eq!(h.artifacts.list("").await.expect("artifacts").len(), 1);
        let finalized = h
            .audit
            .all()
            .await
            .into_iter()
            .filter(|entry| entry.action == AuditAction::QuoteFinalized)
            .count();
        assert_eq!(finalized, 1);
    }

    #[tokio::test]
    async fn catalog_changes_do_not_reprice_existing_quotes() {
        let h = harness().await;
        let draft = h.lifecycle.create_draft(acme(h.voice), "alice").await.expect("draft");

        let mut product = h.products.find_by_id(h.voice).await.expect("find").expect("present");
        product.unit_price = Decimal::new(9900, 2);
        h.products
            .apply_batch(
                proposal_db::repositories::CatalogBatch { inserts: Vec::new(), updates: vec![product] },
                proposal_core::audit::AuditEntry::new(
                    AuditAction::PriceImport,
                    proposal_core::audit::ENTITY_PRODUCT,
                    None,
                    "importer",
                ),
            )
            .await
            .expect("reprice");

        let finalized = h.lifecycle.finalize(draft.id.expect("id"), "alice").await.expect("finalize");
        assert_eq!(finalized.quote.line_items[0].unit_price, Decimal::new(1500, 2));
        assert_eq!(finalized.quote.total_amount.to_string(), "135.00");
    }

    #[tokio::test]
    async fn deactivated_product_blocks_finalize() {
        let h = harness().await;
        let draft = h.lifecycle.create_draft(acme(h.voice), "alice").await.expect("draft");
        h.products
            .set_active(
                h.voice,
                false,
                proposal_core::audit::AuditEntry::new(
                    AuditAction::ProductDeactivated,
                    proposal_core::audit::ENTITY_PRODUCT,
                    Some(h.voice.to_string()),
                    "ops",
                ),
            )
            .await
            .expect("deactivate");

        let error = h.lifecycle.finalize(draft.id.expect("id"), "alice").await.expect_err("inactive");
        assert_eq!(error, ApplicationError::Domain(DomainError::ProductNotFound(h.voice)));
    }

    #[tokio::test]
    async fn artifact_store_failure_leaves_quote_untouched() {
        let h = harness_with(Arc::new(UnavailableStore)).await;
        let draft = h.lifecycle.create_draft(acme(h.voice), "alice").await.expect("draft");
        let id = draft.id.expect("id");

        let error = h.lifecycle.finalize(id, "alice").await.expect_err("store offline");
        assert!(matches!(error, ApplicationError::Dependency(_)));

        let stored = h.quotes.find_by_id(id).await.expect("find").expect("present");
        assert_eq!(stored.status, QuoteStatus::Draft);
        assert!(stored.artifact_path.is_none());
    }

    #[tokio::test]
    async fn only_drafts_are_deletable() {
        let h = harness().await;
        let draft = h.lifecycle.create_draft(acme(h.voice), "alice").await.expect("draft");
        h.lifecycle.delete(draft.id.expect("id"), "alice").await.expect("delete draft");
        assert!(matches!(
            h.lifecycle.get(draft.id.expect("id")).await,
            Err(ApplicationError::NotFound { .. })
        ));

        let finalized = h.lifecycle.finalize_new(acme(h.voice), "alice").await.expect("finalize");
        let error = h
            .lifecycle
            .delete(finalized.quote.id.expect("id"), "alice")
            .await
            .expect_err("finalized is kept");
        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::DeletionForbidden { status: QuoteStatus::Finalized })
        );
    }

    #[tokio::test]
    async fn overdue_quotes_expire_lazily_and_by_sweep() {
        let h = harness().await;
        let request = QuoteRequest { validity_days: Some(1), ..acme(h.voice) };
        let first = h.lifecycle.finalize_new(request.clone(), "alice").await.expect("first");
        let second = h.lifecycle.finalize_new(request, "alice").await.expect("second");

        let later = Utc::now() + Duration::days(2);
        assert_eq!(h.lifecycle.expire_overdue(later).await.expect("sweep"), 2);

        let expired = h.lifecycle.get(first.quote.id.expect("id")).await.expect("get");
        assert_eq!(expired.status, QuoteStatus::Expired);
        let error = h.lifecycle.approve(second.quote.id.expect("id"), "bob").await.expect_err("expired");
        assert!(matches!(error, ApplicationError::Domain(DomainError::InvalidQuoteTransition { .. })));
    }

    #[tokio::test]
    async fn expired_filter_includes_quotes_that_are_overdue_but_not_yet_swept() {
        let h = harness().await;
        let request = QuoteRequest { validity_days: Some(1), ..acme(h.voice) };
        let overdue = h.lifecycle.finalize_new(request, "alice").await.expect("overdue");
        let current = h.lifecycle.finalize_new(acme(h.voice), "alice").await.expect("current");

        let later = Utc::now() + Duration::days(2);
        let filter = QuoteFilter { status: Some(QuoteStatus::Expired), ..QuoteFilter::default() };
        let listed = h.lifecycle.list_at(&filter, later).await.expect("list");

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, overdue.quote.id);
        assert_eq!(listed[0].status, QuoteStatus::Expired);

        let finalized = QuoteFilter { status: Some(QuoteStatus::Finalized), ..QuoteFilter::default() };
        let remaining = h.lifecycle.list_at(&finalized, later).await.expect("list finalized");
        assert_eq!(remaining.iter().map(|quote| quote.id).collect::<Vec<_>>(), vec![current.quote.id]);
    }

    #[tokio::test]
    async fn approve_and_reject_record_decisions() {
        let h = harness().await;
        let approved = h.lifecycle.finalize_new(acme(h.voice), "alice").await.expect("finalize");
        let rejected = h.lifecycle.finalize_new(acme(h.voice), "alice").await.expect("finalize");

        let approved = h.lifecycle.approve(approved.quote.id.expect("id"), "bob").await.expect("approve");
        let rejected = h.lifecycle.reject(rejected.quote.id.expect("id"), "bob").await.expect("reject");
        assert_eq!(approved.status, QuoteStatus::Approved);
        assert_eq!(rejected.status, QuoteStatus::Rejected);

        let pdf = h.lifecycle.download_pdf(approved.id.expect("id")).await.expect("download");
        assert_eq!(pdf.file_name, format!("{}.pdf", approved.quote_number));
    }

    #[tokio::test]
    async fn drafts_have_no_document_to_download() {
        let h = harness().await;
        let draft = h.lifecycle.create_draft(acme(h.voice), "alice").await.expect("draft");
        let id = draft.id.expect("id");

        assert!(matches!(h.lifecycle.download_pdf(id).await, Err(ApplicationError::NotFinalized(_))));
        assert!(matches!(h.lifecycle.download_link(id).await, Err(ApplicationError::NotFinalized(_))));
    }

    #[tokio::test]
    async fn missing_artifact_is_reported_distinctly() {
        let h = harness().await;
        let finalized = h.lifecycle.finalize_new(acme(h.voice), "alice").await.expect("finalize");
        let path = finalized.quote.artifact_path.clone().expect("path");
        h.artifacts.delete(&path).await.expect("remove artifact");

        let error = h.lifecycle.download_link(finalized.quote.id.expect("id")).await.expect_err("missing");
        assert_eq!(error, ApplicationError::ArtifactMissing(path));
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_any_state_change() {
        let h = harness().await;
        let cases = [
            (QuoteRequest { customer: CustomerDetails::new("  "), ..acme(h.voice) }, "customer.name"),
            (QuoteRequest { line_items: Vec::new(), ..acme(h.voice) }, "line_items"),
            (
                QuoteRequest {
                    line_items: vec![LineRequest::new(h.voice, 0, Decimal::ZERO)],
                    ..acme(h.voice)
                },
                "line_items[0].quantity",
            ),
            (
                QuoteRequest {
                    line_items: vec![LineRequest::new(h.voice, 1, Decimal::new(101, 0))],
                    ..acme(h.voice)
                },
                "line_items[0].discount_percent",
            ),
            (QuoteRequest { currency: Some("USD".to_string()), ..acme(h.voice) }, "currency"),
            (QuoteRequest { validity_days: Some(0), ..acme(h.voice) }, "validity_days"),
        ];

        for (request, field) in cases {
            match h.lifecycle.create_draft(request, "alice").await {
                Err(ApplicationError::Domain(DomainError::Validation { field: actual, .. })) => {
                    assert_eq!(actual, field)
                }
                other => panic!("expected validation error on {field}, got {other:?}"),
            }
        }

        let unknown = QuoteRequest {
            line_items: vec![LineRequest::new(ProductId(404), 1, Decimal::ZERO)],
            ..acme(h.voice)
        };
        assert_eq!(
            h.lifecycle.create_draft(unknown, "alice").await.expect_err("unknown"),
            ApplicationError::Domain(DomainError::ProductNotFound(ProductId(404)))
        );
        assert!(h.audit.all().await.is_empty());
    }

    #[tokio::test]
    async fn update_draft_reprices_and_finalized_quotes_are_frozen() {
        let h = harness().await;
        let draft = h.lifecycle.create_draft(acme(h.voice), "alice").await.expect("draft");
        let id = draft.id.expect("id");

        let request = QuoteRequest {
            line_items: vec![LineRequest::new(h.voice, 2, Decimal::ZERO)],
            notes: Some("Two seats only".to_string()),
            ..acme(h.voice)
        };
        let updated = h.lifecycle.update_draft(id, request.clone(), "alice").await.expect("update");
        assert_eq!(updated.total_amount, Decimal::new(3000, 2));
        assert_eq!(updated.notes.as_deref(), Some("Two seats only"));

        h.lifecycle.finalize(id, "alice").await.expect("finalize");
        let error = h.lifecycle.update_draft(id, request, "alice").await.expect_err("frozen");
        assert!(matches!(error, ApplicationError::Domain(DomainError::Validation { .. })));
    }
}
