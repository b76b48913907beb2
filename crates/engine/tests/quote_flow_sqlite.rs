use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;

use proposal_core::audit::{AuditAction, ENTITY_QUOTE};
use proposal_core::cpq::LineRequest;
use proposal_core::domain::customer::CustomerDetails;
use proposal_core::domain::quote::QuoteStatus;
use proposal_db::migrations::run_pending;
use proposal_db::repositories::{
    AuditRepository, ProductRepository, QuoteFilter, QuoteRepository, SqlAuditRepository,
    SqlProductRepository, SqlQuoteRepository,
};
use proposal_db::{connect, CatalogSeed};
use proposal_documents::{DocumentAssembler, TemplateLibrary};
use proposal_engine::import::decode_price_list;
use proposal_engine::{
    ArtifactStore, FilesystemArtifactStore, LifecycleSettings, LinkError, LinkSigner,
    PriceImportPipeline, QuoteLifecycle, QuoteRequest,
};

type FlowResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

fn query_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
    let (_, query) = url.split_once('?')?;
    query.split('&').find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))
}

#[tokio::test]
async fn seeded_catalog_quote_is_finalized_stored_and_linked() -> FlowResult {
    let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    let url = format!("sqlite://{}", dir.path().join("proposal.db").display());
    let pool = connect(&url).await.map_err(|e| e.to_string())?;
    run_pending(&pool).await.map_err(|e| e.to_string())?;
    CatalogSeed::load(&pool).await.map_err(|e| e.to_string())?;

    let products = Arc::new(SqlProductRepository::new(pool.clone()));
    let quotes = Arc::new(SqlQuoteRepository::new(pool.clone()));
    let store = Arc::new(FilesystemArtifactStore::new(dir.path().join("artifacts")));
    let signer = LinkSigner::new(
        SecretString::from("integration-signing-key-0123".to_string()),
        "https://proposals.example.test/",
        Duration::hours(24),
    );
    let lifecycle = Arc::new(QuoteLifecycle::new(
        products.clone(),
        quotes.clone(),
        Arc::new(DocumentAssembler::new(TemplateLibrary::default(), "Business Proposals", "standard")),
        store.clone(),
        signer.clone(),
        LifecycleSettings::default(),
    ));

    let voice = products
        .find_by_sku("VOD-EV-001")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("seeded product missing")?;
    let request = QuoteRequest {
        customer: CustomerDetails::new("Acme").with_company("Acme GmbH"),
        line_items: vec![LineRequest::new(voice.id, 10, Decimal::new(10, 0))],
        template_name: Some("compact".to_string()),
        ..QuoteRequest::default()
    };

    let draft = lifecycle.create_draft(request, "alice").await.map_err(|e| e.to_string())?;
    let id = draft.id.ok_or("draft has no id")?;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let lifecycle = lifecycle.clone();
        handles.push(tokio::spawn(async move { lifecycle.finalize(id, "alice").await }));
    }
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.map_err(|e| e.to_string())?.map_err(|e| e.to_string())?);
    }
    require!(
        outcomes.iter().filter(|outcome| !outcome.already_finalized).count() == 1,
        "exactly one finalize call should render"
    );

    let stored = quotes.find_by_id(id).await.map_err(|e| e.to_string())?.ok_or("quote vanished")?;
    require!(stored.status == QuoteStatus::Finalized, "status is {}", stored.status);
    require!(stored.total_amount == Decimal::new(13500, 2), "total is {}", stored.total_amount);
    let path = stored.artifact_path.clone().ok_or("artifact path missing")?;
    require!(
        store.list("").await.map_err(|e| e.to_string())? == vec![path.clone()],
        "exactly one artifact should be stored"
    );

    let pdf = lifecycle.download_pdf(id).await.map_err(|e| e.to_string())?;
    require!(pdf.bytes.starts_with(b"%PDF"), "download is not a pdf");

    let link = &outcomes[0].download.url;
    require!(link.starts_with("https://proposals.example.test/artifacts/"), "unexpected link {link}");
    let expires: i64 = query_param(link, "expires").ok_or("no expiry")?.parse().map_err(|_| "bad expiry")?;
    let signature = query_param(link, "signature").ok_or("no signature")?;
    let now = Utc::now();
    require!(signer.verify(&path, expires, signature, now).is_ok(), "fresh link must verify");
    require!(
        signer.verify(&path, expires, signature, now + Duration::days(2)) == Err(LinkError::Expired),
        "link must expire"
    );
    require!(
        signer.verify("other/v1/other.pdf", expires, signature, now) == Err(LinkError::BadSignature),
        "signature is bound to the path"
    );

    let trail = SqlAuditRepository::new(pool.clone())
        .list_for_entity(ENTITY_QUOTE, &id.to_string())
        .await
        .map_err(|e| e.to_string())?;
    let actions: Vec<_> = trail.iter().map(|entry| entry.action).collect();
    require!(
        actions == vec![AuditAction::QuoteCreated, AuditAction::QuoteFinalized],
        "unexpected audit trail {actions:?}"
    );

    let listed = lifecycle
        .list(&QuoteFilter { created_by: Some("alice".to_string()), status: None })
        .await
        .map_err(|e| e.to_string())?;
    require!(listed.len() == 1, "expected one listed quote, got {}", listed.len());
    Ok(())
}

#[tokio::test]
async fn price_import_updates_the_seeded_catalog_in_one_batch() -> FlowResult {
    let pool = proposal_db::connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|e| e.to_string())?;
    run_pending(&pool).await.map_err(|e| e.to_string())?;
    CatalogSeed::load(&pool).await.map_err(|e| e.to_string())?;

    let products = Arc::new(SqlProductRepository::new(pool.clone()));
    let pipeline = PriceImportPipeline::new(products.clone(), "EUR");
    let csv = "ProductName,SKU,Description,Category,UnitPrice,Currency,CommitmentTerm,BillingFrequency\n\
               Enterprise Voice Standard,VOD-EV-001,,Voice,16.00,EUR,12 months,Monthly\n\
               Enterprise Voice Premium,VOD-EV-002,,Voice,not-a-price,EUR,24 months,Monthly\n\
               Private 5G Campus,VOD-5G-001,Campus network,Mobile,1200.00,,36 months,Monthly\n";

    let rows = decode_price_list(csv.as_bytes()).map_err(|e| e.to_string())?;
    let report = pipeline.import("prices-2026-q1.csv", rows, "importer").await.map_err(|e| e.to_string())?;
    require!(
        (report.total_rows, report.imported, report.updated, report.skipped) == (3, 1, 1, 1),
        "unexpected report {report:?}"
    );

    let voice = products
        .find_by_sku("VOD-EV-001")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("voice missing")?;
    require!(voice.unit_price == Decimal::new(1600, 2), "voice was not repriced");
    let premium = products
        .find_by_sku("VOD-EV-002")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("premium missing")?;
    require!(premium.unit_price == Decimal::new(2500, 2), "malformed row must not change the product");
    require!(
        products.list_active().await.map_err(|e| e.to_string())?.len() == 9,
        "new product should be active"
    );
    Ok(())
}

#[tokio::test]
async fn price_import_after_finalize_leaves_the_stored_quote_untouched() -> FlowResult {
    let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    let url = format!("sqlite://{}", dir.path().join("proposal.db").display());
    let pool = connect(&url).await.map_err(|e| e.to_string())?;
    run_pending(&pool).await.map_err(|e| e.to_string())?;
    CatalogSeed::load(&pool).await.map_err(|e| e.to_string())?;

    let products = Arc::new(SqlProductRepository::new(pool.clone()));
    let quotes = Arc::new(SqlQuoteRepository::new(pool.clone()));
    let lifecycle = QuoteLifecycle::new(
        products.clone(),
        quotes.clone(),
        Arc::new(DocumentAssembler::new(TemplateLibrary::default(), "Business Proposals", "standard")),
        Arc::new(FilesystemArtifactStore::new(dir.path().join("artifacts"))),
        LinkSigner::new(
            SecretString::from("integration-signing-key-0123".to_string()),
            "https://proposals.example.test/",
            Duration::hours(24),
        ),
        LifecycleSettings::default(),
    );

    let voice = products
        .find_by_sku("VOD-EV-001")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("seeded product missing")?;
    let request = QuoteRequest {
        customer: CustomerDetails::new("Acme"),
        line_items: vec![LineRequest::new(voice.id, 10, Decimal::new(10, 0))],
        ..QuoteRequest::default()
    };
    let outcome = lifecycle.finalize_new(request, "alice").await.map_err(|e| e.to_string())?;
    let id = outcome.quote.id.ok_or("finalized quote has no id")?;
    let before = lifecycle.download_pdf(id).await.map_err(|e| e.to_string())?;

    let csv = "ProductName,SKU,Description,Category,UnitPrice,Currency,CommitmentTerm,BillingFrequency\n\
               Enterprise Voice Standard,VOD-EV-001,,Voice,19.00,EUR,12 months,Monthly\n";
    let rows = decode_price_list(csv.as_bytes()).map_err(|e| e.to_string())?;
    let report = PriceImportPipeline::new(products.clone(), "EUR")
        .import("prices-2026-q2.csv", rows, "importer")
        .await
        .map_err(|e| e.to_string())?;
    require!(report.updated == 1, "price change was not applied: {report:?}");

    let stored = quotes.find_by_id(id).await.map_err(|e| e.to_string())?.ok_or("quote vanished")?;
    let read_back = lifecycle.get(id).await.map_err(|e| e.to_string())?;
    for quote in [&stored, &read_back] {
        require!(quote.status == QuoteStatus::Finalized, "status is {}", quote.status);
        require!(quote.total_amount == Decimal::new(13500, 2), "total is {}", quote.total_amount);
        require!(
            quote.line_items[0].unit_price == Decimal::new(1500, 2),
            "unit price is {}",
            quote.line_items[0].unit_price
        );
        require!(quote.line_items[0].line_total == Decimal::new(13500, 2), "line total changed");
    }

    let after = lifecycle.download_pdf(id).await.map_err(|e| e.to_string())?;
    require!(after.bytes == before.bytes, "stored document changed after repricing");
    Ok(())
}
