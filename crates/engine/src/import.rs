//! Price-list import: CSV decoding and the catalog upsert pipeline.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use proposal_core::audit::{AuditAction, AuditEntry, ENTITY_PRODUCT};
use proposal_core::config::ImportConfig;
use proposal_core::domain::product::{NewProduct, Product};
use proposal_core::errors::{ApplicationError, DomainError};
use proposal_db::repositories::{CatalogBatch, ProductRepository};

use crate::repository_failure;

/// One decoded price-list line. Blank optional columns are `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriceRecord {
    pub sku: String,
    pub product_name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub unit_price: Decimal,
    pub currency: Option<String>,
    pub commitment_term: Option<String>,
    pub billing_frequency: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PriceRow {
    Record(PriceRecord),
    /// A line that could not be decoded; `sku` is kept when it was readable.
    Malformed { line: u64, sku: Option<String>, message: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub source: String,
    pub total_rows: usize,
    pub imported: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawPriceRow {
    #[serde(rename = "ProductName", default)]
    product_name: Option<String>,
    #[serde(rename = "SKU", default)]
    sku: Option<String>,
    #[serde(rename = "Description", default)]
    description: Option<String>,
    #[serde(rename = "Category", default)]
    category: Option<String>,
    #[serde(rename = "UnitPrice", default)]
    unit_price: Option<String>,
    #[serde(rename = "Currency", default)]
    currency: Option<String>,
    #[serde(rename = "CommitmentTerm", default)]
    commitment_term: Option<String>,
    #[serde(rename = "BillingFrequency", default)]
    billing_frequency: Option<String>,
}

/// Decodes a headed CSV price list. A missing header row fails the whole file; a bad
/// line becomes [`PriceRow::Malformed`] and decoding carries on.
pub fn decode_price_list<R: Read>(input: R) -> Result<Vec<PriceRow>, ApplicationError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader
        .headers()
        .map_err(|error| DomainError::validation("price_list", format!("unreadable header row: {error}")))?
        .clone();
    if !headers.iter().any(|header| header == "SKU") {
        return Err(DomainError::validation("price_list", "header row has no `SKU` column").into());
    }

    let mut rows = Vec::new();
    for (index, result) in reader.deserialize::<RawPriceRow>().enumerate() {
        // Header is line 1.
        let line = index as u64 + 2;
        let row = match result {
            Ok(raw) => into_row(line, raw),
            Err(error) => PriceRow::Malformed { line, sku: None, message: error.to_string() },
        };
        rows.push(row);
    }
    Ok(rows)
}

pub async fn decode_price_file(path: &Path) -> Result<Vec<PriceRow>, ApplicationError> {
    let bytes = tokio::fs::read(path).await.map_err(|error| {
        ApplicationError::not_found("price list", format!("{} ({error})", path.display()))
    })?;
    decode_price_list(bytes.as_slice())
}

/// File names in the import folder with an accepted extension, sorted. A missing
/// folder lists nothing.
pub fn list_import_files(config: &ImportConfig) -> Result<Vec<String>, ApplicationError> {
    let entries = match std::fs::read_dir(&config.folder) {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => {
            return Err(ApplicationError::Configuration(format!(
                "cannot read import folder {}: {error}",
                config.folder.display()
            )))
        }
    };

    let mut names = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && config.accepts(&path) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn into_row(line: u64, raw: RawPriceRow) -> PriceRow {
    let sku = raw.sku.map(|sku| sku.trim().to_string()).unwrap_or_default();
    let malformed = |message: String| PriceRow::Malformed {
        line,
        sku: Some(sku.clone()).filter(|sku| !sku.is_empty()),
        message,
    };

    let unit_price = match raw.unit_price.as_deref().map(str::trim) {
        None | Some("") => return malformed("UnitPrice is required".to_string()),
        Some(text) => match Decimal::from_str(text) {
            Ok(price) if price.is_sign_negative() => {
                return malformed(format!("UnitPrice must not be negative, got {text}"))
            }
            Ok(price) => price,
            Err(_) => return malformed(format!("UnitPrice `{text}` is not a number")),
        },
    };

    let currency = match non_blank(raw.currency) {
        Some(code) if code.len() == 3 && code.chars().all(|ch| ch.is_ascii_alphabetic()) => {
            Some(code.to_ascii_uppercase())
        }
        Some(code) => return malformed(format!("Currency `{code}` is not a three-letter code")),
        None => None,
    };

    PriceRow::Record(PriceRecord {
        sku,
        product_name: non_blank(raw.product_name),
        description: non_blank(raw.description),
        category: non_blank(raw.category),
        unit_price,
        currency,
        commitment_term: non_blank(raw.commitment_term),
        billing_frequency: non_blank(raw.billing_frequency),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

enum Staged {
    Insert(usize),
    Update(usize),
}

/// Upserts decoded rows into the catalog by SKU. Row problems are counted and reported;
/// the catalog changes and the summary audit entry commit together.
pub struct PriceImportPipeline {
    products: Arc<dyn ProductRepository>,
    default_currency: String,
}

impl PriceImportPipeline {
    pub fn new(products: Arc<dyn ProductRepository>, default_currency: impl Into<String>) -> Self {
        Self { products, default_currency: default_currency.into() }
    }

    pub async fn import_file(&self, path: &Path, actor: &str) -> Result<ImportReport, ApplicationError> {
        let rows = decode_price_file(path).await?;
        let source = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.import(&source, rows, actor).await
    }

    pub async fn import(
        &self,
        source: &str,
        rows: Vec<PriceRow>,
        actor: &str,
    ) -> Result<ImportReport, ApplicationError> {
        let mut report = ImportReport { source: source.to_string(), total_rows: rows.len(), ..ImportReport::default() };
        let mut batch = CatalogBatch::default();
        let mut staged: HashMap<String, Staged> = HashMap::new();
        let now = Utc::now();

        for row in rows {
            let record = match row {
                PriceRow::Record(record) => record,
                PriceRow::Malformed { line, sku, message } => {
                    report.skipped += 1;
                    report.errors.push(match sku {
                        Some(sku) => format!("Row SKU '{sku}': {message}"),
                        None => format!("Row {line}: {message}"),
                    });
                    continue;
                }
            };
            if record.sku.is_empty() {
                report.skipped += 1;
                continue;
            }

            match staged.get(&record.sku) {
                Some(Staged::Insert(index)) => {
                    merge_new(&mut batch.inserts[*index], record);
                    report.updated += 1;
                }
                Some(Staged::Update(index)) => {
                    merge_existing(&mut batch.updates[*index], record);
                    report.updated += 1;
                }
                None => {
                    let existing = self
                        .products
                        .find_by_sku(&record.sku)
                        .await
                        .map_err(|failure| repository_failure("price_import", failure))?;
                    let sku = record.sku.clone();
                    match existing {
                        Some(mut product) => {
                            merge_existing(&mut product, record);
                            product.updated_at = now;
                            staged.insert(sku, Staged::Update(batch.updates.len()));
                            batch.updates.push(product);
                            report.updated += 1;
                        }
                        None => {
                            staged.insert(sku, Staged::Insert(batch.inserts.len()));
                            batch.inserts.push(self.new_product(record));
                            report.imported += 1;
                        }
                    }
                }
            }
        }

        let audit = AuditEntry::new(AuditAction::PriceImport, ENTITY_PRODUCT, None, actor).with_detail(format!(
            "File: {source}, Imported: {}, Updated: {}, Skipped: {}",
            report.imported, report.updated, report.skipped
        ));
        self.products
            .apply_batch(batch, audit)
            .await
            .map_err(|failure| repository_failure("price_import", failure))?;

        if !report.errors.is_empty() {
            warn!(
                event_name = "catalog.import.row_errors",
                source,
                errors = report.errors.len(),
                first = %report.errors[0],
                "price import skipped rows"
            );
        }
        info!(
            event_name = "catalog.import.completed",
            source,
            total_rows = report.total_rows,
            imported = report.imported,
            updated = report.updated,
            skipped = report.skipped,
            actor,
            "price import applied"
        );
        Ok(report)
    }

    fn new_product(&self, record: PriceRecord) -> NewProduct {
        NewProduct {
            name: record.product_name.unwrap_or_else(|| record.sku.clone()),
            sku: record.sku,
            description: record.description,
            category: record.category,
            unit_price: record.unit_price,
            currency: record.currency.unwrap_or_else(|| self.default_currency.clone()),
            commitment_term: record.commitment_term,
            billing_frequency: record.billing_frequency,
        }
    }
}

fn merge_existing(product: &mut Product, record: PriceRecord) {
    product.unit_price = record.unit_price;
    product.active = true;
    keep_or_replace(&mut product.name, record.product_name);
    keep_or_replace(&mut product.currency, record.currency);
    product.description = record.description.or(product.description.take());
    product.category = record.category.or(product.category.take());
    product.commitment_term = record.commitment_term.or(product.commitment_term.take());
    product.billing_frequency = record.billing_frequency.or(product.billing_frequency.take());
}

fn merge_new(product: &mut NewProduct, record: PriceRecord) {
    product.unit_price = record.unit_price;
    keep_or_replace(&mut product.name, record.product_name);
    keep_or_replace(&mut product.currency, record.currency);
    product.description = record.description.or(product.description.take());
    product.category = record.category.or(product.category.take());
    product.commitment_term = record.commitment_term.or(product.commitment_term.take());
    product.billing_frequency = record.billing_frequency.or(product.billing_frequency.take());
}

fn keep_or_replace(current: &mut String, incoming: Option<String>) {
    if let Some(value) = incoming {
        *current = value;
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use proposal_core::audit::AuditAction;
    use proposal_core::config::ImportConfig;
    use proposal_core::domain::product::NewProduct;
    use proposal_db::repositories::{InMemoryAuditRepository, InMemoryProductRepository, ProductRepository};

    use super::{decode_price_list, list_import_files, PriceImportPipeline, PriceRow};

    const HEADER: &str =
        "ProductName,SKU,Description,Category,UnitPrice,Currency,CommitmentTerm,BillingFrequency\n";

    fn setup() -> (PriceImportPipeline, Arc<InMemoryProductRepository>, Arc<InMemoryAuditRepository>) {
        let audit = Arc::new(InMemoryAuditRepository::default());
        let products = Arc::new(InMemoryProductRepository::new(audit.clone()));
        (PriceImportPipeline::new(products.clone(), "EUR"), products, audit)
    }

    #[tokio::test]
    async fn malformed_row_is_reported_and_the_rest_applied() {
        let (pipeline, products, audit) = setup();
        let csv = format!(
            "{HEADER}\
             Voice Basic,VOICE-1,,Voice,10.00,EUR,12 months,Monthly\n\
             Voice Pro,VOICE-2,,Voice,20.00,EUR,12 months,Monthly\n\
             Broken,BROKEN-3,,Voice,abc,EUR,,\n\
             Fibre 1G,DATA-4,,Data,99.90,,24 months,Monthly\n\
             SD-WAN,NET-5,,Network,150,,,\n"
        );

        let rows = decode_price_list(csv.as_bytes()).expect("decode");
        let report = pipeline.import("prices.csv", rows, "importer").await.expect("import");

        assert_eq!(report.total_rows, 5);
        assert_eq!(report.imported, 4);
        assert_eq!(report.updated, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.errors, vec!["Row SKU 'BROKEN-3': UnitPrice `abc` is not a number"]);
        assert_eq!(products.list_active().await.expect("list").len(), 4);

        let fibre = products.find_by_sku("DATA-4").await.expect("find").expect("present");
        assert_eq!(fibre.currency, "EUR");
        assert_eq!(fibre.unit_price, Decimal::new(9990, 2));

        let entries = audit.all().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::PriceImport);
        assert_eq!(
            entries[0].detail.as_deref(),
            Some("File: prices.csv, Imported: 4, Updated: 0, Skipped: 1")
        );
    }

    #[tokio::test]
    async fn existing_products_are_updated_and_reactivated() {
        let (pipeline, products, _audit) = setup();
        let stored = products
            .insert(NewProduct {
                sku: "VOICE-1".to_string(),
                name: "Voice Basic".to_string(),
                description: Some("Hosted voice".to_string()),
                category: Some("Voice".to_string()),
                unit_price: Decimal::new(1000, 2),
                currency: "EUR".to_string(),
                commitment_term: None,
                billing_frequency: None,
            })
            .await
            .expect("insert");
        products
            .set_active(
                stored.id,
                false,
                proposal_core::audit::AuditEntry::new(
                    AuditAction::ProductDeactivated,
                    proposal_core::audit::ENTITY_PRODUCT,
                    Some(stored.id.to_string()),
                    "ops",
                ),
            )
            .await
            .expect("deactivate");

        let csv = format!(
            "{HEADER}\
             ,VOICE-1,,,12.50,,,\n\
             ,,,,1.00,,,\n\
             Voice Basic Plus,VOICE-1,,,13.00,,,Monthly\n"
        );
        let report = pipeline
            .import("update.csv", decode_price_list(csv.as_bytes()).expect("decode"), "importer")
            .await
            .expect("import");

        assert_eq!((report.imported, report.updated, report.skipped), (0, 2, 1));
        assert!(report.errors.is_empty());

        let product = products.find_by_id(stored.id).await.expect("find").expect("present");
        assert!(product.active);
        assert_eq!(product.name, "Voice Basic Plus");
        assert_eq!(product.unit_price, Decimal::new(1300, 2));
        assert_eq!(product.description.as_deref(), Some("Hosted voice"));
        assert_eq!(product.billing_frequency.as_deref(), Some("Monthly"));
    }

    #[tokio::test]
    async fn duplicate_new_skus_merge_into_one_insert() {
        let (pipeline, products, _audit) = setup();
        let csv = format!("{HEADER}Data,DATA-1,,,5.00,,,\nData Plus,DATA-1,,,6.00,usd,,\n");

        let report = pipeline
            .import("dupes.csv", decode_price_list(csv.as_bytes()).expect("decode"), "importer")
            .await
            .expect("import");

        assert_eq!((report.imported, report.updated), (1, 1));
        let product = products.find_by_sku("DATA-1").await.expect("find").expect("present");
        assert_eq!(product.name, "Data Plus");
        assert_eq!(product.currency, "USD");
    }

    #[test]
    fn missing_sku_column_fails_the_file() {
        assert!(decode_price_list("Name,Price\nVoice,10\n".as_bytes()).is_err());
    }

    #[test]
    fn short_rows_are_malformed_not_fatal() {
        let rows = decode_price_list(format!("{HEADER}Voice,VOICE-1\n").as_bytes()).expect("decode");
        assert!(matches!(
            &rows[..],
            [PriceRow::Malformed { line: 2, sku: Some(sku), .. }] if sku == "VOICE-1"
        ));
    }

    #[test]
    fn import_folder_lists_accepted_files_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["b-prices.csv", "a-prices.CSV", "notes.md"] {
            std::fs::write(dir.path().join(name), HEADER).expect("write");
        }
        let config = ImportConfig { folder: dir.path().to_path_buf(), allowed_extensions: vec!["csv".to_string()] };

        assert_eq!(list_import_files(&config).expect("list"), vec!["a-prices.CSV", "b-prices.csv"]);

        let missing = ImportConfig { folder: PathBuf::from("/nonexistent/price-import"), ..config };
        assert!(list_import_files(&missing).expect("list").is_empty());
    }
}
