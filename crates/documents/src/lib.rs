//! Quote document assembly: merge a quote into a named template, lay the result out
//! on A4 pages and serialize it as PDF.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use proposal_core::config::DocumentsConfig;
use proposal_core::domain::quote::Quote;

pub mod layout;
pub mod model;
pub mod pdf;
pub mod templates;

pub use model::QuoteDocument;
pub use templates::{TemplateLibrary, FALLBACK_TEMPLATE};

pub const PREVIEW_WATERMARK: &str = "PREVIEW";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("template `{name}` failed to render: {message}")]
    Template { name: String, message: String },
    #[error("line item {row} has {found} cells, the table has {expected} columns")]
    LineItem { row: usize, expected: usize, found: usize },
    #[error("invalid layout markup on line {line}: {message}")]
    Markup { line: usize, message: String },
    #[error("pdf serialization failed: {0}")]
    Pdf(String),
    #[error("cannot read template source {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    /// Template that produced the document, after any fallback.
    pub template: String,
    pub page_count: usize,
}

pub trait QuoteRenderer: Send + Sync {
    /// Deterministic: the same quote and flag always produce the same bytes.
    fn render(&self, quote: &Quote, preview: bool) -> Result<RenderedDocument, DocumentError>;

    fn templates(&self) -> Vec<String>;
}

#[derive(Debug)]
pub struct DocumentAssembler {
    library: TemplateLibrary,
    brand_name: String,
    default_template: String,
}

impl DocumentAssembler {
    pub fn new(
        library: TemplateLibrary,
        brand_name: impl Into<String>,
        default_template: impl Into<String>,
    ) -> Self {
        Self { library, brand_name: brand_name.into(), default_template: default_template.into() }
    }

    pub fn from_config(config: &DocumentsConfig) -> Result<Self, DocumentError> {
        let library = TemplateLibrary::load(&config.template_dir)?;
        info!(
            event_name = "documents.templates.loaded",
            template_dir = %config.template_dir.display(),
            templates = ?library.names(),
            "document templates ready"
        );
        Ok(Self::new(library, config.brand_name.clone(), config.default_template.clone()))
    }
}

impl QuoteRenderer for DocumentAssembler {
    fn render(&self, quote: &Quote, preview: bool) -> Result<RenderedDocument, DocumentError> {
        let requested = quote.template_name.as_deref().unwrap_or(&self.default_template);
        let document = QuoteDocument::from_quote(quote, &self.brand_name, preview);
        let rendered = self.library.render(requested, &document)?;

        let blocks = layout::parse_markup(&rendered.markup)?;
        let pages = layout::paginate(&blocks);
        let bytes = pdf::write_pdf(&pages, preview.then_some(PREVIEW_WATERMARK))?;

        debug!(
            event_name = "documents.render.completed",
            quote_number = %quote.quote_number,
            template = %rendered.template,
            preview,
            pages = pages.len(),
            size = bytes.len(),
            "quote document rendered"
        );
        Ok(RenderedDocument { bytes, template: rendered.template, page_count: pages.len() })
    }

    fn templates(&self) -> Vec<String> {
        self.library.names()
    }
}
