//! Named document templates.
//!
//! Templates are Tera sources producing layout markup, one directive per line (see
//! [`crate::layout`]). Two templates are built in; `*.tera` files in the configured
//! template directory are added by file stem and may shadow a built-in name.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use tera::{Context, Tera};
use tracing::{debug, warn};

use crate::model::QuoteDocument;
use crate::DocumentError;

pub const FALLBACK_TEMPLATE: &str = "standard";

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("standard", include_str!("../templates/standard.tera")),
    ("compact", include_str!("../templates/compact.tera")),
];

const TEMPLATE_EXTENSION: &str = "tera";

/// Register the filters available to every template.
///
/// - `cell`: flattens a value onto one markup line; `|` would split a cell and
///   newlines would start a new directive.
pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter("cell", cell_filter);
}

fn cell_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let text = match value {
        tera::Value::String(text) => text.clone(),
        tera::Value::Null => String::new(),
        other => other.to_string(),
    };
    let flattened = text
        .replace('|', "/")
        .lines()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    Ok(tera::Value::String(flattened))
}

/// Built-in templates, compiled once per process.
fn builtin() -> Result<&'static Tera, DocumentError> {
    static BUILTIN: OnceLock<Result<Tera, String>> = OnceLock::new();
    BUILTIN
        .get_or_init(|| {
            let mut tera = Tera::default();
            register_template_filters(&mut tera);
            tera.add_raw_templates(BUILTIN_TEMPLATES.iter().copied())
                .map_err(|error| error.to_string())?;
            Ok(tera)
        })
        .as_ref()
        .map_err(|message| DocumentError::Template {
            name: FALLBACK_TEMPLATE.to_string(),
            message: message.clone(),
        })
}

/// Markup produced by a template, tagged with the template that actually rendered it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedMarkup {
    pub template: String,
    pub markup: String,
    pub fell_back: bool,
}

#[derive(Debug)]
pub struct TemplateLibrary {
    custom: Tera,
    custom_names: BTreeSet<String>,
}

impl Default for TemplateLibrary {
    fn default() -> Self {
        Self::builtin_only()
    }
}

impl TemplateLibrary {
    pub fn builtin_only() -> Self {
        let mut custom = Tera::default();
        register_template_filters(&mut custom);
        Self { custom, custom_names: BTreeSet::new() }
    }

    /// Adds every parseable `*.tera` file under `dir`. A missing directory leaves the
    /// built-ins only; a template that fails to parse is skipped with a warning.
    pub fn load(dir: &Path) -> Result<Self, DocumentError> {
        let mut library = Self::builtin_only();
        if !dir.is_dir() {
            debug!(
                event_name = "documents.templates.dir_missing",
                template_dir = %dir.display(),
                "template directory not found, using built-in templates"
            );
            return Ok(library);
        }

        let entries = fs::read_dir(dir)
            .map_err(|source| DocumentError::Io { path: dir.to_path_buf(), source })?;
        let mut paths: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().and_then(|ext| ext.to_str()) == Some(TEMPLATE_EXTENSION)
            })
            .collect();
        paths.sort();

        for path in paths {
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let source = fs::read_to_string(&path)
                .map_err(|source| DocumentError::Io { path: path.clone(), source })?;
            library.add(name, &source);
        }
        Ok(library)
    }

    /// Returns `false` when the source does not parse; the template is then unavailable.
    pub fn add(&mut self, name: &str, source: &str) -> bool {
        match self.custom.add_raw_template(name, source) {
            Ok(()) => {
                self.custom_names.insert(name.to_string());
                true
            }
            Err(error) => {
                warn!(
                    event_name = "documents.templates.invalid",
                    template = name,
                    error = %error,
                    "template could not be parsed and was skipped"
                );
                false
            }
        }
    }

    /// Sorted, de-duplicated names of every usable template.
    pub fn names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> =
            BUILTIN_TEMPLATES.iter().map(|(name, _)| (*name).to_string()).collect();
        names.extend(self.custom_names.iter().cloned());
        names.into_iter().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.custom_names.contains(name) || BUILTIN_TEMPLATES.iter().any(|(known, _)| *known == name)
    }

    /// Renders `requested` and falls back to the built-in standard layout when the
    /// template is unknown or fails to render.
    pub fn render(
        &self,
        requested: &str,
        document: &QuoteDocument,
    ) -> Result<RenderedMarkup, DocumentError> {
        let mut context = Context::new();
        context.insert("doc", document);

        if self.contains(requested) {
            match self.render_named(requested, &context) {
                Ok(markup) => {
                    return Ok(RenderedMarkup {
                        template: requested.to_string(),
                        markup,
                        fell_back: false,
                    })
                }
                Err(error) => warn!(
                    event_name = "documents.templates.fallback",
                    template = requested,
                    quote_number = %document.quote_number,
                    error = %error,
                    "template failed to render, using the built-in layout"
                ),
            }
        } else {
            warn!(
                event_name = "documents.templates.fallback",
                template = requested,
                quote_number = %document.quote_number,
                "template not found, using the built-in layout"
            );
        }

        let markup = builtin()?.render(FALLBACK_TEMPLATE, &context).map_err(|error| {
            DocumentError::Template { name: FALLBACK_TEMPLATE.to_string(), message: error.to_string() }
        })?;
        Ok(RenderedMarkup { template: FALLBACK_TEMPLATE.to_string(), markup, fell_back: true })
    }

    fn render_named(&self, name: &str, context: &Context) -> Result<String, tera::Error> {
        if self.custom_names.contains(name) {
            return self.custom.render(name, context);
        }
        match builtin() {
            Ok(tera) => tera.render(name, context),
            Err(error) => Err(tera::Error::msg(error.to_string())),
        }
    }
}
