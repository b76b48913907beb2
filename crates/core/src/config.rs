use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub documents: DocumentsConfig,
    pub quotes: QuotesConfig,
    pub import: ImportConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub public_base_url: String,
    pub signing_key: SecretString,
    pub link_ttl_hours: u32,
}

#[derive(Clone, Debug)]
pub struct DocumentsConfig {
    pub template_dir: PathBuf,
    pub default_template: String,
    pub brand_name: String,
}

#[derive(Clone, Debug)]
pub struct QuotesConfig {
    pub default_validity_days: u32,
    pub default_currency: String,
    pub expiry_sweep_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ImportConfig {
    pub folder: PathBuf,
    pub allowed_extensions: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub storage_root: Option<PathBuf>,
    pub signing_key: Option<String>,
    pub template_dir: Option<PathBuf>,
    pub import_folder: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_CONFIG_FILE: &str = "proposal.toml";
const MIN_SIGNING_KEY_LEN: usize = 16;

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://proposal.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            storage: StorageConfig {
                root: PathBuf::from("artifacts"),
                public_base_url: "http://127.0.0.1:8080".to_string(),
                signing_key: String::new().into(),
                link_ttl_hours: 24,
            },
            documents: DocumentsConfig {
                template_dir: PathBuf::from("templates"),
                default_template: "standard".to_string(),
                brand_name: "Business Proposals".to_string(),
            },
            quotes: QuotesConfig {
                default_validity_days: 30,
                default_currency: "EUR".to_string(),
                expiry_sweep_secs: 300,
            },
            import: ImportConfig {
                folder: PathBuf::from("price-import"),
                allowed_extensions: vec!["csv".to_string()],
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl ImportConfig {
    /// `true` when `path` carries one of the configured extensions (case-insensitive).
    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| {
                let extension = extension.to_ascii_lowercase();
                self.allowed_extensions.iter().any(|allowed| allowed == &extension)
            })
            .unwrap_or(false)
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.normalize();
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(storage) = patch.storage {
            if let Some(root) = storage.root {
                self.storage.root = root;
            }
            if let Some(public_base_url) = storage.public_base_url {
                self.storage.public_base_url = public_base_url;
            }
            if let Some(signing_key) = storage.signing_key {
                self.storage.signing_key = secret_value(signing_key);
            }
            if let Some(link_ttl_hours) = storage.link_ttl_hours {
                self.storage.link_ttl_hours = link_ttl_hours;
            }
        }

        if let Some(documents) = patch.documents {
            if let Some(template_dir) = documents.template_dir {
                self.documents.template_dir = template_dir;
            }
            if let Some(default_template) = documents.default_template {
                self.documents.default_template = default_template;
            }
            if let Some(brand_name) = documents.brand_name {
                self.documents.brand_name = brand_name;
            }
        }

        if let Some(quotes) = patch.quotes {
            if let Some(default_validity_days) = quotes.default_validity_days {
                self.quotes.default_validity_days = default_validity_days;
            }
            if let Some(default_currency) = quotes.default_currency {
                self.quotes.default_currency = default_currency;
            }
            if let Some(expiry_sweep_secs) = quotes.expiry_sweep_secs {
                self.quotes.expiry_sweep_secs = expiry_sweep_secs;
            }
        }

        if let Some(import) = patch.import {
            if let Some(folder) = import.folder {
                self.import.folder = folder;
            }
            if let Some(allowed_extensions) = import.allowed_extensions {
                self.import.allowed_extensions = allowed_extensions;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PROPOSAL_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PROPOSAL_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("PROPOSAL_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PROPOSAL_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PROPOSAL_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PROPOSAL_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PROPOSAL_SERVER_PORT") {
            self.server.port = parse_u16("PROPOSAL_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PROPOSAL_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PROPOSAL_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("PROPOSAL_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(value);
        }
        if let Some(value) = read_env("PROPOSAL_STORAGE_PUBLIC_BASE_URL") {
            self.storage.public_base_url = value;
        }
        if let Some(value) = read_env("PROPOSAL_STORAGE_SIGNING_KEY") {
            self.storage.signing_key = secret_value(value);
        }
        if let Some(value) = read_env("PROPOSAL_STORAGE_LINK_TTL_HOURS") {
            self.storage.link_ttl_hours = parse_u32("PROPOSAL_STORAGE_LINK_TTL_HOURS", &value)?;
        }

        if let Some(value) = read_env("PROPOSAL_DOCUMENTS_TEMPLATE_DIR") {
            self.documents.template_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("PROPOSAL_DOCUMENTS_DEFAULT_TEMPLATE") {
            self.documents.default_template = value;
        }
        if let Some(value) = read_env("PROPOSAL_DOCUMENTS_BRAND_NAME") {
            self.documents.brand_name = value;
        }

        if let Some(value) = read_env("PROPOSAL_QUOTES_DEFAULT_VALIDITY_DAYS") {
            self.quotes.default_validity_days =
                parse_u32("PROPOSAL_QUOTES_DEFAULT_VALIDITY_DAYS", &value)?;
        }
        if let Some(value) = read_env("PROPOSAL_QUOTES_DEFAULT_CURRENCY") {
            self.quotes.default_currency = value;
        }
        if let Some(value) = read_env("PROPOSAL_QUOTES_EXPIRY_SWEEP_SECS") {
            self.quotes.expiry_sweep_secs =
                parse_u64("PROPOSAL_QUOTES_EXPIRY_SWEEP_SECS", &value)?;
        }

        if let Some(value) = read_env("PROPOSAL_IMPORT_FOLDER") {
            self.import.folder = PathBuf::from(value);
        }
        if let Some(value) = read_env("PROPOSAL_IMPORT_ALLOWED_EXTENSIONS") {
            self.import.allowed_extensions = value.split(',').map(str::to_string).collect();
        }

        let log_level =
            read_env("PROPOSAL_LOGGING_LEVEL").or_else(|| read_env("PROPOSAL_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PROPOSAL_LOGGING_FORMAT").or_else(|| read_env("PROPOSAL_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(storage_root) = overrides.storage_root {
            self.storage.root = storage_root;
        }
        if let Some(signing_key) = overrides.signing_key {
            self.storage.signing_key = secret_value(signing_key);
        }
        if let Some(template_dir) = overrides.template_dir {
            self.documents.template_dir = template_dir;
        }
        if let Some(import_folder) = overrides.import_folder {
            self.import.folder = import_folder;
        }
    }

    fn normalize(&mut self) {
        self.quotes.default_currency = self.quotes.default_currency.trim().to_ascii_uppercase();
        self.storage.public_base_url =
            self.storage.public_base_url.trim().trim_end_matches('/').to_string();
        self.import.allowed_extensions = self
            .import
            .allowed_extensions
            .iter()
            .map(|extension| extension.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|extension| !extension.is_empty())
            .collect();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_storage(&self.storage)?;
        validate_documents(&self.documents)?;
        validate_quotes(&self.quotes)?;
        validate_import(&self.import)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
    if storage.root.as_os_str().is_empty() {
        return Err(ConfigError::Validation("storage.root must not be empty".to_string()));
    }

    let base_url = &storage.public_base_url;
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "storage.public_base_url must start with http:// or https://".to_string(),
        ));
    }

    let signing_key = storage.signing_key.expose_secret();
    if signing_key.trim().is_empty() {
        return Err(ConfigError::Validation(
            "storage.signing_key is required to sign download links (set PROPOSAL_STORAGE_SIGNING_KEY)"
                .to_string(),
        ));
    }
    if signing_key.len() < MIN_SIGNING_KEY_LEN {
        return Err(ConfigError::Validation(format!(
            "storage.signing_key must be at least {MIN_SIGNING_KEY_LEN} characters"
        )));
    }

    if storage.link_ttl_hours == 0 || storage.link_ttl_hours > 168 {
        return Err(ConfigError::Validation(
            "storage.link_ttl_hours must be in range 1..=168".to_string(),
        ));
    }

    Ok(())
}

fn validate_documents(documents: &DocumentsConfig) -> Result<(), ConfigError> {
    let template = documents.default_template.trim();
    if template.is_empty() {
        return Err(ConfigError::Validation(
            "documents.default_template must not be empty".to_string(),
        ));
    }
    if !template.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_') {
        return Err(ConfigError::Validation(
            "documents.default_template may only contain letters, digits, `-` and `_`".to_string(),
        ));
    }

    if documents.brand_name.trim().is_empty() {
        return Err(ConfigError::Validation("documents.brand_name must not be empty".to_string()));
    }

    Ok(())
}

fn validate_quotes(quotes: &QuotesConfig) -> Result<(), ConfigError> {
    if quotes.default_validity_days == 0 || quotes.default_validity_days > 365 {
        return Err(ConfigError::Validation(
            "quotes.default_validity_days must be in range 1..=365".to_string(),
        ));
    }

    let currency = &quotes.default_currency;
    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ConfigError::Validation(format!(
            "quotes.default_currency must be a three-letter ISO code, got `{currency}`"
        )));
    }

    if quotes.expiry_sweep_secs == 0 {
        return Err(ConfigError::Validation(
            "quotes.expiry_sweep_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_import(import: &ImportConfig) -> Result<(), ConfigError> {
    if import.allowed_extensions.is_empty() {
        return Err(ConfigError::Validation(
            "import.allowed_extensions must list at least one extension".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    storage: Option<StoragePatch>,
    documents: Option<DocumentsPatch>,
    quotes: Option<QuotesPatch>,
    import: Option<ImportPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    root: Option<PathBuf>,
    public_base_url: Option<String>,
    signing_key: Option<String>,
    link_ttl_hours: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct DocumentsPatch {
    template_dir: Option<PathBuf>,
    default_template: Option<String>,
    brand_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct QuotesPatch {
    default_validity_days: Option<u32>,
    default_currency: Option<String>,
    expiry_sweep_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ImportPatch {
    folder: Option<PathBuf>,
    allowed_extensions: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
