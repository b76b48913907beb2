use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use proposal_core::config::{AppConfig, DEFAULT_CONFIG_FILE};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::{load_config, CommandResult};

/// Prints the effective configuration, one line per key, with where each value came from.
pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let output = render(&config, config_file_doc.as_ref(), config_file_path.as_deref(), |key| {
        env::var_os(key).is_some()
    });
    CommandResult { exit_code: 0, output }
}

fn entries(config: &AppConfig) -> Vec<(&'static str, String)> {
    vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("storage.root", config.storage.root.display().to_string()),
        ("storage.public_base_url", config.storage.public_base_url.clone()),
        ("storage.signing_key", redact_secret(config.storage.signing_key.expose_secret())),
        ("storage.link_ttl_hours", config.storage.link_ttl_hours.to_string()),
        ("documents.template_dir", config.documents.template_dir.display().to_string()),
        ("documents.default_template", config.documents.default_template.clone()),
        ("documents.brand_name", config.documents.brand_name.clone()),
        ("quotes.default_validity_days", config.quotes.default_validity_days.to_string()),
        ("quotes.default_currency", config.quotes.default_currency.clone()),
        ("quotes.expiry_sweep_secs", config.quotes.expiry_sweep_secs.to_string()),
        ("import.folder", config.import.folder.display().to_string()),
        ("import.allowed_extensions", config.import.allowed_extensions.join(",")),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format)),
    ]
}

fn render(
    config: &AppConfig,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
    env_is_set: impl Fn(&str) -> bool,
) -> String {
    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value) in entries(config) {
        let source = field_source(key, &env_is_set, config_file_doc, config_file_path);
        lines.push(render_line(key, &value, source));
    }
    lines.join("\n")
}

fn env_key(key_path: &str) -> String {
    format!("PROPOSAL_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_is_set: &impl Fn(&str) -> bool,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let env_key = env_key(key_path);
    if env_is_set(&env_key) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Never prints key material: only whether it is set and how long it is.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<unset>".to_string();
    }
    format!("<redacted, {} chars>", trimmed.chars().count())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use proposal_core::config::AppConfig;
    use toml::Value;

    use super::{env_key, redact_secret, render};

    #[test]
    fn env_keys_follow_the_section_and_field_name() {
        assert_eq!(env_key("storage.signing_key"), "PROPOSAL_STORAGE_SIGNING_KEY");
        assert_eq!(env_key("quotes.expiry_sweep_secs"), "PROPOSAL_QUOTES_EXPIRY_SWEEP_SECS");
    }

    #[test]
    fn signing_key_is_never_printed() {
        let mut config = AppConfig::default();
        config.storage.signing_key = "super-secret-signing-material".to_string().into();

        let output = render(&config, None, None, |_| false);
        assert!(!output.contains("super-secret"));
        assert!(output.contains("- storage.signing_key = <redacted, 29 chars> (source: default)"));
        assert_eq!(redact_secret("   "), "<unset>");
    }

    #[test]
    fn sources_are_attributed_env_then_file_then_default() {
        let doc: Value = "[database]\nurl = \"sqlite://file.db\"\n[quotes]\ndefault_currency = \"USD\"\n"
            .parse()
            .expect("toml");
        let output = render(&AppConfig::default(), Some(&doc), Some(Path::new("proposal.toml")), |key| {
            key == "PROPOSAL_QUOTES_DEFAULT_CURRENCY"
        });

        assert!(output.contains("- database.url = sqlite://proposal.db (source: file (proposal.toml))"));
        assert!(output.contains(
            "- quotes.default_currency = EUR (source: env (PROPOSAL_QUOTES_DEFAULT_CURRENCY))"
        ));
        assert!(output.contains("- server.port = 8080 (source: default)"));
    }
}
