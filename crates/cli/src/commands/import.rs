use std::path::{Path, PathBuf};
use std::sync::Arc;

use proposal_core::config::ImportConfig;
use proposal_db::repositories::SqlProductRepository;
use proposal_engine::import::list_import_files;
use proposal_engine::PriceImportPipeline;
use serde_json::json;

use crate::commands::{load_config, open_database, runtime, CommandResult, StepFailure};

pub fn list() -> CommandResult {
    let config = match load_config("import") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    match list_import_files(&config.import) {
        Ok(files) => CommandResult::success_with_data(
            "import",
            format!("{} importable file(s) in {}", files.len(), config.import.folder.display()),
            Some(json!({ "folder": config.import.folder.display().to_string(), "files": files })),
        ),
        Err(error) => CommandResult::failure("import", "import_folder", error.to_string(), 6),
    }
}

pub fn run(file: &str, actor: &str) -> CommandResult {
    let config = match load_config("import") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let path = match resolve_path(&config.import, file) {
        Ok(path) => path,
        Err(failure) => return CommandResult::from_step("import", failure),
    };
    let runtime = match runtime("import") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let pipeline = PriceImportPipeline::new(
            Arc::new(SqlProductRepository::new(pool.clone())),
            config.quotes.default_currency.clone(),
        );
        let report = pipeline
            .import_file(&path, actor)
            .await
            .map_err(|error| ("import_file", error.to_string(), 6u8));
        pool.close().await;
        report
    });

    match result {
        Ok(report) => CommandResult::success_with_data(
            "import",
            format!(
                "File: {}, Imported: {}, Updated: {}, Skipped: {}",
                report.source, report.imported, report.updated, report.skipped
            ),
            serde_json::to_value(&report).ok(),
        ),
        Err(failure) => CommandResult::from_step("import", failure),
    }
}

/// An existing path is used as given; a bare name is looked up in the import folder.
fn resolve_path(config: &ImportConfig, file: &str) -> Result<PathBuf, StepFailure> {
    let given = Path::new(file.trim());
    let path = if given.exists() || given.components().count() > 1 {
        given.to_path_buf()
    } else {
        config.folder.join(given)
    };

    if !config.accepts(&path) {
        return Err((
            "import_file",
            format!(
                "{} does not have an allowed extension ({})",
                path.display(),
                config.allowed_extensions.join(", ")
            ),
            6u8,
        ));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use proposal_core::config::ImportConfig;

    use super::resolve_path;

    fn config(folder: &std::path::Path) -> ImportConfig {
        ImportConfig { folder: folder.to_path_buf(), allowed_extensions: vec!["csv".to_string()] }
    }

    #[test]
    fn bare_names_resolve_inside_the_import_folder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = resolve_path(&config(dir.path()), "q1.csv").expect("resolved");
        assert_eq!(path, dir.path().join("q1.csv"));
    }

    #[test]
    fn existing_paths_are_used_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outside = dir.path().join("elsewhere.CSV");
        std::fs::write(&outside, "SKU\n").expect("write");
        let path = resolve_path(&config(&dir.path().join("imports")), outside.to_str().expect("utf8"))
            .expect("resolved");
        assert_eq!(path, outside);
    }

    #[test]
    fn disallowed_extensions_are_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (class, message, code) =
            resolve_path(&config(dir.path()), "prices.xlsx").expect_err("xlsx is not allowed");
        assert_eq!((class, code), ("import_file", 6));
        assert!(message.contains("csv"));
    }
}
