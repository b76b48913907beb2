use proposal_documents::{DocumentAssembler, QuoteRenderer};
use serde_json::json;

use crate::commands::{load_config, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("templates") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    match DocumentAssembler::from_config(&config.documents) {
        Ok(assembler) => {
            let names = assembler.templates();
            CommandResult::success_with_data(
                "templates",
                format!(
                    "{} template(s) available; default is `{}`",
                    names.len(),
                    config.documents.default_template
                ),
                Some(json!({
                    "template_dir": config.documents.template_dir.display().to_string(),
                    "default": config.documents.default_template,
                    "templates": names,
                })),
            )
        }
        Err(error) => CommandResult::failure("templates", "template_load", error.to_string(), 7),
    }
}
