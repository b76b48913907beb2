pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "proposal",
    about = "Proposal operator CLI",
    long_about = "Operate the proposal service: migrations, catalog seed, price imports, templates and config inspection.",
    after_help = "Examples:\n  proposal migrate\n  proposal import --list\n  proposal import prices-2026-q1.csv\n  proposal config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the reference product catalog; existing SKUs are left untouched")]
    Seed,
    #[command(about = "Import a CSV price list, or list importable files in the import folder")]
    Import {
        #[arg(help = "File name in the import folder, or a path to a CSV file")]
        file: Option<String>,
        #[arg(long, conflicts_with = "file", help = "List importable files instead of importing")]
        list: bool,
        #[arg(long, default_value = "cli", help = "Actor recorded in the audit log")]
        actor: String,
    },
    #[command(about = "List the document templates available for quotes")]
    Templates,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Import { list: true, .. } => commands::import::list(),
        Command::Import { file: Some(file), actor, .. } => commands::import::run(&file, &actor),
        Command::Import { file: None, .. } => commands::CommandResult::failure(
            "import",
            "usage",
            "pass a price list file or --list",
            64,
        ),
        Command::Templates => commands::templates::run(),
        Command::Config => commands::config::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
