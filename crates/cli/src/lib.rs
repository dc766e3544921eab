pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use stockbot_discord::sync::SyncStrategy;

#[derive(Debug, Parser)]
#[command(
    name = "stockbot",
    about = "Stockbot operator CLI",
    long_about = "Register slash commands, inspect configuration, and check Discord readiness.",
    after_help = "Examples:\n  stockbot sync --dry-run\n  stockbot doctor --json\n  stockbot announce \"Market review is ready\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Reconcile registered slash commands with the local manifest")]
    Sync {
        #[arg(
            long,
            default_value_t = SyncStrategy::Incremental,
            help = "incremental (diff and apply) or replace (clear then recreate)"
        )]
        strategy: SyncStrategy,
        #[arg(long, help = "Report the planned changes without calling any mutating endpoint")]
        dry_run: bool,
    },
    #[command(about = "Print the command manifest as registration payloads")]
    Manifest,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, interaction credentials, and command registration")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Post a message to the configured announcement channel")]
    Announce {
        #[arg(help = "Message text; truncated to the platform limit")]
        message: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Sync { strategy, dry_run } => commands::sync::run(strategy, dry_run),
        Command::Manifest => commands::manifest::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Announce { message } => commands::announce::run(&message),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
