use std::sync::Arc;

use stockbot_core::config::{AppConfig, LoadOptions};
use stockbot_discord::{
    manifest::{default_manifest, Manifest},
    rest::DiscordRestClient,
    sync::{CommandApi, CommandSyncer, SyncStatus, SyncStrategy},
};

use crate::commands::{runtime, CommandResult, EXIT_CONFIG, EXIT_FAILURE, EXIT_PARTIAL_FAILURE};

const COMMAND: &str = "sync";

pub fn run(strategy: SyncStrategy, dry_run: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                format!("configuration issue: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let credentials = match config.require_registration() {
        Ok(credentials) => credentials,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                error.to_string(),
                EXIT_CONFIG,
            );
        }
    };

    let client =
        match DiscordRestClient::new(&config.discord.api_base_url, &credentials.application_id) {
            Ok(client) => client
                .with_bot_token(credentials.bot_token)
                .with_guild(credentials.guild_id.clone()),
            Err(error) => {
                return CommandResult::failure(COMMAND, "rest_client", error.to_string(), EXIT_FAILURE);
            }
        };

    let manifest = match default_manifest() {
        Ok(manifest) => manifest,
        Err(error) => {
            return CommandResult::failure(COMMAND, "manifest", error.to_string(), EXIT_FAILURE);
        }
    };

    run_with(Arc::new(client), Arc::new(manifest), strategy, dry_run)
}

/// Applies `manifest` through `api` and maps the report onto an exit status.
pub fn run_with(
    api: Arc<dyn CommandApi>,
    manifest: Arc<Manifest>,
    strategy: SyncStrategy,
    dry_run: bool,
) -> CommandResult {
    let runtime = match runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let syncer = CommandSyncer::new(manifest, api);
    let report = match runtime.block_on(syncer.sync(strategy, dry_run)) {
        Ok(report) => report,
        Err(error) => {
            return CommandResult::failure(COMMAND, "sync_failed", error.to_string(), EXIT_FAILURE);
        }
    };

    let details = serde_json::to_value(&report).ok();
    match report.status() {
        SyncStatus::Success => CommandResult::success_with_details(COMMAND, report.to_string(), details),
        SyncStatus::PartialFailure => CommandResult::failure_with_details(
            COMMAND,
            "partial_failure",
            report.to_string(),
            EXIT_PARTIAL_FAILURE,
            details,
        ),
        SyncStatus::Failure => CommandResult::failure_with_details(
            COMMAND,
            "sync_failed",
            report.to_string(),
            EXIT_FAILURE,
            details,
        ),
    }
}
