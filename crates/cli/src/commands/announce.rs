use stockbot_core::config::{AppConfig, LoadOptions};
use stockbot_discord::{messages::ReplyMessage, rest::DiscordRestClient};

use crate::commands::{runtime, CommandResult, EXIT_CONFIG, EXIT_FAILURE};

const COMMAND: &str = "announce";

/// Posts `message` to the configured announcement channel as the bot.
pub fn run(message: &str) -> CommandResult {
    if message.trim().is_empty() {
        return CommandResult::failure(COMMAND, "invalid_input", "message must not be empty", EXIT_CONFIG);
    }

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
    let (bot_token, channel_id) = match config.require_announcements() {
        Ok(values) => values,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), EXIT_CONFIG);
        }
    };

    let application_id = config.discord.application_id.as_deref().unwrap_or_default();
    let client = match DiscordRestClient::new(&config.discord.api_base_url, application_id) {
        Ok(client) => client.with_bot_token(bot_token),
        Err(error) => {
            return CommandResult::failure(COMMAND, "rest_client", error.to_string(), EXIT_FAILURE);
        }
    };
    let runtime = match runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let reply = ReplyMessage::public(message.trim());
    match runtime.block_on(client.post_channel_message(&channel_id, &reply)) {
        Ok(()) => CommandResult::success(COMMAND, format!("posted to channel {channel_id}")),
        Err(error) => CommandResult::failure(COMMAND, "announce_failed", error.to_string(), EXIT_FAILURE),
    }
}
