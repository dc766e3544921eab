use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use stockbot_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key_path: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let discord = &config.discord;
    let interactions = &config.interactions;
    let server = &config.server;
    let analysis = &config.analysis;

    vec![
        Field {
            key_path: "discord.application_id",
            value: optional(discord.application_id.as_deref()),
            env_keys: &["STOCKBOT_DISCORD_APPLICATION_ID", "DISCORD_APPLICATION_ID"],
        },
        Field {
            key_path: "discord.public_key",
            value: optional(discord.public_key.as_deref()),
            env_keys: &["STOCKBOT_DISCORD_PUBLIC_KEY", "DISCORD_PUBLIC_KEY"],
        },
        Field {
            key_path: "discord.bot_token",
            value: redact_secret(discord.bot_token.as_ref()),
            env_keys: &["STOCKBOT_DISCORD_BOT_TOKEN", "DISCORD_BOT_TOKEN"],
        },
        Field {
            key_path: "discord.guild_id",
            value: optional(discord.guild_id.as_deref()),
            env_keys: &["STOCKBOT_DISCORD_GUILD_ID", "DISCORD_GUILD_ID"],
        },
        Field {
            key_path: "discord.channel_id",
            value: optional(discord.channel_id.as_deref()),
            env_keys: &["STOCKBOT_DISCORD_CHANNEL_ID", "DISCORD_MAIN_CHANNEL_ID"],
        },
        Field {
            key_path: "discord.api_base_url",
            value: discord.api_base_url.clone(),
            env_keys: &["STOCKBOT_DISCORD_API_BASE_URL"],
        },
        Field {
            key_path: "discord.max_timestamp_skew_secs",
            value: discord.max_timestamp_skew_secs.to_string(),
            env_keys: &["STOCKBOT_DISCORD_MAX_TIMESTAMP_SKEW_SECS"],
        },
        Field {
            key_path: "interactions.deadline_ms",
            value: interactions.deadline_ms.to_string(),
            env_keys: &["STOCKBOT_INTERACTIONS_DEADLINE_MS"],
        },
        Field {
            key_path: "interactions.ack_margin_ms",
            value: interactions.ack_margin_ms.to_string(),
            env_keys: &["STOCKBOT_INTERACTIONS_ACK_MARGIN_MS"],
        },
        Field {
            key_path: "interactions.followup_expiry_secs",
            value: interactions.followup_expiry_secs.to_string(),
            env_keys: &["STOCKBOT_INTERACTIONS_FOLLOWUP_EXPIRY_SECS"],
        },
        Field {
            key_path: "server.bind_address",
            value: server.bind_address.clone(),
            env_keys: &["STOCKBOT_SERVER_BIND_ADDRESS"],
        },
        Field {
            key_path: "server.port",
            value: server.port.to_string(),
            env_keys: &["STOCKBOT_SERVER_PORT"],
        },
        Field {
            key_path: "server.interactions_path",
            value: server.interactions_path.clone(),
            env_keys: &["STOCKBOT_SERVER_INTERACTIONS_PATH"],
        },
        Field {
            key_path: "server.graceful_shutdown_secs",
            value: server.graceful_shutdown_secs.to_string(),
            env_keys: &["STOCKBOT_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        },
        Field {
            key_path: "analysis.endpoint_url",
            value: optional(analysis.endpoint_url.as_deref()),
            env_keys: &["STOCKBOT_ANALYSIS_ENDPOINT_URL"],
        },
        Field {
            key_path: "analysis.api_key",
            value: redact_secret(analysis.api_key.as_ref()),
            env_keys: &["STOCKBOT_ANALYSIS_API_KEY"],
        },
        Field {
            key_path: "analysis.timeout_secs",
            value: analysis.timeout_secs.to_string(),
            env_keys: &["STOCKBOT_ANALYSIS_TIMEOUT_SECS"],
        },
        Field {
            key_path: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["STOCKBOT_LOGGING_LEVEL", "STOCKBOT_LOG_LEVEL"],
        },
        Field {
            key_path: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_keys: &["STOCKBOT_LOGGING_FORMAT", "STOCKBOT_LOG_FORMAT"],
        },
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("stockbot.toml"), PathBuf::from("config/stockbot.toml")]
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
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
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

fn optional(value: Option<&str>) -> String {
    value.map(str::to_string).unwrap_or_else(|| "<unset>".to_string())
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    let rendered = if secret.is_some() { "<redacted>" } else { "<unset>" };
    rendered.to_string()
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_secret};

    #[test]
    fn nested_key_paths_are_detected_in_file_doc() {
        let doc: Value = "[discord]\napplication_id = \"42\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "discord.application_id"));
        assert!(!contains_path(&doc, "discord.bot_token"));
        assert!(!contains_path(&doc, "server.port"));
    }

    #[test]
    fn secrets_are_never_rendered() {
        let token = secrecy::SecretString::from("super-secret-token".to_string());
        assert_eq!(redact_secret(Some(&token)), "<redacted>");
        assert_eq!(redact_secret(None), "<unset>");
    }
}
