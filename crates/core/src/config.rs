use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v10";
pub const DEFAULT_INTERACTIONS_PATH: &str = "/discord/interactions";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub discord: DiscordConfig,
    pub interactions: InteractionsConfig,
    pub server: ServerConfig,
    pub analysis: AnalysisConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DiscordConfig {
    pub application_id: Option<String>,
    pub public_key: Option<String>,
    pub bot_token: Option<SecretString>,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub api_base_url: String,
    /// Zero disables the timestamp freshness check.
    pub max_timestamp_skew_secs: u64,
}

/// Platform timing limits. The documented values are defaults only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteractionsConfig {
    pub deadline_ms: u64,
    pub ack_margin_ms: u64,
    pub followup_expiry_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub interactions_path: String,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    pub endpoint_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
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
    pub application_id: Option<String>,
    pub public_key: Option<String>,
    pub bot_token: Option<String>,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub api_base_url: Option<String>,
    pub log_level: Option<String>,
    pub port: Option<u16>,
    pub deadline_ms: Option<u64>,
    pub followup_expiry_secs: Option<u64>,
    pub analysis_endpoint_url: Option<String>,
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

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            discord: DiscordConfig {
                application_id: None,
                public_key: None,
                bot_token: None,
                guild_id: None,
                channel_id: None,
                api_base_url: DEFAULT_API_BASE_URL.to_string(),
                max_timestamp_skew_secs: 300,
            },
            interactions: InteractionsConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                interactions_path: DEFAULT_INTERACTIONS_PATH.to_string(),
                graceful_shutdown_secs: 15,
            },
            analysis: AnalysisConfig { endpoint_url: None, api_key: None, timeout_secs: 300 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for InteractionsConfig {
    fn default() -> Self {
        Self { deadline_ms: 3_000, ack_margin_ms: 500, followup_expiry_secs: 900 }
    }
}

impl InteractionsConfig {
    /// Time the router may spend before it must send some acknowledgment.
    pub fn ack_budget(&self) -> Duration {
        Duration::from_millis(self.deadline_ms.saturating_sub(self.ack_margin_ms))
    }

    pub fn followup_expiry(&self) -> Duration {
        Duration::from_secs(self.followup_expiry_secs)
    }
}

impl DiscordConfig {
    pub fn max_timestamp_skew(&self) -> Option<Duration> {
        (self.max_timestamp_skew_secs > 0)
            .then(|| Duration::from_secs(self.max_timestamp_skew_secs))
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

/// Values the interaction webhook cannot run without.
#[derive(Clone, Debug)]
pub struct InteractionCredentials {
    pub application_id: String,
    pub public_key: String,
}

/// Values the command registration API cannot run without.
#[derive(Clone, Debug)]
pub struct RegistrationCredentials {
    pub application_id: String,
    pub bot_token: SecretString,
    pub guild_id: Option<String>,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("stockbot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(discord) = patch.discord {
            if let Some(application_id) = discord.application_id {
                self.discord.application_id = Some(application_id);
            }
            if let Some(public_key) = discord.public_key {
                self.discord.public_key = Some(public_key);
            }
            if let Some(bot_token_value) = discord.bot_token {
                self.discord.bot_token = Some(secret_value(bot_token_value));
            }
            if let Some(guild_id) = discord.guild_id {
                self.discord.guild_id = Some(guild_id);
            }
            if let Some(channel_id) = discord.channel_id {
                self.discord.channel_id = Some(channel_id);
            }
            if let Some(api_base_url) = discord.api_base_url {
                self.discord.api_base_url = api_base_url;
            }
            if let Some(skew) = discord.max_timestamp_skew_secs {
                self.discord.max_timestamp_skew_secs = skew;
            }
        }

        if let Some(interactions) = patch.interactions {
            if let Some(deadline_ms) = interactions.deadline_ms {
                self.interactions.deadline_ms = deadline_ms;
            }
            if let Some(ack_margin_ms) = interactions.ack_margin_ms {
                self.interactions.ack_margin_ms = ack_margin_ms;
            }
            if let Some(followup_expiry_secs) = interactions.followup_expiry_secs {
                self.interactions.followup_expiry_secs = followup_expiry_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(interactions_path) = server.interactions_path {
                self.server.interactions_path = interactions_path;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(analysis) = patch.analysis {
            if let Some(endpoint_url) = analysis.endpoint_url {
                self.analysis.endpoint_url = Some(endpoint_url);
            }
            if let Some(api_key_value) = analysis.api_key {
                self.analysis.api_key = Some(secret_value(api_key_value));
            }
            if let Some(timeout_secs) = analysis.timeout_secs {
                self.analysis.timeout_secs = timeout_secs;
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
        if let Some(value) = read_env_any(&["STOCKBOT_DISCORD_APPLICATION_ID", "DISCORD_APPLICATION_ID"])
        {
            self.discord.application_id = Some(value);
        }
        if let Some(value) = read_env_any(&["STOCKBOT_DISCORD_PUBLIC_KEY", "DISCORD_PUBLIC_KEY"]) {
            self.discord.public_key = Some(value);
        }
        if let Some(value) = read_env_any(&["STOCKBOT_DISCORD_BOT_TOKEN", "DISCORD_BOT_TOKEN"]) {
            self.discord.bot_token = Some(secret_value(value));
        }
        if let Some(value) = read_env_any(&["STOCKBOT_DISCORD_GUILD_ID", "DISCORD_GUILD_ID"]) {
            self.discord.guild_id = Some(value);
        }
        if let Some(value) = read_env_any(&["STOCKBOT_DISCORD_CHANNEL_ID", "DISCORD_MAIN_CHANNEL_ID"])
        {
            self.discord.channel_id = Some(value);
        }
        if let Some(value) = read_env("STOCKBOT_DISCORD_API_BASE_URL") {
            self.discord.api_base_url = value;
        }
        if let Some(value) = read_env("STOCKBOT_DISCORD_MAX_TIMESTAMP_SKEW_SECS") {
            self.discord.max_timestamp_skew_secs =
                parse_u64("STOCKBOT_DISCORD_MAX_TIMESTAMP_SKEW_SECS", &value)?;
        }

        if let Some(value) = read_env("STOCKBOT_INTERACTIONS_DEADLINE_MS") {
            self.interactions.deadline_ms = parse_u64("STOCKBOT_INTERACTIONS_DEADLINE_MS", &value)?;
        }
        if let Some(value) = read_env("STOCKBOT_INTERACTIONS_ACK_MARGIN_MS") {
            self.interactions.ack_margin_ms =
                parse_u64("STOCKBOT_INTERACTIONS_ACK_MARGIN_MS", &value)?;
        }
        if let Some(value) = read_env("STOCKBOT_INTERACTIONS_FOLLOWUP_EXPIRY_SECS") {
            self.interactions.followup_expiry_secs =
                parse_u64("STOCKBOT_INTERACTIONS_FOLLOWUP_EXPIRY_SECS", &value)?;
        }

        if let Some(value) = read_env("STOCKBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("STOCKBOT_SERVER_PORT") {
            self.server.port = parse_u16("STOCKBOT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("STOCKBOT_SERVER_INTERACTIONS_PATH") {
            self.server.interactions_path = value;
        }
        if let Some(value) = read_env("STOCKBOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("STOCKBOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("STOCKBOT_ANALYSIS_ENDPOINT_URL") {
            self.analysis.endpoint_url = Some(value);
        }
        if let Some(value) = read_env("STOCKBOT_ANALYSIS_API_KEY") {
            self.analysis.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("STOCKBOT_ANALYSIS_TIMEOUT_SECS") {
            self.analysis.timeout_secs = parse_u64("STOCKBOT_ANALYSIS_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("STOCKBOT_LOGGING_LEVEL").or_else(|| read_env("STOCKBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("STOCKBOT_LOGGING_FORMAT").or_else(|| read_env("STOCKBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(application_id) = overrides.application_id {
            self.discord.application_id = Some(application_id);
        }
        if let Some(public_key) = overrides.public_key {
            self.discord.public_key = Some(public_key);
        }
        if let Some(bot_token) = overrides.bot_token {
            self.discord.bot_token = Some(secret_value(bot_token));
        }
        if let Some(guild_id) = overrides.guild_id {
            self.discord.guild_id = Some(guild_id);
        }
        if let Some(channel_id) = overrides.channel_id {
            self.discord.channel_id = Some(channel_id);
        }
        if let Some(api_base_url) = overrides.api_base_url {
            self.discord.api_base_url = api_base_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(deadline_ms) = overrides.deadline_ms {
            self.interactions.deadline_ms = deadline_ms;
        }
        if let Some(followup_expiry_secs) = overrides.followup_expiry_secs {
            self.interactions.followup_expiry_secs = followup_expiry_secs;
        }
        if let Some(endpoint_url) = overrides.analysis_endpoint_url {
            self.analysis.endpoint_url = Some(endpoint_url);
        }
    }

    /// Shape checks that hold regardless of which code path runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_discord(&self.discord)?;
        validate_interactions(&self.interactions)?;
        validate_server(&self.server)?;
        validate_analysis(&self.analysis, &self.interactions)?;
        validate_logging(&self.logging)?;
        Ok(())
    }

    pub fn require_interactions(&self) -> Result<InteractionCredentials, ConfigError> {
        let application_id = require_present(
            self.discord.application_id.as_deref(),
            "discord.application_id is required to answer interactions. Get it from https://discord.com/developers/applications > General Information > Application ID",
        )?;
        let public_key = require_present(
            self.discord.public_key.as_deref(),
            "discord.public_key is required to verify interaction signatures. Get it from https://discord.com/developers/applications > General Information > Public Key",
        )?;
        Ok(InteractionCredentials { application_id, public_key })
    }

    pub fn require_registration(&self) -> Result<RegistrationCredentials, ConfigError> {
        let application_id = require_present(
            self.discord.application_id.as_deref(),
            "discord.application_id is required to register commands",
        )?;
        let bot_token = self.require_bot_token("discord.bot_token is required to register commands. Get it from https://discord.com/developers/applications > Bot > Token")?;
        Ok(RegistrationCredentials {
            application_id,
            bot_token,
            guild_id: self.discord.guild_id.clone(),
        })
    }

    pub fn require_announcements(&self) -> Result<(SecretString, String), ConfigError> {
        let bot_token = self.require_bot_token("discord.bot_token is required to post announcements")?;
        let channel_id = require_present(
            self.discord.channel_id.as_deref(),
            "discord.channel_id is required to post announcements",
        )?;
        Ok((bot_token, channel_id))
    }

    fn require_bot_token(&self, message: &str) -> Result<SecretString, ConfigError> {
        match &self.discord.bot_token {
            Some(token) if !token.expose_secret().trim().is_empty() => Ok(token.clone()),
            _ => Err(ConfigError::Validation(message.to_string())),
        }
    }
}

fn require_present(value: Option<&str>, message: &str) -> Result<String, ConfigError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::Validation(message.to_string()))
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("stockbot.toml"), PathBuf::from("config/stockbot.toml")]
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

fn validate_discord(discord: &DiscordConfig) -> Result<(), ConfigError> {
    if let Some(public_key) = discord.public_key.as_deref().map(str::trim) {
        let is_hex = public_key.len() == 64 && public_key.chars().all(|c| c.is_ascii_hexdigit());
        if !public_key.is_empty() && !is_hex {
            return Err(ConfigError::Validation(
                "discord.public_key must be 64 hex characters (an Ed25519 public key)".to_string(),
            ));
        }
    }

    for (key, value) in [
        ("discord.application_id", discord.application_id.as_deref()),
        ("discord.guild_id", discord.guild_id.as_deref()),
        ("discord.channel_id", discord.channel_id.as_deref()),
    ] {
        if let Some(value) = value.map(str::trim) {
            if !value.is_empty() && !value.chars().all(|c| c.is_ascii_digit()) {
                return Err(ConfigError::Validation(format!(
                    "{key} must be a numeric snowflake id"
                )));
            }
        }
    }

    let base_url = discord.api_base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "discord.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_interactions(interactions: &InteractionsConfig) -> Result<(), ConfigError> {
    if interactions.deadline_ms == 0 {
        return Err(ConfigError::Validation(
            "interactions.deadline_ms must be greater than zero".to_string(),
        ));
    }

    if interactions.ack_margin_ms == 0 || interactions.ack_margin_ms >= interactions.deadline_ms {
        return Err(ConfigError::Validation(
            "interactions.ack_margin_ms must be in range 1..deadline_ms".to_string(),
        ));
    }

    if interactions.followup_expiry_secs == 0 {
        return Err(ConfigError::Validation(
            "interactions.followup_expiry_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if !server.interactions_path.starts_with('/') {
        return Err(ConfigError::Validation(
            "server.interactions_path must start with `/`".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_analysis(
    analysis: &AnalysisConfig,
    interactions: &InteractionsConfig,
) -> Result<(), ConfigError> {
    if analysis.timeout_secs == 0 || analysis.timeout_secs > interactions.followup_expiry_secs {
        return Err(ConfigError::Validation(
            "analysis.timeout_secs must be in range 1..=interactions.followup_expiry_secs"
                .to_string(),
        ));
    }

    if let Some(endpoint_url) = &analysis.endpoint_url {
        if !endpoint_url.starts_with("http://") && !endpoint_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "analysis.endpoint_url must start with http:// or https://".to_string(),
            ));
        }
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

fn read_env_any(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| read_env(key))
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
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
    discord: Option<DiscordPatch>,
    interactions: Option<InteractionsPatch>,
    server: Option<ServerPatch>,
    analysis: Option<AnalysisPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DiscordPatch {
    application_id: Option<String>,
    public_key: Option<String>,
    bot_token: Option<String>,
    guild_id: Option<String>,
    channel_id: Option<String>,
    api_base_url: Option<String>,
    max_timestamp_skew_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct InteractionsPatch {
    deadline_ms: Option<u64>,
    ack_margin_ms: Option<u64>,
    followup_expiry_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    interactions_path: Option<String>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisPatch {
    endpoint_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    const PUBLIC_KEY: &str = "3d4017c3e843895a92b70aa74d1b7ebc9c982ccf2ec4968cc0cd55f12af4660c";

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_STOCKBOT_BOT_TOKEN", "token-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("stockbot.toml");
            fs::write(
                &path,
                r#"
[discord]
application_id = "123456789012345678"
bot_token = "${TEST_STOCKBOT_BOT_TOKEN}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let token = config.discord.bot_token.as_ref().map(|t| t.expose_secret().to_string());
            ensure(
                token.as_deref() == Some("token-from-env"),
                "bot token should be loaded from environment",
            )?;
            ensure(
                config.discord.application_id.as_deref() == Some("123456789012345678"),
                "application id should come from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_STOCKBOT_BOT_TOKEN"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("STOCKBOT_SERVER_PORT", "9090");
        env::set_var("DISCORD_APPLICATION_ID", "222");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("stockbot.toml");
            fs::write(
                &path,
                r#"
[discord]
application_id = "111"

[server]
port = 7070

[interactions]
deadline_ms = 2500

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.server.port == 9090, "env port should win over file")?;
            ensure(
                config.discord.application_id.as_deref() == Some("222"),
                "DISCORD_* alias should win over file",
            )?;
            ensure(config.interactions.deadline_ms == 2500, "file deadline should win over default")?;
            ensure(config.logging.level == "debug", "override log level should win")?;
            ensure(
                config.interactions.ack_budget() == Duration::from_millis(2000),
                "ack budget should subtract the margin from the deadline",
            )?;
            Ok(())
        })();

        clear_vars(&["STOCKBOT_SERVER_PORT", "DISCORD_APPLICATION_ID"]);
        result
    }

    #[test]
    fn require_interactions_fails_fast_without_public_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                application_id: Some("42".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .map_err(|err| format!("config load failed: {err}"))?;

        let has_message = matches!(
            config.require_interactions(),
            Err(ConfigError::Validation(ref message)) if message.contains("discord.public_key")
        );
        ensure(has_message, "missing public key should be named in the error")
    }

    #[test]
    fn require_registration_fails_fast_without_bot_token() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                application_id: Some("42".to_string()),
                public_key: Some(PUBLIC_KEY.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.require_interactions().is_ok(), "interactions path should be ready")?;
        let has_message = matches!(
            config.require_registration(),
            Err(ConfigError::Validation(ref message)) if message.contains("discord.bot_token")
        );
        ensure(has_message, "missing bot token should be named in the error")
    }

    #[test]
    fn malformed_public_key_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                public_key: Some("not-a-key".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        let has_message = matches!(
            result,
            Err(ConfigError::Validation(ref message)) if message.contains("64 hex")
        );
        ensure(has_message, "malformed public key should fail validation")
    }

    #[test]
    fn margin_must_leave_room_inside_deadline() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("STOCKBOT_INTERACTIONS_ACK_MARGIN_MS", "3000");
        let result = AppConfig::load(LoadOptions::default());
        clear_vars(&["STOCKBOT_INTERACTIONS_ACK_MARGIN_MS"]);

        let has_message = matches!(
            result,
            Err(ConfigError::Validation(ref message)) if message.contains("ack_margin_ms")
        );
        ensure(has_message, "margin equal to the deadline should fail validation")
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("STOCKBOT_DISCORD_BOT_TOKEN", "bot-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("bot-secret-value"), "debug output should not contain token")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["STOCKBOT_DISCORD_BOT_TOKEN"]);
        result
    }
}
