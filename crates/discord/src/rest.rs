use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::{
    dispatcher::{FollowUpError, FollowUpTransport},
    interactions::MessageData,
    manifest::CommandDefinition,
    messages::ReplyMessage,
    sync::{CommandApi, CommandApiError, RegisteredCommand},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = concat!("DiscordBot (stockbot, ", env!("CARGO_PKG_VERSION"), ")");

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RestError {
    #[error("a bot token is required for this call")]
    MissingToken,
    #[error("platform rejected the credentials")]
    Unauthorized,
    #[error("platform returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("response could not be decoded: {0}")]
    Decode(String),
}

impl From<RestError> for CommandApiError {
    fn from(error: RestError) -> Self {
        match error {
            RestError::MissingToken | RestError::Unauthorized => Self::Unauthorized,
            RestError::Status { status, body } => Self::Rejected { status, body },
            RestError::Transport(message) => Self::Transport(message),
            RestError::Decode(message) => Self::Decode(message),
        }
    }
}

impl From<RestError> for FollowUpError {
    fn from(error: RestError) -> Self {
        match error {
            // Unknown webhook or invalid token both mean the interaction token is gone.
            RestError::Unauthorized => Self::Expired,
            RestError::Status { status, .. } if status == StatusCode::NOT_FOUND.as_u16() => {
                Self::Expired
            }
            RestError::Status { status, body } => Self::Rejected { status, body },
            RestError::MissingToken | RestError::Decode(_) => {
                Self::Rejected { status: 0, body: error.to_string() }
            }
            RestError::Transport(message) => Self::Transport(message),
        }
    }
}

/// HTTP client for the platform REST API: command registration, interaction
/// follow-ups and channel messages.
#[derive(Clone)]
pub struct DiscordRestClient {
    client: Client,
    api_base_url: String,
    application_id: String,
    bot_token: Option<SecretString>,
    guild_id: Option<String>,
}

impl DiscordRestClient {
    pub fn new(api_base_url: &str, application_id: &str) -> Result<Self, RestError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|error| RestError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_owned(),
            application_id: application_id.to_owned(),
            bot_token: None,
            guild_id: None,
        })
    }

    pub fn with_bot_token(mut self, bot_token: SecretString) -> Self {
        self.bot_token = Some(bot_token);
        self
    }

    /// Scopes command registration to one guild instead of the global set.
    pub fn with_guild(mut self, guild_id: Option<String>) -> Self {
        self.guild_id = guild_id;
        self
    }

    pub fn commands_url(&self) -> String {
        match &self.guild_id {
            Some(guild_id) => format!(
                "{}/applications/{}/guilds/{guild_id}/commands",
                self.api_base_url, self.application_id
            ),
            None => format!("{}/applications/{}/commands", self.api_base_url, self.application_id),
        }
    }

    pub fn followup_url(&self, token: &str) -> String {
        format!("{}/webhooks/{}/{token}", self.api_base_url, self.application_id)
    }

    pub fn channel_messages_url(&self, channel_id: &str) -> String {
        format!("{}/channels/{channel_id}/messages", self.api_base_url)
    }

    pub async fn post_channel_message(
        &self,
        channel_id: &str,
        message: &ReplyMessage,
    ) -> Result<(), RestError> {
        let request = self
            .authorized(self.client.post(self.channel_messages_url(channel_id)))?
            .json(&serde_json::json!({ "content": message.content }));
        self.execute(request).await.map(drop)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, RestError> {
        let token = self.bot_token.as_ref().ok_or(RestError::MissingToken)?;
        Ok(request.header("Authorization", format!("Bot {}", token.expose_secret())))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, RestError> {
        let response =
            request.send().await.map_err(|error| RestError::Transport(error.to_string()))?;
        let status = response.status();
        debug!(
            event_name = "egress.discord.rest_call",
            url = %response.url().path(),
            status = status.as_u16(),
            "platform REST call completed"
        );
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(RestError::Unauthorized);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RestError::Status { status: status.as_u16(), body })
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, RestError> {
        self.execute(request)
            .await?
            .json::<T>()
            .await
            .map_err(|error| RestError::Decode(error.to_string()))
    }
}

#[async_trait]
impl CommandApi for DiscordRestClient {
    async fn list_commands(&self) -> Result<Vec<RegisteredCommand>, CommandApiError> {
        let request = self.authorized(self.client.get(self.commands_url()))?;
        Ok(self.execute_json(request).await?)
    }

    async fn create_command(
        &self,
        definition: &CommandDefinition,
    ) -> Result<RegisteredCommand, CommandApiError> {
        let request = self
            .authorized(self.client.post(self.commands_url()))?
            .json(&definition.payload());
        Ok(self.execute_json(request).await?)
    }

    async fn edit_command(
        &self,
        id: &str,
        definition: &CommandDefinition,
    ) -> Result<RegisteredCommand, CommandApiError> {
        let url = format!("{}/{id}", self.commands_url());
        let request = self.authorized(self.client.patch(url))?.json(&definition.payload());
        Ok(self.execute_json(request).await?)
    }

    async fn delete_command(&self, id: &str) -> Result<(), CommandApiError> {
        let url = format!("{}/{id}", self.commands_url());
        let request = self.authorized(self.client.delete(url))?;
        self.execute(request).await?;
        Ok(())
    }

    async fn bulk_overwrite(
        &self,
        definitions: &[CommandDefinition],
    ) -> Result<Vec<RegisteredCommand>, CommandApiError> {
        let payloads: Vec<_> = definitions.iter().map(CommandDefinition::payload).collect();
        let request = self.authorized(self.client.put(self.commands_url()))?.json(&payloads);
        Ok(self.execute_json(request).await?)
    }
}

#[async_trait]
impl FollowUpTransport for DiscordRestClient {
    async fn send_followup(
        &self,
        token: &str,
        message: &ReplyMessage,
    ) -> Result<(), FollowUpError> {
        // Interaction webhooks authenticate with the token in the path.
        let request = self.client.post(self.followup_url(token)).json(&MessageData::from(message));
        self.execute(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DiscordRestClient, RestError};
    use crate::{dispatcher::FollowUpError, sync::CommandApiError};

    fn client() -> DiscordRestClient {
        DiscordRestClient::new("https://discord.com/api/v10/", "42").expect("client")
    }

    #[test]
    fn builds_global_and_guild_command_urls() {
        assert_eq!(client().commands_url(), "https://discord.com/api/v10/applications/42/commands");
        assert_eq!(
            client().with_guild(Some("7".to_owned())).commands_url(),
            "https://discord.com/api/v10/applications/42/guilds/7/commands"
        );
    }

    #[test]
    fn followup_url_embeds_application_and_token() {
        assert_eq!(client().followup_url("tok-1"), "https://discord.com/api/v10/webhooks/42/tok-1");
        assert_eq!(
            client().channel_messages_url("8"),
            "https://discord.com/api/v10/channels/8/messages"
        );
    }

    #[test]
    fn unknown_webhook_means_expired_followup() {
        let not_found = RestError::Status { status: 404, body: "Unknown Webhook".to_owned() };
        assert_eq!(FollowUpError::from(not_found), FollowUpError::Expired);
        assert_eq!(FollowUpError::from(RestError::Unauthorized), FollowUpError::Expired);
        assert_eq!(
            FollowUpError::from(RestError::Status { status: 503, body: String::new() }),
            FollowUpError::Rejected { status: 503, body: String::new() }
        );
    }

    #[tokio::test]
    async fn registration_without_token_fails_before_sending() {
        use crate::sync::CommandApi;

        let error = client().list_commands().await.unwrap_err();
        assert_eq!(error, CommandApiError::Unauthorized);
    }
}
