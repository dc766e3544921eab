use serde::{Deserialize, Serialize};
use serde_json::Value;
use stockbot_core::analysis::CommandArgument;
use thiserror::Error;

use crate::messages::ReplyMessage;

const PING: u8 = 1;
const APPLICATION_COMMAND: u8 = 2;

/// Subcommand and subcommand-group option types carry nested options.
const SUB_COMMAND: u8 = 1;
const SUB_COMMAND_GROUP: u8 = 2;

const EPHEMERAL_FLAG: u64 = 1 << 6;

#[derive(Clone, Debug, PartialEq)]
pub struct Interaction {
    pub id: String,
    pub application_id: Option<String>,
    pub token: String,
    pub kind: InteractionKind,
    pub context: InvocationContext,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InteractionKind {
    Ping,
    Command(CommandInvocation),
    Unsupported { code: u8 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommandInvocation {
    pub name: String,
    pub arguments: Vec<CommandArgument>,
}

impl CommandInvocation {
    /// `/name arg1 arg2`, as the user would have typed it.
    pub fn command_line(&self) -> String {
        let mut line = format!("/{}", self.name);
        for argument in &self.arguments {
            let value = argument.display_value();
            if !value.is_empty() {
                line.push(' ');
                line.push_str(&value);
            }
        }
        line
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatScope {
    Guild,
    Direct,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvocationContext {
    pub user_id: String,
    pub user_name: String,
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
    pub scope: ChatScope,
}

#[derive(Debug, Error)]
pub enum InteractionParseError {
    #[error("interaction body is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("command interaction `{0}` has no command data")]
    MissingCommandData(String),
}

impl Interaction {
    pub fn parse(body: &[u8]) -> Result<Self, InteractionParseError> {
        let raw: RawInteraction = serde_json::from_slice(body)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawInteraction) -> Result<Self, InteractionParseError> {
        let kind = match raw.kind {
            PING => InteractionKind::Ping,
            APPLICATION_COMMAND => {
                let data =
                    raw.data.ok_or_else(|| InteractionParseError::MissingCommandData(raw.id.clone()))?;
                let mut arguments = Vec::new();
                flatten_options(data.options, &mut arguments);
                InteractionKind::Command(CommandInvocation { name: data.name, arguments })
            }
            code => InteractionKind::Unsupported { code },
        };

        let user = raw.member.and_then(|member| member.user).or(raw.user).unwrap_or_default();
        let scope = if raw.guild_id.is_some() { ChatScope::Guild } else { ChatScope::Direct };

        Ok(Self {
            id: raw.id,
            application_id: raw.application_id,
            token: raw.token,
            kind,
            context: InvocationContext {
                user_id: user.id,
                user_name: user.username.unwrap_or_else(|| "unknown".to_owned()),
                channel_id: raw.channel_id,
                guild_id: raw.guild_id,
                scope,
            },
        })
    }
}

fn flatten_options(options: Vec<RawOption>, arguments: &mut Vec<CommandArgument>) {
    for option in options {
        match option.kind {
            SUB_COMMAND | SUB_COMMAND_GROUP => {
                arguments.push(CommandArgument::new(option.name, Value::Null));
                flatten_options(option.options, arguments);
            }
            _ => arguments.push(CommandArgument {
                name: option.name,
                value: option.value.unwrap_or(Value::Null),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawInteraction {
    id: String,
    #[serde(default)]
    application_id: Option<String>,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    token: String,
    #[serde(default)]
    data: Option<RawCommandData>,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    member: Option<RawMember>,
    #[serde(default)]
    user: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
struct RawCommandData {
    name: String,
    #[serde(default)]
    options: Vec<RawOption>,
}

#[derive(Debug, Deserialize)]
struct RawOption {
    name: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    options: Vec<RawOption>,
}

#[derive(Debug, Deserialize)]
struct RawMember {
    #[serde(default)]
    user: Option<RawUser>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUser {
    #[serde(default)]
    id: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseType {
    Pong,
    ChannelMessage,
    DeferredChannelMessage,
}

impl ResponseType {
    pub fn code(self) -> u8 {
        match self {
            Self::Pong => 1,
            Self::ChannelMessage => 4,
            Self::DeferredChannelMessage => 5,
        }
    }
}

impl Serialize for ResponseType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageData {
    pub content: String,
    pub flags: u64,
}

impl From<&ReplyMessage> for MessageData {
    fn from(message: &ReplyMessage) -> Self {
        Self {
            content: message.content.clone(),
            flags: if message.ephemeral { EPHEMERAL_FLAG } else { 0 },
        }
    }
}

/// Body of the synchronous HTTP reply to a webhook call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: ResponseType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<MessageData>,
}

impl InteractionResponse {
    pub fn pong() -> Self {
        Self { kind: ResponseType::Pong, data: None }
    }

    pub fn message(message: &ReplyMessage) -> Self {
        Self { kind: ResponseType::ChannelMessage, data: Some(MessageData::from(message)) }
    }

    pub fn deferred() -> Self {
        Self { kind: ResponseType::DeferredChannelMessage, data: None }
    }

    pub fn content(&self) -> Option<&str> {
        self.data.as_ref().map(|data| data.content.as_str())
    }
}
