//! Locally authoritative list of slash commands.
//!
//! The manifest is built once at startup and is read-only afterwards. The
//! syncer pushes it to the platform and the router uses it to decide which
//! invocations it recognises and how each one is acknowledged.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

const MAX_NAME_LEN: usize = 32;
const MAX_DESCRIPTION_LEN: usize = 100;

/// Platform option type codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OptionKind {
    String,
    Integer,
    Boolean,
    Number,
}

impl OptionKind {
    pub fn code(self) -> u8 {
        match self {
            Self::String => 3,
            Self::Integer => 4,
            Self::Boolean => 5,
            Self::Number => 10,
        }
    }
}

impl Serialize for OptionKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommandOption {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: OptionKind,
    pub required: bool,
}

impl CommandOption {
    pub fn required(name: &str, description: &str, kind: OptionKind) -> Self {
        Self { name: name.to_owned(), description: description.to_owned(), kind, required: true }
    }

    pub fn optional(name: &str, description: &str, kind: OptionKind) -> Self {
        Self { name: name.to_owned(), description: description.to_owned(), kind, required: false }
    }
}

/// How the router acknowledges a command. Fixed per command, never measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Handler result is the HTTP response.
    Immediate,
    /// Deferred marker now, result through the follow-up webhook.
    Deferred,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommandDefinition {
    pub name: String,
    pub description: String,
    pub options: Vec<CommandOption>,
    #[serde(skip)]
    pub mode: ResponseMode,
}

impl CommandDefinition {
    pub fn new(name: &str, description: &str, mode: ResponseMode) -> Self {
        Self { name: name.to_owned(), description: description.to_owned(), options: Vec::new(), mode }
    }

    pub fn option(mut self, option: CommandOption) -> Self {
        self.options.push(option);
        self
    }

    /// Body sent to the registration API.
    pub fn payload(&self) -> CommandPayload<'_> {
        CommandPayload {
            name: &self.name,
            description: &self.description,
            options: &self.options,
            kind: CHAT_INPUT_COMMAND,
        }
    }
}

pub const CHAT_INPUT_COMMAND: u8 = 1;

#[derive(Debug, Serialize)]
pub struct CommandPayload<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub options: &'a [CommandOption],
    #[serde(rename = "type")]
    pub kind: u8,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("duplicate command name `{0}`")]
    DuplicateName(String),
    #[error("invalid command name `{0}` (1-32 chars of a-z, 0-9, `-`, `_`)")]
    InvalidName(String),
    #[error("command `{command}` description must be 1-100 chars")]
    InvalidDescription { command: String },
    #[error("command `{command}` option `{option}` is invalid: {reason}")]
    InvalidOption { command: String, option: String, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    commands: Vec<CommandDefinition>,
}

impl Manifest {
    pub fn new(commands: Vec<CommandDefinition>) -> Result<Self, ManifestError> {
        let mut seen = HashSet::new();
        for command in &commands {
            validate_command(command)?;
            if !seen.insert(command.name.as_str()) {
                return Err(ManifestError::DuplicateName(command.name.clone()));
            }
        }
        Ok(Self { commands })
    }

    pub fn commands(&self) -> &[CommandDefinition] {
        &self.commands
    }

    pub fn get(&self, name: &str) -> Option<&CommandDefinition> {
        self.commands.iter().find(|command| command.name == name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn is_valid_description(description: &str) -> bool {
    let len = description.trim().chars().count();
    len > 0 && len <= MAX_DESCRIPTION_LEN
}

fn validate_command(command: &CommandDefinition) -> Result<(), ManifestError> {
    if !is_valid_name(&command.name) {
        return Err(ManifestError::InvalidName(command.name.clone()));
    }
    if !is_valid_description(&command.description) {
        return Err(ManifestError::InvalidDescription { command: command.name.clone() });
    }

    let invalid = |option: &CommandOption, reason: &str| ManifestError::InvalidOption {
        command: command.name.clone(),
        option: option.name.clone(),
        reason: reason.to_owned(),
    };

    let mut option_names = HashSet::new();
    let mut seen_optional = false;
    for option in &command.options {
        if !is_valid_name(&option.name) {
            return Err(invalid(option, "name must be 1-32 chars of a-z, 0-9, `-`, `_`"));
        }
        if !is_valid_description(&option.description) {
            return Err(invalid(option, "description must be 1-100 chars"));
        }
        if !option_names.insert(option.name.as_str()) {
            return Err(invalid(option, "duplicate option name"));
        }
        if option.required && seen_optional {
            return Err(invalid(option, "required options must precede optional ones"));
        }
        seen_optional |= !option.required;
    }

    Ok(())
}

/// The commands this bot ships with.
pub fn default_manifest() -> Result<Manifest, ManifestError> {
    let commands = vec![
        CommandDefinition::new(
            "analyze",
            "Run a full analysis for one stock code",
            ResponseMode::Deferred,
        )
        .option(CommandOption::required(
            "code",
            "Stock code, e.g. 600519, hk00700 or AAPL",
            OptionKind::String,
        )),
        CommandDefinition::new(
            "market",
            "Generate today's market review",
            ResponseMode::Deferred,
        ),
        CommandDefinition::new(
            "batch",
            "Analyze every stock on the watchlist",
            ResponseMode::Deferred,
        )
        .option(CommandOption::optional(
            "limit",
            "Maximum number of stocks to analyze",
            OptionKind::Integer,
        )),
        CommandDefinition::new("status", "Show bot status", ResponseMode::Immediate),
        CommandDefinition::new("help", "List available commands", ResponseMode::Immediate),
    ];

    Manifest::new(commands)
}
