//! Seam to the stock-analysis subsystem.
//!
//! The interaction layer never looks inside an analysis run. It hands over the
//! command name plus the arguments the user typed and waits for either a
//! rendered report or an error, for however long the run takes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandArgument {
    pub name: String,
    pub value: Value,
}

impl CommandArgument {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    /// Renders the value the way a user would have typed it.
    pub fn display_value(&self) -> String {
        match &self.value {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalysisRequest {
    pub command: String,
    pub arguments: Vec<CommandArgument>,
}

impl AnalysisRequest {
    pub fn argument(&self, name: &str) -> Option<&CommandArgument> {
        self.arguments.iter().find(|argument| argument.name == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub content: String,
}

impl AnalysisReport {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("invalid analysis input: {0}")]
    InvalidInput(String),
    #[error("analysis backend unavailable: {0}")]
    Unavailable(String),
    #[error("analysis timed out after {0}s")]
    TimedOut(u64),
    #[error("analysis failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn handle(&self, request: AnalysisRequest) -> Result<AnalysisReport, AnalysisError>;
}

/// Stand-in used when no analysis backend is configured.
#[derive(Clone, Debug, Default)]
pub struct UnconfiguredAnalysisService;

#[async_trait]
impl AnalysisService for UnconfiguredAnalysisService {
    async fn handle(&self, request: AnalysisRequest) -> Result<AnalysisReport, AnalysisError> {
        Err(AnalysisError::Unavailable(format!(
            "no analysis backend is configured for `{}`",
            request.command
        )))
    }
}
