use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use stockbot_core::{
    analysis::{AnalysisRequest, AnalysisService},
    errors::ApplicationError,
};

use crate::{
    interactions::{CommandInvocation, InvocationContext},
    manifest::Manifest,
    messages::{help_message, ReplyMessage},
    router::{CommandHandler, HandlerError, HandlerTable, RouterSetupError},
};

pub struct HelpHandler {
    manifest: Arc<Manifest>,
}

impl HelpHandler {
    pub fn new(manifest: Arc<Manifest>) -> Self {
        Self { manifest }
    }
}

#[async_trait]
impl CommandHandler for HelpHandler {
    async fn handle(
        &self,
        _invocation: &CommandInvocation,
        _context: &InvocationContext,
    ) -> Result<ReplyMessage, HandlerError> {
        Ok(help_message(&self.manifest))
    }
}

pub struct StatusHandler {
    started_at: Instant,
    command_count: usize,
    analysis_backend: String,
}

impl StatusHandler {
    pub fn new(command_count: usize, analysis_backend: impl Into<String>) -> Self {
        Self { started_at: Instant::now(), command_count, analysis_backend: analysis_backend.into() }
    }
}

#[async_trait]
impl CommandHandler for StatusHandler {
    async fn handle(
        &self,
        _invocation: &CommandInvocation,
        _context: &InvocationContext,
    ) -> Result<ReplyMessage, HandlerError> {
        let uptime = self.started_at.elapsed().as_secs();
        Ok(ReplyMessage::ephemeral(format!(
            "stockbot {} is online\nuptime: {}h {}m {}s\ncommands: {}\nanalysis backend: {}",
            env!("CARGO_PKG_VERSION"),
            uptime / 3_600,
            (uptime % 3_600) / 60,
            uptime % 60,
            self.command_count,
            self.analysis_backend,
        )))
    }
}

/// Forwards the invocation to the analysis subsystem and posts its report.
pub struct AnalysisHandler {
    service: Arc<dyn AnalysisService>,
}

impl AnalysisHandler {
    pub fn new(service: Arc<dyn AnalysisService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl CommandHandler for AnalysisHandler {
    async fn handle(
        &self,
        invocation: &CommandInvocation,
        _context: &InvocationContext,
    ) -> Result<ReplyMessage, HandlerError> {
        let request = AnalysisRequest {
            command: invocation.name.clone(),
            arguments: invocation.arguments.clone(),
        };
        let report = self.service.handle(request).await.map_err(ApplicationError::from)?;
        Ok(ReplyMessage::public(report.content))
    }
}

/// Wires the shipped commands: `help` and `status` answer locally, every
/// other manifest command goes to the analysis service.
pub fn default_table(
    manifest: Arc<Manifest>,
    analysis: Arc<dyn AnalysisService>,
    analysis_backend: &str,
) -> Result<HandlerTable, RouterSetupError> {
    let mut builder = HandlerTable::builder(Arc::clone(&manifest));
    for command in manifest.commands() {
        builder = match command.name.as_str() {
            "help" => builder.handler("help", HelpHandler::new(Arc::clone(&manifest))),
            "status" => {
                builder.handler("status", StatusHandler::new(manifest.len(), analysis_backend))
            }
            name => builder.handler(name, AnalysisHandler::new(Arc::clone(&analysis))),
        };
    }
    builder.build()
}
