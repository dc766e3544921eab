//! Classifies authenticated interactions and picks how each one is answered.
//!
//! Every call to [`InteractionRouter::route`] returns an acknowledgment well
//! inside the platform deadline. Commands marked [`ResponseMode::Deferred`]
//! are acknowledged with the deferred marker straight away and finish on a
//! background task that owns the interaction token and sends exactly one
//! follow-up. Commands marked [`ResponseMode::Immediate`] get the handler
//! result inline; if one overruns the acknowledgment budget anyway, the same
//! task is handed to the deferred path instead of being raced or dropped.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use stockbot_core::{
    config::InteractionsConfig,
    errors::{ApplicationError, InterfaceError},
};
use thiserror::Error;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, error, info, warn};

use crate::{
    dispatcher::{DeliveryOutcome, FollowUpError, ResponseDispatcher},
    interactions::{
        CommandInvocation, Interaction, InteractionKind, InteractionResponse, InvocationContext,
    },
    manifest::{CommandDefinition, Manifest, ResponseMode},
    messages::{failure_message, unknown_command_message, unsupported_interaction_message, ReplyMessage},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error(transparent)]
    Application(#[from] ApplicationError),
    #[error("handler task ended abnormally: {0}")]
    Aborted(String),
}

impl HandlerError {
    pub fn into_interface(self, correlation_id: &str) -> InterfaceError {
        match self {
            Self::Application(error) => error.into_interface(correlation_id),
            Self::Aborted(message) => {
                InterfaceError::Internal { message, correlation_id: correlation_id.to_owned() }
            }
        }
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        invocation: &CommandInvocation,
        context: &InvocationContext,
    ) -> Result<ReplyMessage, HandlerError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterSetupError {
    #[error("manifest command `{0}` has no handler")]
    MissingHandler(String),
    #[error("handler registered for `{0}`, which is not in the manifest")]
    UnknownCommand(String),
    #[error("more than one handler registered for `{0}`")]
    DuplicateHandler(String),
}

pub struct CommandRoute {
    pub definition: CommandDefinition,
    handler: Arc<dyn CommandHandler>,
}

/// Fixed mapping from command name to handler, built once at startup.
pub struct HandlerTable {
    manifest: Arc<Manifest>,
    routes: Vec<CommandRoute>,
}

impl HandlerTable {
    pub fn builder(manifest: Arc<Manifest>) -> HandlerTableBuilder {
        HandlerTableBuilder { manifest, handlers: Vec::new() }
    }

    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    pub fn get(&self, name: &str) -> Option<&CommandRoute> {
        self.routes.iter().find(|route| route.definition.name == name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

pub struct HandlerTableBuilder {
    manifest: Arc<Manifest>,
    handlers: Vec<(String, Arc<dyn CommandHandler>)>,
}

impl HandlerTableBuilder {
    pub fn handler<H>(mut self, name: &str, handler: H) -> Self
    where
        H: CommandHandler + 'static,
    {
        self.handlers.push((name.to_owned(), Arc::new(handler)));
        self
    }

    pub fn build(self) -> Result<HandlerTable, RouterSetupError> {
        for (index, (name, _)) in self.handlers.iter().enumerate() {
            if self.manifest.get(name).is_none() {
                return Err(RouterSetupError::UnknownCommand(name.clone()));
            }
            if self.handlers[..index].iter().any(|(earlier, _)| earlier == name) {
                return Err(RouterSetupError::DuplicateHandler(name.clone()));
            }
        }

        let mut routes = Vec::with_capacity(self.manifest.len());
        for definition in self.manifest.commands() {
            let handler = self
                .handlers
                .iter()
                .find(|(name, _)| *name == definition.name)
                .map(|(_, handler)| Arc::clone(handler))
                .ok_or_else(|| RouterSetupError::MissingHandler(definition.name.clone()))?;
            routes.push(CommandRoute { definition: definition.clone(), handler });
        }

        Ok(HandlerTable { manifest: self.manifest, routes })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouterTimings {
    /// Longest the router waits on a fast handler before acknowledging.
    pub ack_budget: Duration,
    /// Validity of the interaction token, counted from receipt.
    pub followup_expiry: Duration,
}

impl From<&InteractionsConfig> for RouterTimings {
    fn from(config: &InteractionsConfig) -> Self {
        Self { ack_budget: config.ack_budget(), followup_expiry: config.followup_expiry() }
    }
}

impl Default for RouterTimings {
    fn default() -> Self {
        Self::from(&InteractionsConfig::default())
    }
}

/// Background work that owes the user one follow-up message.
#[derive(Debug)]
pub struct PendingResponse {
    pub interaction_id: String,
    pub token: String,
    pub command: String,
    handle: JoinHandle<DeliveryOutcome>,
}

impl PendingResponse {
    /// Waits for the follow-up attempt to finish.
    pub async fn wait(self) -> DeliveryOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(join_error) => DeliveryOutcome::Failed(FollowUpError::Transport(format!(
                "follow-up task ended abnormally: {join_error}"
            ))),
        }
    }

    /// Lets the follow-up run on its own; the task is not cancelled.
    pub fn detach(self) {
        drop(self.handle);
    }
}

#[derive(Debug)]
pub struct Acknowledgement {
    pub response: InteractionResponse,
    pub pending: Option<PendingResponse>,
}

impl Acknowledgement {
    fn immediate(response: InteractionResponse) -> Self {
        Self { response, pending: None }
    }
}

pub struct InteractionRouter {
    table: Arc<HandlerTable>,
    dispatcher: ResponseDispatcher,
    timings: RouterTimings,
    in_flight: Arc<AtomicUsize>,
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InteractionRouter {
    pub fn new(table: HandlerTable, dispatcher: ResponseDispatcher, timings: RouterTimings) -> Self {
        Self {
            table: Arc::new(table),
            dispatcher,
            timings,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Deferred interactions whose follow-up has not finished yet.
    pub fn in_flight_followups(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn table(&self) -> &HandlerTable {
        &self.table
    }

    pub fn timings(&self) -> RouterTimings {
        self.timings
    }

    pub async fn route(&self, interaction: Interaction) -> Acknowledgement {
        self.route_at(interaction, Instant::now()).await
    }

    /// Routes an interaction whose request reached the service at
    /// `received_at`. Both the acknowledgment budget and the follow-up
    /// window are measured from that instant.
    pub async fn route_at(
        &self,
        interaction: Interaction,
        received_at: Instant,
    ) -> Acknowledgement {
        let Interaction { id, token, kind, context, .. } = interaction;

        match kind {
            InteractionKind::Ping => {
                debug!(
                    event_name = "ingress.discord.ping",
                    correlation_id = %id,
                    "answering platform ping"
                );
                Acknowledgement::immediate(InteractionResponse::pong())
            }
            InteractionKind::Unsupported { code } => {
                warn!(
                    event_name = "ingress.discord.unsupported_interaction",
                    correlation_id = %id,
                    interaction_type = code,
                    "ignoring unsupported interaction type"
                );
                Acknowledgement::immediate(InteractionResponse::message(
                    &unsupported_interaction_message(code),
                ))
            }
            InteractionKind::Command(invocation) => {
                self.route_command(id, token, invocation, context, received_at).await
            }
        }
    }

    async fn route_command(
        &self,
        id: String,
        token: String,
        invocation: CommandInvocation,
        context: InvocationContext,
        received_at: Instant,
    ) -> Acknowledgement {
        let Some(route) = self.table.get(&invocation.name) else {
            warn!(
                event_name = "ingress.discord.unknown_command",
                correlation_id = %id,
                command = %invocation.name,
                user_id = %context.user_id,
                "interaction names a command missing from the manifest"
            );
            return Acknowledgement::immediate(InteractionResponse::message(
                &unknown_command_message(&invocation.name),
            ));
        };

        info!(
            event_name = "ingress.discord.command_received",
            correlation_id = %id,
            command_line = %invocation.command_line(),
            user_id = %context.user_id,
            user_name = %context.user_name,
            mode = ?route.definition.mode,
            "dispatching slash command"
        );

        let command = invocation.name.clone();
        let task = tokio::spawn(execute(Arc::clone(&route.handler), invocation, context, id.clone()));

        match route.definition.mode {
            ResponseMode::Deferred => {
                let pending = self.spawn_followup(id, token, command, task, received_at);
                Acknowledgement { response: InteractionResponse::deferred(), pending: Some(pending) }
            }
            ResponseMode::Immediate => {
                self.await_fast_path(id, token, command, task, received_at).await
            }
        }
    }

    async fn await_fast_path(
        &self,
        id: String,
        token: String,
        command: String,
        mut task: JoinHandle<ReplyMessage>,
        received_at: Instant,
    ) -> Acknowledgement {
        let budget_end = received_at + self.timings.ack_budget;
        match tokio::time::timeout_at(budget_end, &mut task).await {
            Ok(Ok(reply)) => Acknowledgement::immediate(InteractionResponse::message(&reply)),
            Ok(Err(join_error)) => {
                let error = HandlerError::Aborted(join_error.to_string()).into_interface(&id);
                error!(
                    event_name = "ingress.discord.handler_aborted",
                    correlation_id = %id,
                    command = %command,
                    error = %error,
                    "fast handler task ended abnormally"
                );
                Acknowledgement::immediate(InteractionResponse::message(&failure_message(
                    &command, &error,
                )))
            }
            Err(_) => {
                warn!(
                    event_name = "ingress.discord.fast_path_overrun",
                    correlation_id = %id,
                    command = %command,
                    budget_ms = self.timings.ack_budget.as_millis() as u64,
                    "fast handler exceeded acknowledgment budget; deferring"
                );
                let pending = self.spawn_followup(id, token, command, task, received_at);
                Acknowledgement { response: InteractionResponse::deferred(), pending: Some(pending) }
            }
        }
    }

    fn spawn_followup(
        &self,
        id: String,
        token: String,
        command: String,
        mut task: JoinHandle<ReplyMessage>,
        received_at: Instant,
    ) -> PendingResponse {
        let expires_at = received_at + self.timings.followup_expiry;
        let dispatcher = self.dispatcher.clone();
        let (task_id, task_token, task_command) = (id.clone(), token.clone(), command.clone());
        let guard = InFlightGuard::enter(&self.in_flight);

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let reply = match tokio::time::timeout_at(expires_at, &mut task).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(join_error)) => {
                    let error =
                        HandlerError::Aborted(join_error.to_string()).into_interface(&task_id);
                    failure_message(&task_command, &error)
                }
                Err(_) => {
                    task.abort();
                    error!(
                        event_name = "egress.discord.followup_expired",
                        correlation_id = %task_id,
                        command = %task_command,
                        "handler outlived the follow-up window; result cannot be delivered"
                    );
                    return DeliveryOutcome::Expired;
                }
            };
            dispatcher.deliver(&task_id, &task_token, &reply, expires_at).await
        });

        PendingResponse { interaction_id: id, token, command, handle }
    }
}

async fn execute(
    handler: Arc<dyn CommandHandler>,
    invocation: CommandInvocation,
    context: InvocationContext,
    interaction_id: String,
) -> ReplyMessage {
    match handler.handle(&invocation, &context).await {
        Ok(reply) => reply,
        Err(failure) => {
            warn!(
                event_name = "ingress.discord.handler_failed",
                correlation_id = %interaction_id,
                command = %invocation.name,
                error = %failure,
                "command handler failed"
            );
            failure_message(&invocation.name, &failure.into_interface(&interaction_id))
        }
    }
}
