//! Keeps the platform's registered commands in line with the local manifest.
//!
//! The syncer lists what is live, diffs it by name against the manifest and
//! applies the difference one call at a time so that a single rejected
//! command does not hide the outcome of the others.

use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::manifest::{CommandDefinition, CommandOption, Manifest};

/// Option shape as the platform reports it; kinds the manifest cannot express
/// are kept as raw codes so they still compare unequal.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegisteredOption {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub required: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegisteredCommand {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: Vec<RegisteredOption>,
}

impl RegisteredCommand {
    pub fn matches(&self, definition: &CommandDefinition) -> bool {
        self.name == definition.name
            && self.description == definition.description
            && self.options.len() == definition.options.len()
            && self
                .options
                .iter()
                .zip(&definition.options)
                .all(|(live, desired)| option_matches(live, desired))
    }
}

fn option_matches(live: &RegisteredOption, desired: &CommandOption) -> bool {
    live.name == desired.name
        && live.description == desired.description
        && live.kind == desired.kind.code()
        && live.required == desired.required
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandApiError {
    #[error("registration API rejected the bot token")]
    Unauthorized,
    #[error("registration API returned status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("registration API transport failed: {0}")]
    Transport(String),
    #[error("registration API response could not be decoded: {0}")]
    Decode(String),
}

/// The platform's command registration endpoints, scoped to one application
/// and optionally one guild.
#[async_trait]
pub trait CommandApi: Send + Sync {
    async fn list_commands(&self) -> Result<Vec<RegisteredCommand>, CommandApiError>;
    async fn create_command(
        &self,
        definition: &CommandDefinition,
    ) -> Result<RegisteredCommand, CommandApiError>;
    async fn edit_command(
        &self,
        id: &str,
        definition: &CommandDefinition,
    ) -> Result<RegisteredCommand, CommandApiError>;
    async fn delete_command(&self, id: &str) -> Result<(), CommandApiError>;
    /// Replaces the whole registered set in one call.
    async fn bulk_overwrite(
        &self,
        definitions: &[CommandDefinition],
    ) -> Result<Vec<RegisteredCommand>, CommandApiError>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrationDiff {
    pub create: Vec<CommandDefinition>,
    /// Live command id paired with the desired definition.
    pub update: Vec<(String, CommandDefinition)>,
    pub delete: Vec<RegisteredCommand>,
    pub unchanged: Vec<String>,
}

impl RegistrationDiff {
    pub fn compute(manifest: &Manifest, live: &[RegisteredCommand]) -> Self {
        let mut live_by_name: BTreeMap<&str, &RegisteredCommand> = BTreeMap::new();
        for command in live {
            live_by_name.entry(command.name.as_str()).or_insert(command);
        }

        let mut diff = Self::default();
        for definition in manifest.commands() {
            match live_by_name.remove(definition.name.as_str()) {
                None => diff.create.push(definition.clone()),
                Some(current) if current.matches(definition) => {
                    diff.unchanged.push(definition.name.clone())
                }
                Some(current) => diff.update.push((current.id.clone(), definition.clone())),
            }
        }
        diff.delete = live_by_name.into_values().cloned().collect();
        diff
    }

    /// True when applying the diff would change nothing.
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Delete stale, update changed, create missing.
    #[default]
    Incremental,
    /// Clear everything, then create each desired command.
    Replace,
}

impl FromStr for SyncStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "incremental" => Ok(Self::Incremental),
            "replace" => Ok(Self::Replace),
            other => Err(format!("unknown sync strategy `{other}` (expected incremental|replace)")),
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incremental => f.write_str("incremental"),
            Self::Replace => f.write_str("replace"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Created,
    Updated,
    Deleted,
    Unchanged,
    Failed { action: SyncAction, reason: String },
}

impl CommandOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    fn applied(action: SyncAction) -> Self {
        match action {
            SyncAction::Create => Self::Created,
            SyncAction::Update => Self::Updated,
            SyncAction::Delete => Self::Deleted,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommandSyncEntry {
    pub name: String,
    #[serde(flatten)]
    pub outcome: CommandOutcome,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    PartialFailure,
    Failure,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub strategy: SyncStrategy,
    pub dry_run: bool,
    pub entries: Vec<CommandSyncEntry>,
}

impl SyncReport {
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.outcome.is_failure()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &CommandSyncEntry> {
        self.entries.iter().filter(|entry| entry.outcome.is_failure())
    }

    pub fn status(&self) -> SyncStatus {
        let succeeded = self.succeeded();
        if succeeded == self.total() {
            SyncStatus::Success
        } else if succeeded == 0 {
            SyncStatus::Failure
        } else {
            SyncStatus::PartialFailure
        }
    }

    pub fn outcome_of(&self, name: &str) -> Option<&CommandOutcome> {
        self.entries.iter().find(|entry| entry.name == name).map(|entry| &entry.outcome)
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            write!(f, "dry run ({}): {} command(s) planned", self.strategy, self.total())
        } else {
            write!(f, "{}/{} succeeded", self.succeeded(), self.total())
        }
    }
}

/// The sync could not start, or its clearing step failed, so no per-command
/// outcome exists.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("could not list registered commands: {0}")]
    List(#[source] CommandApiError),
    #[error("could not clear registered commands: {0}")]
    Clear(#[source] CommandApiError),
}

pub struct CommandSyncer {
    manifest: Arc<Manifest>,
    api: Arc<dyn CommandApi>,
}

impl CommandSyncer {
    pub fn new(manifest: Arc<Manifest>, api: Arc<dyn CommandApi>) -> Self {
        Self { manifest, api }
    }

    pub async fn plan(&self) -> Result<RegistrationDiff, SyncError> {
        let live = self.api.list_commands().await.map_err(SyncError::List)?;
        Ok(RegistrationDiff::compute(&self.manifest, &live))
    }

    pub async fn sync(&self, strategy: SyncStrategy, dry_run: bool) -> Result<SyncReport, SyncError> {
        let diff = self.plan().await?;
        info!(
            event_name = "egress.discord.command_sync_planned",
            strategy = %strategy,
            dry_run,
            create = diff.create.len(),
            update = diff.update.len(),
            delete = diff.delete.len(),
            unchanged = diff.unchanged.len(),
            "computed registration diff"
        );

        let entries = match (strategy, dry_run) {
            (SyncStrategy::Incremental, true) => planned_incremental(&diff),
            (SyncStrategy::Replace, true) => planned_replace(&self.manifest, &diff),
            (SyncStrategy::Incremental, false) => self.apply_incremental(diff).await,
            (SyncStrategy::Replace, false) => self.apply_replace(diff).await?,
        };

        let report = SyncReport { strategy, dry_run, entries };
        info!(
            event_name = "egress.discord.command_sync_finished",
            strategy = %strategy,
            dry_run,
            succeeded = report.succeeded(),
            total = report.total(),
            status = ?report.status(),
            "command sync finished"
        );
        Ok(report)
    }

    async fn apply_incremental(&self, diff: RegistrationDiff) -> Vec<CommandSyncEntry> {
        let mut entries = Vec::new();

        for stale in diff.delete {
            let result = self.api.delete_command(&stale.id).await;
            entries.push(record(stale.name, SyncAction::Delete, result));
        }
        for (id, definition) in diff.update {
            let result = self.api.edit_command(&id, &definition).await.map(drop);
            entries.push(record(definition.name, SyncAction::Update, result));
        }
        for definition in diff.create {
            let result = self.api.create_command(&definition).await.map(drop);
            entries.push(record(definition.name, SyncAction::Create, result));
        }
        entries.extend(diff.unchanged.into_iter().map(unchanged));

        entries
    }

    async fn apply_replace(
        &self,
        diff: RegistrationDiff,
    ) -> Result<Vec<CommandSyncEntry>, SyncError> {
        self.api.bulk_overwrite(&[]).await.map_err(SyncError::Clear)?;

        let mut entries: Vec<_> = diff
            .delete
            .into_iter()
            .map(|stale| CommandSyncEntry { name: stale.name, outcome: CommandOutcome::Deleted })
            .collect();
        for definition in self.manifest.commands() {
            let result = self.api.create_command(definition).await.map(drop);
            entries.push(record(definition.name.clone(), SyncAction::Create, result));
        }
        Ok(entries)
    }
}

fn record(
    name: String,
    action: SyncAction,
    result: Result<(), CommandApiError>,
) -> CommandSyncEntry {
    let outcome = match result {
        Ok(()) => {
            info!(
                event_name = "egress.discord.command_synced",
                command = %name,
                action = ?action,
                "registration call succeeded"
            );
            CommandOutcome::applied(action)
        }
        Err(error) => {
            warn!(
                event_name = "egress.discord.command_sync_failed",
                command = %name,
                action = ?action,
                error = %error,
                "registration call failed"
            );
            CommandOutcome::Failed { action, reason: error.to_string() }
        }
    };
    CommandSyncEntry { name, outcome }
}

fn unchanged(name: String) -> CommandSyncEntry {
    CommandSyncEntry { name, outcome: CommandOutcome::Unchanged }
}

fn planned_incremental(diff: &RegistrationDiff) -> Vec<CommandSyncEntry> {
    let deletes = diff.delete.iter().map(|stale| (stale.name.clone(), CommandOutcome::Deleted));
    let updates = diff.update.iter().map(|(_, def)| (def.name.clone(), CommandOutcome::Updated));
    let creates = diff.create.iter().map(|def| (def.name.clone(), CommandOutcome::Created));
    deletes
        .chain(updates)
        .chain(creates)
        .map(|(name, outcome)| CommandSyncEntry { name, outcome })
        .chain(diff.unchanged.iter().cloned().map(unchanged))
        .collect()
}

fn planned_replace(manifest: &Manifest, diff: &RegistrationDiff) -> Vec<CommandSyncEntry> {
    diff.delete
        .iter()
        .map(|stale| CommandSyncEntry { name: stale.name.clone(), outcome: CommandOutcome::Deleted })
        .chain(manifest.commands().iter().map(|def| CommandSyncEntry {
            name: def.name.clone(),
            outcome: CommandOutcome::Created,
        }))
        .collect()
}
