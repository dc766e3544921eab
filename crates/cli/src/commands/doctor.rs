use std::sync::Arc;

use serde::Serialize;
use stockbot_core::config::{AppConfig, LoadOptions};
use stockbot_discord::{
    manifest::default_manifest,
    rest::DiscordRestClient,
    signature::SignatureVerifier,
    sync::{CommandApi, CommandSyncer},
};

use crate::commands::{runtime, CommandResult, EXIT_CONFIG};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Fail { EXIT_CONFIG } else { 0 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_interaction_credentials(&config));
            checks.push(check_analysis_backend(&config));
            checks.push(check_registration(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["interaction_credentials", "analysis_backend", "command_registration"] {
                checks.push(DoctorCheck::skipped(name, "skipped because configuration did not load"));
            }
        }
    }

    let any_fail = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_fail { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_fail {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_interaction_credentials(config: &AppConfig) -> DoctorCheck {
    const NAME: &str = "interaction_credentials";

    let credentials = match config.require_interactions() {
        Ok(credentials) => credentials,
        Err(error) => return DoctorCheck::fail(NAME, error.to_string()),
    };
    match SignatureVerifier::from_hex(&credentials.public_key) {
        Ok(_) => DoctorCheck::pass(
            NAME,
            format!("public key usable for application {}", credentials.application_id),
        ),
        Err(error) => DoctorCheck::fail(NAME, format!("discord.public_key is unusable: {error}")),
    }
}

fn check_analysis_backend(config: &AppConfig) -> DoctorCheck {
    const NAME: &str = "analysis_backend";

    match config.analysis.endpoint_url.as_deref() {
        Some(endpoint_url) => DoctorCheck::pass(
            NAME,
            format!("{endpoint_url} (timeout {}s)", config.analysis.timeout_secs),
        ),
        None => DoctorCheck::skipped(
            NAME,
            "analysis.endpoint_url is not set; analysis commands will report unavailable",
        ),
    }
}

/// Lists the live commands and reports drift from the manifest without changing anything.
fn check_registration(config: &AppConfig) -> DoctorCheck {
    const NAME: &str = "command_registration";

    let credentials = match config.require_registration() {
        Ok(credentials) => credentials,
        Err(error) => return DoctorCheck::skipped(NAME, error.to_string()),
    };
    let manifest = match default_manifest() {
        Ok(manifest) => manifest,
        Err(error) => return DoctorCheck::fail(NAME, format!("manifest is invalid: {error}")),
    };
    let client =
        match DiscordRestClient::new(&config.discord.api_base_url, &credentials.application_id) {
            Ok(client) => client.with_bot_token(credentials.bot_token).with_guild(credentials.guild_id),
            Err(error) => return DoctorCheck::fail(NAME, error.to_string()),
        };
    let runtime = match runtime("doctor") {
        Ok(runtime) => runtime,
        Err(_) => return DoctorCheck::fail(NAME, "failed to initialize async runtime"),
    };

    let api: Arc<dyn CommandApi> = Arc::new(client);
    let syncer = CommandSyncer::new(Arc::new(manifest), api);
    match runtime.block_on(syncer.plan()) {
        Ok(diff) if diff.is_empty() => {
            DoctorCheck::pass(NAME, "registered commands match the manifest")
        }
        Ok(diff) => DoctorCheck::pass(
            NAME,
            format!(
                "drift: {} to create, {} to update, {} to delete; run `stockbot sync`",
                diff.create.len(),
                diff.update.len(),
                diff.delete.len()
            ),
        ),
        Err(error) => DoctorCheck::fail(NAME, error.to_string()),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
