use std::sync::Arc;

use axum::Router;
use stockbot_core::{
    analysis::AnalysisError,
    config::{AppConfig, ConfigError, LoadOptions},
};
use stockbot_discord::{
    dispatcher::{DeliveryPolicy, ResponseDispatcher},
    handlers::default_table,
    manifest::{default_manifest, Manifest, ManifestError},
    rest::{DiscordRestClient, RestError},
    router::{InteractionRouter, RouterSetupError, RouterTimings},
    signature::{RequestVerifier, SignatureVerifier, VerifierSetupError},
};
use thiserror::Error;
use tracing::info;

use crate::{analysis, health, webhook};

pub struct Application {
    pub config: AppConfig,
    pub application_id: String,
    pub manifest: Arc<Manifest>,
    pub router: Arc<InteractionRouter>,
    pub verifier: Arc<dyn RequestVerifier>,
    pub analysis_backend: &'static str,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("discord.public_key is unusable: {0}")]
    PublicKey(#[from] VerifierSetupError),
    #[error("command manifest is invalid: {0}")]
    Manifest(#[from] ManifestError),
    #[error("command handlers do not match the manifest: {0}")]
    Routes(#[from] RouterSetupError),
    #[error("discord REST client could not be built: {0}")]
    Rest(#[from] RestError),
    #[error("analysis backend could not be built: {0}")]
    Analysis(#[from] AnalysisError),
}

pub fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config)
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let credentials = config.require_interactions()?;

    let verifier = SignatureVerifier::from_hex(&credentials.public_key)?
        .with_max_skew(config.discord.max_timestamp_skew());

    let manifest = Arc::new(default_manifest()?);
    let (analysis_service, analysis_backend) = analysis::from_config(&config.analysis)?;
    let table = default_table(Arc::clone(&manifest), analysis_service, analysis_backend)?;

    let rest = DiscordRestClient::new(&config.discord.api_base_url, &credentials.application_id)?;
    let dispatcher = ResponseDispatcher::new(Arc::new(rest), DeliveryPolicy::default());
    let router = InteractionRouter::new(
        table,
        dispatcher,
        RouterTimings::from(&config.interactions),
    );
    info!(
        event_name = "system.bootstrap.router_ready",
        correlation_id = "bootstrap",
        commands = manifest.len(),
        analysis_backend,
        ack_budget_ms = router.timings().ack_budget.as_millis() as u64,
        "interaction router initialized"
    );

    Ok(Application {
        config,
        application_id: credentials.application_id,
        manifest,
        router: Arc::new(router),
        verifier: Arc::new(verifier),
        analysis_backend,
    })
}

impl Application {
    pub fn http_router(&self) -> Router {
        let webhook_state = webhook::WebhookState {
            verifier: Arc::clone(&self.verifier),
            router: Arc::clone(&self.router),
            application_id: Arc::from(self.application_id.as_str()),
        };
        let health_state = health::HealthState {
            router: Arc::clone(&self.router),
            analysis_backend: self.analysis_backend,
        };
        webhook::router(&self.config.server.interactions_path, webhook_state)
            .merge(health::router(health_state))
    }
}
