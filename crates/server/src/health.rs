use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use stockbot_discord::router::InteractionRouter;

#[derive(Clone)]
pub struct HealthState {
    pub router: Arc<InteractionRouter>,
    pub analysis_backend: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub commands: HealthCheck,
    pub analysis: HealthCheck,
    pub pending_followups: usize,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let command_count = state.router.table().len();
    let commands = if command_count == 0 {
        HealthCheck { status: "degraded", detail: "no commands are routed".to_owned() }
    } else {
        HealthCheck { status: "ready", detail: format!("{command_count} command(s) routed") }
    };
    let analysis = match state.analysis_backend {
        "unconfigured" => HealthCheck {
            status: "degraded",
            detail: "analysis.endpoint_url is not set; analysis commands will fail".to_owned(),
        },
        backend => HealthCheck { status: "ready", detail: format!("{backend} backend configured") },
    };
    let ready = commands.status == "ready" && analysis.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "stockbot-server accepting interactions".to_owned(),
        },
        commands,
        analysis,
        pending_followups: state.router.in_flight_followups(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{extract::State, http::StatusCode, Json};
    use stockbot_core::analysis::UnconfiguredAnalysisService;
    use stockbot_discord::{
        dispatcher::{DeliveryPolicy, FollowUpError, FollowUpTransport, ResponseDispatcher},
        handlers::default_table,
        manifest::default_manifest,
        messages::ReplyMessage,
        router::{InteractionRouter, RouterTimings},
    };

    use crate::health::{health, HealthState};

    struct NullTransport;

    #[async_trait]
    impl FollowUpTransport for NullTransport {
        async fn send_followup(
            &self,
            _token: &str,
            _message: &ReplyMessage,
        ) -> Result<(), FollowUpError> {
            Ok(())
        }
    }

    fn state(analysis_backend: &'static str) -> HealthState {
        let manifest = Arc::new(default_manifest().expect("manifest"));
        let table = default_table(manifest, Arc::new(UnconfiguredAnalysisService), analysis_backend)
            .expect("table");
        let dispatcher = ResponseDispatcher::new(Arc::new(NullTransport), DeliveryPolicy::default());
        HealthState {
            router: Arc::new(InteractionRouter::new(table, dispatcher, RouterTimings::default())),
            analysis_backend,
        }
    }

    #[tokio::test]
    async fn health_returns_ready_when_analysis_backend_is_configured() {
        let (status, Json(payload)) = health(State(state("http"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.commands.detail, "5 command(s) routed");
        assert_eq!(payload.pending_followups, 0);
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_without_analysis_backend() {
        let (status, Json(payload)) = health(State(state("unconfigured"))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.analysis.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }
}
