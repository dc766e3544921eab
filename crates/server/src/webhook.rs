use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use stockbot_discord::{
    interactions::Interaction,
    router::InteractionRouter,
    signature::{RequestVerifier, SignatureHeaders, SIGNATURE_HEADER, TIMESTAMP_HEADER},
};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Clone)]
pub struct WebhookState {
    pub verifier: Arc<dyn RequestVerifier>,
    pub router: Arc<InteractionRouter>,
    /// Interactions addressed to any other application are refused.
    pub application_id: Arc<str>,
}

#[derive(Debug, Serialize)]
struct WebhookError {
    error: &'static str,
}

pub fn router(path: &str, state: WebhookState) -> Router {
    Router::new().route(path, post(receive)).with_state(state)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_owned)
}

/// Authenticates the raw body, then parses and routes it. Nothing is parsed
/// until the signature checks out.
pub async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let received_at = Instant::now();
    let signature_headers = SignatureHeaders {
        signature: header_value(&headers, SIGNATURE_HEADER),
        timestamp: header_value(&headers, TIMESTAMP_HEADER),
    };

    if let Err(error) = state.verifier.verify(&signature_headers, &body) {
        warn!(
            event_name = "ingress.discord.signature_rejected",
            error = %error,
            body_bytes = body.len(),
            "rejecting unauthenticated interaction"
        );
        return (StatusCode::UNAUTHORIZED, Json(WebhookError { error: "invalid request signature" }))
            .into_response();
    }

    let interaction = match Interaction::parse(&body) {
        Ok(interaction) => interaction,
        Err(error) => {
            warn!(
                event_name = "ingress.discord.malformed_interaction",
                error = %error,
                "authenticated interaction body could not be parsed"
            );
            return (StatusCode::BAD_REQUEST, Json(WebhookError { error: "malformed interaction" }))
                .into_response();
        }
    };

    if let Some(addressed_to) = interaction.application_id.as_deref() {
        if addressed_to != &*state.application_id {
            warn!(
                event_name = "ingress.discord.application_mismatch",
                correlation_id = %interaction.id,
                addressed_to,
                expected = %state.application_id,
                "interaction addressed to another application"
            );
            return (
                StatusCode::BAD_REQUEST,
                Json(WebhookError { error: "interaction addressed to another application" }),
            )
                .into_response();
        }
    }

    info!(
        event_name = "ingress.discord.interaction_received",
        correlation_id = %interaction.id,
        channel_id = interaction.context.channel_id.as_deref().unwrap_or("none"),
        guild_id = interaction.context.guild_id.as_deref().unwrap_or("none"),
        "interaction authenticated"
    );

    let acknowledgement = state.router.route_at(interaction, received_at).await;
    if let Some(pending) = acknowledgement.pending {
        pending.detach();
    }
    (StatusCode::OK, Json(acknowledgement.response)).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use ed25519_dalek::{Signer, SigningKey};
    use serde_json::{json, Value};
    use stockbot_core::analysis::{
        AnalysisError, AnalysisReport, AnalysisRequest, AnalysisService,
    };
    use stockbot_discord::{
        dispatcher::{DeliveryPolicy, FollowUpError, FollowUpTransport, ResponseDispatcher},
        handlers::default_table,
        manifest::default_manifest,
        messages::ReplyMessage,
        router::{InteractionRouter, RouterTimings},
        signature::SignatureVerifier,
    };
    use tower::ServiceExt;

    use super::{router, WebhookState};

    const PATH: &str = "/discord/interactions";

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

    #[derive(Default)]
    struct CountingAnalysis {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AnalysisService for CountingAnalysis {
        async fn handle(&self, _request: AnalysisRequest) -> Result<AnalysisReport, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AnalysisReport::new("report"))
        }
    }

    struct Fixture {
        app: axum::Router,
        signing_key: SigningKey,
        analysis: Arc<CountingAnalysis>,
    }

    fn fixture() -> Fixture {
        let signing_key = SigningKey::from_bytes(&[3u8; 32]);
        let verifier = SignatureVerifier::from_hex(&hex::encode(
            signing_key.verifying_key().to_bytes(),
        ))
        .expect("verifier");

        let analysis = Arc::new(CountingAnalysis::default());
        let manifest = Arc::new(default_manifest().expect("manifest"));
        let table = default_table(manifest, analysis.clone(), "test").expect("table");
        let dispatcher = ResponseDispatcher::new(Arc::new(NullTransport), DeliveryPolicy::default());
        let interaction_router =
            InteractionRouter::new(table, dispatcher, RouterTimings::default());

        let app = router(
            PATH,
            WebhookState {
                verifier: Arc::new(verifier),
                router: Arc::new(interaction_router),
                application_id: Arc::from("42"),
            },
        );
        Fixture { app, signing_key, analysis }
    }

    fn now() -> String {
        chrono::Utc::now().timestamp().to_string()
    }

    fn signed_request(key: &SigningKey, timestamp: &str, body: &str) -> Request<Body> {
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body.as_bytes());
        let signature = hex::encode(key.sign(&message).to_bytes());

        Request::builder()
            .method("POST")
            .uri(PATH)
            .header("content-type", "application/json")
            .header("X-Signature-Ed25519", signature)
            .header("X-Signature-Timestamp", timestamp)
            .body(Body::from(body.to_owned()))
            .expect("request")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    fn analyze_body() -> String {
        json!({
            "id": "3001",
            "application_id": "42",
            "type": 2,
            "token": "tok-3001",
            "user": { "id": "55", "username": "trader" },
            "data": { "name": "analyze", "options": [{ "name": "code", "type": 3, "value": "AAPL" }] }
        })
        .to_string()
    }

    #[tokio::test]
    async fn ping_with_valid_signature_gets_pong() {
        let fx = fixture();
        let body = r#"{"id":"1","application_id":"42","type":1}"#;

        let response =
            fx.app.oneshot(signed_request(&fx.signing_key, &now(), body)).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"type": 1}));
    }

    #[tokio::test]
    async fn tampered_body_is_unauthorized_and_never_dispatched() {
        let fx = fixture();
        let mut request = signed_request(&fx.signing_key, &now(), &analyze_body());
        *request.body_mut() = Body::from(analyze_body().replace("AAPL", "MSFT"));

        let response = fx.app.oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(fx.analysis.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_signature_headers_are_unauthorized() {
        let fx = fixture();
        let request = axum::http::Request::builder()
            .method("POST")
            .uri(PATH)
            .body(Body::from(r#"{"id":"1","type":1}"#))
            .expect("request");

        let response = fx.app.oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signed_garbage_is_bad_request() {
        let fx = fixture();

        let response = fx
            .app
            .oneshot(signed_request(&fx.signing_key, &now(), "not json"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn slow_command_is_acknowledged_with_deferred_marker() {
        let fx = fixture();

        let response = fx
            .app
            .oneshot(signed_request(&fx.signing_key, &now(), &analyze_body()))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"type": 5}));
    }

    #[tokio::test]
    async fn unknown_command_gets_ephemeral_message() {
        let fx = fixture();
        let body = json!({
            "id": "3002",
            "type": 2,
            "token": "tok-3002",
            "user": { "id": "55", "username": "trader" },
            "data": { "name": "buy" }
        })
        .to_string();

        let response =
            fx.app.oneshot(signed_request(&fx.signing_key, &now(), &body)).await.expect("response");

        let payload = json_body(response).await;
        assert_eq!(payload["type"], 4);
        assert_eq!(payload["data"]["flags"], 64);
        assert_eq!(fx.analysis.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn interaction_for_another_application_is_rejected() {
        let fx = fixture();
        let body = analyze_body()
            .replace("\"application_id\":\"42\"", "\"application_id\":\"999\"");
        assert!(body.contains("999"));

        let response =
            fx.app.oneshot(signed_request(&fx.signing_key, &now(), &body)).await.expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"],
            "interaction addressed to another application"
        );
        assert_eq!(fx.analysis.calls.load(Ordering::SeqCst), 0);
    }
}
