use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use stockbot_core::{
    analysis::{
        AnalysisError, AnalysisReport, AnalysisRequest, AnalysisService,
        UnconfiguredAnalysisService,
    },
    config::AnalysisConfig,
};
use tracing::{info, warn};

/// Posts `{command, arguments}` to the analysis backend and expects
/// `{content}` back.
pub struct HttpAnalysisService {
    client: Client,
    endpoint_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl HttpAnalysisService {
    pub fn new(
        endpoint_url: &str,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, AnalysisError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| AnalysisError::Unavailable(error.to_string()))?;
        Ok(Self { client, endpoint_url: endpoint_url.to_owned(), api_key, timeout })
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn handle(&self, request: AnalysisRequest) -> Result<AnalysisReport, AnalysisError> {
        let mut call = self.client.post(&self.endpoint_url).json(&request);
        if let Some(api_key) = &self.api_key {
            call = call.bearer_auth(api_key.expose_secret());
        }

        let response = call.send().await.map_err(|error| {
            if error.is_timeout() {
                AnalysisError::TimedOut(self.timeout.as_secs())
            } else {
                AnalysisError::Unavailable(error.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            let report = response.json::<AnalysisReport>().await.map_err(|error| {
                if error.is_timeout() {
                    AnalysisError::TimedOut(self.timeout.as_secs())
                } else {
                    AnalysisError::Failed(format!("malformed analysis response: {error}"))
                }
            })?;
            info!(
                event_name = "egress.analysis.completed",
                command = %request.command,
                content_chars = report.content.chars().count(),
                "analysis backend returned a report"
            );
            return Ok(report);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            event_name = "egress.analysis.rejected",
            command = %request.command,
            status = status.as_u16(),
            "analysis backend returned an error status"
        );
        Err(classify_status(status, body))
    }
}

fn classify_status(status: StatusCode, body: String) -> AnalysisError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            AnalysisError::InvalidInput(body)
        }
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => {
            AnalysisError::Unavailable(format!("backend timed out: {body}"))
        }
        status if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
            AnalysisError::Unavailable(format!("status {}: {body}", status.as_u16()))
        }
        status => AnalysisError::Failed(format!("status {}: {body}", status.as_u16())),
    }
}

/// Picks the analysis backend for the config, with a short label for status
/// and health output.
pub fn from_config(
    config: &AnalysisConfig,
) -> Result<(Arc<dyn AnalysisService>, &'static str), AnalysisError> {
    match config.endpoint_url.as_deref().map(str::trim).filter(|url| !url.is_empty()) {
        Some(endpoint_url) => {
            let service = HttpAnalysisService::new(
                endpoint_url,
                config.api_key.clone(),
                Duration::from_secs(config.timeout_secs),
            )?;
            Ok((Arc::new(service), "http"))
        }
        None => Ok((Arc::new(UnconfiguredAnalysisService), "unconfigured")),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use stockbot_core::{analysis::AnalysisError, config::AnalysisConfig};

    use super::{classify_status, from_config};

    #[test]
    fn client_errors_are_invalid_input_and_server_errors_unavailable() {
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "unknown code".to_owned()),
            AnalysisError::InvalidInput("unknown code".to_owned())
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, String::new()),
            AnalysisError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, String::new()),
            AnalysisError::Failed(_)
        ));
    }

    #[test]
    fn missing_endpoint_selects_unconfigured_backend() {
        let config = AnalysisConfig { endpoint_url: None, api_key: None, timeout_secs: 300 };
        let (_, label) = from_config(&config).expect("backend");
        assert_eq!(label, "unconfigured");

        let config = AnalysisConfig {
            endpoint_url: Some("http://127.0.0.1:9000/analyze".to_owned()),
            api_key: None,
            timeout_secs: 300,
        };
        let (_, label) = from_config(&config).expect("backend");
        assert_eq!(label, "http");
    }
}
