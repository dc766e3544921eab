use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::messages::ReplyMessage;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FollowUpError {
    /// The interaction token is no longer accepted. Never retried.
    #[error("follow-up token expired")]
    Expired,
    #[error("follow-up rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("follow-up transport failed: {0}")]
    Transport(String),
}

impl FollowUpError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Expired => false,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(_) => true,
        }
    }
}

#[async_trait]
pub trait FollowUpTransport: Send + Sync {
    async fn send_followup(&self, token: &str, message: &ReplyMessage)
        -> Result<(), FollowUpError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl DeliveryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Expired,
    Failed(FollowUpError),
}

/// Sends follow-up messages for deferred interactions.
///
/// The immediate acknowledgment never goes through here: it is the body of
/// the HTTP response and is returned by the router directly.
#[derive(Clone)]
pub struct ResponseDispatcher {
    transport: Arc<dyn FollowUpTransport>,
    policy: DeliveryPolicy,
}

impl ResponseDispatcher {
    pub fn new(transport: Arc<dyn FollowUpTransport>, policy: DeliveryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Delivers one follow-up, retrying transient failures until `expires_at`.
    pub async fn deliver(
        &self,
        interaction_id: &str,
        token: &str,
        message: &ReplyMessage,
        expires_at: Instant,
    ) -> DeliveryOutcome {
        let mut attempt = 0;
        loop {
            if Instant::now() >= expires_at {
                error!(
                    event_name = "egress.discord.followup_expired",
                    correlation_id = %interaction_id,
                    attempt,
                    "follow-up window elapsed before delivery; dropping result"
                );
                return DeliveryOutcome::Expired;
            }

            match self.transport.send_followup(token, message).await {
                Ok(()) => {
                    info!(
                        event_name = "egress.discord.followup_sent",
                        correlation_id = %interaction_id,
                        attempts = attempt + 1,
                        "follow-up delivered"
                    );
                    return DeliveryOutcome::Delivered { attempts: attempt + 1 };
                }
                Err(FollowUpError::Expired) => {
                    error!(
                        event_name = "egress.discord.followup_expired",
                        correlation_id = %interaction_id,
                        attempt,
                        "platform rejected follow-up token as expired"
                    );
                    return DeliveryOutcome::Expired;
                }
                Err(failure) if failure.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        event_name = "egress.discord.followup_retry",
                        correlation_id = %interaction_id,
                        attempt,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "follow-up delivery failed; retrying"
                    );
                    if Instant::now() + delay >= expires_at {
                        error!(
                            event_name = "egress.discord.followup_expired",
                            correlation_id = %interaction_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "next retry would land past the follow-up window; dropping result"
                        );
                        return DeliveryOutcome::Expired;
                    }
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(failure) => {
                    error!(
                        event_name = "egress.discord.followup_failed",
                        correlation_id = %interaction_id,
                        attempt,
                        error = %failure,
                        "follow-up delivery failed permanently"
                    );
                    return DeliveryOutcome::Failed(failure);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    use super::{DeliveryOutcome, DeliveryPolicy, FollowUpError, FollowUpTransport, ResponseDispatcher};
    use crate::messages::ReplyMessage;

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        results: VecDeque<Result<(), FollowUpError>>,
        sent: Vec<(String, String)>,
    }

    impl ScriptedTransport {
        fn with_script(results: Vec<Result<(), FollowUpError>>) -> Self {
            Self { state: Mutex::new(ScriptedState { results: results.into(), sent: Vec::new() }) }
        }

        async fn sent(&self) -> Vec<(String, String)> {
            self.state.lock().await.sent.clone()
        }
    }

    #[async_trait]
    impl FollowUpTransport for ScriptedTransport {
        async fn send_followup(
            &self,
            token: &str,
            message: &ReplyMessage,
        ) -> Result<(), FollowUpError> {
            let mut state = self.state.lock().await;
            state.sent.push((token.to_owned(), message.content.clone()));
            state.results.pop_front().unwrap_or(Ok(()))
        }
    }

    fn policy() -> DeliveryPolicy {
        DeliveryPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<StdMutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            let bytes = self.0.lock().map(|buffer| buffer.clone()).unwrap_or_default();
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Ok(mut buffer) = self.0.lock() {
                buffer.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn far_future() -> Instant {
        Instant::now() + Duration::from_secs(900)
    }

    #[tokio::test]
    async fn retries_transient_failures_then_delivers() {
        let transport = Arc::new(ScriptedTransport::with_script(vec![
            Err(FollowUpError::Transport("connection reset".to_owned())),
            Err(FollowUpError::Rejected { status: 502, body: "bad gateway".to_owned() }),
            Ok(()),
        ]));
        let dispatcher = ResponseDispatcher::new(transport.clone(), policy());

        let outcome =
            dispatcher.deliver("1", "tok", &ReplyMessage::public("report"), far_future()).await;

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
        assert_eq!(transport.sent().await.len(), 3);
    }

    #[tokio::test]
    async fn expired_token_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::with_script(vec![Err(FollowUpError::Expired)]));
        let dispatcher = ResponseDispatcher::new(transport.clone(), policy());

        let outcome =
            dispatcher.deliver("1", "tok", &ReplyMessage::public("report"), far_future()).await;

        assert_eq!(outcome, DeliveryOutcome::Expired);
        assert_eq!(transport.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn client_errors_fail_without_retry() {
        let rejected = FollowUpError::Rejected { status: 400, body: "invalid form body".to_owned() };
        let transport = Arc::new(ScriptedTransport::with_script(vec![Err(rejected.clone())]));
        let dispatcher = ResponseDispatcher::new(transport.clone(), policy());

        let outcome =
            dispatcher.deliver("1", "tok", &ReplyMessage::public("report"), far_future()).await;

        assert_eq!(outcome, DeliveryOutcome::Failed(rejected));
        assert_eq!(transport.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn retries_stop_after_policy_limit() {
        let transport = Arc::new(ScriptedTransport::with_script(vec![
            Err(FollowUpError::Transport("down".to_owned())),
            Err(FollowUpError::Transport("down".to_owned())),
            Err(FollowUpError::Transport("down".to_owned())),
            Ok(()),
        ]));
        let dispatcher = ResponseDispatcher::new(transport.clone(), policy());

        let outcome =
            dispatcher.deliver("1", "tok", &ReplyMessage::public("report"), far_future()).await;

        assert_eq!(outcome, DeliveryOutcome::Failed(FollowUpError::Transport("down".to_owned())));
        assert_eq!(transport.sent().await.len(), 3);
    }

    #[tokio::test]
    async fn past_expiry_sends_nothing() {
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = ResponseDispatcher::new(transport.clone(), policy());

        let outcome =
            dispatcher.deliver("1", "tok", &ReplyMessage::public("late"), Instant::now()).await;

        assert_eq!(outcome, DeliveryOutcome::Expired);
        assert!(transport.sent().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_past_expiry_gives_up_and_logs_expiry() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let transport = Arc::new(ScriptedTransport::with_script(vec![
            Err(FollowUpError::Transport("reset".to_owned())),
            Err(FollowUpError::Transport("reset".to_owned())),
        ]));
        let slow_policy = DeliveryPolicy { max_retries: 3, base_delay_ms: 5_000, max_delay_ms: 5_000 };
        let dispatcher = ResponseDispatcher::new(transport.clone(), slow_policy);
        let started = Instant::now();

        let outcome = dispatcher
            .deliver("77", "tok", &ReplyMessage::public("report"), started + Duration::from_secs(1))
            .await;

        assert_eq!(outcome, DeliveryOutcome::Expired);
        assert_eq!(transport.sent().await.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(1), "must not sleep into the expired window");
        let output = logs.contents();
        assert!(output.contains("egress.discord.followup_retry"));
        assert!(output.contains("egress.discord.followup_expired"));
        assert!(output.contains("77"));
    }
}
