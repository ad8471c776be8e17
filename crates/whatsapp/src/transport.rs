use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use sarpras_core::dispatch::{Notifier, NotifyError};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::message::{GatewayMessage, GatewayReply};
use crate::phone::normalize_phone;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("gateway client could not be built: {0}")]
    Client(String),
    #[error("gateway request failed: {0}")]
    Request(String),
    #[error("gateway answered {status}: {detail}")]
    Status { status: u16, detail: String },
}

impl TransportError {
    /// Network failures, throttling and server errors are worth another try;
    /// any other refusal will not change on resend.
    fn is_transient(&self) -> bool {
        match self {
            Self::Client(_) => false,
            Self::Request(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

impl From<TransportError> for NotifyError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Status { status, detail } => Self::Rejected { status, detail },
            other => Self::Transport(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay_ms: 500, max_delay_ms: 8_000 }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn deliver(&self, message: &GatewayMessage) -> Result<(), TransportError>;
}

/// Posts messages to an HTTP gateway with a bearer credential.
pub struct HttpGatewayTransport {
    client: Client,
    endpoint: String,
    api_token: SecretString,
}

impl HttpGatewayTransport {
    pub fn new(
        endpoint: String,
        api_token: SecretString,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| TransportError::Client(error.to_string()))?;
        Ok(Self { client, endpoint, api_token })
    }
}

#[async_trait]
impl GatewayTransport for HttpGatewayTransport {
    async fn deliver(&self, message: &GatewayMessage) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_token.expose_secret()))
            .json(message)
            .send()
            .await
            .map_err(|error| TransportError::Request(error.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(TransportError::Status { status: status.as_u16(), detail: body });
        }

        let reply = GatewayReply::parse(&body);
        if !reply.status {
            return Err(TransportError::Status {
                status: status.as_u16(),
                detail: reply.detail.unwrap_or_else(|| "delivery refused".to_string()),
            });
        }
        Ok(())
    }
}

pub struct WhatsAppNotifier {
    transport: Arc<dyn GatewayTransport>,
    retry_policy: RetryPolicy,
}

impl WhatsAppNotifier {
    pub fn new(transport: Arc<dyn GatewayTransport>, retry_policy: RetryPolicy) -> Self {
        Self { transport, retry_policy }
    }
}

#[async_trait]
impl Notifier for WhatsAppNotifier {
    async fn send(&self, phone: &str, message: &str) -> Result<(), NotifyError> {
        let target = normalize_phone(phone)?;
        let payload = GatewayMessage { target, message: message.to_string() };

        let mut attempt = 0;
        loop {
            match self.transport.deliver(&payload).await {
                Ok(()) => {
                    info!(
                        event_name = "whatsapp.message.delivered",
                        target = %payload.target,
                        attempt,
                        "whatsapp message accepted by gateway"
                    );
                    return Ok(());
                }
                Err(error) if error.is_transient() && attempt < self.retry_policy.max_retries => {
                    warn!(
                        event_name = "whatsapp.message.retry",
                        target = %payload.target,
                        attempt,
                        max_retries = self.retry_policy.max_retries,
                        error = %error,
                        "whatsapp gateway call failed; retrying"
                    );
                    let delay = self.retry_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(error) => {
                    warn!(
                        event_name = "whatsapp.message.failed",
                        target = %payload.target,
                        attempt,
                        error = %error,
                        "whatsapp gateway gave up on message"
                    );
                    return Err(error.into());
                }
            }
        }
    }
}

/// Stands in for the gateway when delivery is disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, phone: &str, message: &str) -> Result<(), NotifyError> {
        debug!(
            event_name = "whatsapp.message.skipped",
            phone,
            message_len = message.len(),
            "whatsapp disabled; message not sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use sarpras_core::dispatch::{Notifier, NotifyError};
    use tokio::sync::Mutex;

    use super::{GatewayTransport, RetryPolicy, TransportError, WhatsAppNotifier};
    use crate::message::GatewayMessage;

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        results: VecDeque<Result<(), TransportError>>,
        delivered: Vec<GatewayMessage>,
    }

    impl ScriptedTransport {
        fn with_script(results: Vec<Result<(), TransportError>>) -> Self {
            Self {
                state: Mutex::new(ScriptedState { results: results.into(), delivered: Vec::new() }),
            }
        }

        async fn attempts(&self) -> Vec<GatewayMessage> {
            self.state.lock().await.delivered.clone()
        }
    }

    #[async_trait]
    impl GatewayTransport for ScriptedTransport {
        async fn deliver(&self, message: &GatewayMessage) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.delivered.push(message.clone());
            state.results.pop_front().unwrap_or(Ok(()))
        }
    }

    fn instant(max_retries: u32) -> RetryPolicy {
        RetryPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn retries_transient_failures_then_delivers() {
        let transport = Arc::new(ScriptedTransport::with_script(vec![
            Err(TransportError::Request("connection reset".to_string())),
            Err(TransportError::Status { status: 503, detail: "busy".to_string() }),
            Ok(()),
        ]));
        let notifier = WhatsAppNotifier::new(transport.clone(), instant(2));

        notifier.send("0812-3450-0001", "Mohon persetujuan").await.expect("delivered");

        let attempts = transport.attempts().await;
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|message| message.target == "6281234500001"));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_last_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(vec![
            Err(TransportError::Request("timeout-1".to_string())),
            Err(TransportError::Request("timeout-2".to_string())),
            Err(TransportError::Request("timeout-3".to_string())),
        ]));
        let notifier = WhatsAppNotifier::new(transport.clone(), instant(2));

        let result = notifier.send("081234500001", "halo").await;

        assert!(matches!(
            result,
            Err(NotifyError::Transport(detail)) if detail.contains("timeout-3")
        ));
        assert_eq!(transport.attempts().await.len(), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let transport = Arc::new(ScriptedTransport::with_script(vec![Err(
            TransportError::Status { status: 401, detail: "bad token".to_string() },
        )]));
        let notifier = WhatsAppNotifier::new(transport.clone(), instant(5));

        let result = notifier.send("081234500001", "halo").await;

        assert_eq!(
            result,
            Err(NotifyError::Rejected { status: 401, detail: "bad token".to_string() })
        );
        assert_eq!(transport.attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn invalid_recipient_never_reaches_the_gateway() {
        let transport = Arc::new(ScriptedTransport::default());
        let notifier = WhatsAppNotifier::new(transport.clone(), instant(1));

        let result = notifier.send("bukan nomor", "halo").await;

        assert!(matches!(result, Err(NotifyError::InvalidRecipient(_))));
        assert!(transport.attempts().await.is_empty());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy { max_retries: 5, base_delay_ms: 100, max_delay_ms: 1_000 };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(10), Duration::from_millis(1_000));
    }
}
