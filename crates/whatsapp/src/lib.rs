//! WhatsApp delivery for approval requests.
//!
//! The crate implements the core `Notifier` port on top of an HTTP message
//! gateway:
//! - **Phone numbers** (`phone`) - normalisation to the `62…` international form
//! - **Messages** (`message`) - the JSON payload posted to the gateway
//! - **Transport** (`transport`) - gateway client, retry policy and notifiers
//!
//! # Architecture
//!
//! ```text
//! NotificationDispatcher → WhatsAppNotifier → GatewayTransport → gateway
//!                               ↓
//!                         RetryPolicy (backoff on transient failures)
//! ```
//!
//! When `whatsapp.enabled` is false, `notifier_from_config` returns a
//! `NoopNotifier` that only logs.

use std::sync::Arc;
use std::time::Duration;

use sarpras_core::config::WhatsAppConfig;
use sarpras_core::dispatch::Notifier;

pub mod message;
pub mod phone;
pub mod transport;

pub use message::GatewayMessage;
pub use phone::normalize_phone;
pub use transport::{
    GatewayTransport, HttpGatewayTransport, NoopNotifier, RetryPolicy, TransportError,
    WhatsAppNotifier,
};

/// Builds the notifier selected by configuration.
pub fn notifier_from_config(config: &WhatsAppConfig) -> Result<Arc<dyn Notifier>, TransportError> {
    let (Some(gateway_url), Some(api_token), true) =
        (config.gateway_url.as_ref(), config.api_token.as_ref(), config.enabled)
    else {
        tracing::info!(
            event_name = "whatsapp.transport.disabled",
            "whatsapp delivery disabled; approval messages will only be logged"
        );
        return Ok(Arc::new(NoopNotifier));
    };

    let transport = HttpGatewayTransport::new(
        gateway_url.clone(),
        api_token.clone(),
        Duration::from_secs(config.timeout_secs),
    )?;
    let policy = RetryPolicy { max_retries: config.max_retries, ..RetryPolicy::default() };
    Ok(Arc::new(WhatsAppNotifier::new(Arc::new(transport), policy)))
}

#[cfg(test)]
mod tests {
    use sarpras_core::config::WhatsAppConfig;
    use secrecy::SecretString;

    use super::notifier_from_config;

    fn config(enabled: bool) -> WhatsAppConfig {
        WhatsAppConfig {
            enabled,
            gateway_url: Some("http://127.0.0.1:9/send".to_string()),
            api_token: Some(SecretString::from("test-token".to_string())),
            timeout_secs: 1,
            max_retries: 0,
        }
    }

    #[tokio::test]
    async fn disabled_config_yields_logging_notifier() {
        let notifier = notifier_from_config(&config(false)).expect("notifier");
        notifier.send("081234500001", "halo").await.expect("noop always succeeds");
    }

    #[tokio::test]
    async fn enabled_config_still_validates_recipients_before_sending() {
        let notifier = notifier_from_config(&config(true)).expect("notifier");
        let result = notifier.send("not-a-phone", "halo").await;
        assert!(matches!(
            result,
            Err(sarpras_core::dispatch::NotifyError::InvalidRecipient(_))
        ));
    }
}
