use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use a2::{
    Client, ClientConfig, DefaultNotificationBuilder, NotificationBuilder, NotificationOptions,
    Priority, PushType,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::certificate::ClientIdentity;
use crate::config::Environment;
use crate::message::{DeliveryResult, Failure, Message, Payload};

/// Error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// TLS or session-layer failure. `detail` carries the full error chain text.
    #[error("transport failure: {detail}")]
    Transport { detail: String },

    #[error("failed to open APNs session: {0}")]
    Open(String),

    #[error("invalid notification payload: {0}")]
    Payload(String),

    #[error("gateway error: {0}")]
    Other(String),
}

impl GatewayError {
    pub fn transport(detail: impl Into<String>) -> Self {
        GatewayError::Transport {
            detail: detail.into(),
        }
    }
}

/// A live, authenticated session to the gateway.
///
/// Implementations must be safe for concurrent `send`: the same handle is
/// handed to every dispatch for its (application, purpose) key.
#[async_trait::async_trait]
pub trait ConnectionHandle: Send + Sync {
    /// Sends `message` to all of its tokens
    ///
    /// # Returns
    /// A structured per-token result, or `Err(GatewayError)` when the session
    /// itself failed. An error voids the outcome of every token in the
    /// message, including ones already accepted or rejected before the
    /// failure, so a caller that retries resends the whole message.
    async fn send(&self, message: &Message) -> Result<DeliveryResult, GatewayError>;
}

pub type SharedConnection = Arc<dyn ConnectionHandle>;

/// Opens gateway sessions
#[async_trait::async_trait]
pub trait GatewayClient: Send + Sync {
    /// Opens a session against the `environment` endpoint
    ///
    /// # Arguments
    /// * `environment` - Sandbox or production endpoint
    /// * `identity` - Certificate / private key pair authenticating the session
    /// * `read_tail_timeout` - Bounded wait for trailing error frames after a send
    async fn open(
        &self,
        environment: Environment,
        identity: &ClientIdentity,
        read_tail_timeout: Duration,
    ) -> Result<SharedConnection, GatewayError>;
}

/// What a gateway rejection means for the token it was addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Stop using the token
    FailedToken,
    /// Transient, send the token again
    Retry,
    /// Not tied to the token
    Generic,
}

/// Classify a rejected request by HTTP status and APNs reason code
pub fn classify_rejection(status: u16, reason: Option<&str>) -> Disposition {
    match reason {
        Some("BadDeviceToken" | "Unregistered" | "DeviceTokenNotForTopic") => {
            Disposition::FailedToken
        }
        _ if status == 410 => Disposition::FailedToken,
        _ if status == 429 || status >= 500 => Disposition::Retry,
        _ => Disposition::Generic,
    }
}

/// Whole-request timeout for a2 sends, connection setup included
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Apple Push Notification Service gateway backed by the `a2` HTTP/2 client
#[derive(Debug, Clone)]
pub struct ApnsGateway {
    request_timeout: Duration,
}

impl Default for ApnsGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ApnsGateway {
    pub fn new() -> Self {
        Self::with_request_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_request_timeout(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

/// a2 has a single per-request timeout that also covers the TCP and TLS
/// handshake of a cold client, so the read tail only acts as a lower bound.
fn request_timeout_secs(request_timeout: Duration, read_tail_timeout: Duration) -> u64 {
    request_timeout.max(read_tail_timeout).as_secs().max(1)
}

#[async_trait::async_trait]
impl GatewayClient for ApnsGateway {
    async fn open(
        &self,
        environment: Environment,
        identity: &ClientIdentity,
        read_tail_timeout: Duration,
    ) -> Result<SharedConnection, GatewayError> {
        let mut client_config = ClientConfig::new(environment.a2_endpoint());
        client_config.request_timeout_secs =
            Some(request_timeout_secs(self.request_timeout, read_tail_timeout));

        let client = Client::certificate_parts(
            identity.certificate_pem(),
            identity.private_key_pem(),
            client_config,
        )
        .map_err(|e| GatewayError::Open(error_chain(&e)))?;

        info!(
            endpoint = environment.endpoint(),
            not_after = identity.not_after(),
            "Opened APNs session"
        );

        Ok(Arc::new(ApnsConnection {
            client,
            environment,
        }))
    }
}

/// One authenticated `a2` client. The underlying HTTP/2 pool multiplexes
/// concurrent requests, so no extra locking is needed around `send`.
pub struct ApnsConnection {
    client: Client,
    environment: Environment,
}

impl ApnsConnection {
    fn notification(payload: &Payload) -> (DefaultNotificationBuilder<'_>, PushType) {
        match payload {
            Payload::Standard { alert, .. } => {
                let mut builder = DefaultNotificationBuilder::new()
                    .set_body(&alert.body)
                    .set_sound(&alert.sound)
                    .set_badge(alert.badge);
                if alert.content_available {
                    builder = builder.set_content_available();
                }
                (builder, PushType::Alert)
            }
            Payload::Voip { .. } => (DefaultNotificationBuilder::new(), PushType::Voip),
        }
    }
}

#[async_trait::async_trait]
impl ConnectionHandle for ApnsConnection {
    async fn send(&self, message: &Message) -> Result<DeliveryResult, GatewayError> {
        let mut result = DeliveryResult::for_message(message);

        for token in message.tokens() {
            let token_prefix = token.chars().take(8).collect::<String>();
            let (builder, push_type) = Self::notification(message.payload());

            let options = NotificationOptions {
                apns_push_type: Some(push_type),
                apns_priority: Some(Priority::High),
                ..Default::default()
            };

            let mut payload = builder.build(token, options);
            for (key, value) in message.payload().extra() {
                payload
                    .add_custom_data(key, value)
                    .map_err(|e| GatewayError::Payload(e.to_string()))?;
            }

            match self.client.send(payload).await {
                Ok(response) => {
                    debug!(
                        token = %token_prefix,
                        apns_id = ?response.apns_id,
                        environment = %self.environment,
                        "APNs notification accepted"
                    );
                }
                Err(a2::Error::ResponseError(response)) => {
                    let reason = response.error.as_ref().map(|body| format!("{:?}", body.reason));
                    let failure = Failure::new(
                        reason.clone().unwrap_or_else(|| "Unknown".to_string()),
                        format!("APNs rejected notification with status {}", response.code),
                    );

                    match classify_rejection(response.code, reason.as_deref()) {
                        Disposition::FailedToken => result.record_failed(token.clone(), failure),
                        Disposition::Retry => result.record_retry(token.clone()),
                        Disposition::Generic => result.record_error(failure),
                    }
                }
                Err(a2::Error::SerializeError(e)) => {
                    return Err(GatewayError::Payload(e.to_string()));
                }
                Err(e) => return Err(GatewayError::transport(error_chain(&e))),
            }
        }

        Ok(result)
    }
}

/// Render an error with all of its sources, so markers buried in the TLS
/// layer stay visible to callers that only see text.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut detail = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail
}
