/// Push Dispatcher
///
/// Turns one logical notification into up to `max_attempts` sends against the
/// cached session for its (application, purpose) pair.
///
/// - Per-token failures are logged and never retried
/// - Tokens the gateway asks to retry are resent immediately, alone
/// - Session failures evict the cached connection so the next attempt rebuilds it
/// - An expired certificate ends the call at once
/// - Credential problems end the call before any send
use std::sync::Arc;

use apns_gateway::{Alert, Environment, GatewayError, Message, Purpose, SharedConnection};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::error::{PushError, Result};
use crate::metrics;
use crate::services::connection_cache::ConnectionCache;
use crate::services::connection_factory::ConnectionFactory;

/// Text the TLS layer reports when the provider certificate has expired.
/// The gateway exposes no structured code for it.
pub const CERTIFICATE_EXPIRED_MARKER: &str = "certificate expired";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Why a push ended without reaching `Done`
#[derive(Debug)]
pub enum AbortReason {
    /// No usable connection could be obtained
    Connection(PushError),
    /// The session failed with the certificate-expired marker
    CertificateExpired(String),
    /// Every attempt was used
    AttemptsExhausted,
}

/// Final state of a push
#[derive(Debug)]
pub enum DeliveryOutcome {
    Done { attempts: u32 },
    Aborted { attempts: u32, reason: AbortReason },
}

impl DeliveryOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, DeliveryOutcome::Done { .. })
    }

    /// Sends performed
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Done { attempts } | DeliveryOutcome::Aborted { attempts, .. } => {
                *attempts
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Done { .. } => "done",
            DeliveryOutcome::Aborted {
                reason: AbortReason::Connection(_),
                ..
            } => "no_connection",
            DeliveryOutcome::Aborted {
                reason: AbortReason::CertificateExpired(_),
                ..
            } => "certificate_expired",
            DeliveryOutcome::Aborted {
                reason: AbortReason::AttemptsExhausted,
                ..
            } => "attempts_exhausted",
        }
    }
}

enum AttemptState {
    /// About to perform send number `attempt`
    Attempting { attempt: u32, message: Message },
    /// Send number `attempt` left work for another round
    Retrying { attempt: u32, message: Message },
    Done { attempts: u32 },
    Aborted { attempts: u32, reason: AbortReason },
}

pub struct PushDispatcher {
    cache: Arc<ConnectionCache>,
    factory: ConnectionFactory,
    environment: Environment,
    max_attempts: u32,
}

impl PushDispatcher {
    pub fn new(
        cache: Arc<ConnectionCache>,
        factory: ConnectionFactory,
        environment: Environment,
        max_attempts: u32,
    ) -> Self {
        Self {
            cache,
            factory,
            environment,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    /// Send a visible alert. Outcome is reported through logs and metrics only.
    #[allow(clippy::too_many_arguments)]
    pub async fn push(
        &self,
        app_id: i64,
        token: &str,
        alert: &str,
        sound: &str,
        badge: u32,
        content_available: bool,
        extra: Map<String, Value>,
    ) {
        let alert = Alert::new(alert)
            .with_sound(sound)
            .with_badge(badge)
            .with_content_available(content_available);

        self.dispatch(app_id, Message::alert(token, alert, extra))
            .await;
    }

    /// Send a VoIP wake-up. Outcome is reported through logs and metrics only.
    pub async fn voip_push(&self, app_id: i64, token: &str, extra: Map<String, Value>) {
        self.dispatch(app_id, Message::voip(token, extra)).await;
    }

    /// Run the attempt loop for `message` and report how it ended
    pub async fn dispatch(&self, app_id: i64, message: Message) -> DeliveryOutcome {
        let purpose = message.purpose();
        let mut state = AttemptState::Attempting {
            attempt: 1,
            message,
        };

        let outcome = loop {
            state = match state {
                AttemptState::Attempting { attempt, message } => {
                    if attempt > 1 {
                        warn!(app_id, %purpose, attempt, "Resending notification");
                    }
                    self.attempt(app_id, attempt, message).await
                }
                AttemptState::Retrying { attempt, message } if attempt < self.max_attempts => {
                    AttemptState::Attempting {
                        attempt: attempt + 1,
                        message,
                    }
                }
                AttemptState::Retrying { attempt, .. } => AttemptState::Aborted {
                    attempts: attempt,
                    reason: AbortReason::AttemptsExhausted,
                },
                AttemptState::Done { attempts } => break DeliveryOutcome::Done { attempts },
                AttemptState::Aborted { attempts, reason } => {
                    break DeliveryOutcome::Aborted { attempts, reason }
                }
            };
        };

        match &outcome {
            DeliveryOutcome::Done { attempts } => {
                debug!(app_id, %purpose, attempts, "Notification delivered");
            }
            DeliveryOutcome::Aborted { attempts, reason } => {
                warn!(app_id, %purpose, attempts, reason = ?reason, "Notification dropped");
            }
        }
        metrics::record_outcome(purpose, outcome.label());

        outcome
    }

    async fn attempt(&self, app_id: i64, attempt: u32, message: Message) -> AttemptState {
        let purpose = message.purpose();

        let connection = match self.connection(app_id, purpose).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(app_id, %purpose, error = %e, "No APNs connection available");
                return AttemptState::Aborted {
                    attempts: attempt - 1,
                    reason: AbortReason::Connection(e),
                };
            }
        };

        debug!(app_id, %purpose, attempt, tokens = ?message.tokens(), "Sending APNs notification");
        metrics::record_send_attempt(purpose);

        match connection.send(&message).await {
            Ok(result) => {
                for (token, failure) in result.failed() {
                    error!(
                        app_id,
                        %token,
                        reason = %failure.reason,
                        explanation = %failure.explanation,
                        "Failed token"
                    );
                }

                for failure in result.errors() {
                    error!(
                        app_id,
                        reason = %failure.reason,
                        explanation = %failure.explanation,
                        "Send notification fail"
                    );
                }

                match result.retry_message() {
                    Some(retry) => AttemptState::Retrying {
                        attempt,
                        message: retry,
                    },
                    None => AttemptState::Done { attempts: attempt },
                }
            }
            Err(GatewayError::Transport { detail }) => {
                warn!(app_id, %purpose, attempt, %detail, "APNs transport failure");
                self.evict(app_id, purpose, "transport");

                if detail.contains(CERTIFICATE_EXPIRED_MARKER) {
                    AttemptState::Aborted {
                        attempts: attempt,
                        reason: AbortReason::CertificateExpired(detail),
                    }
                } else {
                    AttemptState::Retrying { attempt, message }
                }
            }
            Err(e) => {
                warn!(app_id, %purpose, attempt, error = %e, "Send notification exception");
                self.evict(app_id, purpose, "error");
                AttemptState::Retrying { attempt, message }
            }
        }
    }

    /// Cached session, or a freshly built one that is cached on success
    async fn connection(&self, app_id: i64, purpose: Purpose) -> Result<SharedConnection> {
        if let Some(connection) = self.cache.get(app_id, purpose) {
            return Ok(connection);
        }

        let connection = self.factory.build(app_id, purpose, self.environment).await?;
        self.cache.set(app_id, purpose, connection.clone());
        Ok(connection)
    }

    fn evict(&self, app_id: i64, purpose: Purpose, cause: &str) {
        if self.cache.remove(app_id, purpose) {
            metrics::record_eviction(purpose, cause);
        }
    }
}
