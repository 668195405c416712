/// Certificate rotation listener
///
/// Long-lived background task evicting cached sessions for applications whose
/// certificate changed. Subscription failures are logged and the task
/// resubscribes after a bounded, jittered exponential backoff.
use std::sync::Arc;
use std::time::Duration;

use apns_gateway::Purpose;
use credential_rotation::{parse_application_id, RotationFeed};
use futures::StreamExt;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::metrics;
use crate::services::connection_cache::ConnectionCache;

/// Floor for the resubscribe delay, whatever the configured bounds
pub const MIN_RESUBSCRIBE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first resubscription
    pub initial: Duration,
    /// Upper bound for the delay
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

pub struct InvalidationListener {
    cache: Arc<ConnectionCache>,
    feed: Arc<dyn RotationFeed>,
    backoff: BackoffConfig,
}

impl BackoffConfig {
    /// Bounds with the floor applied and `max >= initial`
    fn normalized(self) -> Self {
        let initial = self.initial.max(MIN_RESUBSCRIBE_DELAY);
        Self {
            initial,
            max: self.max.max(initial),
        }
    }
}

impl InvalidationListener {
    pub fn new(cache: Arc<ConnectionCache>, feed: Arc<dyn RotationFeed>, backoff: BackoffConfig) -> Self {
        Self {
            cache,
            feed,
            backoff: backoff.normalized(),
        }
    }

    /// Run on a dedicated task for the rest of the process
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Subscribe, consume, resubscribe. Never returns.
    pub async fn run(self) {
        let mut delay = self.backoff.initial;

        loop {
            match self.feed.subscribe().await {
                Ok(mut stream) => {
                    delay = self.backoff.initial;

                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(body) => {
                                self.handle_message(&body);
                            }
                            Err(e) => {
                                error!(error = %e, "Rotation subscription failed");
                                break;
                            }
                        }
                    }

                    warn!("Rotation subscription ended");
                }
                Err(e) => {
                    error!(error = %e, "Failed to subscribe to rotation events");
                }
            }

            let wait = jittered(delay);
            info!(delay_ms = wait.as_millis() as u64, "Resubscribing to rotation events");
            tokio::time::sleep(wait).await;
            delay = (delay * 2).min(self.backoff.max);
        }
    }

    /// Evict both purposes for the application named by `body`.
    ///
    /// Returns the application id, or `None` when the body is not one.
    pub fn handle_message(&self, body: &str) -> Option<i64> {
        let app_id = match parse_application_id(body) {
            Ok(app_id) => app_id,
            Err(e) => {
                warn!(error = %e, "Ignoring rotation message");
                metrics::record_rotation("invalid");
                return None;
            }
        };

        info!(app_id, "Certificate rotated, dropping cached connections");
        for purpose in Purpose::ALL {
            if self.cache.remove(app_id, purpose) {
                metrics::record_eviction(purpose, "rotation");
            }
        }
        metrics::record_rotation("applied");

        Some(app_id)
    }
}

/// ±30% around `base`
fn jittered(base: Duration) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
    Duration::from_millis((base.as_millis() as f64 * factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_stays_within_bounds() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let wait = jittered(base);
            assert!(wait >= Duration::from_millis(700));
            assert!(wait <= Duration::from_millis(1300));
        }
    }

    #[test]
    fn test_zero_backoff_is_floored() {
        let backoff = BackoffConfig {
            initial: Duration::ZERO,
            max: Duration::ZERO,
        }
        .normalized();
        assert_eq!(backoff.initial, MIN_RESUBSCRIBE_DELAY);
        assert_eq!(backoff.max, MIN_RESUBSCRIBE_DELAY);
    }

    #[test]
    fn test_max_never_below_initial() {
        let backoff = BackoffConfig {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(1),
        }
        .normalized();
        assert_eq!(backoff.max, Duration::from_secs(2));
    }
}
