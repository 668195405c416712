pub mod config;
pub mod error;
pub mod metrics;
pub mod services;

use std::sync::Arc;

use anyhow::Context;
use apns_gateway::{ApnsGateway, GatewayClient};
use credential_rotation::{RedisRotationFeed, RotationFeed};
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tracing::info;

pub use config::Config;
pub use error::{PushError, Result};
pub use services::*;

/// Process-wide push components: one cache shared by the dispatcher and the
/// rotation listener, created at startup and kept for the process lifetime.
pub struct IosPush {
    dispatcher: Arc<PushDispatcher>,
    listener: JoinHandle<()>,
}

impl IosPush {
    /// Connect to Postgres and Redis, then wire everything together
    pub async fn start(config: &Config) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await
            .context("failed to connect to credential database")?;

        let feed = RedisRotationFeed::with_channel(
            &config.redis.url,
            config.redis.rotation_channel.clone(),
        )
        .context("failed to construct Redis client for rotation events")?;

        Ok(Self::from_parts(
            config,
            Arc::new(PgCredentialStore::new(db)),
            Arc::new(ApnsGateway::with_request_timeout(config.apns.request_timeout())),
            Arc::new(feed),
        ))
    }

    /// Wire explicit collaborators. Must be called inside a Tokio runtime.
    pub fn from_parts(
        config: &Config,
        store: Arc<dyn CredentialStore>,
        gateway: Arc<dyn GatewayClient>,
        feed: Arc<dyn RotationFeed>,
    ) -> Self {
        let cache = Arc::new(ConnectionCache::new(config.apns.connection_idle_ttl()));
        let factory = ConnectionFactory::new(store, gateway, config.apns.read_tail_timeout());
        let dispatcher = Arc::new(PushDispatcher::new(
            cache.clone(),
            factory,
            config.apns.environment(),
            config.apns.max_attempts,
        ));

        let listener = InvalidationListener::new(
            cache,
            feed,
            BackoffConfig {
                initial: config.apns.resubscribe_backoff(),
                max: config.apns.resubscribe_backoff_max(),
            },
        )
        .spawn();

        info!(
            environment = %config.apns.environment(),
            max_attempts = config.apns.max_attempts,
            "iOS push service started"
        );

        Self {
            dispatcher,
            listener,
        }
    }

    pub fn dispatcher(&self) -> Arc<PushDispatcher> {
        self.dispatcher.clone()
    }

    /// Stop the rotation listener. In-flight pushes are not drained.
    pub fn shutdown(self) {
        self.listener.abort();
    }
}
