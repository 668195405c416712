//! Credential Rotation Events using Redis Pub/Sub
//!
//! Tells every push node that an application's certificate material changed,
//! so cached gateway sessions built from the old certificate get discarded.
//!
//! # Architecture
//!
//! ```text
//! Admin / certificate upload:
//!   1. Store new PKCS#12 bundle for app 7
//!   2. PUBLISH apns_update_p12_channel "7"
//!      ↓
//! Redis Pub/Sub (broadcast to all subscribers)
//!      ↓
//! ios-push-service nodes:
//!   3. Parse "7" as an application id
//!   4. Evict (7, standard) and (7, voip) sessions
//!   5. Next push for app 7 rebuilds its session from the new bundle
//! ```
//!
//! # Example: Publisher
//!
//! ```no_run
//! use credential_rotation::RotationPublisher;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), credential_rotation::RotationError> {
//!     let publisher = RotationPublisher::new("redis://localhost:6379").await?;
//!     publisher.announce(7).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Subscriber
//!
//! ```no_run
//! use credential_rotation::{RedisRotationFeed, RotationFeed};
//! use futures_util::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), credential_rotation::RotationError> {
//!     let feed = RedisRotationFeed::new("redis://localhost:6379")?;
//!     let mut stream = feed.subscribe().await?;
//!     while let Some(body) = stream.next().await {
//!         println!("rotated: {:?}", body);
//!     }
//!     Ok(())
//! }
//! ```

use futures_util::stream::{self, BoxStream, Stream};
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

mod error;
mod helpers;

pub use error::RotationError;
pub use helpers::{encode_application_id, parse_application_id};

type Result<T> = std::result::Result<T, RotationError>;

/// Default Redis channel for certificate rotation events
pub const DEFAULT_CHANNEL: &str = "apns_update_p12_channel";

/// Raw message bodies from one subscription. The last item is an error once
/// the subscription is lost.
pub type RotationStream = BoxStream<'static, Result<String>>;

/// Source of rotation events
#[async_trait::async_trait]
pub trait RotationFeed: Send + Sync {
    /// Open a fresh subscription to the rotation channel
    async fn subscribe(&self) -> Result<RotationStream>;
}

/// Publisher for certificate rotation events
#[derive(Clone)]
pub struct RotationPublisher {
    client: ConnectionManager,
    channel: String,
}

impl RotationPublisher {
    /// Create new publisher on the default channel
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        Self::with_channel(redis_url, DEFAULT_CHANNEL.to_string()).await
    }

    /// Create publisher with custom channel
    pub async fn with_channel(redis_url: &str, channel: String) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            client: connection,
            channel,
        })
    }

    /// Announce that `app_id` has new certificate material
    ///
    /// Returns number of subscribers that received the message
    pub async fn announce(&self, app_id: i64) -> Result<usize> {
        let body = encode_application_id(app_id);

        debug!(app_id, channel = %self.channel, "Publishing certificate rotation");

        let mut conn = self.client.clone();
        let subscriber_count: usize = conn.publish(&self.channel, body).await?;

        info!(
            app_id,
            subscribers = subscriber_count,
            "Certificate rotation published"
        );

        Ok(subscriber_count)
    }
}

/// Redis-backed rotation feed
pub struct RedisRotationFeed {
    client: Client,
    channel: String,
}

impl RedisRotationFeed {
    /// Create new feed on the default channel
    pub fn new(redis_url: &str) -> Result<Self> {
        Self::with_channel(redis_url, DEFAULT_CHANNEL.to_string())
    }

    /// Create feed with custom channel
    pub fn with_channel(redis_url: &str, channel: String) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client, channel })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait::async_trait]
impl RotationFeed for RedisRotationFeed {
    async fn subscribe(&self) -> Result<RotationStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;

        info!(channel = %self.channel, "Subscribed to certificate rotation events");

        let messages = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload::<String>().map_err(RotationError::from));

        Ok(until_lost(messages, self.channel.clone()))
    }
}

/// Terminates `messages` with `SubscriptionLost` for `channel`
fn until_lost<S>(messages: S, channel: String) -> RotationStream
where
    S: Stream<Item = Result<String>> + Send + 'static,
{
    messages
        .chain(stream::once(async move {
            Err(RotationError::SubscriptionLost(format!(
                "pub/sub connection for {channel} closed"
            )))
        }))
        .boxed()
}
