#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apns_gateway::{
    ClientIdentity, ConnectionHandle, DeliveryResult, Environment, Failure, GatewayClient,
    GatewayError, Message, SharedConnection,
};
use chrono::Utc;
use credential_rotation::{RotationError, RotationFeed, RotationStream};
use futures::stream::{self, StreamExt};
use ios_push_service::{
    ConnectionCache, ConnectionFactory, Credential, MemoryCredentialStore, PushDispatcher,
};
use once_cell::sync::Lazy;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509NameBuilder, X509};
use parking_lot::Mutex;

pub const SECRET: &str = "p12-secret";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn pkcs12_bundle(secret: &str, not_after: &Asn1Time) -> Vec<u8> {
    let pkey = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "Apple Push Services: com.example.im")
        .unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(0).unwrap())
        .unwrap();
    builder.set_not_after(not_after).unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    Pkcs12::builder()
        .name("push")
        .pkey(&pkey)
        .cert(&cert)
        .build2(secret)
        .unwrap()
        .to_der()
        .unwrap()
}

pub static VALID_BUNDLE: Lazy<Vec<u8>> =
    Lazy::new(|| pkcs12_bundle(SECRET, &Asn1Time::days_from_now(365).unwrap()));

pub static EXPIRED_BUNDLE: Lazy<Vec<u8>> =
    Lazy::new(|| pkcs12_bundle(SECRET, &Asn1Time::from_unix(86_400).unwrap()));

pub fn valid_credential(app_id: i64) -> Credential {
    Credential::new(app_id, VALID_BUNDLE.clone(), SECRET, Utc::now())
}

pub fn expired_credential(app_id: i64) -> Credential {
    Credential::new(app_id, EXPIRED_BUNDLE.clone(), SECRET, Utc::now())
}

/// Store holding valid sandbox and VoIP certificates for `app_ids`
pub fn store_with(app_ids: &[i64]) -> Arc<MemoryCredentialStore> {
    let store = Arc::new(MemoryCredentialStore::new());
    for &app_id in app_ids {
        store.insert(Environment::Sandbox, valid_credential(app_id));
        store.insert_voip(valid_credential(app_id));
    }
    store
}

/// What the next `send` on any scripted connection does
#[derive(Debug, Clone)]
pub enum Step {
    Deliver,
    Retry(Vec<&'static str>),
    FailToken(&'static str),
    GenericError,
    Transport(&'static str),
    Other(&'static str),
}

#[derive(Default)]
pub struct ScriptedGateway {
    opened: AtomicUsize,
    environments: Mutex<Vec<Environment>>,
    timeouts: Mutex<Vec<Duration>>,
    steps: Arc<Mutex<VecDeque<Step>>>,
    sent: Arc<Mutex<Vec<(usize, Message)>>>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_steps(steps: Vec<Step>) -> Arc<Self> {
        let gateway = Self::default();
        gateway.steps.lock().extend(steps);
        Arc::new(gateway)
    }

    /// Sessions opened so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn environments(&self) -> Vec<Environment> {
        self.environments.lock().clone()
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().clone()
    }

    /// Every message handed to `send`, tagged with the connection number
    pub fn sent(&self) -> Vec<(usize, Message)> {
        self.sent.lock().clone()
    }

    pub fn sent_tokens(&self) -> Vec<Vec<String>> {
        self.sent
            .lock()
            .iter()
            .map(|(_, message)| message.tokens().to_vec())
            .collect()
    }
}

#[async_trait::async_trait]
impl GatewayClient for ScriptedGateway {
    async fn open(
        &self,
        environment: Environment,
        identity: &ClientIdentity,
        read_tail_timeout: Duration,
    ) -> Result<SharedConnection, GatewayError> {
        assert!(!identity.certificate_pem().is_empty());
        assert!(!identity.private_key_pem().is_empty());

        let id = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        self.environments.lock().push(environment);
        self.timeouts.lock().push(read_tail_timeout);

        Ok(Arc::new(ScriptedConnection {
            id,
            steps: self.steps.clone(),
            sent: self.sent.clone(),
        }))
    }
}

pub struct ScriptedConnection {
    id: usize,
    steps: Arc<Mutex<VecDeque<Step>>>,
    sent: Arc<Mutex<Vec<(usize, Message)>>>,
}

#[async_trait::async_trait]
impl ConnectionHandle for ScriptedConnection {
    async fn send(&self, message: &Message) -> Result<DeliveryResult, GatewayError> {
        self.sent.lock().push((self.id, message.clone()));
        let step = self.steps.lock().pop_front().unwrap_or(Step::Deliver);

        let mut result = DeliveryResult::for_message(message);
        match step {
            Step::Deliver => {}
            Step::Retry(tokens) => {
                for token in tokens {
                    result.record_retry(token);
                }
            }
            Step::FailToken(token) => {
                result.record_failed(token, Failure::new("BadDeviceToken", "status 400"));
            }
            Step::GenericError => {
                result.record_error(Failure::new("TopicDisallowed", "status 400"));
            }
            Step::Transport(detail) => return Err(GatewayError::transport(detail)),
            Step::Other(detail) => return Err(GatewayError::Other(detail.to_string())),
        }
        Ok(result)
    }
}

/// Connection that accepts everything, for seeding caches
pub struct NoopConnection;

#[async_trait::async_trait]
impl ConnectionHandle for NoopConnection {
    async fn send(&self, message: &Message) -> Result<DeliveryResult, GatewayError> {
        Ok(DeliveryResult::for_message(message))
    }
}

pub fn noop_connection() -> SharedConnection {
    Arc::new(NoopConnection)
}

pub fn dispatcher(
    store: Arc<MemoryCredentialStore>,
    gateway: Arc<ScriptedGateway>,
    cache: Arc<ConnectionCache>,
) -> PushDispatcher {
    let factory = ConnectionFactory::new(store, gateway, Duration::from_secs(1));
    PushDispatcher::new(cache, factory, Environment::Sandbox, 3)
}

/// One scripted subscription
pub enum Session {
    Messages(Vec<Result<String, RotationError>>),
    Refused(&'static str),
}

/// Rotation feed replaying scripted subscriptions, then idling forever
#[derive(Default)]
pub struct ScriptedFeed {
    sessions: Mutex<VecDeque<Session>>,
    subscriptions: AtomicUsize,
}

impl ScriptedFeed {
    pub fn new(sessions: Vec<Session>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(sessions.into()),
            subscriptions: AtomicUsize::new(0),
        })
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RotationFeed for ScriptedFeed {
    async fn subscribe(&self) -> Result<RotationStream, RotationError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);

        match self.sessions.lock().pop_front() {
            Some(Session::Messages(items)) => Ok(stream::iter(items).boxed()),
            Some(Session::Refused(reason)) => {
                Err(RotationError::SubscriptionLost(reason.to_string()))
            }
            None => Ok(stream::pending().boxed()),
        }
    }
}

/// Rotation feed whose every subscription attempt fails
#[derive(Default)]
pub struct RefusingFeed {
    subscriptions: AtomicUsize,
}

impl RefusingFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RotationFeed for RefusingFeed {
    async fn subscribe(&self) -> Result<RotationStream, RotationError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Err(RotationError::SubscriptionLost("connection refused".to_string()))
    }
}

pub type RotationSender = futures::channel::mpsc::UnboundedSender<Result<String, RotationError>>;

/// Rotation feed fed by the test. The first subscription takes the channel,
/// later ones idle forever.
pub struct ChannelFeed {
    receiver: Mutex<Option<futures::channel::mpsc::UnboundedReceiver<Result<String, RotationError>>>>,
}

impl ChannelFeed {
    pub fn new() -> (RotationSender, Arc<Self>) {
        let (sender, receiver) = futures::channel::mpsc::unbounded();
        let feed = Arc::new(Self {
            receiver: Mutex::new(Some(receiver)),
        });
        (sender, feed)
    }
}

#[async_trait::async_trait]
impl RotationFeed for ChannelFeed {
    async fn subscribe(&self) -> Result<RotationStream, RotationError> {
        let receiver = self.receiver.lock().take();
        match receiver {
            Some(receiver) => Ok(receiver.boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }
}
