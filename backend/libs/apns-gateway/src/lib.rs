/// APNs Gateway Library
///
/// This library models the certificate-authenticated Apple Push Notification
/// Service gateway used by the iOS push service.
///
/// It handles:
/// - PKCS#12 unlocking, expiry checks and PEM key pair derivation
/// - Opening HTTP/2 sessions against the sandbox or production endpoint
/// - Alert and VoIP payload building with custom root-level data
/// - Per-token classification of gateway rejections
pub mod certificate;
pub mod client;
pub mod config;
pub mod message;

pub use certificate::{CertificateError, ClientIdentity};
pub use client::{
    classify_rejection, error_chain, ApnsConnection, ApnsGateway, ConnectionHandle, Disposition,
    GatewayClient, GatewayError, SharedConnection, DEFAULT_REQUEST_TIMEOUT,
};
pub use config::Environment;
pub use message::{Alert, DeliveryResult, Failure, Message, Payload, Purpose};
