use apns_gateway::{CertificateError, GatewayError, Purpose};
use thiserror::Error;

/// Failures that end a push before or while obtaining a connection
#[derive(Error, Debug)]
pub enum PushError {
    #[error("no {purpose} certificate for app {app_id}")]
    NoCredential { app_id: i64, purpose: Purpose },

    #[error("{purpose} certificate for app {app_id} is unusable: {source}")]
    CredentialExpired {
        app_id: i64,
        purpose: Purpose,
        #[source]
        source: CertificateError,
    },

    #[error("credential store error: {0}")]
    CredentialStore(#[from] sqlx::Error),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub type Result<T> = std::result::Result<T, PushError>;
