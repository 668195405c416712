/// Materializes gateway sessions on cache miss
///
/// Credential lookup, certificate validation and session opening. The factory
/// never writes the cache; callers decide what to keep.
use std::sync::Arc;
use std::time::Duration;

use apns_gateway::{ClientIdentity, Environment, GatewayClient, Purpose, SharedConnection};
use secrecy::ExposeSecret;
use tracing::info;

use crate::error::{PushError, Result};
use crate::metrics;
use crate::services::credential_store::CredentialStore;

pub struct ConnectionFactory {
    store: Arc<dyn CredentialStore>,
    gateway: Arc<dyn GatewayClient>,
    read_tail_timeout: Duration,
}

impl ConnectionFactory {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        gateway: Arc<dyn GatewayClient>,
        read_tail_timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            read_tail_timeout,
        }
    }

    /// Open a new session for `(app_id, purpose)`
    ///
    /// # Returns
    /// `Err(PushError::NoCredential)` when no certificate is stored,
    /// `Err(PushError::CredentialExpired)` when the bundle cannot be unlocked or
    /// is past its expiry (the gateway is not contacted in either case)
    pub async fn build(
        &self,
        app_id: i64,
        purpose: Purpose,
        environment: Environment,
    ) -> Result<SharedConnection> {
        let credential = match purpose {
            Purpose::Standard => self.store.get_credential(app_id, environment).await?,
            Purpose::Voip => self.store.get_voip_credential(app_id).await?,
        }
        .ok_or(PushError::NoCredential { app_id, purpose })?;

        let identity = ClientIdentity::from_pkcs12(&credential.bundle, credential.secret.expose_secret())
            .map_err(|source| PushError::CredentialExpired {
                app_id,
                purpose,
                source,
            })?;

        let connection = self
            .gateway
            .open(environment, &identity, self.read_tail_timeout)
            .await?;

        info!(
            app_id,
            %purpose,
            %environment,
            issued_at = %credential.issued_at,
            not_after = identity.not_after(),
            "Built APNs connection"
        );
        metrics::record_connection_built(purpose);

        Ok(connection)
    }
}
