/// Certificate material per application
///
/// `PgCredentialStore` reads PKCS#12 bundles uploaded through the admin
/// console. `MemoryCredentialStore` serves local runs and tests.
use std::collections::HashMap;
use std::fmt;

use apns_gateway::Environment;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use tracing::debug;

use crate::error::Result;

/// PKCS#12 bundle plus the secret unlocking it
pub struct Credential {
    pub app_id: i64,
    pub bundle: Vec<u8>,
    pub secret: SecretString,
    pub issued_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(app_id: i64, bundle: Vec<u8>, secret: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        Self {
            app_id,
            bundle,
            secret: SecretString::from(secret.into()),
            issued_at,
        }
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        Self {
            app_id: self.app_id,
            bundle: self.bundle.clone(),
            secret: SecretString::from(self.secret.expose_secret().to_string()),
            issued_at: self.issued_at,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("app_id", &self.app_id)
            .field("bundle_len", &self.bundle.len())
            .field("issued_at", &self.issued_at)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// Standard alert certificate for `app_id` in `environment`
    async fn get_credential(&self, app_id: i64, environment: Environment) -> Result<Option<Credential>>;

    /// PushKit (VoIP) certificate for `app_id`
    async fn get_voip_credential(&self, app_id: i64) -> Result<Option<Credential>>;
}

/// Postgres-backed store.
///
/// Expects an `app_certificates` table with one row per (app_id, sandbox):
/// `p12 BYTEA`, `p12_secret TEXT`, `pushkit_p12 BYTEA NULL`,
/// `pushkit_secret TEXT NULL`, `updated_at TIMESTAMPTZ`.
#[derive(Clone)]
pub struct PgCredentialStore {
    db: PgPool,
}

impl PgCredentialStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl CredentialStore for PgCredentialStore {
    async fn get_credential(&self, app_id: i64, environment: Environment) -> Result<Option<Credential>> {
        let row = sqlx::query_as::<_, (Vec<u8>, String, DateTime<Utc>)>(
            r#"
            SELECT p12, p12_secret, updated_at
            FROM app_certificates
            WHERE app_id = $1 AND sandbox = $2 AND p12 IS NOT NULL
            "#,
        )
        .bind(app_id)
        .bind(environment.is_sandbox())
        .fetch_optional(&self.db)
        .await?;

        debug!(app_id, %environment, found = row.is_some(), "Loaded APNs certificate");

        Ok(row.map(|(bundle, secret, issued_at)| Credential::new(app_id, bundle, secret, issued_at)))
    }

    async fn get_voip_credential(&self, app_id: i64) -> Result<Option<Credential>> {
        let row = sqlx::query_as::<_, (Vec<u8>, String, DateTime<Utc>)>(
            r#"
            SELECT pushkit_p12, COALESCE(pushkit_secret, ''), updated_at
            FROM app_certificates
            WHERE app_id = $1 AND pushkit_p12 IS NOT NULL
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(app_id)
        .fetch_optional(&self.db)
        .await?;

        debug!(app_id, found = row.is_some(), "Loaded PushKit certificate");

        Ok(row.map(|(bundle, secret, issued_at)| Credential::new(app_id, bundle, secret, issued_at)))
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemoryCredentialStore {
    standard: RwLock<HashMap<(i64, Environment), Credential>>,
    voip: RwLock<HashMap<i64, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, environment: Environment, credential: Credential) {
        self.standard
            .write()
            .insert((credential.app_id, environment), credential);
    }

    pub fn insert_voip(&self, credential: Credential) {
        self.voip.write().insert(credential.app_id, credential);
    }

    /// Drop every certificate held for `app_id`
    pub fn remove_app(&self, app_id: i64) {
        self.standard.write().retain(|(id, _), _| *id != app_id);
        self.voip.write().remove(&app_id);
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_credential(&self, app_id: i64, environment: Environment) -> Result<Option<Credential>> {
        Ok(self.standard.read().get(&(app_id, environment)).cloned())
    }

    async fn get_voip_credential(&self, app_id: i64) -> Result<Option<Credential>> {
        Ok(self.voip.read().get(&app_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_separates_environment_and_purpose() {
        let store = MemoryCredentialStore::new();
        store.insert(
            Environment::Sandbox,
            Credential::new(7, b"sandbox".to_vec(), "a", Utc::now()),
        );
        store.insert_voip(Credential::new(7, b"voip".to_vec(), "b", Utc::now()));

        let sandbox = store
            .get_credential(7, Environment::Sandbox)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sandbox.bundle, b"sandbox");
        assert_eq!(sandbox.secret.expose_secret(), "a");

        assert!(store
            .get_credential(7, Environment::Production)
            .await
            .unwrap()
            .is_none());

        let voip = store.get_voip_credential(7).await.unwrap().unwrap();
        assert_eq!(voip.bundle, b"voip");
    }

    #[tokio::test]
    async fn test_memory_store_remove_app() {
        let store = MemoryCredentialStore::new();
        store.insert(
            Environment::Production,
            Credential::new(7, vec![1], "", Utc::now()),
        );
        store.insert(
            Environment::Production,
            Credential::new(8, vec![2], "", Utc::now()),
        );
        store.insert_voip(Credential::new(7, vec![3], "", Utc::now()));

        store.remove_app(7);

        assert!(store
            .get_credential(7, Environment::Production)
            .await
            .unwrap()
            .is_none());
        assert!(store.get_voip_credential(7).await.unwrap().is_none());
        assert!(store
            .get_credential(8, Environment::Production)
            .await
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_debug_hides_secret() {
        let credential = Credential::new(7, vec![0; 16], "hunter2", Utc::now());
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("bundle_len: 16"));
    }
}
