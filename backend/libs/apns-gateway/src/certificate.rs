//! PKCS#12 certificate material
//!
//! Provider certificates are stored as PKCS#12 bundles locked with a secret.
//! Before a session is opened the bundle is unlocked, the embedded
//! certificate's expiry is checked, and the certificate / private key pair is
//! exported as PEM for the TLS client.

use std::cmp::Ordering;
use std::fmt;

use openssl::asn1::Asn1Time;
use openssl::error::ErrorStack;
use openssl::pkcs12::Pkcs12;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("failed to unlock PKCS#12 bundle: {0}")]
    Unlock(#[source] ErrorStack),

    #[error("PKCS#12 bundle has no {0}")]
    Incomplete(&'static str),

    #[error("certificate expired at {0}")]
    Expired(String),

    #[error("failed to export key material: {0}")]
    Export(#[source] ErrorStack),
}

/// PEM-encoded certificate and private key used to authenticate a session
#[derive(Clone)]
pub struct ClientIdentity {
    certificate_pem: Vec<u8>,
    private_key_pem: Vec<u8>,
    not_after: String,
}

impl ClientIdentity {
    /// Unlock `bundle` with `secret` and derive the PEM key pair.
    ///
    /// Fails without touching the network when the bundle cannot be unlocked
    /// or the embedded certificate is past its `notAfter` date.
    pub fn from_pkcs12(bundle: &[u8], secret: &str) -> Result<Self, CertificateError> {
        let parsed = Pkcs12::from_der(bundle)
            .and_then(|p12| p12.parse2(secret))
            .map_err(CertificateError::Unlock)?;

        let cert = parsed
            .cert
            .ok_or(CertificateError::Incomplete("certificate"))?;
        let pkey = parsed
            .pkey
            .ok_or(CertificateError::Incomplete("private key"))?;

        let not_after = cert.not_after().to_string();
        let now = Asn1Time::days_from_now(0).map_err(CertificateError::Export)?;
        let remaining = cert
            .not_after()
            .compare(&now)
            .map_err(CertificateError::Export)?;
        if remaining == Ordering::Less {
            return Err(CertificateError::Expired(not_after));
        }

        Ok(Self {
            certificate_pem: cert.to_pem().map_err(CertificateError::Export)?,
            private_key_pem: pkey
                .private_key_to_pem_pkcs8()
                .map_err(CertificateError::Export)?,
            not_after,
        })
    }

    pub fn certificate_pem(&self) -> &[u8] {
        &self.certificate_pem
    }

    pub fn private_key_pem(&self) -> &[u8] {
        &self.private_key_pem
    }

    pub fn not_after(&self) -> &str {
        &self.not_after
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}
