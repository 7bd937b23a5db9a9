//! The certificate authority as seen by the enrolment flow.

use crate::certificate::{serial_for, Certificate, SigningRequest, Subject};
use crate::error::{SigningError, SigningResult};
use chrono::{Duration, Utc};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::Path;
use tracing::{info, warn};
use warden_flow_types::ClientId;

/// Default tolerance for client clocks running behind ours.
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 10;
pub const DEFAULT_VALIDITY_DAYS: i64 = 365;

/// Issues certificates for validated signing requests.
///
/// Implementations sign whatever they are handed; checking that the request
/// is well formed is the caller's job.
pub trait SigningOracle: Send + Sync {
    /// Sign `request` for `client_id`. The serial is derived from the id,
    /// the subject copied from the request, and the issuer from the CA
    /// certificate.
    fn sign(&self, request: &SigningRequest, client_id: &ClientId) -> SigningResult<Certificate>;

    fn ca_certificate(&self) -> &Certificate;
}

/// A [`SigningOracle`] holding an Ed25519 CA key in memory.
pub struct Ed25519SigningOracle {
    key: SigningKey,
    ca: Certificate,
    clock_skew: Duration,
    validity: Duration,
}

impl Ed25519SigningOracle {
    /// A CA with a fresh random key.
    pub fn generate(issuer: Subject) -> SigningResult<Self> {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_key(SigningKey::from_bytes(&seed), issuer)
    }

    /// A CA for an existing key. Its certificate is self-signed.
    pub fn from_key(key: SigningKey, issuer: Subject) -> SigningResult<Self> {
        let now = Utc::now();
        let ca = Certificate {
            serial: 1,
            version: 2,
            subject: issuer.clone(),
            issuer,
            not_before: now - Duration::seconds(DEFAULT_CLOCK_SKEW_SECS),
            not_after: now + Duration::days(10 * DEFAULT_VALIDITY_DAYS),
            public_key: hex::encode(key.verifying_key().as_bytes()),
            signature: String::new(),
        }
        .sign_with(&key)?;
        Ok(Self {
            key,
            ca,
            clock_skew: Duration::seconds(DEFAULT_CLOCK_SKEW_SECS),
            validity: Duration::days(DEFAULT_VALIDITY_DAYS),
        })
    }

    /// A CA whose key seed is stored hex-encoded at `path`. A missing file
    /// is created with a new random seed.
    pub fn load_or_create(path: &Path, issuer: Subject) -> SigningResult<Self> {
        if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| SigningError::InvalidKey(format!("{}: {}", path.display(), e)))?;
            let seed = hex::decode(text.trim())
                .map_err(|e| SigningError::InvalidKey(format!("{}: {}", path.display(), e)))?;
            let seed: [u8; 32] = seed.as_slice().try_into().map_err(|_| {
                SigningError::InvalidKey(format!("{}: expected a 32 byte seed", path.display()))
            })?;
            info!(path = %path.display(), "CA key loaded");
            return Self::from_key(SigningKey::from_bytes(&seed), issuer);
        }

        let oracle = Self::generate(issuer)?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| SigningError::Signing(e.to_string()))?;
        }
        std::fs::write(path, hex::encode(oracle.key.to_bytes()))
            .map_err(|e| SigningError::Signing(e.to_string()))?;
        warn!(path = %path.display(), "No CA key found, generated a new one");
        Ok(oracle)
    }

    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Check that `certificate` was issued by this CA.
    pub fn verify(&self, certificate: &Certificate) -> SigningResult<()> {
        certificate.verify(&self.key.verifying_key())
    }
}

impl SigningOracle for Ed25519SigningOracle {
    fn sign(&self, request: &SigningRequest, client_id: &ClientId) -> SigningResult<Certificate> {
        let serial = serial_for(client_id).ok_or_else(|| {
            SigningError::Signing(format!("cannot derive a serial from {}", client_id))
        })?;
        let now = Utc::now();
        Certificate {
            serial,
            version: 2,
            subject: request.subject.clone(),
            issuer: self.ca.subject.clone(),
            not_before: now - self.clock_skew,
            not_after: now + self.validity,
            public_key: request.public_key.clone(),
            signature: String::new(),
        }
        .sign_with(&self.key)
    }

    fn ca_certificate(&self) -> &Certificate {
        &self.ca
    }
}

impl std::fmt::Debug for Ed25519SigningOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519SigningOracle")
            .field("issuer", &self.ca.subject)
            .field("clock_skew", &self.clock_skew)
            .field("validity", &self.validity)
            .finish()
    }
}
