//! Signing requests, certificates, and their PEM text form.
//!
//! Both are JSON documents wrapped in PEM armour. Signatures are Ed25519
//! over the canonical JSON of the unsigned fields.

use crate::error::{SigningError, SigningResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use warden_flow_types::ClientId;

const CSR_LABEL: &str = "WARDEN CERTIFICATE REQUEST";
const CERT_LABEL: &str = "WARDEN CERTIFICATE";
const PEM_LINE: usize = 64;

// ── Identity ─────────────────────────────────────────────────────────

/// Canonical client id for a public key: `C.` followed by the first eight
/// bytes of its SHA-256 digest in hex.
pub fn client_id_for(public_key: &[u8]) -> ClientId {
    let digest = Sha256::digest(public_key);
    ClientId::new(format!("C.{}", hex::encode(&digest[..8])))
}

/// Certificate serial for a client: its id's hex part as a number.
pub fn serial_for(client_id: &ClientId) -> Option<u64> {
    let hex_part = client_id.as_str().strip_prefix("C.")?;
    u64::from_str_radix(hex_part, 16).ok()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub common_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

impl Subject {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            organization: None,
        }
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }
}

// ── Signing Request ──────────────────────────────────────────────────

#[derive(Serialize)]
struct RequestBody<'a> {
    subject: &'a Subject,
    public_key: &'a str,
}

/// A client's request for a certificate, self-signed with the key it
/// wants certified.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    pub subject: Subject,
    /// Hex-encoded Ed25519 public key.
    pub public_key: String,
    /// Hex-encoded signature over the subject and public key.
    pub signature: String,
}

impl SigningRequest {
    pub fn new(subject: Subject, key: &SigningKey) -> SigningResult<Self> {
        let public_key = hex::encode(key.verifying_key().as_bytes());
        let body = serde_json::to_vec(&RequestBody {
            subject: &subject,
            public_key: &public_key,
        })
        .map_err(|e| SigningError::Signing(e.to_string()))?;
        Ok(Self {
            subject,
            public_key,
            signature: hex::encode(key.sign(&body).to_bytes()),
        })
    }

    /// A request whose CN is the canonical id for `key`.
    pub fn for_key(key: &SigningKey) -> SigningResult<Self> {
        let client_id = client_id_for(key.verifying_key().as_bytes());
        Self::new(Subject::new(client_id.as_str()), key)
    }

    pub fn verifying_key(&self) -> SigningResult<VerifyingKey> {
        decode_public_key(&self.public_key)
    }

    /// Check the self-signature and that the CN is the canonical id for the
    /// public key. Returns that id.
    pub fn validate(&self) -> SigningResult<ClientId> {
        let key = self.verifying_key()?;
        let body = serde_json::to_vec(&RequestBody {
            subject: &self.subject,
            public_key: &self.public_key,
        })
        .map_err(|e| SigningError::Signing(e.to_string()))?;
        key.verify(&body, &decode_signature(&self.signature)?)
            .map_err(|_| SigningError::BadSignature)?;

        let expected = client_id_for(key.as_bytes());
        if expected.as_str() != self.subject.common_name {
            return Err(SigningError::CnMismatch {
                expected: expected.to_string(),
                found: self.subject.common_name.clone(),
            });
        }
        Ok(expected)
    }

    pub fn to_pem(&self) -> SigningResult<String> {
        encode_pem(CSR_LABEL, self)
    }

    pub fn from_pem(pem: &str) -> SigningResult<Self> {
        decode_pem(CSR_LABEL, pem)
    }
}

// ── Certificate ──────────────────────────────────────────────────────

/// Fields covered by the issuer's signature, in signing order.
#[derive(Serialize)]
struct CertificateBody<'a> {
    serial: u64,
    version: u8,
    subject: &'a Subject,
    issuer: &'a Subject,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    public_key: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub serial: u64,
    pub version: u8,
    pub subject: Subject,
    pub issuer: Subject,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Hex-encoded public key being certified.
    pub public_key: String,
    /// Hex-encoded issuer signature.
    pub signature: String,
}

impl Certificate {
    /// Bytes the issuer signs.
    pub fn signed_bytes(&self) -> SigningResult<Vec<u8>> {
        serde_json::to_vec(&CertificateBody {
            serial: self.serial,
            version: self.version,
            subject: &self.subject,
            issuer: &self.issuer,
            not_before: self.not_before,
            not_after: self.not_after,
            public_key: &self.public_key,
        })
        .map_err(|e| SigningError::Signing(e.to_string()))
    }

    /// Fill in the signature with `key`.
    pub fn sign_with(mut self, key: &SigningKey) -> SigningResult<Self> {
        let signature = key.sign(&self.signed_bytes()?);
        self.signature = hex::encode(signature.to_bytes());
        Ok(self)
    }

    /// Check the signature against `issuer_key`.
    pub fn verify(&self, issuer_key: &VerifyingKey) -> SigningResult<()> {
        issuer_key
            .verify(&self.signed_bytes()?, &decode_signature(&self.signature)?)
            .map_err(|_| SigningError::BadSignature)
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    pub fn to_pem(&self) -> SigningResult<String> {
        encode_pem(CERT_LABEL, self)
    }

    pub fn from_pem(pem: &str) -> SigningResult<Self> {
        decode_pem(CERT_LABEL, pem)
    }
}

// ── Wire Message ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CertificateType {
    Csr,
    Crt,
}

/// A PEM document as exchanged with agents: a CSR on the way in, a signed
/// certificate on the way out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMessage {
    #[serde(rename = "type")]
    pub kind: CertificateType,
    pub pem: String,
}

impl CertificateMessage {
    pub fn csr(pem: impl Into<String>) -> Self {
        Self {
            kind: CertificateType::Csr,
            pem: pem.into(),
        }
    }

    pub fn crt(pem: impl Into<String>) -> Self {
        Self {
            kind: CertificateType::Crt,
            pem: pem.into(),
        }
    }

    /// Parse as a signing request. Anything other than a CSR is rejected.
    pub fn signing_request(&self) -> SigningResult<SigningRequest> {
        if self.kind != CertificateType::Csr {
            return Err(SigningError::WrongType {
                expected: "CSR".into(),
                found: format!("{:?}", self.kind).to_uppercase(),
            });
        }
        SigningRequest::from_pem(&self.pem)
    }
}

// ── Encoding Helpers ─────────────────────────────────────────────────

fn decode_public_key(hex_key: &str) -> SigningResult<VerifyingKey> {
    let bytes = hex::decode(hex_key).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SigningError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| SigningError::InvalidKey(e.to_string()))
}

fn decode_signature(hex_sig: &str) -> SigningResult<Signature> {
    let bytes = hex::decode(hex_sig).map_err(|_| SigningError::BadSignature)?;
    let bytes: [u8; 64] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SigningError::BadSignature)?;
    Ok(Signature::from_bytes(&bytes))
}

fn encode_pem<T: Serialize>(label: &str, value: &T) -> SigningResult<String> {
    let json = serde_json::to_vec(value).map_err(|e| SigningError::Signing(e.to_string()))?;
    let body = STANDARD.encode(json);
    let mut pem = format!("-----BEGIN {}-----\n", label);
    for line in body.as_bytes().chunks(PEM_LINE) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", label));
    Ok(pem)
}

fn decode_pem<T: serde::de::DeserializeOwned>(label: &str, pem: &str) -> SigningResult<T> {
    let begin = format!("-----BEGIN {}-----", label);
    let end = format!("-----END {}-----", label);
    let body = pem
        .trim()
        .strip_prefix(&begin)
        .and_then(|rest| rest.strip_suffix(&end))
        .ok_or_else(|| SigningError::InvalidPem(format!("expected a {} block", label)))?;
    let body: String = body.split_whitespace().collect();
    let json = STANDARD
        .decode(body)
        .map_err(|e| SigningError::InvalidPem(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| SigningError::InvalidPem(e.to_string()))
}
