//! Endpoint Keys
//!
//! An endpoint identifies one pool bucket: the remote address plus the
//! credential the connection was established with. Two requests for the same
//! address and credential must resolve to the same bucket, so both types
//! compare and hash by value.

use std::fmt;

/// Value-compared identity of a client credential (certificate).
///
/// Certificate parsing and validation are out of scope for the pool; callers
/// provide a stable digest of the credential (for example a SHA-1 or SHA-256
/// fingerprint of the certificate body) plus a human-readable label used only
/// for logging. Equality and hashing consider the digest alone, so the same
/// certificate loaded twice maps to the same pool bucket.
#[derive(Clone)]
pub struct CredentialId {
    label: String,
    digest: Box<[u8]>,
}

impl CredentialId {
    /// Create a credential identity from a precomputed digest.
    pub fn new(label: impl Into<String>, digest: impl Into<Box<[u8]>>) -> Self {
        Self {
            label: label.into(),
            digest: digest.into(),
        }
    }

    /// Logging label, not part of the identity.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The digest bytes defining equality.
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }
}

impl PartialEq for CredentialId {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for CredentialId {}

impl std::hash::Hash for CredentialId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl fmt::Debug for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialId({})", self.label)
    }
}

/// Pool bucket key: remote address plus credential identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
    credential: CredentialId,
}

impl Endpoint {
    /// Create a new endpoint key.
    pub fn new(host: impl Into<String>, port: u16, credential: CredentialId) -> Self {
        Self {
            host: host.into(),
            port,
            credential,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn credential(&self) -> &CredentialId {
        &self.credential
    }

    /// `host:port` form used for address resolution.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({})",
            self.host,
            self.port,
            self.credential.label
        )
    }
}
