//! Key material and cryptographic primitives.
//!
//! The gateway never touches a private key directly. Every signature and every
//! key-transport decryption goes through a [`SigningSuite`], which may be backed
//! by a local PEM key ([`LocalKeySigningSuite`]) or by a remote key-management
//! service. Trust in the hospital STS is expressed as a single pinned
//! certificate ([`TrustedCertificate`]).

pub mod certificate;
pub mod local;

use std::fmt;

use async_trait::async_trait;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::StsResult;

pub use certificate::{TrustedCertificate, parse_pem_certificates, split_certificate_chain};
pub use local::LocalKeySigningSuite;

// =============================================================================
// Algorithms
// =============================================================================

/// Hash algorithm of a pre-computed digest handed to [`SigningSuite::sign`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-1 (legacy interop only).
    Sha1,
    /// SHA-256.
    Sha256,
}

impl HashAlgorithm {
    /// Computes the digest of `data`.
    #[must_use]
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha1 => write!(f, "SHA-1"),
            Self::Sha256 => write!(f, "SHA-256"),
        }
    }
}

/// OAEP digest method declared by an `EncryptedKey`.
///
/// The mask generation function is always MGF1 with SHA-1, as fixed by the
/// `rsa-oaep-mgf1p` algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OaepDigest {
    /// SHA-1 (the default when no DigestMethod is declared).
    #[default]
    Sha1,
    /// SHA-256.
    Sha256,
}

impl OaepDigest {
    /// Maps an XML-DSig DigestMethod algorithm URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "http://www.w3.org/2000/09/xmldsig#sha1" => Some(Self::Sha1),
            "http://www.w3.org/2001/04/xmlenc#sha256" => Some(Self::Sha256),
            _ => None,
        }
    }
}

impl fmt::Display for OaepDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha1 => write!(f, "SHA-1"),
            Self::Sha256 => write!(f, "SHA-256"),
        }
    }
}

// =============================================================================
// Signing Suite
// =============================================================================

/// Private-key operations the gateway delegates to its key holder.
///
/// Implementations must be cheap to share across concurrent requests.
#[async_trait]
pub trait SigningSuite: Send + Sync {
    /// Signs a pre-computed digest with RSASSA-PKCS1-v1_5.
    ///
    /// # Errors
    ///
    /// Returns a crypto error if the key holder refuses or fails to sign.
    async fn sign(&self, digest: &[u8], algorithm: HashAlgorithm) -> StsResult<Vec<u8>>;

    /// Decrypts an RSA-OAEP key-transport ciphertext.
    ///
    /// # Errors
    ///
    /// Returns a crypto error if the ciphertext cannot be decrypted.
    async fn decrypt_rsa_oaep(&self, ciphertext: &[u8], digest: OaepDigest)
    -> StsResult<Vec<u8>>;

    /// DER-encoded certificate chain, leaf first.
    fn certificate_chain(&self) -> Vec<Vec<u8>>;
}
