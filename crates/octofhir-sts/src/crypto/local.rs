//! Signing suite backed by a local PEM key.

use std::path::Path;

use async_trait::async_trait;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey};
use sha1::Sha1;
use sha2::Sha256;

use super::certificate::parse_pem_certificates;
use super::{HashAlgorithm, OaepDigest, SigningSuite};
use crate::StsResult;
use crate::config::SigningConfig;
use crate::error::StsError;

/// A [`SigningSuite`] holding an RSA private key in process memory.
pub struct LocalKeySigningSuite {
    key: RsaPrivateKey,
    chain: Vec<Vec<u8>>,
}

impl std::fmt::Debug for LocalKeySigningSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeySigningSuite")
            .field("key", &"<redacted>")
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

impl LocalKeySigningSuite {
    /// Creates a suite from a key and a DER certificate chain (leaf first).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the chain is empty.
    pub fn new(key: RsaPrivateKey, chain: Vec<Vec<u8>>) -> StsResult<Self> {
        if chain.is_empty() {
            return Err(StsError::configuration(
                "Signing certificate chain must contain at least one certificate",
            ));
        }
        Ok(Self { key, chain })
    }

    /// Creates a suite from PEM text.
    ///
    /// The key may be PKCS#8 (`PRIVATE KEY`) or PKCS#1 (`RSA PRIVATE KEY`).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the key or chain cannot be parsed.
    pub fn from_pem(key_pem: &str, chain_pem: &str) -> StsResult<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(key_pem))
            .map_err(|e| StsError::configuration(format!("Invalid signing key: {e}")))?;
        let chain = parse_pem_certificates(chain_pem.as_bytes())?;
        Self::new(key, chain)
    }

    /// Loads the key and chain from PEM files.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a file cannot be read or parsed.
    pub fn from_files(key_path: &Path, chain_path: &Path) -> StsResult<Self> {
        let key_pem = read_pem(key_path, "signing key")?;
        let chain_pem = read_pem(chain_path, "signing certificate chain")?;
        Self::from_pem(&key_pem, &chain_pem)
    }

    /// Loads the suite described by the `[signing]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if paths are missing or files are invalid.
    pub fn from_config(config: &SigningConfig) -> StsResult<Self> {
        let key_path = config
            .key_path
            .as_deref()
            .ok_or_else(|| StsError::configuration("signing.key_path is not set"))?;
        let chain_path = config
            .certificate_chain_path
            .as_deref()
            .ok_or_else(|| StsError::configuration("signing.certificate_chain_path is not set"))?;
        Self::from_files(key_path, chain_path)
    }
}

#[async_trait]
impl SigningSuite for LocalKeySigningSuite {
    async fn sign(&self, digest: &[u8], algorithm: HashAlgorithm) -> StsResult<Vec<u8>> {
        let scheme = match algorithm {
            HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
            HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        };
        self.key
            .sign(scheme, digest)
            .map_err(|e| StsError::crypto(format!("{algorithm} signing failed: {e}")))
    }

    async fn decrypt_rsa_oaep(
        &self,
        ciphertext: &[u8],
        digest: OaepDigest,
    ) -> StsResult<Vec<u8>> {
        let padding = match digest {
            OaepDigest::Sha1 => Oaep::new::<Sha1>(),
            OaepDigest::Sha256 => Oaep::new_with_mgf_hash::<Sha256, Sha1>(),
        };
        self.key
            .decrypt(padding, ciphertext)
            .map_err(|_| StsError::crypto(format!("RSA-OAEP ({digest}) key decryption failed")))
    }

    fn certificate_chain(&self) -> Vec<Vec<u8>> {
        self.chain.clone()
    }
}

fn read_pem(path: &Path, what: &str) -> StsResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        StsError::configuration(format!("Failed to read {what} {}: {e}", path.display()))
    })
}
