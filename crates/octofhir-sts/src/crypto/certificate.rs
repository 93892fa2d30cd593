//! Pinned trust in the hospital STS certificate.
//!
//! Signatures are accepted only when they verify against one configured
//! certificate, compared byte for byte. There is no chain walk; the hospital's
//! integration contract pins a single signing certificate.

use std::path::Path;

use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::Sha256;
use x509_parser::parse_x509_certificate;
use x509_parser::pem::Pem;

use crate::StsResult;
use crate::error::StsError;

/// The single certificate whose signatures are trusted.
#[derive(Debug, Clone)]
pub struct TrustedCertificate {
    der: Vec<u8>,
    subject: String,
    public_key: RsaPublicKey,
}

impl TrustedCertificate {
    /// Creates a trusted certificate from DER bytes.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the certificate cannot be parsed or
    /// does not carry an RSA public key.
    pub fn from_der(der: Vec<u8>) -> StsResult<Self> {
        let (_, cert) = parse_x509_certificate(&der).map_err(|e| {
            StsError::configuration(format!("Invalid trusted certificate: {e}"))
        })?;
        let subject = cert.subject().to_string();
        let public_key = RsaPublicKey::from_public_key_der(cert.public_key().raw).map_err(|e| {
            StsError::configuration(format!(
                "Trusted certificate '{subject}' has no usable RSA key: {e}"
            ))
        })?;
        Ok(Self {
            der,
            subject,
            public_key,
        })
    }

    /// Creates a trusted certificate from the first `CERTIFICATE` block of a PEM document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no certificate is found or it is invalid.
    pub fn from_pem(pem: &str) -> StsResult<Self> {
        let der = parse_pem_certificates(pem.as_bytes())?
            .into_iter()
            .next()
            .ok_or_else(|| StsError::configuration("No certificate found in PEM input"))?;
        Self::from_der(der)
    }

    /// Loads a PEM or DER certificate from disk.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> StsResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            StsError::configuration(format!(
                "Failed to read trusted certificate {}: {e}",
                path.display()
            ))
        })?;
        if bytes.starts_with(b"-----BEGIN") {
            let pem = String::from_utf8(bytes).map_err(|e| {
                StsError::configuration(format!("Trusted certificate is not UTF-8 PEM: {e}"))
            })?;
            Self::from_pem(&pem)
        } else {
            Self::from_der(bytes)
        }
    }

    /// DER encoding of the pinned certificate.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject distinguished name, for logging.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns `true` if `der` is exactly the pinned certificate.
    #[must_use]
    pub fn matches(&self, der: &[u8]) -> bool {
        self.der == der
    }

    /// Verifies an RSASSA-PKCS1-v1_5 signature over a SHA-256 digest.
    ///
    /// # Errors
    ///
    /// Returns a crypto error if the signature does not verify.
    pub fn verify_sha256(&self, digest: &[u8], signature: &[u8]) -> StsResult<()> {
        self.public_key
            .verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)
            .map_err(|_| {
                StsError::crypto(format!(
                    "Signature does not verify against trusted certificate '{}'",
                    self.subject
                ))
            })
    }
}

/// Extracts the DER bodies of all `CERTIFICATE` blocks in a PEM document.
///
/// # Errors
///
/// Returns a configuration error if the PEM framing is broken.
pub fn parse_pem_certificates(pem: &[u8]) -> StsResult<Vec<Vec<u8>>> {
    let mut certificates = Vec::new();
    for block in Pem::iter_from_buffer(pem) {
        let block =
            block.map_err(|e| StsError::configuration(format!("Invalid PEM input: {e}")))?;
        if block.label == "CERTIFICATE" {
            certificates.push(block.contents);
        }
    }
    Ok(certificates)
}

/// Splits concatenated DER certificates (as carried in a single
/// `X509Certificate` element) into individual certificates.
///
/// # Errors
///
/// Returns a crypto error if the bytes are not a sequence of certificates.
pub fn split_certificate_chain(mut bytes: &[u8]) -> StsResult<Vec<Vec<u8>>> {
    let mut certificates = Vec::new();
    while !bytes.is_empty() {
        let (rest, _) = parse_x509_certificate(bytes)
            .map_err(|e| StsError::crypto(format!("Invalid embedded certificate: {e}")))?;
        let consumed = bytes.len() - rest.len();
        certificates.push(bytes[..consumed].to_vec());
        bytes = rest;
    }
    Ok(certificates)
}
