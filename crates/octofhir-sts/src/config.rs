//! Gateway configuration.
//!
//! Loaded once at startup and shared read-only afterwards. The same issuer and
//! audience values are used for outbound assertions and for validating inbound
//! launch assertions.
//!
//! # Example (TOML)
//!
//! ```toml
//! issuer = "urn:oid:2.16.840.1.113883.2.4.3.224.1.1"
//! audience = "https://zorgplatform.online"
//! sts_url = "https://sts.zorgplatform.online/sts"
//! base_url = "https://api.zorgplatform.online/fhir/v1"
//! organization_id = "urn:oid:2.16.840.1.113883.2.4.3.224.2.1"
//! request_timeout = "30s"
//! token_cache_ttl = "5m"
//! trusted_certificate = "/etc/octofhir/sts.pem"
//!
//! [tls]
//! client_certificate_path = "/etc/octofhir/client.pem"
//! client_key_path = "/etc/octofhir/client.key"
//!
//! [signing]
//! key_path = "/etc/octofhir/signing.key"
//! certificate_chain_path = "/etc/octofhir/signing.pem"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::StsResult;
use crate::crypto::TrustedCertificate;
use crate::error::StsError;

/// Root gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StsConfig {
    /// Issuer URI of assertions we send, and expected issuer of assertions we receive.
    pub issuer: String,

    /// Audience URI of assertions we send, and expected audience of assertions we receive.
    pub audience: String,

    /// WS-Trust endpoint of the hospital STS.
    pub sts_url: String,

    /// Base URL of the hospital FHIR API (the RST `AppliesTo` address).
    pub base_url: String,

    /// Organization identifier sent in the organization-id attribute.
    pub organization_id: String,

    /// Upper bound for one STS exchange.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// How long an issued token is served from cache.
    #[serde(with = "humantime_serde")]
    pub token_cache_ttl: Duration,

    /// Path to the pinned STS certificate (PEM or DER).
    pub trusted_certificate: Option<PathBuf>,

    /// Inline PEM of the pinned STS certificate; wins over the path.
    pub trusted_certificate_pem: Option<String>,

    /// Mutual TLS settings for the STS connection.
    pub tls: TlsConfig,

    /// Local signing key settings.
    pub signing: SigningConfig,
}

impl Default for StsConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            audience: String::new(),
            sts_url: String::new(),
            base_url: String::new(),
            organization_id: String::new(),
            request_timeout: Duration::from_secs(30),
            token_cache_ttl: Duration::from_secs(300), // 5 minutes
            trusted_certificate: None,
            trusted_certificate_pem: None,
            tls: TlsConfig::default(),
            signing: SigningConfig::default(),
        }
    }
}

/// Mutual TLS configuration for the STS connection.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Client certificate chain (PEM).
    pub client_certificate_path: Option<PathBuf>,

    /// Client private key (PKCS#8 PEM).
    pub client_key_path: Option<PathBuf>,

    /// Allow a plain `http://` STS URL. Only meant for tests.
    pub allow_http: bool,
}

/// Local signing key configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// RSA private key (PKCS#8 or PKCS#1 PEM).
    pub key_path: Option<PathBuf>,

    /// Certificate chain matching the key, leaf first (PEM).
    pub certificate_chain_path: Option<PathBuf>,
}

// =============================================================================
// Errors
// =============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration file could not be read.
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl From<ConfigError> for StsError {
    fn from(err: ConfigError) -> Self {
        StsError::configuration(err.to_string())
    }
}

// =============================================================================
// Loading & Validation
// =============================================================================

impl StsConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text is not valid.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a TOML configuration file.
    ///
    /// The result is not validated; call [`validate`](Self::validate).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a required value is missing or a value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("issuer", &self.issuer),
            ("audience", &self.audience),
            ("organization_id", &self.organization_id),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name.to_string()));
            }
        }

        let sts_url = parse_url("sts_url", &self.sts_url)?;
        if sts_url.scheme() != "https" && !self.tls.allow_http {
            return Err(ConfigError::InvalidValue(format!(
                "sts_url must use https, got '{}'",
                self.sts_url
            )));
        }
        parse_url("base_url", &self.base_url)?;

        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "request_timeout must be > 0".to_string(),
            ));
        }

        if self.trusted_certificate.is_none() && self.trusted_certificate_pem.is_none() {
            return Err(ConfigError::Missing(
                "trusted_certificate or trusted_certificate_pem".to_string(),
            ));
        }

        if self.tls.client_certificate_path.is_some() != self.tls.client_key_path.is_some() {
            return Err(ConfigError::InvalidValue(
                "tls.client_certificate_path and tls.client_key_path must be set together"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Loads the pinned STS certificate.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if none is configured or it is invalid.
    pub fn load_trusted_certificate(&self) -> StsResult<TrustedCertificate> {
        if let Some(pem) = &self.trusted_certificate_pem {
            return TrustedCertificate::from_pem(pem);
        }
        match &self.trusted_certificate {
            Some(path) => TrustedCertificate::from_file(path),
            None => Err(ConfigError::Missing(
                "trusted_certificate or trusted_certificate_pem".to_string(),
            )
            .into()),
        }
    }
}

fn parse_url(name: &str, value: &str) -> Result<Url, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(name.to_string()));
    }
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidValue(format!("{name} '{value}' is not a URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidValue(format!(
            "{name} must be an http(s) URL, got scheme '{other}'"
        ))),
    }
}
