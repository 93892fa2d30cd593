//! # octofhir-sts
//!
//! SAML2 / WS-Trust gateway between an EHR launch and a hospital Secure Token
//! Service.
//!
//! This crate provides:
//! - Inbound launch processing: decrypt, verify and validate an EHR's
//!   `SAMLResponse` and extract the [`LaunchContext`]
//! - Outbound token requests: build and sign an assertion, exchange it with
//!   the STS over mutual TLS and validate the returned assertion
//! - A TTL cache in front of the STS
//!
//! ## Modules
//!
//! - [`config`] - Gateway configuration
//! - [`crypto`] - Signing suites and pinned certificates
//! - [`error`] - Error types, categories and pipeline steps
//! - [`saml`] - Assertion building, XML-DSig, XML-Enc and inbound processing
//! - [`sts`] - WS-Trust envelope, transport, response validation and caching
//! - [`types`] - Launch context and token type policy
//! - [`xml`] - Owned XML tree, parser and exclusive canonicalization

pub mod config;
pub mod crypto;
pub mod error;
pub mod saml;
pub mod sts;
pub mod types;
pub mod xml;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, SigningConfig, StsConfig, TlsConfig};
pub use crypto::{LocalKeySigningSuite, SigningSuite, TrustedCertificate};
pub use error::{ErrorCategory, PipelineStep, StsError};
pub use saml::{AssertionBuilder, InboundAssertionProcessor, SignatureVerifier, XmlSigner};
pub use sts::{
    AccessTokenService, CacheKey, CachedTokenService, EnvelopeBuilder, ResponseValidator,
    StsTokenService, StsTransport, TokenCache,
};
pub use types::{Coding, HumanName, Identifier, LaunchContext, Practitioner, TokenType};

/// Type alias for gateway results.
pub type StsResult<T> = Result<T, StsError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_sts::prelude::*;
/// ```
pub mod prelude {
    pub use crate::StsResult;
    pub use crate::config::{ConfigError, StsConfig};
    pub use crate::crypto::{LocalKeySigningSuite, SigningSuite};
    pub use crate::error::{ErrorCategory, PipelineStep, StsError};
    pub use crate::saml::InboundAssertionProcessor;
    pub use crate::sts::{AccessTokenService, CachedTokenService, StsTokenService, TokenCache};
    pub use crate::types::{LaunchContext, TokenType};
}
