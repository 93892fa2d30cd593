//! WS-Trust exchange with the hospital Secure Token Service.
//!
//! The outbound pipeline turns a [`LaunchContext`](crate::types::LaunchContext)
//! into an opaque bearer token for the hospital FHIR API:
//!
//! 1. [`AssertionBuilder`](crate::saml::AssertionBuilder) builds the assertion
//! 2. [`XmlSigner`](crate::saml::XmlSigner) signs it
//! 3. [`EnvelopeBuilder`] wraps it in a `RequestSecurityToken`
//! 4. [`StsTransport`] posts it over mutual TLS
//! 5. [`ResponseValidator`] checks the returned assertion against pinned trust
//!
//! [`StsTokenService`] runs the pipeline; [`CachedTokenService`] puts a
//! [`TokenCache`] in front of it.

pub mod cache;
pub mod envelope;
pub mod response;
pub mod service;
pub mod transport;

pub use cache::{CacheKey, CachedToken, CachedTokenService, TokenCache};
pub use envelope::EnvelopeBuilder;
pub use response::ResponseValidator;
pub use service::{AccessTokenService, StsTokenService};
pub use transport::StsTransport;

/// SOAP 1.2 envelope namespace.
pub const SOAP12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
/// WS-Addressing 1.0 namespace.
pub const WSA_NS: &str = "http://www.w3.org/2005/08/addressing";
/// WS-Security 1.0 extension namespace.
pub const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
/// WS-Security 1.0 utility namespace.
pub const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
/// WS-Trust 1.3 namespace.
pub const WST_NS: &str = "http://docs.oasis-open.org/ws-sx/ws-trust/200512";
/// WS-Policy namespace (for `AppliesTo`).
pub const WSP_NS: &str = "http://schemas.xmlsoap.org/ws/2004/09/policy";

/// WS-Addressing action of an RST/Issue request.
pub const ACTION_RST_ISSUE: &str = "http://docs.oasis-open.org/ws-sx/ws-trust/200512/RST/Issue";
/// WS-Addressing anonymous reply address.
pub const WSA_ANONYMOUS: &str = "http://www.w3.org/2005/08/addressing/anonymous";
/// WS-Trust Issue request type.
pub const REQUEST_TYPE_ISSUE: &str = "http://docs.oasis-open.org/ws-sx/ws-trust/200512/Issue";
/// WS-Trust bearer key type.
pub const KEY_TYPE_BEARER: &str = "http://docs.oasis-open.org/ws-sx/ws-trust/200512/Bearer";
/// SAML 2.0 token type.
pub const TOKEN_TYPE_SAML20: &str =
    "http://docs.oasis-open.org/wss/oasis-wss-saml-token-profile-1.1#SAMLV2.0";
