//! SAML 2.0 assertions: building, signing, verifying and decrypting.
//!
//! - [`assertion`] builds the unsigned outbound assertion for a launch context
//! - [`signature`] signs assertions and verifies them against pinned trust
//! - [`encryption`] unwraps XML-Enc `EncryptedAssertion`s
//! - [`inbound`] turns an EHR launch `SAMLResponse` into a [`LaunchContext`]
//!
//! [`LaunchContext`]: crate::types::LaunchContext

pub mod assertion;
pub mod encryption;
pub mod inbound;
pub mod signature;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

use crate::StsResult;
use crate::error::StsError;

pub use assertion::AssertionBuilder;
pub use encryption::decrypt_assertion;
pub use inbound::{InboundAssertionProcessor, validate_time_window};
pub use signature::{SignatureVerifier, XmlSigner};

// ============================================================================
// Namespaces
// ============================================================================

/// SAML 2.0 assertion namespace.
pub const SAML_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
/// SAML 2.0 protocol namespace.
pub const SAMLP_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
/// XML-DSig namespace.
pub const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
/// XML-Enc namespace.
pub const XENC_NS: &str = "http://www.w3.org/2001/04/xmlenc#";
/// Exclusive C14N namespace (for `InclusiveNamespaces`).
pub const EXC_C14N_NS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
/// XML Schema instance namespace.
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
/// HL7 v3 namespace for coded attribute values.
pub const HL7_NS: &str = "urn:hl7-org:v3";

// ============================================================================
// Algorithms
// ============================================================================

/// Exclusive XML canonicalization (without comments).
pub const ALG_EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
/// Enveloped-signature transform.
pub const ALG_ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
/// RSA with SHA-256 signature method.
pub const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
/// SHA-256 digest method.
pub const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
/// SHA-1 digest method.
pub const ALG_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
/// RSA-OAEP key transport with MGF1-SHA1.
pub const ALG_RSA_OAEP_MGF1P: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";
/// RSA-OAEP key transport (XML-Enc 1.1).
pub const ALG_RSA_OAEP: &str = "http://www.w3.org/2009/xmlenc11#rsa-oaep";
/// AES-128 in CBC mode.
pub const ALG_AES128_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes128-cbc";
/// AES-256 in CBC mode.
pub const ALG_AES256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";

// ============================================================================
// SAML Values
// ============================================================================

/// Bearer subject confirmation method.
pub const CM_BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";
/// X.509 authentication context class.
pub const AUTHN_CONTEXT_X509: &str = "urn:oasis:names:tc:SAML:2.0:ac:classes:X509";
/// Successful SAML status code.
pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// PurposeOfUse attribute name.
pub const ATTR_PURPOSE_OF_USE: &str = "urn:oasis:names:tc:xspa:1.0:subject:purposeofuse";
/// Role attribute name.
pub const ATTR_ROLE: &str = "urn:oasis:names:tc:xacml:2.0:subject:role";
/// Resource (patient BSN) attribute name.
pub const ATTR_RESOURCE_ID: &str = "urn:oasis:names:tc:xacml:1.0:resource:resource-id";
/// Organization attribute name.
pub const ATTR_ORGANIZATION_ID: &str = "urn:oasis:names:tc:xspa:1.0:subject:organization-id";
/// Workflow attribute name.
pub const ATTR_WORKFLOW_ID: &str =
    "http://sts.zorgplatform.online/ws/claims/2017/07/workflow/workflow-id";
/// Practitioner name attribute name.
pub const ATTR_SUBJECT_NAME: &str = "urn:oasis:names:tc:xspa:1.0:subject:subject-id";
/// Practitioner e-mail attribute name.
pub const ATTR_EMAIL: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";

/// PurposeOfUse code system (HL7 nhin-purpose).
pub const PURPOSE_OF_USE_CODE_SYSTEM: &str = "2.16.840.1.113883.1.11.20448";
/// PurposeOfUse code system name.
pub const PURPOSE_OF_USE_CODE_SYSTEM_NAME: &str = "nhin-purpose";
/// SNOMED CT code system OID.
pub const SNOMED_CT_CODE_SYSTEM: &str = "2.16.840.1.113883.6.96";
/// SNOMED CT code system name.
pub const SNOMED_CT_CODE_SYSTEM_NAME: &str = "SNOMED_CT";
/// FHIR system URI for SNOMED CT codings.
pub const SNOMED_CT_SYSTEM_URI: &str = "http://snomed.info/sct";
/// OID of the Dutch BSN identifier, the `II` root of resource-id values.
pub const BSN_ROOT: &str = "2.16.840.1.113883.2.4.6.3";

// ============================================================================
// Time Formatting
// ============================================================================

/// Formats a timestamp as a UTC `xs:dateTime` with millisecond precision.
///
/// # Errors
///
/// Returns a protocol error if the timestamp cannot be formatted.
pub fn format_instant(instant: OffsetDateTime) -> StsResult<String> {
    let format =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");
    instant
        .to_offset(time::UtcOffset::UTC)
        .format(format)
        .map_err(|e| StsError::protocol(format!("Failed to format timestamp: {e}")))
}

/// Parses an `xs:dateTime` value.
///
/// # Errors
///
/// Returns a protocol error if the value is not an RFC 3339 timestamp.
pub fn parse_instant(value: &str) -> StsResult<OffsetDateTime> {
    OffsetDateTime::parse(value.trim(), &Rfc3339)
        .map_err(|e| StsError::protocol(format!("Invalid timestamp '{value}': {e}")))
}

/// Decodes base64 that may be wrapped across lines, as XML producers often do.
pub(crate) fn decode_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(compact)
}
