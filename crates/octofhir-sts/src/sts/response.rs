//! Validation of the STS `RequestSecurityTokenResponse`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::SOAP12_NS;
use crate::StsResult;
use crate::error::StsError;
use crate::saml::{SAML_NS, SignatureVerifier};
use crate::xml::{NamespaceScope, XmlElement, parse};

/// Extracts and verifies the assertion returned by the STS.
#[derive(Debug, Clone)]
pub struct ResponseValidator {
    verifier: SignatureVerifier,
}

impl ResponseValidator {
    /// Creates a validator trusting the verifier's pinned certificate.
    #[must_use]
    pub fn new(verifier: SignatureVerifier) -> Self {
        Self { verifier }
    }

    /// Validates a SOAP response body and returns the access token: the
    /// signed assertion, serialized stand-alone and base64 encoded.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for SOAP faults, malformed XML or a missing
    /// assertion, and a crypto error if the signature does not verify.
    pub fn validate(&self, body: &str) -> StsResult<String> {
        let document = parse(body)?;

        if let Some(fault) = document.find(SOAP12_NS, "Fault") {
            let reason = fault
                .child(SOAP12_NS, "Reason")
                .and_then(|reason| reason.child(SOAP12_NS, "Text"))
                .map(XmlElement::trimmed_text)
                .filter(|reason| !reason.is_empty())
                .unwrap_or_else(|| "no reason given".to_string());
            return Err(StsError::protocol(format!("STS returned a SOAP fault: {reason}")));
        }

        let (assertion, scope) = document
            .find_with_scope(SAML_NS, "Assertion", &NamespaceScope::default())
            .ok_or_else(|| StsError::protocol("STS response contains no SAML Assertion"))?;

        self.verifier.verify(assertion, &scope)?;

        let token = assertion.detached(&scope).to_xml_string();
        tracing::debug!(
            assertion_id = assertion.attr("ID").unwrap_or_default(),
            "STS assertion verified"
        );
        Ok(STANDARD.encode(token))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::saml::{AssertionBuilder, XmlSigner};
    use crate::test_support::{
        launch_context, other_key_material, signer_key_material, signer_suite, trusted_certificate,
    };
    use crate::types::TokenType;

    fn validator() -> ResponseValidator {
        ResponseValidator::new(SignatureVerifier::new(Arc::new(trusted_certificate(
            signer_key_material(),
        ))))
    }

    async fn rstr() -> String {
        let assertion = AssertionBuilder::new("urn:sts", "urn:audience", "urn:org")
            .build(&launch_context("workflow-1234"), TokenType::Hcp)
            .unwrap();
        let signed = XmlSigner::new(signer_suite()).sign(assertion).await.unwrap();
        format!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><trust:RequestSecurityTokenResponseCollection xmlns:trust="http://docs.oasis-open.org/ws-sx/ws-trust/200512"><trust:RequestSecurityTokenResponse><trust:RequestedSecurityToken>{}</trust:RequestedSecurityToken></trust:RequestSecurityTokenResponse></trust:RequestSecurityTokenResponseCollection></s:Body></s:Envelope>"#,
            signed.to_xml_string()
        )
    }

    #[tokio::test]
    async fn test_valid_response_yields_base64_assertion() {
        let token = validator().validate(&rstr().await).unwrap();

        let xml = String::from_utf8(STANDARD.decode(token).unwrap()).unwrap();
        let assertion = parse(&xml).unwrap();
        assert!(assertion.is(SAML_NS, "Assertion"));
        validator()
            .verifier
            .verify(&assertion, &NamespaceScope::default())
            .unwrap();
    }

    #[tokio::test]
    async fn test_untrusted_signature() {
        let other = ResponseValidator::new(SignatureVerifier::new(Arc::new(trusted_certificate(
            other_key_material(),
        ))));
        let err = other.validate(&rstr().await).unwrap_err();
        assert!(err.is_crypto_error());
    }

    #[test]
    fn test_soap_fault() {
        let fault = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><s:Fault><s:Code><s:Value>s:Sender</s:Value></s:Code><s:Reason><s:Text xml:lang="en">Invalid security token</s:Text></s:Reason></s:Fault></s:Body></s:Envelope>"#;
        let err = validator().validate(fault).unwrap_err();
        assert!(err.is_protocol_error());
        assert!(err.to_string().contains("Invalid security token"));
    }

    #[test]
    fn test_missing_assertion_and_malformed_body() {
        let empty = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body/></s:Envelope>"#;
        assert!(validator().validate(empty).unwrap_err().is_protocol_error());
        assert!(validator().validate("<unclosed>").unwrap_err().is_protocol_error());
    }
}
