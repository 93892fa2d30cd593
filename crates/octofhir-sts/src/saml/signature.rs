//! XML-DSig enveloped signatures over SAML assertions.
//!
//! Only one profile is produced and accepted: exclusive C14N, RSA-SHA256 and
//! a single SHA-256 reference to the assertion's own ID with the
//! enveloped-signature transform.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

use super::{
    ALG_ENVELOPED_SIGNATURE, ALG_EXC_C14N, ALG_RSA_SHA256, ALG_SHA256, DS_NS, EXC_C14N_NS,
    SAML_NS,
};
use crate::StsResult;
use crate::crypto::{HashAlgorithm, SigningSuite, TrustedCertificate, split_certificate_chain};
use crate::error::StsError;
use crate::xml::{NamespaceScope, XmlElement, canonicalize};

// ============================================================================
// Signer
// ============================================================================

/// Signs assertions through a [`SigningSuite`].
#[derive(Clone)]
pub struct XmlSigner {
    suite: Arc<dyn SigningSuite>,
}

impl XmlSigner {
    /// Creates a signer.
    #[must_use]
    pub fn new(suite: Arc<dyn SigningSuite>) -> Self {
        Self { suite }
    }

    /// Signs a stand-alone assertion and inserts the `ds:Signature` element
    /// immediately after its `Issuer`.
    ///
    /// Any existing signature is replaced.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the assertion has no `ID` or no `Issuer`,
    /// or a crypto error if the signing suite fails.
    pub async fn sign(&self, assertion: XmlElement) -> StsResult<XmlElement> {
        let id = assertion
            .attr("ID")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StsError::protocol("Assertion has no ID attribute"))?
            .to_string();
        if assertion.child(SAML_NS, "Issuer").is_none() {
            return Err(StsError::protocol(
                "Assertion has no Issuer element to anchor the signature",
            ));
        }

        let mut unsigned = assertion;
        unsigned.remove_children(DS_NS, "Signature");
        let scope = NamespaceScope::default();
        let digest = Sha256::digest(canonicalize(&unsigned, &scope, &[])?.as_bytes());

        let signed_info = ds("SignedInfo")
            .with_child(ds("CanonicalizationMethod").with_attr("Algorithm", ALG_EXC_C14N))
            .with_child(ds("SignatureMethod").with_attr("Algorithm", ALG_RSA_SHA256))
            .with_child(
                ds("Reference")
                    .with_attr("URI", format!("#{id}"))
                    .with_child(
                        ds("Transforms")
                            .with_child(
                                ds("Transform").with_attr("Algorithm", ALG_ENVELOPED_SIGNATURE),
                            )
                            .with_child(ds("Transform").with_attr("Algorithm", ALG_EXC_C14N)),
                    )
                    .with_child(ds("DigestMethod").with_attr("Algorithm", ALG_SHA256))
                    .with_child(ds("DigestValue").with_text(STANDARD.encode(digest))),
            );

        let mut signature = ds("Signature").with_ns("ds", DS_NS);
        let signed_info_scope = scope.enter(&unsigned).enter(&signature);
        let canonical_signed_info = canonicalize(&signed_info, &signed_info_scope, &[])?;
        let hash = HashAlgorithm::Sha256;
        let signature_value = self
            .suite
            .sign(&hash.digest(canonical_signed_info.as_bytes()), hash)
            .await?;

        let chain = self.suite.certificate_chain().concat();
        signature.push_child(signed_info);
        signature.push_child(ds("SignatureValue").with_text(STANDARD.encode(signature_value)));
        signature.push_child(ds("KeyInfo").with_child(
            ds("X509Data").with_child(ds("X509Certificate").with_text(STANDARD.encode(chain))),
        ));

        tracing::debug!(assertion_id = %id, "Signed assertion");

        unsigned.insert_child_after(SAML_NS, "Issuer", signature);
        Ok(unsigned)
    }
}

impl std::fmt::Debug for XmlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlSigner").finish_non_exhaustive()
    }
}

fn ds(name: &str) -> XmlElement {
    XmlElement::new(&format!("ds:{name}"), DS_NS)
}

// ============================================================================
// Verifier
// ============================================================================

/// Verifies assertion signatures against a single pinned certificate.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    trusted: Arc<TrustedCertificate>,
}

impl SignatureVerifier {
    /// Creates a verifier trusting exactly `trusted`.
    #[must_use]
    pub fn new(trusted: Arc<TrustedCertificate>) -> Self {
        Self { trusted }
    }

    /// The pinned certificate.
    #[must_use]
    pub fn trusted_certificate(&self) -> &TrustedCertificate {
        &self.trusted
    }

    /// Verifies the enveloped signature of `assertion`.
    ///
    /// `scope` holds the namespace bindings inherited from the assertion's
    /// ancestors in the document it was found in.
    ///
    /// # Errors
    ///
    /// Returns a crypto error if the signature is missing, uses an unsupported
    /// profile, references anything other than the assertion, or does not
    /// verify against the pinned certificate.
    pub fn verify(&self, assertion: &XmlElement, scope: &NamespaceScope) -> StsResult<()> {
        let mut signatures = assertion.children_named(DS_NS, "Signature");
        let signature = signatures
            .next()
            .ok_or_else(|| StsError::crypto("Assertion is not signed"))?;
        if signatures.next().is_some() {
            return Err(StsError::crypto("Assertion carries more than one signature"));
        }

        let signed_info = required(signature, "SignedInfo")?;
        let c14n_method = required(signed_info, "CanonicalizationMethod")?;
        expect_algorithm(c14n_method, ALG_EXC_C14N, "canonicalization")?;
        expect_algorithm(
            required(signed_info, "SignatureMethod")?,
            ALG_RSA_SHA256,
            "signature",
        )?;

        let mut references = signed_info.children_named(DS_NS, "Reference");
        let reference = references
            .next()
            .ok_or_else(|| StsError::crypto("SignedInfo has no Reference"))?;
        if references.next().is_some() {
            return Err(StsError::crypto("SignedInfo has more than one Reference"));
        }

        let id = assertion
            .attr("ID")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StsError::crypto("Signed assertion has no ID attribute"))?;
        if reference.attr("URI") != Some(format!("#{id}").as_str()) {
            return Err(StsError::crypto(format!(
                "Signature reference '{}' does not point at assertion '{id}'",
                reference.attr("URI").unwrap_or_default()
            )));
        }

        let mut reference_prefixes = Vec::new();
        if let Some(transforms) = reference.child(DS_NS, "Transforms") {
            for transform in transforms.children_named(DS_NS, "Transform") {
                match transform.attr("Algorithm") {
                    Some(ALG_ENVELOPED_SIGNATURE) => {}
                    Some(ALG_EXC_C14N) => reference_prefixes = inclusive_prefixes(transform),
                    other => {
                        return Err(StsError::crypto(format!(
                            "Unsupported transform '{}'",
                            other.unwrap_or_default()
                        )));
                    }
                }
            }
        }
        expect_algorithm(required(reference, "DigestMethod")?, ALG_SHA256, "digest")?;
        let expected_digest = decode(&required(reference, "DigestValue")?.text(), "DigestValue")?;

        let mut unsigned = assertion.clone();
        unsigned.remove_children(DS_NS, "Signature");
        let actual_digest = Sha256::digest(canonicalize(&unsigned, scope, &reference_prefixes)?);
        if actual_digest.as_slice() != expected_digest.as_slice() {
            return Err(StsError::crypto(format!(
                "Digest mismatch for assertion '{id}'"
            )));
        }

        if let Some(embedded) = signature.find(DS_NS, "X509Certificate") {
            let chain = split_certificate_chain(&decode(&embedded.text(), "X509Certificate")?)?;
            let leaf = chain
                .first()
                .ok_or_else(|| StsError::crypto("Empty X509Certificate element"))?;
            if !self.trusted.matches(leaf) {
                return Err(StsError::crypto(format!(
                    "Embedded certificate does not match trusted certificate '{}'",
                    self.trusted.subject()
                )));
            }
        }

        let signed_info_scope = scope.enter(assertion).enter(signature);
        let canonical_signed_info = canonicalize(
            signed_info,
            &signed_info_scope,
            &inclusive_prefixes(c14n_method),
        )?;
        let signature_value = decode(&required(signature, "SignatureValue")?.text(), "SignatureValue")?;
        self.trusted.verify_sha256(
            &Sha256::digest(canonical_signed_info.as_bytes()),
            &signature_value,
        )?;

        tracing::debug!(assertion_id = %id, "Assertion signature verified");
        Ok(())
    }
}

fn required<'a>(parent: &'a XmlElement, name: &str) -> StsResult<&'a XmlElement> {
    parent
        .child(DS_NS, name)
        .ok_or_else(|| StsError::crypto(format!("{} has no {name} element", parent.name)))
}

fn expect_algorithm(element: &XmlElement, expected: &str, kind: &str) -> StsResult<()> {
    match element.attr("Algorithm") {
        Some(algorithm) if algorithm == expected => Ok(()),
        other => Err(StsError::crypto(format!(
            "Unsupported {kind} algorithm '{}'",
            other.unwrap_or_default()
        ))),
    }
}

fn inclusive_prefixes(element: &XmlElement) -> Vec<String> {
    element
        .child(EXC_C14N_NS, "InclusiveNamespaces")
        .and_then(|inclusive| inclusive.attr("PrefixList"))
        .map(|list| list.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

fn decode(text: &str, what: &str) -> StsResult<Vec<u8>> {
    super::decode_base64(text)
        .map_err(|e| StsError::crypto(format!("{what} is not valid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::LocalKeySigningSuite;
    use crate::test_support::{
        gateway_key_material, launch_context, other_key_material, signer_key_material,
        signer_suite, trusted_certificate,
    };
    use crate::types::TokenType;
    use crate::saml::AssertionBuilder;
    use crate::xml::parse;

    fn assertion() -> XmlElement {
        AssertionBuilder::new("urn:issuer", "urn:audience", "urn:org")
            .build(&launch_context("workflow-1234"), TokenType::Hcp)
            .unwrap()
    }

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(Arc::new(trusted_certificate(signer_key_material())))
    }

    async fn signed() -> XmlElement {
        XmlSigner::new(signer_suite()).sign(assertion()).await.unwrap()
    }

    #[tokio::test]
    async fn test_sign_then_verify() {
        let signed = signed().await;
        verifier()
            .verify(&signed, &NamespaceScope::default())
            .unwrap();
    }

    #[tokio::test]
    async fn test_signature_follows_issuer() {
        let signed = signed().await;
        let names: Vec<_> = signed.elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names[0], "Issuer");
        assert_eq!(names[1], "Signature");

        let reference = signed.find(DS_NS, "Reference").unwrap();
        assert_eq!(
            reference.attr("URI").unwrap(),
            format!("#{}", signed.attr("ID").unwrap())
        );
    }

    #[tokio::test]
    async fn test_verify_after_reserialization_inside_envelope() {
        let signed = signed().await;
        let document = format!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" xmlns:unused="urn:unused"><s:Body>{}</s:Body></s:Envelope>"#,
            signed.to_xml_string()
        );
        let root = parse(&document).unwrap();
        let (found, scope) = root
            .find_with_scope(SAML_NS, "Assertion", &NamespaceScope::default())
            .unwrap();
        verifier().verify(found, &scope).unwrap();
    }

    #[tokio::test]
    async fn test_wrong_trust_anchor_fails() {
        let signed = signed().await;
        let other = SignatureVerifier::new(Arc::new(trusted_certificate(other_key_material())));
        let err = other.verify(&signed, &NamespaceScope::default()).unwrap_err();
        assert!(err.is_crypto_error());
    }

    #[tokio::test]
    async fn test_key_without_embedded_certificate_uses_pinned_key() {
        let mut signed = signed().await;
        if let Some(crate::xml::XmlNode::Element(signature)) = signed.children.get_mut(1) {
            signature.remove_children(DS_NS, "KeyInfo");
        }
        verifier().verify(&signed, &NamespaceScope::default()).unwrap();

        let other = SignatureVerifier::new(Arc::new(trusted_certificate(other_key_material())));
        assert!(other.verify(&signed, &NamespaceScope::default()).is_err());
    }

    #[tokio::test]
    async fn test_embedded_certificate_must_match_pin() {
        let material = signer_key_material();
        let mismatched = LocalKeySigningSuite::new(
            material.key.clone(),
            vec![gateway_key_material().cert_der.clone()],
        )
        .unwrap();
        let signed = XmlSigner::new(Arc::new(mismatched))
            .sign(assertion())
            .await
            .unwrap();

        let err = verifier()
            .verify(&signed, &NamespaceScope::default())
            .unwrap_err();
        assert!(err.to_string().contains("Embedded certificate"));
    }

    #[tokio::test]
    async fn test_tampered_assertion_fails_digest() {
        let mut signed = signed().await;
        signed.set_attr("IssueInstant", "2000-01-01T00:00:00.000Z");
        let err = verifier()
            .verify(&signed, &NamespaceScope::default())
            .unwrap_err();
        assert!(err.is_crypto_error());
        assert!(err.to_string().contains("Digest mismatch"));
    }

    #[tokio::test]
    async fn test_reference_must_point_at_assertion() {
        let mut signed = signed().await;
        signed.set_attr("ID", "_other");
        let err = verifier()
            .verify(&signed, &NamespaceScope::default())
            .unwrap_err();
        assert!(err.to_string().contains("does not point at"));
    }

    #[test]
    fn test_unsigned_assertion_fails() {
        let err = verifier()
            .verify(&assertion(), &NamespaceScope::default())
            .unwrap_err();
        assert!(err.is_crypto_error());
    }

    #[tokio::test]
    async fn test_missing_issuer_cannot_be_signed() {
        let mut unsigned = assertion();
        unsigned.remove_children(SAML_NS, "Issuer");
        let err = XmlSigner::new(signer_suite()).sign(unsigned).await.unwrap_err();
        assert!(err.is_protocol_error());
        assert!(err.to_string().contains("Issuer"));
    }
}
