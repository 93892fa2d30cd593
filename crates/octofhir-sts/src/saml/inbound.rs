//! Inbound launch assertion processing.
//!
//! An EHR launches the application by posting a base64 `SAMLResponse` that
//! carries an encrypted, signed assertion. Processing is a linear fail-closed
//! pipeline; the first failing step aborts with an error naming that step and
//! no partial [`LaunchContext`] is ever returned.

use std::sync::Arc;

use time::OffsetDateTime;

use super::assertion::find_attribute;
use super::signature::SignatureVerifier;
use super::{
    ATTR_EMAIL, ATTR_RESOURCE_ID, ATTR_ROLE, ATTR_SUBJECT_NAME, ATTR_WORKFLOW_ID, SAML_NS,
    SAMLP_NS, SNOMED_CT_CODE_SYSTEM, SNOMED_CT_SYSTEM_URI, STATUS_SUCCESS, decrypt_assertion,
    parse_instant,
};
use crate::StsResult;
use crate::config::StsConfig;
use crate::crypto::SigningSuite;
use crate::error::{PipelineStep, StsError};
use crate::types::{Coding, HumanName, Identifier, LaunchContext, Practitioner};
use crate::xml::{NamespaceScope, XmlElement, parse};

/// Validates inbound launch assertions and extracts the launch context.
#[derive(Clone)]
pub struct InboundAssertionProcessor {
    suite: Arc<dyn SigningSuite>,
    verifier: SignatureVerifier,
    issuer: String,
    audience: String,
}

impl std::fmt::Debug for InboundAssertionProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundAssertionProcessor")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("trusted", &self.verifier.trusted_certificate().subject())
            .finish_non_exhaustive()
    }
}

impl InboundAssertionProcessor {
    /// Creates a processor.
    ///
    /// `suite` decrypts the key transport, `verifier` holds the pinned STS
    /// certificate, and `issuer`/`audience` are the expected values.
    #[must_use]
    pub fn new(
        suite: Arc<dyn SigningSuite>,
        verifier: SignatureVerifier,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            suite,
            verifier,
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    /// Creates a processor from configuration, loading the pinned certificate.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the trusted certificate cannot be loaded.
    pub fn from_config(config: &StsConfig, suite: Arc<dyn SigningSuite>) -> StsResult<Self> {
        let trusted = Arc::new(config.load_trusted_certificate()?);
        Ok(Self::new(
            suite,
            SignatureVerifier::new(trusted),
            &config.issuer,
            &config.audience,
        ))
    }

    /// Processes a base64 `SAMLResponse` form value at the current time.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error, wrapped with its [`PipelineStep`].
    pub async fn process(&self, saml_response: &str) -> StsResult<LaunchContext> {
        self.process_at(saml_response, OffsetDateTime::now_utc())
            .await
    }

    /// Processes a base64 `SAMLResponse` as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error, wrapped with its [`PipelineStep`].
    pub async fn process_at(
        &self,
        saml_response: &str,
        now: OffsetDateTime,
    ) -> StsResult<LaunchContext> {
        match self.run(saml_response, now).await {
            Ok(context) => {
                tracing::info!(
                    subject = %context.subject_name_id,
                    workflow_id = %context.workflow_id,
                    "Launch assertion accepted"
                );
                Ok(context)
            }
            Err(err) => {
                tracing::warn!(
                    step = ?err.step(),
                    category = %err.category(),
                    "Launch assertion rejected"
                );
                Err(err)
            }
        }
    }

    async fn run(&self, saml_response: &str, now: OffsetDateTime) -> StsResult<LaunchContext> {
        let document =
            decode_response(saml_response).map_err(|e| e.at(PipelineStep::DecodeResponse))?;

        let encrypted = document
            .find(SAML_NS, "EncryptedAssertion")
            .ok_or_else(|| {
                StsError::protocol("Response has no EncryptedAssertion")
                    .at(PipelineStep::DecryptAssertion)
            })?;
        let assertion = decrypt_assertion(encrypted, self.suite.as_ref())
            .await
            .map_err(|e| e.at(PipelineStep::DecryptAssertion))?;

        self.verifier
            .verify(&assertion, &NamespaceScope::default())
            .map_err(|e| e.at(PipelineStep::VerifySignature))?;

        self.validate_conditions(&assertion, now)
            .map_err(|e| e.at(PipelineStep::ValidateConditions))?;

        self.validate_issuer(&assertion)
            .map_err(|e| e.at(PipelineStep::ValidateIssuer))?;

        extract_launch_context(&assertion).map_err(|e| e.at(PipelineStep::ExtractClaims))
    }

    fn validate_conditions(&self, assertion: &XmlElement, now: OffsetDateTime) -> StsResult<()> {
        let conditions = assertion
            .child(SAML_NS, "Conditions")
            .ok_or_else(|| StsError::trust("Assertion has no Conditions"))?;

        let not_before = conditions.attr("NotBefore").map(parse_instant).transpose()?;
        let not_on_or_after = conditions
            .attr("NotOnOrAfter")
            .map(parse_instant)
            .transpose()?;
        validate_time_window(not_before, not_on_or_after, now)?;

        let audiences: Vec<String> = conditions
            .children_named(SAML_NS, "AudienceRestriction")
            .flat_map(|restriction| restriction.children_named(SAML_NS, "Audience"))
            .map(XmlElement::trimmed_text)
            .collect();
        if audiences.iter().any(|audience| *audience == self.audience) {
            return Ok(());
        }
        Err(StsError::trust(format!(
            "Audience mismatch: found '{}', expected '{}'",
            audiences.join("', '"),
            self.audience
        )))
    }

    fn validate_issuer(&self, assertion: &XmlElement) -> StsResult<()> {
        let issuer = assertion
            .child(SAML_NS, "Issuer")
            .map(XmlElement::trimmed_text)
            .unwrap_or_default();
        if issuer == self.issuer {
            return Ok(());
        }
        Err(StsError::trust(format!(
            "Issuer mismatch: found '{issuer}', expected '{}'",
            self.issuer
        )))
    }
}

/// Checks that `now` lies within `[not_before, not_on_or_after]`, both bounds inclusive.
///
/// A missing bound is not checked.
///
/// # Errors
///
/// Returns a trust error if `now` lies outside the window.
pub fn validate_time_window(
    not_before: Option<OffsetDateTime>,
    not_on_or_after: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> StsResult<()> {
    if let Some(not_before) = not_before
        && now < not_before
    {
        return Err(StsError::trust(format!(
            "Assertion not valid before {not_before} (now {now})"
        )));
    }
    if let Some(not_on_or_after) = not_on_or_after
        && now > not_on_or_after
    {
        return Err(StsError::trust(format!(
            "Assertion expired at {not_on_or_after} (now {now})"
        )));
    }
    Ok(())
}

fn decode_response(saml_response: &str) -> StsResult<XmlElement> {
    let bytes = super::decode_base64(saml_response)
        .map_err(|e| StsError::protocol(format!("SAMLResponse is not valid base64: {e}")))?;
    let xml = String::from_utf8(bytes)
        .map_err(|_| StsError::protocol("SAMLResponse is not UTF-8 XML"))?;
    let document = parse(&xml)?;

    if document.is(SAMLP_NS, "Response")
        && let Some(code) = document
            .child(SAMLP_NS, "Status")
            .and_then(|status| status.child(SAMLP_NS, "StatusCode"))
    {
        let value = code.attr("Value").unwrap_or_default();
        if value != STATUS_SUCCESS {
            return Err(StsError::protocol(format!(
                "SAML Response status is '{value}'"
            )));
        }
    }
    Ok(document)
}

fn extract_launch_context(assertion: &XmlElement) -> StsResult<LaunchContext> {
    let name_id = assertion
        .child(SAML_NS, "Subject")
        .and_then(|subject| subject.child(SAML_NS, "NameID"))
        .map(XmlElement::trimmed_text)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| StsError::protocol("Assertion has no Subject/NameID"))?;
    let identifier = Identifier::from_name_id(&name_id).ok_or_else(|| {
        StsError::protocol(format!(
            "Subject NameID '{name_id}' is not of the form <id>@<system>"
        ))
    })?;

    let role_value = attribute_value(assertion, ATTR_ROLE)
        .and_then(|value| value.elements().next())
        .ok_or_else(|| StsError::protocol("Assertion has no Role attribute"))?;
    let code_system = role_value.attr("codeSystem").unwrap_or_default();
    if code_system != SNOMED_CT_CODE_SYSTEM {
        return Err(StsError::protocol(format!(
            "Role code system '{code_system}' is not SNOMED CT ({SNOMED_CT_CODE_SYSTEM})"
        )));
    }
    let code = role_value
        .attr("code")
        .filter(|code| !code.is_empty())
        .ok_or_else(|| StsError::protocol("Role attribute has no code"))?;
    let role = Coding {
        system: SNOMED_CT_SYSTEM_URI.to_string(),
        code: code.to_string(),
        display: role_value.attr("displayName").map(String::from),
    };

    let bsn = attribute_value(assertion, ATTR_RESOURCE_ID)
        .and_then(|value| match value.elements().next() {
            Some(identifier) => identifier.attr("extension").map(str::to_string),
            None => Some(value.trimmed_text()),
        })
        .filter(|bsn| !bsn.is_empty())
        .ok_or_else(|| StsError::protocol("Assertion has no resource-id (BSN) attribute"))?;

    let practitioner = Practitioner {
        identifier,
        name: attribute_text(assertion, ATTR_SUBJECT_NAME).and_then(|name| HumanName::parse(&name)),
        role,
        email: attribute_text(assertion, ATTR_EMAIL),
    };

    Ok(LaunchContext {
        bsn,
        subject_name_id: name_id,
        practitioner,
        service_request: None,
        workflow_id: attribute_text(assertion, ATTR_WORKFLOW_ID).unwrap_or_default(),
    })
}

fn attribute_value<'a>(assertion: &'a XmlElement, name: &str) -> Option<&'a XmlElement> {
    find_attribute(assertion, name).and_then(|attribute| attribute.child(SAML_NS, "AttributeValue"))
}

fn attribute_text(assertion: &XmlElement, name: &str) -> Option<String> {
    attribute_value(assertion, name)
        .map(XmlElement::trimmed_text)
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    use super::*;
    use crate::error::ErrorCategory;
    use crate::test_support::{
        FIXTURE_NOW, InboundFixture, gateway_suite, signer_key_material, test_config,
        trusted_certificate,
    };

    fn processor() -> InboundAssertionProcessor {
        let config = test_config("http://127.0.0.1:1/sts");
        InboundAssertionProcessor::new(
            gateway_suite(),
            SignatureVerifier::new(Arc::new(trusted_certificate(signer_key_material()))),
            config.issuer,
            config.audience,
        )
    }

    #[tokio::test]
    async fn test_known_good_response() {
        let response = InboundFixture::default().build().await;
        let context = processor().process_at(&response, FIXTURE_NOW).await.unwrap();

        assert_eq!(context.bsn, "999999205");
        assert_eq!(
            context.practitioner.identifier,
            Identifier::new("urn:oid:2.16.840.1.113883.2.4.3.124.8.50.8", "USER1")
        );
        assert_eq!(context.workflow_id, "test123-workflow-id");
        assert_eq!(context.practitioner.role.code, "224609002");
        assert_eq!(context.practitioner.role.system, SNOMED_CT_SYSTEM_URI);
        assert_eq!(
            context.practitioner.email.as_deref(),
            Some("j.jansen@example.org")
        );
        let name = context.practitioner.name.unwrap();
        assert_eq!(name.family, "Jansen");
        assert_eq!(name.given.as_deref(), Some("Jan"));
    }

    #[tokio::test]
    async fn test_audience_mismatch_names_both_values() {
        let response = InboundFixture::default().build().await;
        let config = test_config("http://127.0.0.1:1/sts");
        let processor = InboundAssertionProcessor::new(
            gateway_suite(),
            SignatureVerifier::new(Arc::new(trusted_certificate(signer_key_material()))),
            config.issuer,
            "https://somewhere.else",
        );

        let err = processor.process_at(&response, FIXTURE_NOW).await.unwrap_err();
        assert_eq!(err.step(), Some(PipelineStep::ValidateConditions));
        assert_eq!(err.category(), ErrorCategory::Trust);
        let message = err.to_string();
        assert!(message.contains(&config.audience));
        assert!(message.contains("https://somewhere.else"));
    }

    #[tokio::test]
    async fn test_issuer_mismatch() {
        let response = InboundFixture {
            issuer: "urn:someone:else".to_string(),
            ..InboundFixture::default()
        }
        .build()
        .await;
        let err = processor().process_at(&response, FIXTURE_NOW).await.unwrap_err();
        assert_eq!(err.step(), Some(PipelineStep::ValidateIssuer));
        assert!(err.is_trust_error());
    }

    #[tokio::test]
    async fn test_expired_assertion() {
        let response = InboundFixture::default().build().await;
        let later = FIXTURE_NOW + Duration::from_secs(3600);
        let err = processor().process_at(&response, later).await.unwrap_err();
        assert_eq!(err.step(), Some(PipelineStep::ValidateConditions));
        assert!(err.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn test_untrusted_signer() {
        let response = InboundFixture {
            signed_by_other_key: true,
            ..InboundFixture::default()
        }
        .build()
        .await;
        let err = processor().process_at(&response, FIXTURE_NOW).await.unwrap_err();
        assert_eq!(err.step(), Some(PipelineStep::VerifySignature));
        assert!(err.is_crypto_error());
    }

    #[tokio::test]
    async fn test_role_must_be_snomed() {
        let response = InboundFixture {
            role_code_system: "2.16.840.1.113883.5.110".to_string(),
            ..InboundFixture::default()
        }
        .build()
        .await;
        let err = processor().process_at(&response, FIXTURE_NOW).await.unwrap_err();
        assert_eq!(err.step(), Some(PipelineStep::ExtractClaims));
    }

    #[tokio::test]
    async fn test_workflow_is_optional() {
        let response = InboundFixture {
            workflow_id: None,
            ..InboundFixture::default()
        }
        .build()
        .await;
        let context = processor().process_at(&response, FIXTURE_NOW).await.unwrap();
        assert!(context.workflow_id.is_empty());
    }

    #[tokio::test]
    async fn test_failed_status() {
        let response = InboundFixture {
            status: "urn:oasis:names:tc:SAML:2.0:status:Requester".to_string(),
            ..InboundFixture::default()
        }
        .build()
        .await;
        let err = processor().process_at(&response, FIXTURE_NOW).await.unwrap_err();
        assert_eq!(err.step(), Some(PipelineStep::DecodeResponse));
        assert!(err.is_protocol_error());
    }

    #[tokio::test]
    async fn test_malformed_input() {
        let err = processor().process_at("%%%not-base64%%%", FIXTURE_NOW).await.unwrap_err();
        assert_eq!(err.step(), Some(PipelineStep::DecodeResponse));
        assert!(err.is_protocol_error());

        let not_xml = STANDARD.encode("definitely not xml");
        let err = processor().process_at(&not_xml, FIXTURE_NOW).await.unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[tokio::test]
    async fn test_unencrypted_assertion_is_rejected() {
        let plain = STANDARD.encode(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"><saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_x"/></samlp:Response>"#,
        );
        let err = processor().process_at(&plain, FIXTURE_NOW).await.unwrap_err();
        assert_eq!(err.step(), Some(PipelineStep::DecryptAssertion));
    }

    #[test]
    fn test_time_window_is_inclusive() {
        let not_before = FIXTURE_NOW;
        let not_on_or_after = FIXTURE_NOW + Duration::from_secs(300);
        let tick = Duration::from_millis(1);

        assert!(validate_time_window(Some(not_before), Some(not_on_or_after), not_before).is_ok());
        assert!(
            validate_time_window(Some(not_before), Some(not_on_or_after), not_on_or_after).is_ok()
        );
        assert!(
            validate_time_window(Some(not_before), Some(not_on_or_after), not_before - tick)
                .is_err()
        );
        assert!(
            validate_time_window(Some(not_before), Some(not_on_or_after), not_on_or_after + tick)
                .is_err()
        );
        assert!(validate_time_window(None, None, FIXTURE_NOW).is_ok());
    }
}
