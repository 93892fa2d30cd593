//! Outbound token pipeline.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::envelope::EnvelopeBuilder;
use super::response::ResponseValidator;
use super::transport::StsTransport;
use crate::StsResult;
use crate::config::StsConfig;
use crate::crypto::SigningSuite;
use crate::error::PipelineStep;
use crate::saml::{AssertionBuilder, SignatureVerifier, XmlSigner};
use crate::types::{LaunchContext, TokenType};

/// Source of hospital API access tokens.
#[async_trait]
pub trait AccessTokenService: Send + Sync {
    /// Returns an opaque bearer token for `context` under the `token_type` policy.
    async fn request_access_token(
        &self,
        context: &LaunchContext,
        token_type: TokenType,
    ) -> StsResult<String>;
}

#[async_trait]
impl<T: AccessTokenService + ?Sized> AccessTokenService for Arc<T> {
    async fn request_access_token(
        &self,
        context: &LaunchContext,
        token_type: TokenType,
    ) -> StsResult<String> {
        (**self).request_access_token(context, token_type).await
    }
}

/// Runs build, sign, wrap, exchange and validate against the STS.
#[derive(Debug, Clone)]
pub struct StsTokenService {
    assertions: AssertionBuilder,
    signer: XmlSigner,
    envelopes: EnvelopeBuilder,
    transport: StsTransport,
    validator: ResponseValidator,
}

impl StsTokenService {
    /// Assembles a service from its parts.
    #[must_use]
    pub fn new(
        assertions: AssertionBuilder,
        signer: XmlSigner,
        envelopes: EnvelopeBuilder,
        transport: StsTransport,
        validator: ResponseValidator,
    ) -> Self {
        Self {
            assertions,
            signer,
            envelopes,
            transport,
            validator,
        }
    }

    /// Builds the service from configuration and a signing suite.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the transport cannot be set up or the
    /// trusted certificate cannot be loaded.
    pub fn from_config(config: &StsConfig, suite: Arc<dyn SigningSuite>) -> StsResult<Self> {
        let trusted = Arc::new(config.load_trusted_certificate()?);
        Ok(Self::new(
            AssertionBuilder::from_config(config),
            XmlSigner::new(suite),
            EnvelopeBuilder::from_config(config),
            StsTransport::from_config(config)?,
            ResponseValidator::new(SignatureVerifier::new(trusted)),
        ))
    }

    async fn run(&self, context: &LaunchContext, token_type: TokenType) -> StsResult<String> {
        let assertion = self
            .assertions
            .build(context, token_type)
            .map_err(|e| e.at(PipelineStep::BuildAssertion))?;
        let signed = self
            .signer
            .sign(assertion)
            .await
            .map_err(|e| e.at(PipelineStep::SignAssertion))?;
        let envelope = self
            .envelopes
            .build(signed)
            .map_err(|e| e.at(PipelineStep::BuildEnvelope))?;
        let body = self
            .transport
            .exchange(&envelope)
            .await
            .map_err(|e| e.at(PipelineStep::Exchange))?;
        self.validator
            .validate(&body)
            .map_err(|e| e.at(PipelineStep::ValidateResponse))
    }
}

#[async_trait]
impl AccessTokenService for StsTokenService {
    async fn request_access_token(
        &self,
        context: &LaunchContext,
        token_type: TokenType,
    ) -> StsResult<String> {
        let started = Instant::now();
        match self.run(context, token_type).await {
            Ok(token) => {
                tracing::info!(
                    token_type = %token_type,
                    workflow_id = %context.workflow_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "STS token issued"
                );
                Ok(token)
            }
            Err(err) => {
                tracing::warn!(
                    token_type = %token_type,
                    step = ?err.step(),
                    category = %err.category(),
                    status = ?err.status(),
                    "STS token request failed"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::ErrorCategory;
    use crate::saml::assertion::find_attribute;
    use crate::saml::{ATTR_ROLE, SAML_NS};
    use crate::test_support::{EchoSts, launch_context, signer_suite, test_config};
    use crate::xml::parse;

    fn service(server: &MockServer) -> StsTokenService {
        let config = test_config(&format!("{}/sts", server.uri()));
        StsTokenService::from_config(&config, signer_suite()).unwrap()
    }

    #[tokio::test]
    async fn test_token_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sts"))
            .and(body_string_contains("RequestSecurityToken"))
            .respond_with(EchoSts)
            .expect(1)
            .mount(&server)
            .await;

        let token = service(&server)
            .request_access_token(&launch_context("workflow-1234"), TokenType::Hcp)
            .await
            .unwrap();

        let xml = String::from_utf8(STANDARD.decode(token).unwrap()).unwrap();
        let assertion = parse(&xml).unwrap();
        let role = find_attribute(&assertion, ATTR_ROLE)
            .and_then(|a| a.child(SAML_NS, "AttributeValue"))
            .and_then(|v| v.elements().next())
            .unwrap();
        assert_eq!(role.attr("code"), Some("224609002"));
    }

    #[tokio::test]
    async fn test_sts_error_status_names_exchange_step() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = service(&server)
            .request_access_token(&launch_context("workflow-1234"), TokenType::Application)
            .await
            .unwrap_err();
        assert_eq!(err.step(), Some(PipelineStep::Exchange));
        assert_eq!(err.category(), ErrorCategory::Transport);
        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn test_unsigned_response_fails_validation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_x"/></s:Body></s:Envelope>"#,
            ))
            .mount(&server)
            .await;

        let err = service(&server)
            .request_access_token(&launch_context("workflow-1234"), TokenType::Hcp)
            .await
            .unwrap_err();
        assert_eq!(err.step(), Some(PipelineStep::ValidateResponse));
        assert!(err.is_crypto_error());
    }
}
