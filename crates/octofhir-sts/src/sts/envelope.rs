//! WS-Trust `RequestSecurityToken` envelope builder.

use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    ACTION_RST_ISSUE, KEY_TYPE_BEARER, REQUEST_TYPE_ISSUE, SOAP12_NS, TOKEN_TYPE_SAML20,
    WSA_ANONYMOUS, WSA_NS, WSP_NS, WSSE_NS, WST_NS, WSU_NS,
};
use crate::StsResult;
use crate::config::StsConfig;
use crate::saml::format_instant;
use crate::xml::XmlElement;

/// Wraps signed assertions in SOAP 1.2 WS-Trust Issue requests.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    sts_url: String,
    applies_to: String,
    timestamp_validity: Duration,
}

impl EnvelopeBuilder {
    /// Default lifetime of the WS-Security timestamp.
    pub const DEFAULT_TIMESTAMP_VALIDITY: Duration = Duration::from_secs(5 * 60);

    /// Creates a builder addressing `sts_url` and requesting a token for `applies_to`.
    #[must_use]
    pub fn new(sts_url: impl Into<String>, applies_to: impl Into<String>) -> Self {
        Self {
            sts_url: sts_url.into(),
            applies_to: applies_to.into(),
            timestamp_validity: Self::DEFAULT_TIMESTAMP_VALIDITY,
        }
    }

    /// Creates a builder from the gateway configuration.
    #[must_use]
    pub fn from_config(config: &StsConfig) -> Self {
        Self::new(&config.sts_url, &config.base_url)
    }

    /// Builds and serializes an envelope with a fresh message ID, timestamped now.
    ///
    /// # Errors
    ///
    /// Returns an error if the timestamps cannot be formatted.
    pub fn build(&self, signed_assertion: XmlElement) -> StsResult<String> {
        let message_id = format!("urn:uuid:{}", Uuid::new_v4());
        let envelope =
            self.build_with(signed_assertion, &message_id, OffsetDateTime::now_utc())?;
        Ok(envelope.to_xml_string())
    }

    /// Builds an envelope with an explicit message ID and timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the timestamps cannot be formatted.
    pub fn build_with(
        &self,
        signed_assertion: XmlElement,
        message_id: &str,
        now: OffsetDateTime,
    ) -> StsResult<XmlElement> {
        let timestamp = XmlElement::new("u:Timestamp", WSU_NS)
            .with_attr("u:Id", "_0")
            .with_child(XmlElement::new("u:Created", WSU_NS).with_text(format_instant(now)?))
            .with_child(
                XmlElement::new("u:Expires", WSU_NS)
                    .with_text(format_instant(now + self.timestamp_validity)?),
            );

        let security = XmlElement::new("o:Security", WSSE_NS)
            .with_ns("o", WSSE_NS)
            .with_attr("s:mustUnderstand", "1")
            .with_child(timestamp)
            .with_child(signed_assertion);

        let header = XmlElement::new("s:Header", SOAP12_NS)
            .with_child(
                XmlElement::new("a:Action", WSA_NS)
                    .with_attr("s:mustUnderstand", "1")
                    .with_text(ACTION_RST_ISSUE),
            )
            .with_child(XmlElement::new("a:MessageID", WSA_NS).with_text(message_id))
            .with_child(
                XmlElement::new("a:ReplyTo", WSA_NS)
                    .with_child(XmlElement::new("a:Address", WSA_NS).with_text(WSA_ANONYMOUS)),
            )
            .with_child(
                XmlElement::new("a:To", WSA_NS)
                    .with_attr("s:mustUnderstand", "1")
                    .with_text(&self.sts_url),
            )
            .with_child(security);

        let request = XmlElement::new("trust:RequestSecurityToken", WST_NS)
            .with_ns("trust", WST_NS)
            .with_child(
                XmlElement::new("wsp:AppliesTo", WSP_NS)
                    .with_ns("wsp", WSP_NS)
                    .with_child(
                        XmlElement::new("a:EndpointReference", WSA_NS).with_child(
                            XmlElement::new("a:Address", WSA_NS).with_text(&self.applies_to),
                        ),
                    ),
            )
            .with_child(XmlElement::new("trust:KeyType", WST_NS).with_text(KEY_TYPE_BEARER))
            .with_child(XmlElement::new("trust:RequestType", WST_NS).with_text(REQUEST_TYPE_ISSUE))
            .with_child(XmlElement::new("trust:TokenType", WST_NS).with_text(TOKEN_TYPE_SAML20));

        Ok(XmlElement::new("s:Envelope", SOAP12_NS)
            .with_ns("s", SOAP12_NS)
            .with_ns("a", WSA_NS)
            .with_ns("u", WSU_NS)
            .with_child(header)
            .with_child(XmlElement::new("s:Body", SOAP12_NS).with_child(request)))
    }
}
