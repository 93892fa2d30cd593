//! Outbound SAML assertion builder.

use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    ATTR_ORGANIZATION_ID, ATTR_PURPOSE_OF_USE, ATTR_RESOURCE_ID, ATTR_ROLE, ATTR_WORKFLOW_ID,
    AUTHN_CONTEXT_X509, BSN_ROOT, CM_BEARER, HL7_NS, SAML_NS, XSI_NS, format_instant,
};
use crate::StsResult;
use crate::config::StsConfig;
use crate::types::{CodedValue, LaunchContext, TokenType};
use crate::xml::XmlElement;

/// Builds unsigned SAML 2.0 assertions for STS token requests.
#[derive(Debug, Clone)]
pub struct AssertionBuilder {
    issuer: String,
    audience: String,
    organization_id: String,
    validity: Duration,
}

impl AssertionBuilder {
    /// Default lifetime of an outbound assertion.
    pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(15 * 60);

    /// Creates a builder.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        organization_id: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            organization_id: organization_id.into(),
            validity: Self::DEFAULT_VALIDITY,
        }
    }

    /// Creates a builder from the gateway configuration.
    #[must_use]
    pub fn from_config(config: &StsConfig) -> Self {
        Self::new(&config.issuer, &config.audience, &config.organization_id)
    }

    /// Overrides the assertion lifetime.
    #[must_use]
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Builds an assertion with a fresh ID, issued now.
    ///
    /// # Errors
    ///
    /// Returns an error if the timestamps cannot be formatted.
    pub fn build(&self, context: &LaunchContext, token_type: TokenType) -> StsResult<XmlElement> {
        let id = format!("_{}", Uuid::new_v4());
        self.build_with(context, token_type, &id, OffsetDateTime::now_utc())
    }

    /// Builds an assertion with an explicit ID and issue instant.
    ///
    /// The output is fully determined by the arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the timestamps cannot be formatted.
    pub fn build_with(
        &self,
        context: &LaunchContext,
        token_type: TokenType,
        id: &str,
        now: OffsetDateTime,
    ) -> StsResult<XmlElement> {
        let issue_instant = format_instant(now)?;
        let not_on_or_after = format_instant(now + self.validity)?;

        let subject = saml("Subject")
            .with_child(saml("NameID").with_text(token_type.subject_name_id(context, &self.issuer)))
            .with_child(saml("SubjectConfirmation").with_attr("Method", CM_BEARER));

        let conditions = saml("Conditions")
            .with_attr("NotBefore", &issue_instant)
            .with_attr("NotOnOrAfter", not_on_or_after)
            .with_child(
                saml("AudienceRestriction")
                    .with_child(saml("Audience").with_text(&self.audience)),
            );

        let mut statement = saml("AttributeStatement")
            .with_child(attribute(
                ATTR_PURPOSE_OF_USE,
                coded_value("PurposeOfUse", &token_type.purpose_of_use()),
            ))
            .with_child(attribute(ATTR_ROLE, coded_value("Role", &token_type.role())))
            .with_child(attribute(
                ATTR_RESOURCE_ID,
                XmlElement::new("InstanceIdentifier", HL7_NS)
                    .with_attr("xsi:type", "II")
                    .with_attr("root", BSN_ROOT)
                    .with_attr("extension", &context.bsn),
            ))
            .with_child(
                saml("Attribute").with_attr("Name", ATTR_ORGANIZATION_ID).with_child(
                    saml("AttributeValue").with_text(&self.organization_id),
                ),
            );
        if context.has_workflow() {
            statement.push_child(
                saml("Attribute")
                    .with_attr("Name", ATTR_WORKFLOW_ID)
                    .with_child(saml("AttributeValue").with_text(&context.workflow_id)),
            );
        }

        let authn = saml("AuthnStatement")
            .with_attr("AuthnInstant", &issue_instant)
            .with_child(
                saml("AuthnContext")
                    .with_child(saml("AuthnContextClassRef").with_text(AUTHN_CONTEXT_X509)),
            );

        Ok(saml("Assertion")
            .with_ns("saml", SAML_NS)
            .with_ns("xsi", XSI_NS)
            .with_attr("ID", id)
            .with_attr("IssueInstant", issue_instant)
            .with_attr("Version", "2.0")
            .with_child(saml("Issuer").with_text(&self.issuer))
            .with_child(subject)
            .with_child(conditions)
            .with_child(statement)
            .with_child(authn))
    }
}

/// Returns the `Attribute` element with the given `Name`, searching the
/// assertion's attribute statements.
#[must_use]
pub fn find_attribute<'a>(assertion: &'a XmlElement, name: &str) -> Option<&'a XmlElement> {
    assertion
        .children_named(SAML_NS, "AttributeStatement")
        .flat_map(|statement| statement.children_named(SAML_NS, "Attribute"))
        .find(|attribute| attribute.attr("Name") == Some(name))
}

fn saml(name: &str) -> XmlElement {
    XmlElement::new(&format!("saml:{name}"), SAML_NS)
}

fn attribute(name: &str, value: XmlElement) -> XmlElement {
    saml("Attribute")
        .with_attr("Name", name)
        .with_child(saml("AttributeValue").with_child(value))
}

fn coded_value(element: &str, value: &CodedValue) -> XmlElement {
    XmlElement::new(element, HL7_NS)
        .with_attr("xsi:type", "CE")
        .with_attr("code", value.code)
        .with_attr("codeSystem", value.code_system)
        .with_attr("codeSystemName", value.code_system_name)
        .with_attr("displayName", value.display_name)
}
