//! Launch context and token type policy.
//!
//! [`LaunchContext`] is the validated identity bundle of an application launch:
//! who the practitioner is, which patient (by BSN) the launch is about and which
//! clinical workflow triggered it. The same value drives outbound STS requests.
//!
//! [`TokenType`] selects how a launch context is mapped onto SAML attributes:
//! as a human practitioner ([`TokenType::Hcp`]) or as the application itself
//! ([`TokenType::Application`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::saml::{
    PURPOSE_OF_USE_CODE_SYSTEM, PURPOSE_OF_USE_CODE_SYSTEM_NAME, SNOMED_CT_CODE_SYSTEM,
    SNOMED_CT_CODE_SYSTEM_NAME,
};

// ============================================================================
// Launch Context
// ============================================================================

/// Identity and workflow bundle of an application launch.
///
/// Built by the inbound assertion processor from a fully validated assertion,
/// or supplied by the caller when requesting an STS token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchContext {
    /// Dutch national patient identifier (BSN).
    pub bsn: String,

    /// Raw Subject/NameID of the launch assertion.
    pub subject_name_id: String,

    /// The practitioner who launched the application.
    pub practitioner: Practitioner,

    /// Reference to the ServiceRequest that started the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_request: Option<String>,

    /// Workflow identifier; empty when the launch carried none.
    #[serde(default)]
    pub workflow_id: String,
}

impl LaunchContext {
    /// Creates a launch context for a practitioner and patient.
    ///
    /// The subject NameID is derived from the practitioner identifier in the
    /// `<value>@<system>` form used on the wire.
    #[must_use]
    pub fn new(
        bsn: impl Into<String>,
        practitioner: Practitioner,
        workflow_id: impl Into<String>,
    ) -> Self {
        Self {
            bsn: bsn.into(),
            subject_name_id: practitioner.identifier.to_name_id(),
            practitioner,
            service_request: None,
            workflow_id: workflow_id.into(),
        }
    }

    /// Sets the ServiceRequest reference.
    #[must_use]
    pub fn with_service_request(mut self, reference: impl Into<String>) -> Self {
        self.service_request = Some(reference.into());
        self
    }

    /// Returns `true` if the launch carried a workflow identifier.
    #[must_use]
    pub fn has_workflow(&self) -> bool {
        !self.workflow_id.is_empty()
    }
}

/// Practitioner identity taken from the launch assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Practitioner {
    /// Business identifier of the practitioner.
    pub identifier: Identifier,

    /// Practitioner name, when the assertion carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<HumanName>,

    /// Practitioner role (SNOMED CT).
    pub role: Coding,

    /// Practitioner e-mail address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Practitioner {
    /// Creates a practitioner with only an identifier and role.
    #[must_use]
    pub fn new(identifier: Identifier, role: Coding) -> Self {
        Self {
            identifier,
            name: None,
            role,
            email: None,
        }
    }
}

/// A system/value identifier pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    /// Identifier namespace, e.g. `urn:oid:2.16.840.1.113883.4.1`.
    pub system: String,
    /// Identifier value within the namespace.
    pub value: String,
}

impl Identifier {
    /// Creates a new identifier.
    #[must_use]
    pub fn new(system: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            value: value.into(),
        }
    }

    /// Formats the identifier as a SAML NameID: `<value>@<system>`.
    #[must_use]
    pub fn to_name_id(&self) -> String {
        format!("{}@{}", self.value, self.system)
    }

    /// Parses a `<value>@<system>` NameID, splitting on the first `@`.
    ///
    /// Returns `None` if there is no `@` or either half is empty.
    #[must_use]
    pub fn from_name_id(name_id: &str) -> Option<Self> {
        let (value, system) = name_id.split_once('@')?;
        if value.is_empty() || system.is_empty() {
            return None;
        }
        Some(Self::new(system, value))
    }
}

/// A practitioner name as carried by the launch assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanName {
    /// Family name.
    pub family: String,
    /// Given name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given: Option<String>,
    /// Name prefix (e.g. "dr.").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl HumanName {
    /// Parses the `Family, Given, Prefix` form. Trailing parts are optional.
    ///
    /// ```
    /// use octofhir_sts::types::HumanName;
    ///
    /// let name = HumanName::parse("Jansen, Jan, dr.").unwrap();
    /// assert_eq!(name.family, "Jansen");
    /// assert_eq!(name.given.as_deref(), Some("Jan"));
    /// assert_eq!(name.prefix.as_deref(), Some("dr."));
    /// ```
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split(',').map(str::trim);
        let family = parts.next().filter(|f| !f.is_empty())?.to_string();
        let non_empty = |p: Option<&str>| p.filter(|s| !s.is_empty()).map(String::from);
        let given = non_empty(parts.next());
        let prefix = non_empty(parts.next());
        Some(Self {
            family,
            given,
            prefix,
        })
    }
}

/// A terminology coding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    /// Code system.
    pub system: String,
    /// Code within the system.
    pub code: String,
    /// Human readable display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    /// Creates a new coding without display.
    #[must_use]
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            code: code.into(),
            display: None,
        }
    }
}

// ============================================================================
// Token Type Policy
// ============================================================================

/// An HL7v3 `CE` coded value as carried in SAML attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodedValue {
    /// The code.
    pub code: &'static str,
    /// OID of the code system.
    pub code_system: &'static str,
    /// Name of the code system.
    pub code_system_name: &'static str,
    /// Display name of the code.
    pub display_name: &'static str,
}

/// Attribute policy for an outbound STS request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Token on behalf of the launching healthcare professional.
    Hcp,
    /// Token on behalf of the application itself.
    Application,
}

impl TokenType {
    /// Returns the Subject/NameID for this policy.
    ///
    /// HCP tokens name the practitioner (`<value>@<system>`); application
    /// tokens name the configured issuer.
    #[must_use]
    pub fn subject_name_id(&self, context: &LaunchContext, issuer: &str) -> String {
        match self {
            Self::Hcp => context.practitioner.identifier.to_name_id(),
            Self::Application => issuer.to_string(),
        }
    }

    /// Returns the Role attribute value.
    #[must_use]
    pub fn role(&self) -> CodedValue {
        match self {
            Self::Hcp => CodedValue {
                code: "224609002",
                code_system: SNOMED_CT_CODE_SYSTEM,
                code_system_name: SNOMED_CT_CODE_SYSTEM_NAME,
                display_name: "Complementary health worker",
            },
            Self::Application => CodedValue {
                code: "182777000",
                code_system: SNOMED_CT_CODE_SYSTEM,
                code_system_name: SNOMED_CT_CODE_SYSTEM_NAME,
                display_name: "Monitoring of patient",
            },
        }
    }

    /// Returns the PurposeOfUse attribute value.
    #[must_use]
    pub fn purpose_of_use(&self) -> CodedValue {
        match self {
            Self::Hcp => CodedValue {
                code: "TREATMENT",
                code_system: PURPOSE_OF_USE_CODE_SYSTEM,
                code_system_name: PURPOSE_OF_USE_CODE_SYSTEM_NAME,
                display_name: "Treatment",
            },
            Self::Application => CodedValue {
                code: "OPERATIONS",
                code_system: PURPOSE_OF_USE_CODE_SYSTEM,
                code_system_name: PURPOSE_OF_USE_CODE_SYSTEM_NAME,
                display_name: "Operations",
            },
        }
    }

    /// Stable discriminator used in cache keys and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hcp => "hcp",
            Self::Application => "application",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hcp" => Ok(Self::Hcp),
            "application" | "app" => Ok(Self::Application),
            other => Err(format!(
                "Unknown token type '{other}'. Must be hcp or application"
            )),
        }
    }
}
