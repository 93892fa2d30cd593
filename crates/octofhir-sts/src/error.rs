//! STS gateway error types.
//!
//! Errors fall into four families that callers handle differently:
//!
//! - **Protocol** - malformed XML, SOAP or base64 input
//! - **Crypto** - signature, digest or decryption failures (potential attack)
//! - **Trust** - audience, issuer or validity window mismatches
//! - **Transport** - non-2xx status, timeouts and connection failures
//!
//! Every pipeline stage wraps the error it produces with its [`PipelineStep`],
//! so a failure always names the step that rejected the input.

use std::fmt;

/// Errors that can occur while building, exchanging or validating assertions.
#[derive(Debug, thiserror::Error)]
pub enum StsError {
    /// The input is not well-formed XML, SOAP or base64.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the malformed input.
        message: String,
    },

    /// A signature, digest or decryption check failed.
    #[error("Crypto error: {message}")]
    Crypto {
        /// Description of the cryptographic failure.
        message: String,
    },

    /// The assertion is authentic but not meant for us (audience, issuer, time).
    #[error("Trust error: {message}")]
    Trust {
        /// Description of the mismatch.
        message: String,
    },

    /// The STS exchange failed at the HTTP or network level.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
        /// HTTP status code, when the STS answered.
        status: Option<u16>,
    },

    /// Configuration or key material is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// A pipeline step failed.
    #[error("{step} failed: {source}")]
    Step {
        /// The step that failed.
        step: PipelineStep,
        /// The underlying error.
        source: Box<StsError>,
    },
}

impl StsError {
    /// Creates a new `Protocol` error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a new `Crypto` error.
    #[must_use]
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Creates a new `Trust` error.
    #[must_use]
    pub fn trust(message: impl Into<String>) -> Self {
        Self::Trust {
            message: message.into(),
        }
    }

    /// Creates a new `Transport` error without a status code.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    /// Creates a new `Transport` error for a non-success HTTP status.
    #[must_use]
    pub fn http_status(status: u16) -> Self {
        Self::Transport {
            message: format!("STS responded with status {status}"),
            status: Some(status),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wraps this error with the identity of the step that produced it.
    #[must_use]
    pub fn at(self, step: PipelineStep) -> Self {
        Self::Step {
            step,
            source: Box::new(self),
        }
    }

    /// Returns the outermost step this error was attributed to, if any.
    #[must_use]
    pub fn step(&self) -> Option<PipelineStep> {
        match self {
            Self::Step { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Returns the innermost error, skipping all step wrappers.
    #[must_use]
    pub fn root(&self) -> &StsError {
        match self {
            Self::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the HTTP status code for transport errors caused by a non-2xx response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self.root() {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Returns `true` if this error is a malformed-input error.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        self.category() == ErrorCategory::Protocol
    }

    /// Returns `true` if this error is a cryptographic failure.
    #[must_use]
    pub fn is_crypto_error(&self) -> bool {
        self.category() == ErrorCategory::Crypto
    }

    /// Returns `true` if this error is a trust (audience/issuer/time) mismatch.
    #[must_use]
    pub fn is_trust_error(&self) -> bool {
        self.category() == ErrorCategory::Trust
    }

    /// Returns `true` if this error came from the STS exchange.
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self.root() {
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::Crypto { .. } => ErrorCategory::Crypto,
            Self::Trust { .. } => ErrorCategory::Trust,
            Self::Transport { .. } => ErrorCategory::Transport,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Step { .. } => unreachable!("root() never returns a step wrapper"),
        }
    }
}

/// Categories of STS errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed XML/SOAP/base64.
    Protocol,
    /// Signature, digest or decryption failures.
    Crypto,
    /// Audience, issuer or time-window mismatches.
    Trust,
    /// HTTP and network failures.
    Transport,
    /// Invalid configuration or key material.
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol => write!(f, "protocol"),
            Self::Crypto => write!(f, "crypto"),
            Self::Trust => write!(f, "trust"),
            Self::Transport => write!(f, "transport"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Identity of a pipeline step, attached to errors as they propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStep {
    /// Building the unsigned outbound assertion.
    BuildAssertion,
    /// Signing the outbound assertion.
    SignAssertion,
    /// Wrapping the signed assertion in a WS-Trust envelope.
    BuildEnvelope,
    /// Exchanging the envelope with the STS.
    Exchange,
    /// Validating the STS response.
    ValidateResponse,
    /// Decoding and parsing an inbound SAML Response.
    DecodeResponse,
    /// Decrypting an inbound EncryptedAssertion.
    DecryptAssertion,
    /// Verifying the signature of an assertion.
    VerifySignature,
    /// Checking the Conditions validity window and audience.
    ValidateConditions,
    /// Checking the assertion issuer.
    ValidateIssuer,
    /// Extracting the launch context from assertion attributes.
    ExtractClaims,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BuildAssertion => "build assertion",
            Self::SignAssertion => "sign assertion",
            Self::BuildEnvelope => "build envelope",
            Self::Exchange => "STS exchange",
            Self::ValidateResponse => "validate STS response",
            Self::DecodeResponse => "decode SAML response",
            Self::DecryptAssertion => "decrypt assertion",
            Self::VerifySignature => "verify signature",
            Self::ValidateConditions => "validate conditions",
            Self::ValidateIssuer => "validate issuer",
            Self::ExtractClaims => "extract claims",
        };
        f.write_str(name)
    }
}
