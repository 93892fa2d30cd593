use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use octofhir_sts::TokenType;

#[derive(Parser)]
#[command(name = "octofhir-sts")]
#[command(about = "OctoFHIR STS gateway: request hospital tokens and inspect launches")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the gateway configuration (TOML)
    #[arg(short, long, global = true, env = "OCTOFHIR_STS_CONFIG", default_value = "sts.toml")]
    pub config: PathBuf,

    /// Default log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Request an access token from the STS
    Token(TokenArgs),
    /// Validate a base64 SAMLResponse and print the launch context
    Launch(LaunchArgs),
    /// Load and validate configuration and key material
    CheckConfig,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum TokenKind {
    /// On behalf of the practitioner
    #[default]
    Hcp,
    /// On behalf of the application
    Application,
}

impl From<TokenKind> for TokenType {
    fn from(kind: TokenKind) -> Self {
        match kind {
            TokenKind::Hcp => TokenType::Hcp,
            TokenKind::Application => TokenType::Application,
        }
    }
}

#[derive(clap::Args)]
pub struct TokenArgs {
    /// Patient BSN
    #[arg(long)]
    pub bsn: String,
    /// Practitioner identifier system (e.g. urn:oid:2.16.840.1.113883.4.1)
    #[arg(long)]
    pub practitioner_system: String,
    /// Practitioner identifier value
    #[arg(long)]
    pub practitioner_id: String,
    /// Workflow identifier
    #[arg(long, default_value = "")]
    pub workflow_id: String,
    /// ServiceRequest reference that started the workflow (e.g. ServiceRequest/123)
    #[arg(long)]
    pub service_request: Option<String>,
    /// Token type
    #[arg(long, default_value = "hcp")]
    pub token_type: TokenKind,
}

#[derive(clap::Args)]
pub struct LaunchArgs {
    /// File holding the base64 SAMLResponse form value
    #[arg(long)]
    pub saml_response: PathBuf,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_token_command() {
        let cli = Cli::try_parse_from([
            "octofhir-sts",
            "--config",
            "/etc/octofhir/sts.toml",
            "token",
            "--bsn",
            "999999205",
            "--practitioner-system",
            "urn:oid:2.16.840.1.113883.4.1",
            "--practitioner-id",
            "999999999",
            "--token-type",
            "application",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/etc/octofhir/sts.toml"));
        let Commands::Token(args) = cli.command else {
            panic!("expected token command");
        };
        assert_eq!(args.bsn, "999999205");
        assert!(args.workflow_id.is_empty());
        assert!(args.service_request.is_none());
        assert_eq!(TokenType::from(args.token_type), TokenType::Application);
    }

    #[test]
    fn test_parse_service_request() {
        let cli = Cli::try_parse_from([
            "octofhir-sts",
            "token",
            "--bsn",
            "999999205",
            "--practitioner-system",
            "urn:oid:2.16.840.1.113883.4.1",
            "--practitioner-id",
            "999999999",
            "--workflow-id",
            "workflow-1234",
            "--service-request",
            "ServiceRequest/123",
        ])
        .unwrap();

        let Commands::Token(args) = cli.command else {
            panic!("expected token command");
        };
        assert_eq!(args.workflow_id, "workflow-1234");
        assert_eq!(args.service_request.as_deref(), Some("ServiceRequest/123"));
        assert_eq!(TokenType::from(args.token_type), TokenType::Hcp);
    }

    #[test]
    fn test_token_requires_identity() {
        assert!(Cli::try_parse_from(["octofhir-sts", "token", "--bsn", "999999205"]).is_err());
    }
}
