use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use octofhir_sts::saml::SNOMED_CT_SYSTEM_URI;
use octofhir_sts::{
    AccessTokenService, Coding, Identifier, InboundAssertionProcessor, LaunchContext,
    LocalKeySigningSuite, Practitioner, SigningSuite, StsConfig, StsTokenService, TokenType,
};

use crate::cli::{LaunchArgs, TokenArgs};
use crate::output::{print_field, print_success};

/// Loads and validates the configuration file.
pub fn load_config(path: &Path) -> Result<StsConfig> {
    let config = StsConfig::from_toml_file(path)?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    tracing::debug!(path = %path.display(), sts_url = %config.sts_url, "Configuration loaded");
    Ok(config)
}

fn signing_suite(config: &StsConfig) -> Result<Arc<dyn SigningSuite>> {
    let suite = LocalKeySigningSuite::from_config(&config.signing)?;
    Ok(Arc::new(suite))
}

pub async fn token(config: &StsConfig, args: &TokenArgs) -> Result<()> {
    let token_type = TokenType::from(args.token_type);
    let practitioner = Practitioner::new(
        Identifier::new(&args.practitioner_system, &args.practitioner_id),
        Coding::new(SNOMED_CT_SYSTEM_URI, token_type.role().code),
    );
    let mut context = LaunchContext::new(&args.bsn, practitioner, &args.workflow_id);
    if let Some(reference) = &args.service_request {
        context = context.with_service_request(reference);
    }

    let service = StsTokenService::from_config(config, signing_suite(config)?)?;
    let token = service.request_access_token(&context, token_type).await?;
    println!("{token}");
    Ok(())
}

pub async fn launch(config: &StsConfig, args: &LaunchArgs) -> Result<()> {
    let saml_response = std::fs::read_to_string(&args.saml_response)
        .with_context(|| format!("Failed to read {}", args.saml_response.display()))?;

    let processor = InboundAssertionProcessor::from_config(config, signing_suite(config)?)?;
    let context = processor.process(saml_response.trim()).await?;
    println!("{}", serde_json::to_string_pretty(&context)?);
    Ok(())
}

pub fn check_config(config: &StsConfig) -> Result<()> {
    let trusted = config.load_trusted_certificate()?;
    print_field("Trusted STS certificate", trusted.subject());

    let suite = signing_suite(config)?;
    print_field(
        "Signing chain",
        &format!("{} certificate(s)", suite.certificate_chain().len()),
    );

    octofhir_sts::StsTransport::from_config(config)?;
    print_field("STS endpoint", &config.sts_url);

    print_success("Configuration is valid");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_reports_validation_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sts.toml");
        std::fs::write(&path, "issuer = \"urn:issuer\"\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid configuration"));
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config(Path::new("/nonexistent/sts.toml")).is_err());
    }
}
