//! Shared fixtures for unit tests: generated key material, configuration and
//! encrypted launch responses.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use aes::Aes256;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rand::rngs::OsRng;
use rcgen::{CertificateParams, DnType, KeyPair};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::Sha256;
use time::OffsetDateTime;
use time::macros::datetime;
use wiremock::{Request, Respond, ResponseTemplate};

use crate::config::StsConfig;
use crate::crypto::{LocalKeySigningSuite, OaepDigest, TrustedCertificate};
use crate::saml::{
    ALG_AES256_CBC, ALG_RSA_OAEP, ALG_RSA_OAEP_MGF1P, ALG_SHA1, ALG_SHA256, ATTR_EMAIL,
    ATTR_SUBJECT_NAME, AssertionBuilder, DS_NS, SAML_NS, SAMLP_NS, SNOMED_CT_CODE_SYSTEM,
    SNOMED_CT_SYSTEM_URI, STATUS_SUCCESS, XENC_NS, XmlSigner,
};
use crate::types::{Coding, Identifier, LaunchContext, Practitioner, TokenType};
use crate::xml::{NamespaceScope, XmlElement, XmlNode, parse};

// ============================================================================
// Key Material
// ============================================================================

/// An RSA key with a self-signed certificate.
pub struct KeyMaterial {
    pub key: RsaPrivateKey,
    pub key_pem: String,
    pub cert_der: Vec<u8>,
    pub cert_pem: String,
}

impl KeyMaterial {
    fn generate(common_name: &str) -> Self {
        let key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let key_pem = key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();

        let key_pair = KeyPair::from_pkcs8_pem_and_sign_algo(&key_pem, &rcgen::PKCS_RSA_SHA256)
            .unwrap();
        let mut params = CertificateParams::new(vec![common_name.to_string()]).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        let cert = params.self_signed(&key_pair).unwrap();

        Self {
            key,
            key_pem,
            cert_der: cert.der().to_vec(),
            cert_pem: cert.pem(),
        }
    }
}

static SIGNER: LazyLock<KeyMaterial> = LazyLock::new(|| KeyMaterial::generate("sts.test"));
static OTHER: LazyLock<KeyMaterial> = LazyLock::new(|| KeyMaterial::generate("rogue.test"));
static GATEWAY: LazyLock<KeyMaterial> = LazyLock::new(|| KeyMaterial::generate("gateway.test"));

/// The STS key: signs launch assertions and is pinned by [`test_config`].
pub fn signer_key_material() -> &'static KeyMaterial {
    &SIGNER
}

/// A key nobody trusts.
pub fn other_key_material() -> &'static KeyMaterial {
    &OTHER
}

/// The gateway's own key: launch assertions are encrypted to it.
pub fn gateway_key_material() -> &'static KeyMaterial {
    &GATEWAY
}

fn suite(material: &KeyMaterial) -> Arc<LocalKeySigningSuite> {
    Arc::new(
        LocalKeySigningSuite::new(material.key.clone(), vec![material.cert_der.clone()]).unwrap(),
    )
}

pub fn signer_suite() -> Arc<LocalKeySigningSuite> {
    suite(signer_key_material())
}

pub fn gateway_suite() -> Arc<LocalKeySigningSuite> {
    suite(gateway_key_material())
}

pub fn other_suite() -> Arc<LocalKeySigningSuite> {
    suite(other_key_material())
}

pub fn trusted_certificate(material: &KeyMaterial) -> TrustedCertificate {
    TrustedCertificate::from_der(material.cert_der.clone()).unwrap()
}

// ============================================================================
// Configuration & Context
// ============================================================================

/// A valid configuration pinning the signer certificate, with plain HTTP
/// allowed so tests can talk to a mock server.
pub fn test_config(sts_url: &str) -> StsConfig {
    let mut config = StsConfig {
        issuer: "urn:oid:2.16.840.1.113883.2.4.3.224.1.1".to_string(),
        audience: "https://zorgplatform.online".to_string(),
        sts_url: sts_url.to_string(),
        base_url: "https://api.zorgplatform.online/fhir/v1".to_string(),
        organization_id: "urn:oid:2.16.840.1.113883.2.4.3.224.2.1".to_string(),
        trusted_certificate_pem: Some(signer_key_material().cert_pem.clone()),
        ..StsConfig::default()
    };
    config.tls.allow_http = true;
    config
}

pub fn launch_context(workflow_id: &str) -> LaunchContext {
    LaunchContext::new(
        "999999205",
        Practitioner::new(
            Identifier::new("urn:oid:2.16.840.1.113883.4.1", "999999999"),
            Coding::new(SNOMED_CT_SYSTEM_URI, "224609002"),
        ),
        workflow_id,
    )
}

// ============================================================================
// Mock STS
// ============================================================================

/// Answers an RST with the (already signed) assertion from its Security header.
pub struct EchoSts;

impl Respond for EchoSts {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body = String::from_utf8(request.body.clone()).unwrap();
        let envelope = parse(&body).unwrap();
        let (assertion, scope) = envelope
            .find_with_scope(SAML_NS, "Assertion", &NamespaceScope::default())
            .unwrap();
        let rstr = format!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><trust:RequestSecurityTokenResponse xmlns:trust="http://docs.oasis-open.org/ws-sx/ws-trust/200512"><trust:RequestedSecurityToken>{}</trust:RequestedSecurityToken></trust:RequestSecurityTokenResponse></s:Body></s:Envelope>"#,
            assertion.detached(&scope).to_xml_string()
        );
        ResponseTemplate::new(200).set_body_string(rstr)
    }
}

// ============================================================================
// Encryption
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct EncryptOptions {
    pub oaep: OaepDigest,
    /// Place the `EncryptedKey` next to `EncryptedData` instead of inside its `KeyInfo`.
    pub key_as_sibling: bool,
}

/// Encrypts `xml` with a fresh AES-256-CBC key wrapped for `recipient`.
pub fn encrypt_assertion(
    xml: &str,
    recipient: &RsaPublicKey,
    options: EncryptOptions,
) -> XmlElement {
    let mut key = [0u8; 32];
    let mut iv = [0u8; 16];
    OsRng.fill_bytes(&mut key);
    OsRng.fill_bytes(&mut iv);

    let ciphertext = cbc::Encryptor::<Aes256>::new_from_slices(&key, &iv)
        .unwrap()
        .encrypt_padded_vec_mut::<Pkcs7>(xml.as_bytes());
    let wrapped = match options.oaep {
        OaepDigest::Sha1 => recipient.encrypt(&mut OsRng, Oaep::new::<Sha1>(), &key),
        OaepDigest::Sha256 => {
            recipient.encrypt(&mut OsRng, Oaep::new_with_mgf_hash::<Sha256, Sha1>(), &key)
        }
    }
    .unwrap();

    encrypted_assertion_element(&wrapped, &[iv.as_slice(), &ciphertext].concat(), options)
}

/// Builds an `EncryptedAssertion` around raw key and payload cipher values.
/// The payload is declared as AES-256-CBC.
pub fn encrypted_assertion_element(
    wrapped_key: &[u8],
    payload: &[u8],
    options: EncryptOptions,
) -> XmlElement {
    let method = match options.oaep {
        OaepDigest::Sha1 => XmlElement::new("xenc:EncryptionMethod", XENC_NS)
            .with_attr("Algorithm", ALG_RSA_OAEP_MGF1P)
            .with_child(
                XmlElement::new("ds:DigestMethod", DS_NS)
                    .with_ns("ds", DS_NS)
                    .with_attr("Algorithm", ALG_SHA1),
            ),
        OaepDigest::Sha256 => XmlElement::new("xenc:EncryptionMethod", XENC_NS)
            .with_attr("Algorithm", ALG_RSA_OAEP)
            .with_child(
                XmlElement::new("ds:DigestMethod", DS_NS)
                    .with_ns("ds", DS_NS)
                    .with_attr("Algorithm", ALG_SHA256),
            )
            .with_child(
                XmlElement::new("xenc11:MGF", "http://www.w3.org/2009/xmlenc11#")
                    .with_ns("xenc11", "http://www.w3.org/2009/xmlenc11#")
                    .with_attr("Algorithm", "http://www.w3.org/2009/xmlenc11#mgf1sha1"),
            ),
    };
    let encrypted_key = XmlElement::new("xenc:EncryptedKey", XENC_NS)
        .with_child(method)
        .with_child(cipher_data(wrapped_key));

    let mut encrypted_data = XmlElement::new("xenc:EncryptedData", XENC_NS)
        .with_ns("xenc", XENC_NS)
        .with_attr("Type", "http://www.w3.org/2001/04/xmlenc#Element")
        .with_child(
            XmlElement::new("xenc:EncryptionMethod", XENC_NS)
                .with_attr("Algorithm", ALG_AES256_CBC),
        );
    let mut root = XmlElement::new("saml:EncryptedAssertion", SAML_NS).with_ns("saml", SAML_NS);
    if options.key_as_sibling {
        encrypted_data.push_child(cipher_data(payload));
        root.push_child(encrypted_data);
        root.push_child(encrypted_key.with_ns("xenc", XENC_NS));
    } else {
        encrypted_data.push_child(
            XmlElement::new("ds:KeyInfo", DS_NS)
                .with_ns("ds", DS_NS)
                .with_child(encrypted_key),
        );
        encrypted_data.push_child(cipher_data(payload));
        root.push_child(encrypted_data);
    }
    root
}

fn cipher_data(value: &[u8]) -> XmlElement {
    XmlElement::new("xenc:CipherData", XENC_NS).with_child(
        XmlElement::new("xenc:CipherValue", XENC_NS).with_text(STANDARD.encode(value)),
    )
}

// ============================================================================
// Inbound Launch Response
// ============================================================================

/// Reference instant for inbound fixtures; the fixture assertion is valid then.
pub const FIXTURE_NOW: OffsetDateTime = datetime!(2024-05-01 12:00:00 UTC);

/// Knobs for a base64 launch `samlp:Response`.
///
/// The default is a known-good response: signed by the signer key, encrypted
/// to the gateway key, and valid at [`FIXTURE_NOW`] for [`test_config`].
pub struct InboundFixture {
    pub issuer: String,
    pub signed_by_other_key: bool,
    pub role_code_system: String,
    pub workflow_id: Option<String>,
    pub status: String,
}

impl Default for InboundFixture {
    fn default() -> Self {
        Self {
            issuer: test_config("http://127.0.0.1:1/sts").issuer,
            signed_by_other_key: false,
            role_code_system: SNOMED_CT_CODE_SYSTEM.to_string(),
            workflow_id: Some("test123-workflow-id".to_string()),
            status: STATUS_SUCCESS.to_string(),
        }
    }
}

impl InboundFixture {
    pub async fn build(self) -> String {
        let config = test_config("http://127.0.0.1:1/sts");
        let context = LaunchContext::new(
            "999999205",
            Practitioner::new(
                Identifier::new("urn:oid:2.16.840.1.113883.2.4.3.124.8.50.8", "USER1"),
                Coding::new(SNOMED_CT_SYSTEM_URI, "224609002"),
            ),
            self.workflow_id.unwrap_or_default(),
        );

        let mut assertion =
            AssertionBuilder::new(&self.issuer, &config.audience, &config.organization_id)
                .build_with(
                    &context,
                    TokenType::Hcp,
                    "_launch-fixture",
                    FIXTURE_NOW - Duration::from_secs(60),
                )
                .unwrap();
        for node in &mut assertion.children {
            if let XmlNode::Element(statement) = node
                && statement.is(SAML_NS, "AttributeStatement")
            {
                statement.push_child(text_attribute(ATTR_SUBJECT_NAME, "Jansen, Jan, dr."));
                statement.push_child(text_attribute(ATTR_EMAIL, "j.jansen@example.org"));
            }
        }

        let xml = assertion.to_xml_string().replace(
            &format!("codeSystem=\"{SNOMED_CT_CODE_SYSTEM}\""),
            &format!("codeSystem=\"{}\"", self.role_code_system),
        );
        let suite = if self.signed_by_other_key {
            other_suite()
        } else {
            signer_suite()
        };
        let signed = XmlSigner::new(suite)
            .sign(parse(&xml).unwrap())
            .await
            .unwrap();

        let encrypted = encrypt_assertion(
            &signed.to_xml_string(),
            &RsaPublicKey::from(&gateway_key_material().key),
            EncryptOptions::default(),
        );
        let response = XmlElement::new("samlp:Response", SAMLP_NS)
            .with_ns("samlp", SAMLP_NS)
            .with_attr("ID", "_response-fixture")
            .with_attr("Version", "2.0")
            .with_child(
                XmlElement::new("samlp:Status", SAMLP_NS).with_child(
                    XmlElement::new("samlp:StatusCode", SAMLP_NS).with_attr("Value", self.status),
                ),
            )
            .with_child(encrypted);
        STANDARD.encode(response.to_xml_string())
    }
}

fn text_attribute(name: &str, value: &str) -> XmlElement {
    XmlElement::new("saml:Attribute", SAML_NS)
        .with_attr("Name", name)
        .with_child(XmlElement::new("saml:AttributeValue", SAML_NS).with_text(value))
}
