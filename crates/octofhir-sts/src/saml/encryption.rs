//! XML-Enc decryption of `EncryptedAssertion` elements.
//!
//! The symmetric key travels RSA-OAEP encrypted in an `EncryptedKey` and is
//! unwrapped by the [`SigningSuite`]; the assertion itself is AES-CBC
//! encrypted with the IV prepended to the cipher value.
//!
//! AES-CBC carries no integrity tag, and the hospital's encryption suite does
//! not add one. The signature on the decrypted assertion is the only integrity
//! check, so callers must always verify it.

use aes::{Aes128, Aes256};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};

use super::{
    ALG_AES128_CBC, ALG_AES256_CBC, ALG_RSA_OAEP, ALG_RSA_OAEP_MGF1P, DS_NS, SAML_NS, XENC_NS,
    decode_base64,
};
use crate::StsResult;
use crate::crypto::{OaepDigest, SigningSuite};
use crate::error::StsError;
use crate::xml::{XmlElement, parse};

const AES_BLOCK_SIZE: usize = 16;
const MGF1_SHA1: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha1";

/// Decrypts the assertion carried by an `EncryptedAssertion` (or any element
/// containing an `EncryptedData`).
///
/// The `EncryptedKey` may sit inside `EncryptedData/KeyInfo` or next to the
/// `EncryptedData`.
///
/// # Errors
///
/// Returns a protocol error if the structure is incomplete or the plaintext is
/// not an assertion, and a crypto error if an algorithm is unsupported or any
/// decryption step fails.
pub async fn decrypt_assertion(
    encrypted: &XmlElement,
    suite: &dyn SigningSuite,
) -> StsResult<XmlElement> {
    let encrypted_data = encrypted
        .find(XENC_NS, "EncryptedData")
        .ok_or_else(|| StsError::protocol("EncryptedAssertion has no EncryptedData"))?;

    let payload_algorithm = encryption_algorithm(encrypted_data)?;
    let key_length = match payload_algorithm {
        ALG_AES128_CBC => 16,
        ALG_AES256_CBC => 32,
        other => {
            return Err(StsError::crypto(format!(
                "Unsupported data encryption algorithm '{other}'"
            )));
        }
    };

    let encrypted_key = encrypted_data
        .child(DS_NS, "KeyInfo")
        .and_then(|key_info| key_info.find(XENC_NS, "EncryptedKey"))
        .or_else(|| encrypted.find(XENC_NS, "EncryptedKey"))
        .ok_or_else(|| StsError::protocol("EncryptedData has no EncryptedKey"))?;

    let digest = key_transport_digest(encrypted_key)?;
    let wrapped_key = cipher_value(encrypted_key)?;
    let key = suite.decrypt_rsa_oaep(&wrapped_key, digest).await?;
    if key.len() != key_length {
        return Err(StsError::crypto(format!(
            "Unwrapped key has {} bytes, expected {key_length}",
            key.len()
        )));
    }

    let payload = cipher_value(encrypted_data)?;
    let plaintext = decrypt_cbc(&key, &payload)?;
    let xml = String::from_utf8(plaintext)
        .map_err(|_| StsError::crypto("Decrypted assertion is not UTF-8"))?;
    tracing::debug!(assertion = %xml, "Decrypted assertion");

    let assertion = parse(&xml)?;
    if !assertion.is(SAML_NS, "Assertion") {
        return Err(StsError::protocol(format!(
            "Decrypted content is '{}', expected a SAML Assertion",
            assertion.qname()
        )));
    }
    Ok(assertion)
}

fn encryption_algorithm(element: &XmlElement) -> StsResult<&str> {
    element
        .child(XENC_NS, "EncryptionMethod")
        .and_then(|method| method.attr("Algorithm"))
        .ok_or_else(|| StsError::protocol(format!("{} has no EncryptionMethod", element.name)))
}

fn key_transport_digest(encrypted_key: &XmlElement) -> StsResult<OaepDigest> {
    let algorithm = encryption_algorithm(encrypted_key)?;
    if algorithm != ALG_RSA_OAEP_MGF1P && algorithm != ALG_RSA_OAEP {
        return Err(StsError::crypto(format!(
            "Unsupported key transport algorithm '{algorithm}'"
        )));
    }
    let Some(method) = encrypted_key.child(XENC_NS, "EncryptionMethod") else {
        return Ok(OaepDigest::default());
    };

    if let Some(mgf) = method.elements().find(|e| e.name == "MGF")
        && mgf.attr("Algorithm") != Some(MGF1_SHA1)
    {
        return Err(StsError::crypto(format!(
            "Unsupported mask generation function '{}'",
            mgf.attr("Algorithm").unwrap_or_default()
        )));
    }

    match method
        .child(DS_NS, "DigestMethod")
        .and_then(|digest| digest.attr("Algorithm"))
    {
        None => Ok(OaepDigest::default()),
        Some(uri) => OaepDigest::from_uri(uri).ok_or_else(|| {
            StsError::crypto(format!("Unsupported OAEP digest method '{uri}'"))
        }),
    }
}

fn cipher_value(element: &XmlElement) -> StsResult<Vec<u8>> {
    let value = element
        .child(XENC_NS, "CipherData")
        .and_then(|data| data.child(XENC_NS, "CipherValue"))
        .ok_or_else(|| StsError::protocol(format!("{} has no CipherValue", element.name)))?;
    decode_base64(&value.text())
        .map_err(|e| StsError::protocol(format!("CipherValue is not valid base64: {e}")))
}

/// AES-CBC decryption with the IV in the first block and XML-Enc padding,
/// where only the final byte (the pad length) is significant.
fn decrypt_cbc(key: &[u8], payload: &[u8]) -> StsResult<Vec<u8>> {
    if payload.len() < 2 * AES_BLOCK_SIZE || payload.len() % AES_BLOCK_SIZE != 0 {
        return Err(StsError::crypto(format!(
            "Cipher value length {} is not a whole number of blocks after the IV",
            payload.len()
        )));
    }
    let (iv, ciphertext) = payload.split_at(AES_BLOCK_SIZE);

    let invalid = |e: cbc::cipher::InvalidLength| StsError::crypto(format!("Invalid key: {e}"));
    let mut plaintext = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext),
        _ => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext),
    }
    .map_err(|_| StsError::crypto("AES-CBC decryption failed"))?;

    let pad = usize::from(plaintext.last().copied().unwrap_or_default());
    if pad == 0 || pad > AES_BLOCK_SIZE || pad > plaintext.len() {
        return Err(StsError::crypto("Invalid padding in decrypted assertion"));
    }
    plaintext.truncate(plaintext.len() - pad);
    Ok(plaintext)
}
