//! Compact JWE with `alg=ECDH-ES` and `enc=A128GCM`.
//!
//! The wallet uses JWE in two places: decrypting credential responses
//! encrypted to the JWK it supplied in the credential request, and
//! encrypting `direct_post.jwt` presentation responses to the verifier's
//! key. Direct key agreement keeps the encrypted-key part empty; the CEK
//! is derived from the ECDH shared secret with the Concat KDF of RFC 7518
//! section 4.6.

use openssl::{
    derive::Deriver,
    ec::EcKey,
    pkey::{PKey, Private, Public},
    symm::{decrypt_aead, encrypt_aead, Cipher},
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::{
    base64_url_decode, base64_url_encode, es256, JoseError, JwkPublic,
};

const ALG_ECDH_ES: &str = "ECDH-ES";
const ENC_A128GCM: &str = "A128GCM";
const CEK_BITS: u32 = 128;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encrypts `payload` to the given recipient P-256 JWK, producing a
/// compact JWE (`ECDH-ES` + `A128GCM`).
///
/// `apu`/`apv` are the optional PartyUInfo/PartyVInfo octets; they are
/// carried base64url-encoded in the protected header and mixed into the
/// KDF.
///
/// # Errors
///
/// Returns an error when the recipient JWK is invalid or the crypto
/// backend fails.
pub fn encrypt_ecdh_es(
    recipient: &JwkPublic,
    payload: &[u8],
    apu: Option<&[u8]>,
    apv: Option<&[u8]>,
) -> Result<String, JoseError> {
    let recipient_key = es256::public_key_from_jwk(recipient)?;
    let ephemeral = es256::generate_ec_key()?;

    let z = derive_shared_secret(&ephemeral, &recipient_key)?;
    let cek = concat_kdf(&z, ENC_A128GCM, apu.unwrap_or(&[]), apv.unwrap_or(&[]), CEK_BITS);

    let epk = es256::public_jwk_from_ec_key(&ephemeral, None)?;
    let mut header = serde_json::Map::new();
    header.insert("alg".to_owned(), Value::String(ALG_ECDH_ES.to_owned()));
    header.insert("enc".to_owned(), Value::String(ENC_A128GCM.to_owned()));
    header.insert("epk".to_owned(), Value::Object(epk));
    if let Some(apu) = apu {
        header.insert("apu".to_owned(), Value::String(base64_url_encode(apu)));
    }
    if let Some(apv) = apv {
        header.insert("apv".to_owned(), Value::String(base64_url_encode(apv)));
    }
    let header_b64 = base64_url_encode(serde_json::to_vec(&header).map_err(|e| {
        JoseError::InvalidJwe(format!("header serialization failed: {e}"))
    })?);

    let mut iv = [0u8; IV_LEN];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut iv);

    let mut tag = [0u8; TAG_LEN];
    let ciphertext = encrypt_aead(
        Cipher::aes_128_gcm(),
        &cek,
        Some(&iv),
        header_b64.as_bytes(),
        payload,
        &mut tag,
    )?;

    // Direct key agreement: the encrypted-key part is empty.
    Ok(format!(
        "{header_b64}..{}.{}.{}",
        base64_url_encode(iv),
        base64_url_encode(&ciphertext),
        base64_url_encode(tag)
    ))
}

/// Decrypts a compact JWE (`ECDH-ES` + `A128GCM`) with the recipient's
/// P-256 private key.
///
/// # Errors
///
/// Returns an error on malformed input, unexpected `alg`/`enc` values, or
/// failed authentication.
pub fn decrypt_ecdh_es(recipient: &EcKey<Private>, compact: &str) -> Result<Vec<u8>, JoseError> {
    let parts: Vec<&str> = compact.split('.').collect();
    let [header_b64, encrypted_key, iv_b64, ciphertext_b64, tag_b64] = parts.as_slice() else {
        return Err(JoseError::InvalidJwe(
            "expected five dot-separated parts".to_owned(),
        ));
    };
    if !encrypted_key.is_empty() {
        return Err(JoseError::InvalidJwe(
            "ECDH-ES direct agreement must have an empty encrypted key".to_owned(),
        ));
    }

    let header: serde_json::Map<String, Value> = serde_json::from_slice(
        &base64_url_decode(header_b64)
            .map_err(|e| JoseError::InvalidJwe(format!("header is not base64url: {e}")))?,
    )
    .map_err(|e| JoseError::InvalidJwe(format!("header is not JSON: {e}")))?;

    expect_header(&header, "alg", ALG_ECDH_ES)?;
    expect_header(&header, "enc", ENC_A128GCM)?;

    let Some(Value::Object(epk)) = header.get("epk") else {
        return Err(JoseError::InvalidJwe("missing `epk` header".to_owned()));
    };
    let ephemeral_public = es256::public_key_from_jwk(epk)?;

    let apu = optional_party_info(&header, "apu")?;
    let apv = optional_party_info(&header, "apv")?;

    let z = derive_shared_secret(recipient, &ephemeral_public)?;
    let cek = concat_kdf(&z, ENC_A128GCM, &apu, &apv, CEK_BITS);

    let iv = base64_url_decode(iv_b64)
        .map_err(|e| JoseError::InvalidJwe(format!("iv is not base64url: {e}")))?;
    let ciphertext = base64_url_decode(ciphertext_b64)
        .map_err(|e| JoseError::InvalidJwe(format!("ciphertext is not base64url: {e}")))?;
    let tag = base64_url_decode(tag_b64)
        .map_err(|e| JoseError::InvalidJwe(format!("tag is not base64url: {e}")))?;

    // AAD is the protected header exactly as transmitted.
    decrypt_aead(
        Cipher::aes_128_gcm(),
        &cek,
        Some(&iv),
        header_b64.as_bytes(),
        &ciphertext,
        &tag,
    )
    .map_err(|_| JoseError::InvalidJwe("authentication failed".to_owned()))
}

fn expect_header(
    header: &serde_json::Map<String, Value>,
    name: &str,
    expected: &str,
) -> Result<(), JoseError> {
    let value = header
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| JoseError::InvalidJwe(format!("missing `{name}` header")))?;
    if value != expected {
        return Err(JoseError::UnsupportedAlgorithm(value.to_owned()));
    }
    Ok(())
}

fn optional_party_info(
    header: &serde_json::Map<String, Value>,
    name: &str,
) -> Result<Vec<u8>, JoseError> {
    match header.get(name).and_then(Value::as_str) {
        Some(encoded) => base64_url_decode(encoded)
            .map_err(|e| JoseError::InvalidJwe(format!("`{name}` is not base64url: {e}"))),
        None => Ok(Vec::new()),
    }
}

/// ECDH shared secret (the raw x-coordinate `Z`).
fn derive_shared_secret(
    private: &EcKey<Private>,
    peer: &EcKey<Public>,
) -> Result<Zeroizing<Vec<u8>>, JoseError> {
    let private = PKey::from_ec_key(private.clone())?;
    let peer = PKey::from_ec_key(peer.clone())?;
    let mut deriver = Deriver::new(&private)?;
    deriver.set_peer(&peer)?;
    Ok(Zeroizing::new(deriver.derive_to_vec()?))
}

/// Concat KDF per RFC 7518 section 4.6, single SHA-256 round (sufficient
/// for key sizes up to 256 bits).
fn concat_kdf(z: &[u8], alg: &str, apu: &[u8], apv: &[u8], keydatalen_bits: u32) -> Zeroizing<Vec<u8>> {
    let mut hasher = Sha256::new();
    hasher.update(1u32.to_be_bytes());
    hasher.update(z);
    // AlgorithmID: for ECDH-ES direct agreement this is the `enc` value.
    hasher.update((alg.len() as u32).to_be_bytes());
    hasher.update(alg.as_bytes());
    hasher.update((apu.len() as u32).to_be_bytes());
    hasher.update(apu);
    hasher.update((apv.len() as u32).to_be_bytes());
    hasher.update(apv);
    hasher.update(keydatalen_bits.to_be_bytes());

    let digest = hasher.finalize();
    Zeroizing::new(digest[..(keydatalen_bits / 8) as usize].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test vector from RFC 7518 appendix C.
    #[test]
    fn concat_kdf_matches_rfc_vector() {
        let z: [u8; 32] = [
            158, 86, 217, 29, 129, 113, 53, 211, 114, 131, 66, 131, 191, 132, 38, 156, 251, 49,
            110, 163, 218, 128, 106, 72, 246, 218, 167, 121, 140, 254, 144, 196,
        ];
        let derived = concat_kdf(&z, "A128GCM", b"Alice", b"Bob", 128);
        assert_eq!(
            derived.as_slice(),
            &[86, 170, 141, 234, 248, 35, 109, 32, 92, 34, 40, 205, 113, 167, 16, 26]
        );
        assert_eq!(base64_url_encode(derived.as_slice()), "VqqN6vgjbSBcIijNcacQGg");
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let recipient = es256::generate_ec_key().unwrap();
        let recipient_jwk = es256::public_jwk_from_ec_key(&recipient, None).unwrap();

        let compact = encrypt_ecdh_es(
            &recipient_jwk,
            b"{\"vp_token\":\"abc\"}",
            None,
            Some(b"nonce-value"),
        )
        .unwrap();
        assert_eq!(compact.split('.').count(), 5);
        assert_eq!(compact.split('.').nth(1), Some(""));

        let plaintext = decrypt_ecdh_es(&recipient, &compact).unwrap();
        assert_eq!(plaintext, b"{\"vp_token\":\"abc\"}");
    }

    #[test]
    fn wrong_recipient_fails_authentication() {
        let recipient = es256::generate_ec_key().unwrap();
        let recipient_jwk = es256::public_jwk_from_ec_key(&recipient, None).unwrap();
        let compact = encrypt_ecdh_es(&recipient_jwk, b"payload", None, None).unwrap();

        let other = es256::generate_ec_key().unwrap();
        assert!(matches!(
            decrypt_ecdh_es(&other, &compact),
            Err(JoseError::InvalidJwe(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let recipient = es256::generate_ec_key().unwrap();
        let recipient_jwk = es256::public_jwk_from_ec_key(&recipient, None).unwrap();
        let compact = encrypt_ecdh_es(&recipient_jwk, b"payload", None, None).unwrap();

        let mut parts: Vec<String> = compact.split('.').map(str::to_owned).collect();
        // Flip one ciphertext byte.
        let mut ciphertext = base64_url_decode(&parts[3]).unwrap();
        ciphertext[0] ^= 0xFF;
        parts[3] = base64_url_encode(&ciphertext);

        let result = decrypt_ecdh_es(&recipient, &parts.join("."));
        assert!(matches!(result, Err(JoseError::InvalidJwe(_))));
    }

    #[test]
    fn foreign_algorithms_are_rejected() {
        let recipient = es256::generate_ec_key().unwrap();
        let header = base64_url_encode(r#"{"alg":"RSA-OAEP","enc":"A128GCM"}"#);
        let compact = format!("{header}..{}.{}.{}", "aXY", "Y3Q", "dGFn");

        let result = decrypt_ecdh_es(&recipient, &compact);
        assert!(matches!(result, Err(JoseError::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn non_empty_encrypted_key_is_rejected() {
        let recipient = es256::generate_ec_key().unwrap();
        let header = base64_url_encode(r#"{"alg":"ECDH-ES","enc":"A128GCM"}"#);
        let compact = format!("{header}.a2V5.{}.{}.{}", "aXY", "Y3Q", "dGFn");

        let result = decrypt_ecdh_es(&recipient, &compact);
        assert!(matches!(result, Err(JoseError::InvalidJwe(_))));
    }
}
