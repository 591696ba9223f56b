//! ES256 (ECDSA P-256 + SHA-256) over OpenSSL.

use openssl::{
    bn::{BigNum, BigNumContext},
    ec::{EcGroup, EcGroupRef, EcKey, EcPointRef},
    ecdsa::EcdsaSig,
    nid::Nid,
    pkey::{Private, Public},
    sha::sha256,
};
use serde_json::Value;

use super::{base64_url_decode, base64_url_encode, BoxError, JoseError, JwkPublic,
    SignatureVerifier, SigningAlgorithm};

// X9_62_PRIME256V1 is an alias for secp256r1 / NIST P-256
// (RFC 4492 appendix A).
pub(crate) const ELLIPTIC_CURVE_NID: Nid = Nid::X9_62_PRIME256V1;

const CRV: &str = "P-256";
const KTY: &str = "EC";

/// Generates a fresh P-256 private key.
///
/// # Errors
///
/// Returns an error when the crypto backend fails.
pub fn generate_ec_key() -> Result<EcKey<Private>, JoseError> {
    let group = EcGroup::from_curve_name(ELLIPTIC_CURVE_NID)?;
    Ok(EcKey::<Private>::generate(group.as_ref())?)
}

/// Serializes a private key to PEM.
///
/// # Errors
///
/// Returns an error when the crypto backend fails.
pub fn ec_private_key_to_pem(key: &EcKey<Private>) -> Result<Vec<u8>, JoseError> {
    Ok(key.private_key_to_pem()?)
}

/// Parses a private key from PEM.
///
/// # Errors
///
/// Returns an error when the PEM is not a valid EC private key.
pub fn ec_private_key_from_pem(pem: &[u8]) -> Result<EcKey<Private>, JoseError> {
    Ok(EcKey::<Private>::private_key_from_pem(pem)?)
}

/// Returns the 32-byte affine coordinates of an EC public key point.
fn to_affine_coords(
    point: &EcPointRef,
    group: &EcGroupRef,
) -> Result<([u8; 32], [u8; 32]), JoseError> {
    let mut x = BigNum::new()?;
    let mut y = BigNum::new()?;
    let mut ctx = BigNumContext::new()?;
    point.affine_coordinates(group, &mut x, &mut y, &mut ctx)?;

    let x = x
        .to_vec_padded(32)?
        .try_into()
        .map_err(|_| JoseError::CryptoBackend("coordinate exceeds 32 bytes".to_owned()))?;
    let y = y
        .to_vec_padded(32)?
        .try_into()
        .map_err(|_| JoseError::CryptoBackend("coordinate exceeds 32 bytes".to_owned()))?;
    Ok((x, y))
}

/// Constructs the public JWK for a P-256 key, with an optional `kid`.
///
/// # Errors
///
/// Returns an error when the crypto backend fails.
pub fn public_jwk_from_ec_key<T: openssl::pkey::HasPublic>(
    key: &EcKey<T>,
    kid: Option<&str>,
) -> Result<JwkPublic, JoseError> {
    let (x, y) = to_affine_coords(key.public_key(), key.group())?;

    let mut jwk = JwkPublic::new();
    jwk.insert("kty".to_owned(), Value::String(KTY.to_owned()));
    jwk.insert("crv".to_owned(), Value::String(CRV.to_owned()));
    jwk.insert("x".to_owned(), Value::String(base64_url_encode(x)));
    jwk.insert("y".to_owned(), Value::String(base64_url_encode(y)));
    if let Some(kid) = kid {
        jwk.insert("kid".to_owned(), Value::String(kid.to_owned()));
    }
    Ok(jwk)
}

/// Reconstructs a P-256 public key from a JWK.
///
/// # Errors
///
/// Returns an error when the JWK is not a valid P-256 key.
pub fn public_key_from_jwk(jwk: &JwkPublic) -> Result<EcKey<Public>, JoseError> {
    check_jwk_field(jwk, "kty", KTY)?;
    check_jwk_field(jwk, "crv", CRV)?;

    let x = BigNum::from_slice(&parse_coord(jwk, "x")?)?;
    let y = BigNum::from_slice(&parse_coord(jwk, "y")?)?;

    let group = EcGroup::from_curve_name(ELLIPTIC_CURVE_NID)?;
    EcKey::<Public>::from_public_key_affine_coordinates(group.as_ref(), x.as_ref(), y.as_ref())
        .map_err(|_| JoseError::InvalidJwk("coordinates are not a point on P-256".to_owned()))
}

/// Produces a raw 64-byte `r || s` ES256 signature over `message`.
///
/// # Errors
///
/// Returns an error when the crypto backend fails.
pub fn sign_es256_raw(key: &EcKey<Private>, message: &[u8]) -> Result<Vec<u8>, JoseError> {
    let digest = sha256(message);
    let signature = EcdsaSig::sign(&digest, key)?;

    let r = signature.r().to_vec_padded(32)?;
    let s = signature.s().to_vec_padded(32)?;
    let mut jws = r;
    jws.extend_from_slice(&s);
    Ok(jws)
}

/// [`SignatureVerifier`] implementation for `ES256`.
#[derive(Debug, Default)]
pub struct Es256Verifier;

impl SignatureVerifier for Es256Verifier {
    fn algorithm(&self) -> SigningAlgorithm {
        SigningAlgorithm::Es256
    }

    fn verify(
        &self,
        message: &[u8],
        signature: &[u8],
        public_key: &JwkPublic,
    ) -> Result<bool, BoxError> {
        let public_key = public_key_from_jwk(public_key)?;
        let jws_bytes = <&[u8; 64]>::try_from(signature)
            .map_err(|_| JoseError::InvalidJwt("ES256 signature must be 64 bytes".to_owned()))?;
        let (r, s) = jws_bytes.split_at(32);
        let r = BigNum::from_slice(r).map_err(JoseError::from)?;
        let s = BigNum::from_slice(s).map_err(JoseError::from)?;
        let ecdsa_sig = EcdsaSig::from_private_components(r, s).map_err(JoseError::from)?;

        let digest = sha256(message);
        Ok(ecdsa_sig
            .verify(&digest, public_key.as_ref())
            .map_err(JoseError::from)?)
    }
}

fn check_jwk_field(jwk: &JwkPublic, field: &str, expected: &str) -> Result<(), JoseError> {
    let value = jwk
        .get(field)
        .ok_or_else(|| JoseError::InvalidJwk(format!("missing `{field}` field")))?;
    if value == expected {
        return Ok(());
    }
    Err(JoseError::InvalidJwk(format!(
        "field `{field}` is {value}, expected `{expected}`"
    )))
}

fn parse_coord(jwk: &JwkPublic, coord: &str) -> Result<[u8; 32], JoseError> {
    let encoded = jwk
        .get(coord)
        .and_then(Value::as_str)
        .ok_or_else(|| JoseError::InvalidJwk(format!("missing `{coord}` coordinate")))?;
    base64_url_decode(encoded)
        .map_err(|_| JoseError::InvalidJwk(format!("coordinate `{coord}` is not base64url")))?
        .try_into()
        .map_err(|_| JoseError::InvalidJwk(format!("coordinate `{coord}` must be 32 bytes")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let key = generate_ec_key().unwrap();
        let jwk = public_jwk_from_ec_key(&key, Some("test key")).unwrap();

        let message = b"test message to be signed";
        let signature = sign_es256_raw(&key, message).unwrap();
        assert_eq!(signature.len(), 64);

        assert!(Es256Verifier.verify(message, &signature, &jwk).unwrap());
    }

    #[test]
    fn verify_rejects_modified_message() {
        let key = generate_ec_key().unwrap();
        let jwk = public_jwk_from_ec_key(&key, None).unwrap();
        let signature = sign_es256_raw(&key, b"original").unwrap();

        assert!(!Es256Verifier.verify(b"tampered", &signature, &jwk).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let signer_key = generate_ec_key().unwrap();
        let other_jwk = public_jwk_from_ec_key(&generate_ec_key().unwrap(), None).unwrap();
        let signature = sign_es256_raw(&signer_key, b"message").unwrap();

        assert!(!Es256Verifier.verify(b"message", &signature, &other_jwk).unwrap());
    }

    #[test]
    fn public_key_roundtrips_through_jwk() {
        let key = generate_ec_key().unwrap();
        let jwk = public_jwk_from_ec_key(&key, None).unwrap();
        let restored = public_key_from_jwk(&jwk).unwrap();
        let jwk_again = public_jwk_from_ec_key(&restored, None).unwrap();
        assert_eq!(jwk, jwk_again);
    }

    #[test]
    fn invalid_jwk_fields_are_rejected() {
        let Value::Object(jwk) = json!({"kty": "oct", "crv": "P-256", "x": "", "y": ""}) else {
            unreachable!()
        };
        assert!(matches!(
            public_key_from_jwk(&jwk),
            Err(JoseError::InvalidJwk(_))
        ));
    }

    #[test]
    fn pem_roundtrip_preserves_key() {
        let key = generate_ec_key().unwrap();
        let pem = ec_private_key_to_pem(&key).unwrap();
        let restored = ec_private_key_from_pem(&pem).unwrap();

        let sig = sign_es256_raw(&restored, b"message").unwrap();
        let jwk = public_jwk_from_ec_key(&key, None).unwrap();
        assert!(Es256Verifier.verify(b"message", &sig, &jwk).unwrap());
    }
}
