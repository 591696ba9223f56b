//! Key Binding JWT construction and validation.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq as _;

use crate::jose::{
    sign_jwt, verify_jwt_signature, Es256Verifier, JwkPublic, Signer, SigningAlgorithm,
};

use super::SdJwtError;

/// The required value of the KB-JWT header `typ` element.
pub(crate) const KB_JWT_HEADER_TYP: &str = "kb+jwt";

/// Maximum accepted age of a KB-JWT, and the accepted clock skew into the
/// future, in seconds.
pub(crate) const KB_JWT_MAX_AGE: u64 = 5 * 60;
pub(crate) const KB_JWT_MAX_SKEW: u64 = 60;

/// The challenge a verifier sends to the holder; binds the presentation
/// to the audience and guarantees freshness.
#[derive(Debug, Clone)]
pub struct KeyBindingChallenge {
    /// The intended receiver of the presentation.
    pub aud: String,
    /// Verifier-chosen nonce ensuring signature freshness.
    pub nonce: String,
}

/// KB-JWT header.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct KbJwtHeader {
    pub(crate) typ: String,
    pub(crate) alg: SigningAlgorithm,
}

impl KbJwtHeader {
    fn new(alg: SigningAlgorithm) -> Self {
        Self {
            typ: KB_JWT_HEADER_TYP.to_owned(),
            alg,
        }
    }
}

impl jwt::JoseHeader for KbJwtHeader {
    fn algorithm_type(&self) -> jwt::AlgorithmType {
        self.alg.into()
    }
}

/// KB-JWT claims.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct KbJwtClaims {
    pub(crate) iat: u64,
    pub(crate) aud: String,
    pub(crate) nonce: String,
    /// Base64url digest over the issuer JWT and the selected disclosures.
    pub(crate) sd_hash: String,
}

/// Builds and signs a KB-JWT with the holder's device key.
pub(crate) fn sign_kb_jwt(
    challenge: &KeyBindingChallenge,
    sd_hash: String,
    now: u64,
    signer: &dyn Signer,
) -> Result<String, SdJwtError> {
    let header = KbJwtHeader::new(signer.algorithm());
    let claims = KbJwtClaims {
        iat: now,
        aud: challenge.aud.clone(),
        nonce: challenge.nonce.clone(),
        sd_hash,
    };

    let token = jwt::Token::new(header, claims);
    let signed: jwt::Token<KbJwtHeader, KbJwtClaims, jwt::token::Signed> =
        sign_jwt(token, signer).map_err(|e| SdJwtError::KeyBinding(e.to_string()))?;
    Ok(signed.into())
}

/// Validates a KB-JWT against the holder's public key, the verifier
/// challenge and the expected `sd_hash`.
pub(crate) fn validate_kb_jwt(
    kb_jwt: &str,
    holder_public_key: &JwkPublic,
    challenge: &KeyBindingChallenge,
    now: u64,
    expected_sd_hash: &str,
) -> Result<(), SdJwtError> {
    let token: jwt::Token<KbJwtHeader, KbJwtClaims, jwt::token::Verified> =
        verify_jwt_signature(kb_jwt, &Es256Verifier, holder_public_key)
            .map_err(|e| SdJwtError::KeyBinding(format!("signature: {e}")))?;

    let header = token.header();
    if header.typ != KB_JWT_HEADER_TYP {
        return Err(SdJwtError::KeyBinding(format!(
            "unexpected typ `{}`",
            header.typ
        )));
    }

    let claims = token.claims();
    if claims.aud != challenge.aud {
        return Err(SdJwtError::KeyBinding(format!(
            "aud `{}` does not match `{}`",
            claims.aud, challenge.aud
        )));
    }
    if claims.nonce != challenge.nonce {
        return Err(SdJwtError::KeyBinding("nonce mismatch".to_owned()));
    }
    if claims.iat + KB_JWT_MAX_AGE < now || claims.iat > now + KB_JWT_MAX_SKEW {
        return Err(SdJwtError::KeyBinding(format!(
            "iat {} outside accepted window at {}",
            claims.iat, now
        )));
    }
    if !bool::from(
        claims
            .sd_hash
            .as_bytes()
            .ct_eq(expected_sd_hash.as_bytes()),
    ) {
        return Err(SdJwtError::KeyBinding("sd_hash mismatch".to_owned()));
    }

    Ok(())
}
