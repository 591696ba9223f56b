//! Proof of possession for credential requests.

use serde::Serialize;

use crate::{
    error::WalletError,
    jose::{sign_jwt, JoseError, JwkPublic, Signer, SigningAlgorithm},
};

/// `typ` of the OpenID4VCI proof JWT.
const PROOF_JWT_TYP: &str = "openid4vci-proof+jwt";

#[derive(Debug, Serialize)]
struct ProofHeader {
    alg: SigningAlgorithm,
    typ: String,
    /// The wallet's public key; the issuer binds the credential to it.
    jwk: JwkPublic,
}

impl jwt::JoseHeader for ProofHeader {
    fn algorithm_type(&self) -> jwt::AlgorithmType {
        self.alg.into()
    }
}

#[derive(Debug, Serialize)]
struct ProofClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
    aud: String,
    iat: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
}

/// Builds the `openid4vci-proof+jwt` accompanying a credential request.
///
/// The header carries the wallet's public JWK; `aud` is the credential
/// issuer, `nonce` the issuer-provided `c_nonce` when one was handed out.
///
/// # Errors
///
/// Returns an error when the device key cannot sign.
pub fn build_proof_jwt(
    signer: &dyn Signer,
    client_id: Option<&str>,
    audience: &str,
    nonce: Option<&str>,
    iat: u64,
) -> Result<String, WalletError> {
    let jwk = signer
        .public_jwk()
        .map_err(|e| WalletError::Jose(JoseError::SigningFailed(e.to_string())))?;

    let header = ProofHeader {
        alg: signer.algorithm(),
        typ: PROOF_JWT_TYP.to_owned(),
        jwk,
    };
    let claims = ProofClaims {
        iss: client_id.map(str::to_owned),
        aud: audience.to_owned(),
        iat,
        nonce: nonce.map(str::to_owned),
    };

    let signed: jwt::Token<ProofHeader, ProofClaims, jwt::token::Signed> =
        sign_jwt(jwt::Token::new(header, claims), signer)
            .map_err(|e| WalletError::Jose(JoseError::SigningFailed(e.to_string())))?;
    Ok(signed.into())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use crate::jose::{decode_jwt_part, split_jwt, verify_jwt_signature, Es256Verifier};
    use crate::keystore::{DeviceKeyManager, SoftwareKeyStore};
    use crate::sd_jwt::JsonObject;

    use super::*;

    #[test]
    fn proof_jwt_has_expected_shape_and_verifies() {
        let manager = DeviceKeyManager::new(Arc::new(SoftwareKeyStore::new()));
        let info = manager.obtain("proof-key").unwrap();
        let signer = manager.signer("proof-key").unwrap();

        let proof = build_proof_jwt(
            &signer,
            Some("wallet-client"),
            "https://issuer.example.com",
            Some("c-nonce-1"),
            1_700_000_000,
        )
        .unwrap();

        let (header_part, claims_part, _) = split_jwt(&proof).unwrap();
        let header: JsonObject = decode_jwt_part(header_part).unwrap();
        assert_eq!(header.get("typ"), Some(&Value::from("openid4vci-proof+jwt")));
        assert_eq!(header.get("alg"), Some(&Value::from("ES256")));
        assert_eq!(header.get("jwk"), Some(&Value::Object(info.jwk.clone())));

        let claims: JsonObject = decode_jwt_part(claims_part).unwrap();
        assert_eq!(claims.get("aud"), Some(&Value::from("https://issuer.example.com")));
        assert_eq!(claims.get("nonce"), Some(&Value::from("c-nonce-1")));
        assert_eq!(claims.get("iss"), Some(&Value::from("wallet-client")));

        // signature verifies against the device key; `jwt::Header` does
        // not accept the proof `typ`, so use a minimal header
        #[derive(Debug, serde::Deserialize)]
        struct MinimalHeader {
            alg: jwt::AlgorithmType,
        }
        impl jwt::JoseHeader for MinimalHeader {
            fn algorithm_type(&self) -> jwt::AlgorithmType {
                self.alg
            }
        }
        let _: jwt::Token<MinimalHeader, Value, jwt::token::Verified> =
            verify_jwt_signature(proof.as_str(), &Es256Verifier, &info.jwk).unwrap();
    }

    #[test]
    fn nonce_and_client_id_are_optional() {
        let manager = DeviceKeyManager::new(Arc::new(SoftwareKeyStore::new()));
        manager.obtain("proof-key").unwrap();
        let signer = manager.signer("proof-key").unwrap();

        let proof =
            build_proof_jwt(&signer, None, "https://issuer.example.com", None, 1_700_000_000)
                .unwrap();
        let (_, claims_part, _) = split_jwt(&proof).unwrap();
        let claims: JsonObject = decode_jwt_part(claims_part).unwrap();
        assert!(!claims.contains_key("nonce"));
        assert!(!claims.contains_key("iss"));
    }
}
