//! Wallet unit attestation (WUA).
//!
//! The wallet provider issues an attestation JWT binding the device key
//! (`cnf.jwk`), asserting the wallet instance's integrity. It is kept in
//! the vault and, paired with a fresh proof-of-possession JWT, attached
//! to token requests through the OAuth client attestation headers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use eudikit_store::{Vault, WalletAttestation};

use crate::{
    clock::now_or,
    error::WalletError,
    http::json_or_protocol_error,
    jose::{decode_jwt_part, jwk_thumbprint, sign_jwt, JoseError, Signer, SigningAlgorithm},
    keystore::DeviceKeySigner,
    sd_jwt::JsonObject,
    session::SessionManager,
};

/// Header carrying the attestation JWT on token requests.
pub const HEADER_CLIENT_ATTESTATION: &str = "OAuth-Client-Attestation";
/// Header carrying the proof-of-possession JWT on token requests.
pub const HEADER_CLIENT_ATTESTATION_POP: &str = "OAuth-Client-Attestation-PoP";

/// Attestations this close to expiry are refreshed.
const EXPIRY_MARGIN: u64 = 60;

/// The header pair attached to a token request.
#[derive(Debug, Clone)]
pub struct ClientAttestationHeaders {
    /// The wallet unit attestation JWT.
    pub attestation: String,
    /// The accompanying proof-of-possession JWT.
    pub pop: String,
}

#[derive(Debug, Serialize)]
struct PopHeader {
    alg: SigningAlgorithm,
    typ: String,
}

impl jwt::JoseHeader for PopHeader {
    fn algorithm_type(&self) -> jwt::AlgorithmType {
        self.alg.into()
    }
}

#[derive(Debug, Serialize)]
struct PopClaims {
    iss: String,
    aud: String,
    iat: u64,
    jti: String,
}

#[derive(Debug, Deserialize)]
struct AttestationResponse {
    attestation: String,
}

/// Obtains and refreshes the wallet unit attestation.
pub struct AttestationManager {
    base_url: String,
    vault: Arc<Vault>,
}

impl AttestationManager {
    /// Creates a manager against the wallet-provider backend at
    /// `base_url`, persisting into `vault`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, vault: Arc<Vault>) -> Self {
        Self {
            base_url: base_url.into(),
            vault,
        }
    }

    /// Returns a usable attestation, requesting a fresh one from the
    /// provider when none is stored or the stored one nears expiry.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend request fails or the returned
    /// attestation is not bound to the device key.
    pub async fn ensure(
        &self,
        session: &SessionManager,
        signer: &DeviceKeySigner,
        now: Option<u64>,
    ) -> Result<WalletAttestation, WalletError> {
        let now = now_or(now)?;

        if let Some(stored) = self.vault.attestation() {
            if stored.expires_at > now + EXPIRY_MARGIN {
                return Ok(stored);
            }
            tracing::info!("wallet attestation near expiry, refreshing");
        }

        let attestation = self.obtain(session, signer, now).await?;
        self.vault.put_attestation(attestation.clone())?;
        Ok(attestation)
    }

    async fn obtain(
        &self,
        session: &SessionManager,
        signer: &DeviceKeySigner,
        now: u64,
    ) -> Result<WalletAttestation, WalletError> {
        let device_jwk = signer
            .public_jwk()
            .map_err(|e| WalletError::Jose(JoseError::SigningFailed(e.to_string())))?;

        let url = format!("{}/v1/wallet-attestation", self.base_url);
        let body = json!({ "jwk": device_jwk });
        let response = session
            .send_authorized(|http, token| http.post(&url).bearer_auth(token).json(&body))
            .await?;
        let response: AttestationResponse = json_or_protocol_error(response).await?;

        // The attestation must bind our key and carry a usable exp.
        let claims: JsonObject = {
            let mut parts = response.attestation.split('.');
            let claims_part = parts.nth(1).ok_or_else(|| {
                WalletError::CredentialRejected("attestation is not a JWT".to_owned())
            })?;
            decode_jwt_part(claims_part).map_err(WalletError::Jose)?
        };

        let bound_jwk = claims
            .get("cnf")
            .and_then(|cnf| cnf.get("jwk"))
            .and_then(Value::as_object)
            .ok_or_else(|| {
                WalletError::CredentialRejected("attestation carries no cnf.jwk".to_owned())
            })?;
        if jwk_thumbprint(bound_jwk).map_err(WalletError::Jose)?
            != jwk_thumbprint(&device_jwk).map_err(WalletError::Jose)?
        {
            return Err(WalletError::CredentialRejected(
                "attestation is bound to a foreign key".to_owned(),
            ));
        }

        let expires_at = claims
            .get("exp")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                WalletError::CredentialRejected("attestation carries no exp".to_owned())
            })?;
        if expires_at <= now {
            return Err(WalletError::CredentialRejected(
                "attestation is already expired".to_owned(),
            ));
        }

        Ok(WalletAttestation {
            jwt: response.attestation,
            expires_at,
        })
    }
}

/// Builds the client attestation header pair for a token request against
/// `audience`.
///
/// # Errors
///
/// Returns an error when the device key cannot sign the PoP.
pub fn client_attestation_headers(
    attestation: &WalletAttestation,
    signer: &DeviceKeySigner,
    client_id: &str,
    audience: &str,
    now: u64,
) -> Result<ClientAttestationHeaders, WalletError> {
    let header = PopHeader {
        alg: signer.algorithm(),
        typ: "oauth-client-attestation-pop+jwt".to_owned(),
    };
    let claims = PopClaims {
        iss: client_id.to_owned(),
        aud: audience.to_owned(),
        iat: now,
        jti: Uuid::new_v4().to_string(),
    };

    let pop: jwt::Token<PopHeader, PopClaims, jwt::token::Signed> =
        sign_jwt(jwt::Token::new(header, claims), signer)
            .map_err(|e| WalletError::Jose(JoseError::SigningFailed(e.to_string())))?;

    Ok(ClientAttestationHeaders {
        attestation: attestation.jwt.clone(),
        pop: pop.into(),
    })
}
