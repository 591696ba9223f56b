//! Wallet-provider backend sessions.
//!
//! The backend hands out short-lived bearer tokens after a
//! challenge-response proving possession of the device key: the wallet
//! fetches a nonce, signs it into a `wallet-proof+jwt`, and exchanges the
//! proof for a token. The token lives in memory only.

use std::sync::Arc;

use reqwest::RequestBuilder;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    clock::now_or,
    error::WalletError,
    http::HttpClient,
    jose::{sign_jwt, JwkPublic, Signer, SigningAlgorithm},
    keystore::DeviceKeySigner,
};

/// Tokens this close to expiry are treated as expired.
const EXPIRY_MARGIN: u64 = 30;

/// `typ` of the challenge-response proof JWT.
const WALLET_PROOF_TYP: &str = "wallet-proof+jwt";

#[derive(Debug, Serialize)]
struct WalletProofHeader {
    alg: SigningAlgorithm,
    typ: String,
    jwk: JwkPublic,
}

impl jwt::JoseHeader for WalletProofHeader {
    fn algorithm_type(&self) -> jwt::AlgorithmType {
        self.alg.into()
    }
}

#[derive(Debug, Serialize)]
struct WalletProofClaims {
    aud: String,
    nonce: String,
    iat: u64,
}

#[derive(Debug, Deserialize)]
struct ChallengeResponse {
    nonce: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    token: String,
    expires_in: u64,
}

struct CachedToken {
    token: SecretString,
    expires_at: u64,
}

/// Obtains and caches backend session tokens.
pub struct SessionManager {
    http: Arc<HttpClient>,
    base_url: String,
    signer: DeviceKeySigner,
    cache: tokio::sync::Mutex<Option<CachedToken>>,
}

impl SessionManager {
    /// Creates a manager for the backend at `base_url`, proving key
    /// possession with `signer`.
    #[must_use]
    pub fn new(http: Arc<HttpClient>, base_url: impl Into<String>, signer: DeviceKeySigner) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            signer,
            cache: tokio::sync::Mutex::new(None),
        }
    }

    /// Returns a valid session token, acquiring one when the cache is
    /// empty or near expiry.
    ///
    /// Concurrent callers share a single in-flight acquisition: the cache
    /// lock is held across the exchange.
    ///
    /// # Errors
    ///
    /// Returns an error when the challenge-response exchange fails.
    pub async fn token(&self, now: Option<u64>) -> Result<String, WalletError> {
        let mut cache = self.cache.lock().await;
        let now = now_or(now)?;

        if let Some(cached) = cache.as_ref() {
            if cached.expires_at > now + EXPIRY_MARGIN {
                return Ok(cached.token.expose_secret().to_owned());
            }
        }

        let acquired = self.acquire(now).await?;
        let token = acquired.token.expose_secret().to_owned();
        *cache = Some(acquired);
        Ok(token)
    }

    /// Drops the cached token; the next call to [`SessionManager::token`]
    /// re-acquires.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    /// Sends an authorized request, retrying once with a fresh token when
    /// the backend answers 401/403.
    ///
    /// `build` receives the HTTP client and the bearer token and must
    /// construct the full request.
    ///
    /// # Errors
    ///
    /// Returns an error when token acquisition or the transport fails;
    /// a second 401/403 is returned as-is for the caller to surface.
    pub async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response, WalletError>
    where
        F: Fn(&HttpClient, &str) -> RequestBuilder,
    {
        let token = self.token(None).await?;
        let response = self.http.handle(build(&self.http, &token)).await?;
        if !matches!(response.status().as_u16(), 401 | 403) {
            return Ok(response);
        }

        tracing::info!(status = response.status().as_u16(), "session token rejected, re-acquiring");
        self.invalidate().await;
        let token = self.token(None).await?;
        self.http.handle(build(&self.http, &token)).await
    }

    async fn acquire(&self, now: u64) -> Result<CachedToken, WalletError> {
        let jwk = self
            .signer
            .public_jwk()
            .map_err(|e| WalletError::Keystore(crate::keystore::KeystoreError::Backend(e.to_string())))?;

        let challenge: ChallengeResponse = self
            .http
            .handle_json(
                self.http
                    .post(&format!("{}/v1/challenge", self.base_url))
                    .json(&json!({ "key_id": jwk.get("kid") })),
            )
            .await?;

        let header = WalletProofHeader {
            alg: self.signer.algorithm(),
            typ: WALLET_PROOF_TYP.to_owned(),
            jwk,
        };
        let claims = WalletProofClaims {
            aud: self.base_url.clone(),
            nonce: challenge.nonce,
            iat: now,
        };
        let proof: jwt::Token<WalletProofHeader, WalletProofClaims, jwt::token::Signed> =
            sign_jwt(jwt::Token::new(header, claims), &self.signer)
                .map_err(|e| WalletError::Jose(crate::jose::JoseError::SigningFailed(e.to_string())))?;
        let proof: String = proof.into();

        let session: SessionResponse = self
            .http
            .handle_json(
                self.http
                    .post(&format!("{}/v1/session", self.base_url))
                    .json(&json!({ "proof": proof })),
            )
            .await?;

        tracing::debug!(expires_in = session.expires_in, "session token acquired");
        Ok(CachedToken {
            token: SecretString::from(session.token),
            expires_at: now + session.expires_in,
        })
    }
}
