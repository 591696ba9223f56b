//! OpenID4VCI credential issuance, wallet side.
//!
//! The flow: resolve the offer, fetch issuer and authorization-server
//! metadata, obtain an access token (pre-authorized code, or the
//! authorization-code dance through the browser coordinator), prove key
//! possession, request the credential — decrypting the response when the
//! issuer encrypts it — and validate the result before it is stored.

mod metadata;
mod offer;
mod proof;

pub use metadata::{
    AuthServerMetadata, CredentialConfiguration, CredentialDisplay, IssuerMetadata,
    JwtVcIssuerMetadata, NonceResponse, ResponseEncryptionSupport, TokenResponse,
};
pub use offer::{
    parse_offer_uri, AuthorizationCodeGrant, CredentialOffer, Grants, OfferSource,
    PreAuthorizedCodeGrant, TxCode, PRE_AUTHORIZED_GRANT,
};
pub use proof::build_proof_jwt;

use std::sync::Arc;

use openssl::{ec::EcKey, pkey::Private};
use serde::Deserialize;
use serde_json::json;
use url::Url;
use uuid::Uuid;

use eudikit_store::{StoredCredential, WalletAttestation};

use crate::{
    attestation::{
        client_attestation_headers, ClientAttestationHeaders, HEADER_CLIENT_ATTESTATION,
        HEADER_CLIENT_ATTESTATION_POP,
    },
    clock::now_or,
    coordinator::{AuthFlowCoordinator, UrlOpener},
    error::WalletError,
    http::{protocol_error, HttpClient},
    jose::{self, base64_url_encode, JoseError, JwkSet, Signer as _},
    keystore::DeviceKeySigner,
    sd_jwt::{self, JsonObject},
};

/// SD-JWT VC formats this wallet accepts.
const SUPPORTED_FORMATS: [&str; 2] = ["vc+sd-jwt", "dc+sd-jwt"];

/// Everything the issuance flow needs from the caller.
pub struct AcceptOffer<'a> {
    /// The `openid-credential-offer://` URI.
    pub offer_uri: &'a str,
    /// User-entered transaction code, when the offer demands one.
    pub tx_code: Option<String>,
    /// The device key the credential will be bound to.
    pub signer: &'a DeviceKeySigner,
    /// Coordinator bridging the authorization-code browser flow.
    pub coordinator: &'a AuthFlowCoordinator,
    /// Opens authorization URLs in an external user agent.
    pub opener: &'a dyn UrlOpener,
    /// Wallet unit attestation to authenticate the token request with.
    pub attestation: Option<&'a WalletAttestation>,
    /// Explicit clock for tests.
    pub now: Option<u64>,
}

/// A successfully issued and validated credential.
#[derive(Debug)]
pub struct IssuedCredential {
    /// The record to persist.
    pub credential: StoredCredential,
    /// The reconstructed claims, for display.
    pub claims: JsonObject,
}

/// OpenID4VCI wallet client.
pub struct IssuanceClient {
    http: Arc<HttpClient>,
    client_id: String,
    redirect_uri: String,
}

impl IssuanceClient {
    /// Creates a client identifying as `client_id` with the given wallet
    /// redirect URI.
    #[must_use]
    pub fn new(http: Arc<HttpClient>, client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            http,
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Runs the full issuance flow for a credential offer.
    ///
    /// # Errors
    ///
    /// Returns an error when any protocol step fails or the issued
    /// credential does not validate.
    pub async fn accept_offer(&self, request: AcceptOffer<'_>) -> Result<IssuedCredential, WalletError> {
        let now = now_or(request.now)?;

        let offer = self.resolve_offer(request.offer_uri).await?;
        tracing::info!(issuer = %offer.credential_issuer, "accepted credential offer");
        let issuer_metadata = self.fetch_issuer_metadata(&offer.credential_issuer).await?;

        // First offered configuration the issuer metadata actually knows.
        let (configuration_id, configuration) = offer
            .credential_configuration_ids
            .iter()
            .find_map(|id| {
                issuer_metadata
                    .credential_configurations_supported
                    .get(id)
                    .map(|configuration| (id.clone(), configuration.clone()))
            })
            .ok_or_else(|| {
                WalletError::UnsupportedOffer(
                    "no offered configuration present in issuer metadata".to_owned(),
                )
            })?;
        if !SUPPORTED_FORMATS.contains(&configuration.format.as_str()) {
            return Err(WalletError::UnsupportedOffer(format!(
                "unsupported credential format `{}`",
                configuration.format
            )));
        }

        let auth_server = self
            .fetch_auth_server_metadata(issuer_metadata.authorization_server())
            .await?;
        let token = self
            .obtain_token(&offer, &configuration, &auth_server, &request, now)
            .await?;

        let c_nonce = match token.c_nonce.clone() {
            Some(nonce) => Some(nonce),
            None => self.fetch_nonce(&issuer_metadata).await?,
        };

        let compact = self
            .request_credential(
                &issuer_metadata,
                &configuration_id,
                &token,
                c_nonce,
                request.signer,
                now,
            )
            .await?;

        let issuer_jwks = self.fetch_issuer_jwks(&offer.credential_issuer).await?;
        let device_jwk = request
            .signer
            .public_jwk()
            .map_err(|e| WalletError::Jose(JoseError::SigningFailed(e.to_string())))?;
        let view = sd_jwt::verify_credential(&compact, &issuer_jwks, Some(&device_jwk), now)
            .map_err(|e| WalletError::CredentialRejected(e.to_string()))?;

        let credential = StoredCredential {
            id: Uuid::new_v4().to_string(),
            configuration_id,
            issuer: view
                .issuer
                .clone()
                .unwrap_or_else(|| offer.credential_issuer.clone()),
            format: configuration.format.clone(),
            compact,
            key_alias: request.signer.info().alias.clone(),
            issued_at: now,
            display_name: configuration.display_name().map(str::to_owned),
        };
        Ok(IssuedCredential {
            credential,
            claims: view.claims,
        })
    }

    async fn resolve_offer(&self, offer_uri: &str) -> Result<CredentialOffer, WalletError> {
        match parse_offer_uri(offer_uri)? {
            OfferSource::Value(offer) => Ok(*offer),
            OfferSource::Reference(url) => self.http.handle_json(self.http.get(&url)).await,
        }
    }

    async fn fetch_issuer_metadata(&self, issuer: &str) -> Result<IssuerMetadata, WalletError> {
        let url = format!(
            "{}/.well-known/openid-credential-issuer",
            issuer.trim_end_matches('/')
        );
        self.http.handle_json(self.http.get(&url)).await
    }

    async fn fetch_auth_server_metadata(&self, server: &str) -> Result<AuthServerMetadata, WalletError> {
        let url = format!(
            "{}/.well-known/oauth-authorization-server",
            server.trim_end_matches('/')
        );
        self.http.handle_json(self.http.get(&url)).await
    }

    async fn fetch_issuer_jwks(&self, issuer: &str) -> Result<JwkSet, WalletError> {
        let url = format!(
            "{}/.well-known/jwt-vc-issuer",
            issuer.trim_end_matches('/')
        );
        let metadata: JwtVcIssuerMetadata = self.http.handle_json(self.http.get(&url)).await?;
        if let Some(jwks) = metadata.jwks {
            return Ok(jwks);
        }
        if let Some(jwks_uri) = metadata.jwks_uri {
            return self.http.handle_json(self.http.get(&jwks_uri)).await;
        }
        Err(WalletError::MetadataMissing("jwt-vc-issuer jwks".to_owned()))
    }

    async fn fetch_nonce(&self, metadata: &IssuerMetadata) -> Result<Option<String>, WalletError> {
        let Some(endpoint) = &metadata.nonce_endpoint else {
            return Ok(None);
        };
        let response: NonceResponse = self.http.handle_json(self.http.post(endpoint)).await?;
        Ok(Some(response.c_nonce))
    }

    async fn obtain_token(
        &self,
        offer: &CredentialOffer,
        configuration: &CredentialConfiguration,
        auth_server: &AuthServerMetadata,
        request: &AcceptOffer<'_>,
        now: u64,
    ) -> Result<TokenResponse, WalletError> {
        let grants = offer.grants.clone().unwrap_or_default();

        // The PoP audience is the authorization server handing out the
        // token.
        let attestation_headers = request
            .attestation
            .map(|attestation| {
                client_attestation_headers(
                    attestation,
                    request.signer,
                    &self.client_id,
                    &auth_server.issuer,
                    now,
                )
            })
            .transpose()?;

        if let Some(pre_authorized) = grants.pre_authorized {
            if pre_authorized.tx_code.is_some() && request.tx_code.is_none() {
                return Err(WalletError::TxCodeRequired);
            }

            let mut form = vec![
                ("grant_type", PRE_AUTHORIZED_GRANT.to_owned()),
                ("pre-authorized_code", pre_authorized.code),
                ("client_id", self.client_id.clone()),
            ];
            if let Some(tx_code) = request.tx_code.clone() {
                form.push(("tx_code", tx_code));
            }
            return self
                .token_request(&auth_server.token_endpoint, &form, attestation_headers.as_ref())
                .await;
        }

        if let Some(code_grant) = grants.authorization_code {
            return self
                .authorization_code_flow(
                    configuration,
                    auth_server,
                    &code_grant,
                    request,
                    attestation_headers.as_ref(),
                )
                .await;
        }

        Err(WalletError::UnsupportedOffer(
            "offer carries no usable grant".to_owned(),
        ))
    }

    async fn authorization_code_flow(
        &self,
        configuration: &CredentialConfiguration,
        auth_server: &AuthServerMetadata,
        grant: &AuthorizationCodeGrant,
        request: &AcceptOffer<'_>,
        attestation_headers: Option<&ClientAttestationHeaders>,
    ) -> Result<TokenResponse, WalletError> {
        let authorization_endpoint = auth_server
            .authorization_endpoint
            .as_ref()
            .ok_or_else(|| WalletError::MetadataMissing("authorization_endpoint".to_owned()))?;

        let state = Uuid::new_v4().to_string();
        let code_verifier = pkce_verifier();
        let code_challenge = pkce_challenge(&code_verifier);

        let mut url = Url::parse(authorization_endpoint).map_err(|e| WalletError::InvalidInput {
            attribute: "authorization_endpoint".to_owned(),
            reason: e.to_string(),
        })?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("state", &state)
                .append_pair("code_challenge", &code_challenge)
                .append_pair("code_challenge_method", "S256");
            if let Some(scope) = &configuration.scope {
                query.append_pair("scope", scope);
            }
            if let Some(issuer_state) = &grant.issuer_state {
                query.append_pair("issuer_state", issuer_state);
            }
        }

        // Register before opening: the callback may arrive immediately.
        let pending = request.coordinator.begin(state);
        request.opener.open(&url)?;
        let callback = pending.wait().await?;

        if let Some(error) = callback.param("error") {
            return Err(WalletError::Protocol {
                code: error.to_owned(),
                description: callback.param("error_description").unwrap_or_default().to_owned(),
            });
        }
        let code = callback
            .param("code")
            .ok_or_else(|| WalletError::InvalidInput {
                attribute: "redirect".to_owned(),
                reason: "missing `code` parameter".to_owned(),
            })?
            .to_owned();

        let form = vec![
            ("grant_type", "authorization_code".to_owned()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.clone()),
            ("client_id", self.client_id.clone()),
            ("code_verifier", code_verifier),
        ];
        self.token_request(&auth_server.token_endpoint, &form, attestation_headers)
            .await
    }

    async fn token_request(
        &self,
        endpoint: &str,
        form: &[(&str, String)],
        attestation: Option<&ClientAttestationHeaders>,
    ) -> Result<TokenResponse, WalletError> {
        let mut builder = self.http.post(endpoint).form(form);
        if let Some(headers) = attestation {
            builder = builder
                .header(HEADER_CLIENT_ATTESTATION, &headers.attestation)
                .header(HEADER_CLIENT_ATTESTATION_POP, &headers.pop);
        }

        let token: TokenResponse = self.http.handle_json(builder).await?;
        if !token.token_type.eq_ignore_ascii_case("bearer") {
            tracing::warn!(token_type = %token.token_type, "unexpected token type");
        }
        Ok(token)
    }

    async fn request_credential(
        &self,
        metadata: &IssuerMetadata,
        configuration_id: &str,
        token: &TokenResponse,
        c_nonce: Option<String>,
        signer: &DeviceKeySigner,
        now: u64,
    ) -> Result<String, WalletError> {
        // Offer the issuer a fresh response-encryption key when it
        // supports our suite.
        let response_key = if metadata.supports_response_encryption() {
            Some(jose::generate_ec_key().map_err(WalletError::Jose)?)
        } else {
            None
        };
        let encryption_jwk = response_key
            .as_ref()
            .map(|key| jose::public_jwk_from_ec_key(key, None))
            .transpose()
            .map_err(WalletError::Jose)?;

        let mut c_nonce = c_nonce;
        let mut retried = false;
        loop {
            let proof = build_proof_jwt(
                signer,
                Some(&self.client_id),
                &metadata.credential_issuer,
                c_nonce.as_deref(),
                now,
            )?;

            let mut body = json!({
                "credential_configuration_id": configuration_id,
                "proof": {"proof_type": "jwt", "jwt": proof},
            });
            if let Some(jwk) = &encryption_jwk {
                body["credential_response_encryption"] =
                    json!({"jwk": jwk, "alg": "ECDH-ES", "enc": "A128GCM"});
            }

            let response = self
                .http
                .handle(
                    self.http
                        .post(&metadata.credential_endpoint)
                        .bearer_auth(&token.access_token)
                        .json(&body),
                )
                .await?;
            let status = response.status().as_u16();
            let url = response.url().to_string();
            let text = response.text().await.map_err(|e| WalletError::Network {
                url: url.clone(),
                status: Some(status),
                error: format!("reading credential response failed: {e}"),
            })?;

            if (200..300).contains(&status) {
                return extract_credential(&text, response_key.as_ref());
            }

            // `invalid_proof` with a fresh nonce is retried exactly once.
            let error_body: CredentialErrorBody =
                serde_json::from_str(&text).unwrap_or_default();
            if !retried && error_body.error.as_deref() == Some("invalid_proof") {
                if let Some(fresh_nonce) = error_body.c_nonce {
                    tracing::debug!("retrying credential request with fresh c_nonce");
                    c_nonce = Some(fresh_nonce);
                    retried = true;
                    continue;
                }
            }
            return Err(protocol_error(&url, status, &text));
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CredentialErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    c_nonce: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CredentialResponseBody {
    #[serde(default)]
    credential: Option<String>,
    #[serde(default)]
    credentials: Option<Vec<CredentialEntry>>,
}

#[derive(Debug, Deserialize)]
struct CredentialEntry {
    credential: String,
}

/// Pulls the credential out of a (possibly JWE-encrypted) response body.
fn extract_credential(
    text: &str,
    response_key: Option<&EcKey<Private>>,
) -> Result<String, WalletError> {
    let json_text;
    let body: CredentialResponseBody = if text.trim_start().starts_with('{') {
        serde_json::from_str(text)?
    } else {
        let key = response_key.ok_or_else(|| {
            WalletError::CredentialRejected(
                "issuer sent a non-JSON response without agreed encryption".to_owned(),
            )
        })?;
        let plaintext = jose::decrypt_ecdh_es(key, text.trim()).map_err(WalletError::Jose)?;
        json_text = String::from_utf8(plaintext).map_err(|_| {
            WalletError::CredentialRejected("decrypted response is not UTF-8".to_owned())
        })?;
        serde_json::from_str(&json_text)?
    };

    body.credential
        .or_else(|| {
            body.credentials
                .and_then(|mut entries| (!entries.is_empty()).then(|| entries.remove(0).credential))
        })
        .ok_or_else(|| {
            WalletError::CredentialRejected("response carries no credential".to_owned())
        })
}

fn pkce_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    base64_url_encode(bytes)
}

fn pkce_challenge(verifier: &str) -> String {
    use sha2::Digest as _;
    base64_url_encode(sha2::Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::sd_jwt::holder::tests::{holder, TestIssuer, NOW};

    use super::*;

    struct NoopOpener;
    impl UrlOpener for NoopOpener {
        fn open(&self, _url: &Url) -> Result<(), WalletError> {
            Ok(())
        }
    }

    /// Completes the coordinator synchronously with a `code`, the way a
    /// custom tab redirect would.
    struct AutoApproveOpener<'a> {
        coordinator: &'a AuthFlowCoordinator,
    }
    impl UrlOpener for AutoApproveOpener<'_> {
        fn open(&self, url: &Url) -> Result<(), WalletError> {
            let params: std::collections::HashMap<String, String> = url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            assert_eq!(params.get("response_type").map(String::as_str), Some("code"));
            assert_eq!(params.get("code_challenge_method").map(String::as_str), Some("S256"));

            let redirect = Url::parse(&format!(
                "eudikit://callback?state={}&code=test-auth-code",
                params.get("state").expect("state param")
            ))
            .expect("redirect url");
            self.coordinator
                .complete(crate::coordinator::AuthCallback::from_redirect_url(&redirect))
        }
    }

    fn offer_uri(server_url: &str, grants: Value) -> String {
        let offer = json!({
            "credential_issuer": server_url,
            "credential_configuration_ids": ["eu.europa.ec.eudi.pid_vc_sd_jwt"],
            "grants": grants,
        });
        Url::parse_with_params(
            "openid-credential-offer://",
            &[("credential_offer", offer.to_string())],
        )
        .unwrap()
        .to_string()
    }

    async fn mock_issuer_metadata(
        server: &mut mockito::Server,
        with_encryption: bool,
    ) -> mockito::Mock {
        let mut metadata = json!({
            "credential_issuer": server.url(),
            "credential_endpoint": format!("{}/credential", server.url()),
            "authorization_servers": [server.url()],
            "credential_configurations_supported": {
                "eu.europa.ec.eudi.pid_vc_sd_jwt": {
                    "format": "vc+sd-jwt",
                    "vct": "urn:eudi:pid:1",
                    "scope": "eu.europa.ec.eudi.pid_vc_sd_jwt",
                    "display": [{"name": "PID"}]
                }
            }
        });
        if with_encryption {
            metadata["credential_response_encryption"] = json!({
                "alg_values_supported": ["ECDH-ES"],
                "enc_values_supported": ["A128GCM"],
                "encryption_required": false
            });
        }
        server
            .mock("GET", "/.well-known/openid-credential-issuer")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(metadata.to_string())
            .create_async()
            .await
    }

    async fn mock_auth_server(server: &mut mockito::Server, with_authorize: bool) -> mockito::Mock {
        let mut body = json!({
            "issuer": server.url(),
            "token_endpoint": format!("{}/token", server.url()),
        });
        if with_authorize {
            body["authorization_endpoint"] = json!(format!("{}/authorize", server.url()));
        }
        server
            .mock("GET", "/.well-known/oauth-authorization-server")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await
    }

    async fn mock_jwt_vc_issuer(server: &mut mockito::Server, issuer: &TestIssuer) -> mockito::Mock {
        server
            .mock("GET", "/.well-known/jwt-vc-issuer")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"issuer": server.url(), "jwks": issuer.jwks}).to_string(),
            )
            .create_async()
            .await
    }

    fn client() -> IssuanceClient {
        IssuanceClient::new(
            Arc::new(HttpClient::new()),
            "eudikit-wallet",
            "eudikit://callback",
        )
    }

    #[tokio::test]
    async fn pre_authorized_flow_issues_and_validates() {
        let mut server = mockito::Server::new_async().await;
        let issuer = TestIssuer::new();
        let (signer, holder_info) = holder();
        let compact = issuer.issue(&holder_info.jwk);

        mock_issuer_metadata(&mut server, false).await;
        mock_auth_server(&mut server, false).await;
        mock_jwt_vc_issuer(&mut server, &issuer).await;
        let token = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), PRE_AUTHORIZED_GRANT.into()),
                mockito::Matcher::UrlEncoded("pre-authorized_code".into(), "pre-auth-1".into()),
                mockito::Matcher::UrlEncoded("tx_code".into(), "1234".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"access_token": "at-1", "token_type": "Bearer", "c_nonce": "cn-1"})
                    .to_string(),
            )
            .create_async()
            .await;
        let credential_endpoint = server
            .mock("POST", "/credential")
            .match_header("authorization", "Bearer at-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"credential": compact}).to_string())
            .create_async()
            .await;

        let coordinator = AuthFlowCoordinator::new();
        let uri = offer_uri(
            &server.url(),
            json!({
                "urn:ietf:params:oauth:grant-type:pre-authorized_code": {
                    "pre-authorized_code": "pre-auth-1",
                    "tx_code": {"length": 4}
                }
            }),
        );

        let issued = client()
            .accept_offer(AcceptOffer {
                offer_uri: &uri,
                tx_code: Some("1234".to_owned()),
                signer: &signer,
                coordinator: &coordinator,
                opener: &NoopOpener,
                attestation: None,
                now: Some(NOW),
            })
            .await
            .unwrap();

        assert_eq!(issued.credential.configuration_id, "eu.europa.ec.eudi.pid_vc_sd_jwt");
        assert_eq!(issued.credential.format, "vc+sd-jwt");
        assert_eq!(issued.credential.display_name.as_deref(), Some("PID"));
        assert_eq!(issued.claims.get("given_name"), Some(&json!("Erika")));
        token.assert_async().await;
        credential_endpoint.assert_async().await;
    }

    #[tokio::test]
    async fn missing_tx_code_aborts_before_any_token_request() {
        let mut server = mockito::Server::new_async().await;
        mock_issuer_metadata(&mut server, false).await;
        mock_auth_server(&mut server, false).await;
        let token = server
            .mock("POST", "/token")
            .expect(0)
            .create_async()
            .await;

        let (signer, _) = holder();
        let coordinator = AuthFlowCoordinator::new();
        let uri = offer_uri(
            &server.url(),
            json!({
                "urn:ietf:params:oauth:grant-type:pre-authorized_code": {
                    "pre-authorized_code": "pre-auth-1",
                    "tx_code": {"length": 4}
                }
            }),
        );

        let result = client()
            .accept_offer(AcceptOffer {
                offer_uri: &uri,
                tx_code: None,
                signer: &signer,
                coordinator: &coordinator,
                opener: &NoopOpener,
                attestation: None,
                now: Some(NOW),
            })
            .await;

        assert!(matches!(result, Err(WalletError::TxCodeRequired)));
        token.assert_async().await;
    }

    #[tokio::test]
    async fn authorization_code_flow_drives_the_browser_bridge() {
        let mut server = mockito::Server::new_async().await;
        let issuer = TestIssuer::new();
        let (signer, holder_info) = holder();
        let compact = issuer.issue(&holder_info.jwk);

        mock_issuer_metadata(&mut server, false).await;
        mock_auth_server(&mut server, true).await;
        mock_jwt_vc_issuer(&mut server, &issuer).await;
        let token = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                mockito::Matcher::UrlEncoded("code".into(), "test-auth-code".into()),
                mockito::Matcher::UrlEncoded("redirect_uri".into(), "eudikit://callback".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"access_token": "at-2", "token_type": "Bearer", "c_nonce": "cn-2"})
                    .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("POST", "/credential")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"credential": compact}).to_string())
            .create_async()
            .await;

        let coordinator = AuthFlowCoordinator::new();
        let uri = offer_uri(
            &server.url(),
            json!({"authorization_code": {"issuer_state": "issuer-state-1"}}),
        );

        let issued = client()
            .accept_offer(AcceptOffer {
                offer_uri: &uri,
                tx_code: None,
                signer: &signer,
                coordinator: &coordinator,
                opener: &AutoApproveOpener {
                    coordinator: &coordinator,
                },
                attestation: None,
                now: Some(NOW),
            })
            .await
            .unwrap();

        assert_eq!(issued.claims.get("family_name"), Some(&json!("Mustermann")));
        token.assert_async().await;
    }

    #[tokio::test]
    async fn invalid_proof_is_retried_once_with_the_fresh_nonce() {
        let mut server = mockito::Server::new_async().await;
        let (signer, _) = holder();

        mock_issuer_metadata(&mut server, false).await;
        mock_auth_server(&mut server, false).await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": "at-1", "token_type": "Bearer"}).to_string())
            .create_async()
            .await;
        // Always answers invalid_proof: the flow must try exactly twice.
        let credential_endpoint = server
            .mock("POST", "/credential")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(json!({"error": "invalid_proof", "c_nonce": "fresh"}).to_string())
            .expect(2)
            .create_async()
            .await;

        let coordinator = AuthFlowCoordinator::new();
        let uri = offer_uri(
            &server.url(),
            json!({
                "urn:ietf:params:oauth:grant-type:pre-authorized_code": {
                    "pre-authorized_code": "pre-auth-1"
                }
            }),
        );

        let result = client()
            .accept_offer(AcceptOffer {
                offer_uri: &uri,
                tx_code: None,
                signer: &signer,
                coordinator: &coordinator,
                opener: &NoopOpener,
                attestation: None,
                now: Some(NOW),
            })
            .await;

        assert!(matches!(
            result,
            Err(WalletError::Protocol { code, .. }) if code == "invalid_proof"
        ));
        credential_endpoint.assert_async().await;
    }

    #[tokio::test]
    async fn encrypted_credential_responses_are_decrypted() {
        let mut server = mockito::Server::new_async().await;
        let issuer = TestIssuer::new();
        let (signer, holder_info) = holder();
        let compact = issuer.issue(&holder_info.jwk);

        mock_issuer_metadata(&mut server, true).await;
        mock_auth_server(&mut server, false).await;
        mock_jwt_vc_issuer(&mut server, &issuer).await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"access_token": "at-1", "token_type": "Bearer", "c_nonce": "cn-1"})
                    .to_string(),
            )
            .create_async()
            .await;
        // Encrypt the response to whatever JWK the wallet sent.
        server
            .mock("POST", "/credential")
            .with_status(200)
            .with_header("content-type", "application/jwt")
            .with_body_from_request(move |request| {
                let body: Value = serde_json::from_slice(request.body().unwrap()).unwrap();
                let Value::Object(jwk) = body["credential_response_encryption"]["jwk"].clone()
                else {
                    panic!("request carries no response-encryption JWK")
                };
                jose::encrypt_ecdh_es(
                    &jwk,
                    json!({"credential": compact}).to_string().as_bytes(),
                    None,
                    None,
                )
                .unwrap()
                .into_bytes()
            })
            .create_async()
            .await;

        let coordinator = AuthFlowCoordinator::new();
        let uri = offer_uri(
            &server.url(),
            json!({
                "urn:ietf:params:oauth:grant-type:pre-authorized_code": {
                    "pre-authorized_code": "pre-auth-1"
                }
            }),
        );

        let issued = client()
            .accept_offer(AcceptOffer {
                offer_uri: &uri,
                tx_code: None,
                signer: &signer,
                coordinator: &coordinator,
                opener: &NoopOpener,
                attestation: None,
                now: Some(NOW),
            })
            .await
            .unwrap();

        assert_eq!(issued.claims.get("given_name"), Some(&json!("Erika")));
    }
}
