//! Authorization request resolution.

use std::str::FromStr;

use serde_json::Value;
use url::Url;

use crate::{
    error::WalletError,
    http::HttpClient,
    jose::{decode_jwt_part, JwkPublic, JwkSet},
    sd_jwt::JsonObject,
};

use super::definition::PresentationDefinition;

/// How the wallet is asked to return the presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Form-POST the response parameters to `response_uri`.
    DirectPost,
    /// Form-POST a JWE of the response parameters to `response_uri`.
    DirectPostJwt,
}

impl FromStr for ResponseMode {
    type Err = WalletError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "direct_post" => Ok(Self::DirectPost),
            "direct_post.jwt" => Ok(Self::DirectPostJwt),
            other => Err(WalletError::InvalidInput {
                attribute: "response_mode".to_owned(),
                reason: format!("unsupported value `{other}`"),
            }),
        }
    }
}

/// Verifier (relying party) metadata delivered with the request.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ClientMetadata {
    /// Verifier keys; the encryption key for `direct_post.jwt` lives
    /// here.
    #[serde(default)]
    pub jwks: Option<JwkSet>,
    /// Requested response-encryption `alg`.
    #[serde(default)]
    pub authorization_encrypted_response_alg: Option<String>,
    /// Requested response-encryption `enc`.
    #[serde(default)]
    pub authorization_encrypted_response_enc: Option<String>,
    /// Display name of the verifier.
    #[serde(default)]
    pub client_name: Option<String>,
}

impl ClientMetadata {
    /// The key presentation responses are encrypted to, when the
    /// verifier supplied one.
    #[must_use]
    pub fn encryption_jwk(&self) -> Option<&JwkPublic> {
        self.jwks.as_ref().and_then(JwkSet::encryption_key)
    }
}

/// A fully resolved authorization request.
#[derive(Debug)]
pub struct ResolvedRequest {
    /// Verifier identifier; becomes the KB-JWT audience.
    pub client_id: String,
    /// Verifier nonce; bound into every key-binding signature.
    pub nonce: String,
    /// Opaque verifier state, echoed in the response.
    pub state: Option<String>,
    /// Response delivery mode.
    pub response_mode: ResponseMode,
    /// Where the response is POSTed.
    pub response_uri: String,
    /// What the verifier asks for.
    pub presentation_definition: PresentationDefinition,
    /// Verifier metadata.
    pub client_metadata: Option<ClientMetadata>,
}

/// Resolves an `openid4vp://` authorization request URI: inline
/// parameters, or a request object fetched from `request_uri`.
///
/// # Errors
///
/// Returns an error when the URI is malformed, the request object cannot
/// be fetched, or mandatory parameters are missing.
pub async fn resolve(http: &HttpClient, uri: &str) -> Result<ResolvedRequest, WalletError> {
    let url = Url::parse(uri).map_err(|e| WalletError::InvalidInput {
        attribute: "authorization_request".to_owned(),
        reason: e.to_string(),
    })?;

    let mut params = JsonObject::new();
    for (key, value) in url.query_pairs() {
        params.insert(key.into_owned(), Value::String(value.into_owned()));
    }

    if let Some(request_uri) = params.get("request_uri").and_then(Value::as_str) {
        let request_uri = request_uri.to_owned();
        let response = http.handle(http.get(&request_uri)).await?;
        let jwt_text = response.text().await.map_err(|e| WalletError::Network {
            url: request_uri,
            status: None,
            error: format!("reading request object failed: {e}"),
        })?;
        // TODO: verify the request-object signature against the verifier
        // trust list once the registrar integration lands.
        let mut parts = jwt_text.trim().split('.');
        let claims_part = parts.nth(1).ok_or_else(|| WalletError::InvalidInput {
            attribute: "request_uri".to_owned(),
            reason: "response is not a JWT".to_owned(),
        })?;
        let payload: JsonObject = decode_jwt_part(claims_part).map_err(WalletError::Jose)?;
        // Request-object members take precedence over URI parameters.
        for (key, value) in payload {
            params.insert(key, value);
        }
    }

    extract(http, params).await
}

async fn extract(http: &HttpClient, params: JsonObject) -> Result<ResolvedRequest, WalletError> {
    let string_param = |name: &str| -> Option<String> {
        params.get(name).and_then(Value::as_str).map(str::to_owned)
    };
    let require = |name: &str, value: Option<String>| -> Result<String, WalletError> {
        value.ok_or_else(|| WalletError::InvalidInput {
            attribute: name.to_owned(),
            reason: "missing from authorization request".to_owned(),
        })
    };

    if let Some(exp) = params.get("exp").and_then(Value::as_u64) {
        if exp <= crate::clock::now_or(None)? {
            return Err(WalletError::InvalidInput {
                attribute: "request".to_owned(),
                reason: "authorization request object is expired".to_owned(),
            });
        }
    }

    let client_id = require("client_id", string_param("client_id"))?;
    let nonce = require("nonce", string_param("nonce"))?;
    let state = string_param("state");

    let response_mode = string_param("response_mode")
        .map_or(Ok(ResponseMode::DirectPost), |mode| mode.parse())?;
    let response_uri = require(
        "response_uri",
        string_param("response_uri").or_else(|| string_param("redirect_uri")),
    )?;

    let presentation_definition = match params.get("presentation_definition") {
        Some(Value::Object(inline)) => {
            serde_json::from_value(Value::Object(inline.clone()))?
        }
        Some(Value::String(inline)) => serde_json::from_str(inline)?,
        _ => match params.get("presentation_definition_uri").and_then(Value::as_str) {
            Some(by_reference) => http.handle_json(http.get(by_reference)).await?,
            None => {
                return Err(WalletError::InvalidInput {
                    attribute: "presentation_definition".to_owned(),
                    reason: "missing from authorization request".to_owned(),
                })
            }
        },
    };

    let client_metadata = match params.get("client_metadata") {
        Some(Value::Object(inline)) => {
            Some(serde_json::from_value(Value::Object(inline.clone()))?)
        }
        Some(Value::String(inline)) => Some(serde_json::from_str(inline)?),
        _ => None,
    };

    Ok(ResolvedRequest {
        client_id,
        nonce,
        state,
        response_mode,
        response_uri,
        presentation_definition,
        client_metadata,
    })
}
