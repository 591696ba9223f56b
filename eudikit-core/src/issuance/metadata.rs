//! Issuer and authorization-server metadata.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::jose::JwkSet;

/// Credential issuer metadata
/// (`/.well-known/openid-credential-issuer`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerMetadata {
    /// The issuer's identifier URL.
    pub credential_issuer: String,
    /// URL of the credential endpoint.
    pub credential_endpoint: String,
    /// URL of the nonce endpoint, when the issuer provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce_endpoint: Option<String>,
    /// Authorization servers handling token issuance; the issuer itself
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_servers: Option<Vec<String>>,
    /// Supported credential configurations by id.
    pub credential_configurations_supported: HashMap<String, CredentialConfiguration>,
    /// Credential-response encryption support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_response_encryption: Option<ResponseEncryptionSupport>,
}

impl IssuerMetadata {
    /// The authorization server to use: the first listed one, or the
    /// issuer itself.
    #[must_use]
    pub fn authorization_server(&self) -> &str {
        self.authorization_servers
            .as_ref()
            .and_then(|servers| servers.first())
            .map_or(&self.credential_issuer, String::as_str)
    }

    /// Whether responses can be encrypted with `ECDH-ES` + `A128GCM`.
    #[must_use]
    pub fn supports_response_encryption(&self) -> bool {
        self.credential_response_encryption.as_ref().is_some_and(|support| {
            support.alg_values_supported.iter().any(|alg| alg == "ECDH-ES")
                && support.enc_values_supported.iter().any(|enc| enc == "A128GCM")
        })
    }
}

/// One entry of `credential_configurations_supported`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfiguration {
    /// Credential format, e.g. `vc+sd-jwt`.
    pub format: String,
    /// The credential type (`vct`) for SD-JWT VCs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vct: Option<String>,
    /// OAuth scope requesting this configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Signing algorithms the issuer may use.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credential_signing_alg_values_supported: Vec<String>,
    /// Display metadata, first entry preferred.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub display: Vec<CredentialDisplay>,
}

impl CredentialConfiguration {
    /// The display name to store with an issued credential.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display.first().map(|display| display.name.as_str())
    }
}

/// Display metadata of a credential configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialDisplay {
    /// Human-readable credential name.
    pub name: String,
    /// BCP 47 locale of `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

/// Credential-response encryption support advertised by the issuer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEncryptionSupport {
    /// Supported `alg` values.
    pub alg_values_supported: Vec<String>,
    /// Supported `enc` values.
    pub enc_values_supported: Vec<String>,
    /// Whether the issuer refuses unencrypted responses.
    #[serde(default)]
    pub encryption_required: bool,
}

/// Authorization server metadata
/// (`/.well-known/oauth-authorization-server`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthServerMetadata {
    /// The server's issuer identifier.
    pub issuer: String,
    /// URL of the authorization endpoint; absent on pre-authorized-only
    /// servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    /// URL of the token endpoint.
    pub token_endpoint: String,
}

/// SD-JWT VC issuer metadata (`/.well-known/jwt-vc-issuer`), carrying the
/// keys credentials are verified against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtVcIssuerMetadata {
    /// The issuer identifier.
    pub issuer: String,
    /// Inline key set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks: Option<JwkSet>,
    /// Key set by reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
}

/// Access token response of the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// The bearer access token.
    pub access_token: String,
    /// Token type; `Bearer` here.
    pub token_type: String,
    /// Token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Nonce to bind the proof of possession to.
    #[serde(default)]
    pub c_nonce: Option<String>,
    /// Lifetime of `c_nonce` in seconds.
    #[serde(default)]
    pub c_nonce_expires_in: Option<u64>,
}

/// Response of the nonce endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct NonceResponse {
    /// Nonce to bind the proof of possession to.
    pub c_nonce: String,
}
