//! Credential offer parsing.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::WalletError;

/// Grant type URN of the pre-authorized code flow.
pub const PRE_AUTHORIZED_GRANT: &str = "urn:ietf:params:oauth:grant-type:pre-authorized_code";

/// A credential offer, as received from an issuer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialOffer {
    /// The issuer's identifier URL.
    pub credential_issuer: String,
    /// Offered entries of the issuer's
    /// `credential_configurations_supported`.
    pub credential_configuration_ids: Vec<String>,
    /// Grants the issuer is prepared to process.
    #[serde(default)]
    pub grants: Option<Grants>,
}

/// The grants of a credential offer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Grants {
    /// Pre-authorized code grant.
    #[serde(
        rename = "urn:ietf:params:oauth:grant-type:pre-authorized_code",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pre_authorized: Option<PreAuthorizedCodeGrant>,
    /// Authorization code grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<AuthorizationCodeGrant>,
}

/// Pre-authorized code grant parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreAuthorizedCodeGrant {
    /// The code presented at the token endpoint.
    #[serde(rename = "pre-authorized_code")]
    pub code: String,
    /// When present, the user must enter a transaction code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_code: Option<TxCode>,
}

/// Description of a required transaction code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxCode {
    /// `numeric` or `text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_mode: Option<String>,
    /// Expected code length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    /// Hint shown to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Authorization code grant parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationCodeGrant {
    /// Opaque state echoed in the authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_state: Option<String>,
    /// The authorization server to use when the issuer lists several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_server: Option<String>,
}

/// An offer as carried in an `openid-credential-offer://` URI: either
/// inline or by reference.
#[derive(Debug)]
pub enum OfferSource {
    /// `credential_offer`: the offer JSON, inline.
    Value(Box<CredentialOffer>),
    /// `credential_offer_uri`: fetch the offer from this URL.
    Reference(String),
}

/// Parses a credential offer URI.
///
/// # Errors
///
/// Returns an error when the URI is unparseable or carries neither
/// `credential_offer` nor `credential_offer_uri`.
pub fn parse_offer_uri(uri: &str) -> Result<OfferSource, WalletError> {
    let url = Url::parse(uri).map_err(|e| WalletError::InvalidInput {
        attribute: "offer_uri".to_owned(),
        reason: e.to_string(),
    })?;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "credential_offer" => {
                let offer: CredentialOffer =
                    serde_json::from_str(&value).map_err(|e| WalletError::InvalidInput {
                        attribute: "credential_offer".to_owned(),
                        reason: e.to_string(),
                    })?;
                return Ok(OfferSource::Value(Box::new(offer)));
            }
            "credential_offer_uri" => return Ok(OfferSource::Reference(value.into_owned())),
            _ => {}
        }
    }

    Err(WalletError::InvalidInput {
        attribute: "offer_uri".to_owned(),
        reason: "neither credential_offer nor credential_offer_uri present".to_owned(),
    })
}
