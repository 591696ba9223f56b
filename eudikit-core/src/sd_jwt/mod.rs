//! SD-JWT selective-disclosure credentials.
//!
//! Covers the compact `SD-JWT` / `SD-JWT+KB` serializations, disclosure
//! parsing and digests, claim-tree reconstruction, selection of the
//! disclosures covering a requested claim set, and the Key Binding JWT.

mod decode;
mod disclosure;
pub(crate) mod holder;
pub(crate) mod key_binding;
mod path;

use thiserror::Error;

pub use decode::{reconstruct, DecodedCredential};
pub use disclosure::{Disclosure, DisclosureData};
pub use holder::{decode_credential, present, verify_credential, CredentialView, Presentation};
pub use key_binding::KeyBindingChallenge;
pub use path::{ClaimPath, ClaimPathSegment};

use crate::jose::{base64_url_encode, decode_jwt_part};

/// A JSON object.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

pub(crate) const SD_JWT_DELIMITER: char = '~';

/// The `_sd_alg` value this implementation produces and accepts.
pub(crate) const SD_ALG_SHA256: &str = "sha-256";

/// Errors from SD-JWT processing.
#[derive(Debug, Error)]
pub enum SdJwtError {
    /// The compact serialization is malformed.
    #[error("invalid SD-JWT format")]
    InvalidFormat,

    /// A disclosure failed to parse.
    #[error("invalid disclosure: {0}")]
    InvalidDisclosure(String),

    /// The credential uses a hash algorithm other than `sha-256`.
    #[error("unsupported _sd_alg `{0}`")]
    UnsupportedSdAlg(String),

    /// Two disclosures hash to the same digest.
    #[error("disclosure digest collision")]
    DigestCollision,

    /// A disclosed claim name already exists in the containing object.
    #[error("duplicate claim `{0}` after disclosure")]
    DuplicateClaim(String),

    /// Disclosures were provided that resolve nowhere in the credential.
    #[error("{0} disclosure(s) not referenced by the credential")]
    UnusedDisclosures(usize),

    /// A disclosure of the wrong arity appeared in this position.
    #[error("disclosure kind mismatch at `{0}`")]
    DisclosureKindMismatch(String),

    /// A claim path string failed to parse.
    #[error("invalid claim path: {0}")]
    ClaimPath(String),

    /// The issuer-signed JWT is malformed or its payload is not an object.
    #[error("invalid issuer JWT: {0}")]
    InvalidJwt(String),

    /// Signature verification of the issuer JWT failed.
    #[error("issuer signature invalid: {0}")]
    Signature(String),

    /// The credential carries no `cnf` holder key.
    #[error("credential has no confirmation key")]
    MissingConfirmationKey,

    /// The credential's `cnf` key is not the wallet's key.
    #[error("credential confirmation key does not match the device key")]
    ConfirmationKeyMismatch,

    /// The credential is expired or not yet valid.
    #[error("credential not valid at the current time: {0}")]
    NotValid(String),

    /// Key Binding JWT construction or validation failed.
    #[error("key binding error: {0}")]
    KeyBinding(String),
}

/// A parsed `SD-JWT`: an issuer-signed JWT plus zero or more disclosures.
///
/// The compact serialization is `<JWT>~<disc 1>~...~<disc N>~` — note the
/// trailing tilde, which distinguishes an `SD-JWT` from an `SD-JWT+KB`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdJwt {
    pub(crate) jwt: String,
    pub(crate) disclosures: Vec<String>,
}

/// A parsed `SD-JWT+KB`: an `SD-JWT` plus a Key Binding JWT.
///
/// The compact serialization is
/// `<JWT>~<disc 1>~...~<disc N>~<KB-JWT>` — no trailing tilde.
#[derive(Debug)]
pub struct SdJwtKb {
    pub(crate) sd_jwt: SdJwt,
    pub(crate) key_binding_jwt: String,
}

impl SdJwt {
    pub(crate) const fn new(jwt: String, disclosures: Vec<String>) -> Self {
        Self { jwt, disclosures }
    }

    /// The issuer-signed JWT in compact form.
    #[must_use]
    pub fn issuer_jwt(&self) -> &str {
        &self.jwt
    }

    /// The serialized disclosures, in transmitted order.
    #[must_use]
    pub fn disclosures(&self) -> &[String] {
        &self.disclosures
    }

    /// Base64url-decodes the issuer JWT payload, without verifying the
    /// signature.
    ///
    /// # Errors
    ///
    /// Returns an error when the JWT is malformed or its payload is not a
    /// JSON object.
    pub fn payload(&self) -> Result<JsonObject, SdJwtError> {
        let mut parts = self.jwt.split('.');
        let claims = parts
            .nth(1)
            .ok_or_else(|| SdJwtError::InvalidJwt("missing claims part".to_owned()))?;
        decode_jwt_part(claims).map_err(|e| SdJwtError::InvalidJwt(e.to_string()))
    }
}

impl SdJwtKb {
    pub(crate) fn new(sd_jwt: SdJwt, key_binding_jwt: String) -> Result<Self, SdJwtError> {
        if key_binding_jwt.is_empty() {
            return Err(SdJwtError::InvalidFormat);
        }
        Ok(Self {
            sd_jwt,
            key_binding_jwt,
        })
    }

    /// The Key Binding JWT in compact form.
    #[must_use]
    pub fn key_binding_jwt(&self) -> &str {
        &self.key_binding_jwt
    }
}

impl std::str::FromStr for SdJwt {
    type Err = SdJwtError;

    /// Parses the `SD-JWT` compact serialization. The input must end with
    /// the `~` delimiter; an `SD-JWT+KB` does not parse as an `SD-JWT`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if !value.ends_with(SD_JWT_DELIMITER) {
            return Err(SdJwtError::InvalidFormat);
        }
        let parts: Vec<&str> = value.split(SD_JWT_DELIMITER).collect();

        // The final delimiter yields a trailing empty element.
        debug_assert!(parts.last().is_some_and(|p| p.is_empty()));
        sd_jwt_from_parts(&parts[0..parts.len() - 1])
    }
}

impl std::str::FromStr for SdJwtKb {
    type Err = SdJwtError;

    /// Parses the `SD-JWT+KB` compact serialization. The final part must
    /// be a non-empty Key Binding JWT; an `SD-JWT` does not parse as an
    /// `SD-JWT+KB`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.split(SD_JWT_DELIMITER).collect();

        let parts_len = parts.len();
        let sd_jwt = sd_jwt_from_parts(&parts[0..parts_len - 1])?;
        let key_binding_jwt = parts[parts_len - 1];

        Self::new(sd_jwt, key_binding_jwt.to_owned())
    }
}

impl std::fmt::Display for SdJwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.jwt, SD_JWT_DELIMITER)?;
        for disclosure in &self.disclosures {
            write!(f, "{disclosure}{SD_JWT_DELIMITER}")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for SdJwtKb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.sd_jwt, self.key_binding_jwt)
    }
}

fn sd_jwt_from_parts(parts: &[&str]) -> Result<SdJwt, SdJwtError> {
    let Some((jwt, disclosures)) = parts.split_first() else {
        return Err(SdJwtError::InvalidFormat);
    };
    if jwt.is_empty() {
        return Err(SdJwtError::InvalidFormat);
    }

    let disclosures: Vec<String> = disclosures.iter().map(|&s| s.to_owned()).collect();
    Ok(SdJwt::new((*jwt).to_owned(), disclosures))
}

/// Computes the `sd_hash` of a presentation prefix (the SD-JWT compact
/// serialization up to and including the final `~`), base64url-encoded.
#[must_use]
pub fn sd_hash(presentation_prefix: &str) -> String {
    use sha2::Digest as _;
    base64_url_encode(sha2::Sha256::digest(presentation_prefix.as_bytes()))
}
