//! JOSE plumbing: signing/verification traits, the `jwt`-crate bridge,
//! JWK helpers and JWE encryption.
//!
//! Cryptographic backends are injected through the [`Signer`] and
//! [`SignatureVerifier`] traits so device-bound keys (which never expose
//! private material) can sign JWTs the same way in-process keys do.

mod es256;
mod jwe;
mod jwk;

use std::{cell::Cell, str::FromStr};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use es256::{
    ec_private_key_from_pem, ec_private_key_to_pem, generate_ec_key, public_jwk_from_ec_key,
    public_key_from_jwk, sign_es256_raw, Es256Verifier,
};
pub use jwe::{decrypt_ecdh_es, encrypt_ecdh_es};
pub use jwk::{jwk_thumbprint, JwkPublic, JwkSet};

/// Type alias for a boxed error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from JOSE processing.
#[derive(Debug, Error)]
pub enum JoseError {
    /// A JWT/JWS is syntactically invalid.
    #[error("invalid JWT: {0}")]
    InvalidJwt(String),

    /// Signing failed in the underlying backend.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// A signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// An unsupported `alg`/`enc` value was encountered.
    #[error("unsupported algorithm `{0}`")]
    UnsupportedAlgorithm(String),

    /// A JWK is missing fields or malformed.
    #[error("invalid JWK: {0}")]
    InvalidJwk(String),

    /// A JWE is syntactically invalid.
    #[error("invalid JWE: {0}")]
    InvalidJwe(String),

    /// The cryptographic backend reported an error.
    #[error("crypto backend error: {0}")]
    CryptoBackend(String),
}

impl From<openssl::error::ErrorStack> for JoseError {
    fn from(value: openssl::error::ErrorStack) -> Self {
        Self::CryptoBackend(value.to_string())
    }
}

/// JWS `"alg"` header parameter value for **ECDSA using P-256 and
/// SHA-256**, as specified in RFC 7518.
pub const SIGNING_ALG_ES256: &str = "ES256";

/// Signature algorithms the wallet produces and accepts.
///
/// Wallet device keys are P-256, so `ES256` is the only member; the enum
/// keeps header handling and future extension explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SigningAlgorithm {
    /// ECDSA over P-256 with SHA-256.
    Es256,
}

impl FromStr for SigningAlgorithm {
    type Err = JoseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            SIGNING_ALG_ES256 => Ok(Self::Es256),
            _ => Err(JoseError::UnsupportedAlgorithm(value.to_owned())),
        }
    }
}

impl std::fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Es256 => write!(f, "{SIGNING_ALG_ES256}"),
        }
    }
}

impl From<SigningAlgorithm> for jwt::AlgorithmType {
    fn from(value: SigningAlgorithm) -> Self {
        match value {
            SigningAlgorithm::Es256 => Self::Es256,
        }
    }
}

/// An external signing backend, to be used for computing a JWS signature.
///
/// The output, regardless of backend, must be a valid **JWS signature**
/// (for ES256: the raw 64-byte `r || s` concatenation, not DER), see step
/// 5 in section 5.1 of RFC 7515.
pub trait Signer {
    /// The algorithm this signer uses.
    fn algorithm(&self) -> SigningAlgorithm;

    /// Produce a JWS signature as a byte array, not yet base64url-encoded.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying backend fails.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, BoxError>;

    /// Construct a JWK JSON object for the public counterpart of the
    /// signing key.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying backend fails.
    fn public_jwk(&self) -> Result<JwkPublic, BoxError>;
}

/// An external backend for verifying JWS signatures.
pub trait SignatureVerifier: Sync {
    /// The algorithm used for the signature verification.
    fn algorithm(&self) -> SigningAlgorithm;

    /// Verifies the signature of the message against the provided public
    /// key.
    ///
    /// Returns `Ok(true)` when the signature is valid, `Ok(false)` when it
    /// is not, and `Err(_)` when the verifier itself fails.
    ///
    /// # Errors
    ///
    /// Returns an error when the verifier backend fails, e.g. on a
    /// malformed public key.
    fn verify(
        &self,
        message: &[u8],
        signature: &[u8],
        public_key: &JwkPublic,
    ) -> Result<bool, BoxError>;
}

/// Create the signing input for a `JWS`, given its serialized header and
/// claims: `<header>.<claims>`, as defined in RFC 7515 section 5.1.
#[must_use]
pub fn construct_jws_payload(header: &str, claims: &str) -> String {
    format!("{header}.{claims}")
}

/// Returns the `base64url`-encoded string of the given `input`, without
/// padding.
pub fn base64_url_encode<T: AsRef<[u8]>>(input: T) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// Decodes the given `base64url`-encoded payload **without padding** into
/// bytes.
///
/// # Errors
///
/// Returns an error when the input is not valid base64url.
pub fn base64_url_decode<T: AsRef<[u8]>>(payload: T) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(payload)
}

/// Splits a compact JWS into `(header, claims, signature)` parts.
///
/// # Errors
///
/// Returns an error when the input does not have exactly three parts.
pub fn split_jwt(compact: &str) -> Result<(&str, &str, &str), JoseError> {
    let mut parts = compact.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(claims), Some(signature), None) => Ok((header, claims, signature)),
        _ => Err(JoseError::InvalidJwt(
            "expected three dot-separated parts".to_owned(),
        )),
    }
}

/// Base64url-decodes and JSON-parses one part of a compact JWS.
///
/// This performs **no** signature verification; callers must verify
/// separately before trusting the result.
///
/// # Errors
///
/// Returns an error when the part is not base64url or not valid JSON of
/// the expected shape.
pub fn decode_jwt_part<T: serde::de::DeserializeOwned>(part: &str) -> Result<T, JoseError> {
    let raw = base64_url_decode(part)
        .map_err(|e| JoseError::InvalidJwt(format!("part is not base64url: {e}")))?;
    serde_json::from_slice(&raw).map_err(|e| JoseError::InvalidJwt(format!("invalid JSON: {e}")))
}

/// Signs a JWT via [`jwt::SignWithKey`] while allowing proper propagation
/// of errors from both the foreign trait and the [`Signer`].
///
/// # Errors
///
/// Returns the signer's error, or the `jwt` crate's serialization error.
pub fn sign_jwt<UnsignedJwt, SignedJwt, S>(
    unsigned_jwt: UnsignedJwt,
    signer: &S,
) -> Result<SignedJwt, BoxError>
where
    UnsignedJwt: jwt::SignWithKey<SignedJwt>,
    S: Signer + ?Sized,
{
    let signer_wrapper = ErrorHolder::new(signer);
    unsigned_jwt
        .sign_with_key(&signer_wrapper)
        .map_err(signer_wrapper.combine_error())
}

impl<T: Signer + ?Sized> jwt::SigningAlgorithm for ErrorHolder<&'_ T> {
    fn algorithm_type(&self) -> jwt::AlgorithmType {
        self.inner.algorithm().into()
    }

    fn sign(&self, header: &str, claims: &str) -> Result<String, jwt::Error> {
        let message = construct_jws_payload(header, claims);

        match self.inner.sign(message.as_bytes()) {
            Ok(signature_bytes) => Ok(base64_url_encode(signature_bytes)),
            Err(error) => Err(self.store_error(error)),
        }
    }
}

/// Verifies a JWT signature via [`jwt::VerifyWithKey`] while allowing
/// proper propagation of errors from both the foreign trait and the
/// [`SignatureVerifier`].
///
/// # Errors
///
/// Returns the verifier's error, or the `jwt` crate's parsing error.
pub fn verify_jwt_signature<UnverifiedJwt, VerifiedJwt, V>(
    unverified_jwt: UnverifiedJwt,
    verifier: &V,
    public_key: &JwkPublic,
) -> Result<VerifiedJwt, BoxError>
where
    UnverifiedJwt: jwt::VerifyWithKey<VerifiedJwt>,
    V: SignatureVerifier + ?Sized,
{
    let verifier_wrapper = ErrorHolder::new(VerifierWrapper {
        verifier,
        public_key,
    });
    unverified_jwt
        .verify_with_key(&verifier_wrapper)
        .map_err(verifier_wrapper.combine_error())
}

/// Adapter for implementing [`jwt::VerifyingAlgorithm`], for internal use.
struct VerifierWrapper<'a, T: SignatureVerifier + ?Sized> {
    verifier: &'a T,
    public_key: &'a JwkPublic,
}

impl<T: SignatureVerifier + ?Sized> jwt::VerifyingAlgorithm for ErrorHolder<VerifierWrapper<'_, T>> {
    fn algorithm_type(&self) -> jwt::AlgorithmType {
        self.inner.verifier.algorithm().into()
    }

    fn verify_bytes(&self, header: &str, claims: &str, signature: &[u8]) -> Result<bool, jwt::Error> {
        let message = construct_jws_payload(header, claims);

        self.inner
            .verifier
            .verify(message.as_bytes(), signature, self.inner.public_key)
            .map_err(|error| self.store_error(error))
    }
}

/// Helper wrapper for collecting errors from signer/verifier
/// implementations which cannot be piped through `jwt::Error`.
struct ErrorHolder<T> {
    inner: T,
    /// Interior-mutable slot for the error returned by the wrapped
    /// backend, if any. `jwt::Error` cannot convey it directly.
    error: Cell<Option<BoxError>>,
}

impl<T> ErrorHolder<T> {
    fn new(inner: T) -> Self {
        Self {
            inner,
            error: Cell::new(None),
        }
    }

    fn store_error(&self, error: BoxError) -> jwt::Error {
        let previous = self.error.replace(Some(error));
        debug_assert!(previous.is_none());

        // The caller recovers the true error from the wrapper instead.
        jwt::Error::InvalidSignature
    }

    /// Check whether an underlying error occurred, returning it if it did,
    /// or the [`jwt::Error`] if not.
    fn combine_error(self) -> impl FnOnce(jwt::Error) -> BoxError {
        |jwt_error| {
            if let Some(underlying_error) = self.error.into_inner() {
                debug_assert!(matches!(jwt_error, jwt::Error::InvalidSignature));
                underlying_error
            } else {
                Box::new(jwt_error)
            }
        }
    }
}
