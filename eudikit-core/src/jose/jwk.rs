//! JWK types and helpers.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::{base64_url_encode, JoseError};

/// A JSON object meant to represent a public JWK.
///
/// Since this is a type alias, no aspects of the schema are enforced; this
/// is left to any end-consumers of the public key, such as
/// [`SignatureVerifier`](super::SignatureVerifier).
pub type JwkPublic = Map<String, Value>;

/// Models a JWK Set, as specified in RFC 7517 section 5.
///
/// If any of the JWKs in the set carry a `kid` then all of them must, and
/// the `kid` values must be distinct.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(try_from = "JwkSetUnverified")]
pub struct JwkSet {
    /// Underlying representation of the JWK Set.
    pub keys: Vec<JwkPublic>,
}

impl JwkSet {
    /// Create an empty `JwkSet`.
    #[must_use]
    pub const fn empty() -> Self {
        Self { keys: vec![] }
    }

    /// Returns the key with the given `kid`, if present.
    #[must_use]
    pub fn key_by_id(&self, kid: &str) -> Option<&JwkPublic> {
        self.keys
            .iter()
            .find(|jwk| jwk.get("kid").and_then(Value::as_str) == Some(kid))
    }

    /// Returns the first key marked for encryption use (`"use": "enc"` or
    /// `"alg": "ECDH-ES"`), if any.
    #[must_use]
    pub fn encryption_key(&self) -> Option<&JwkPublic> {
        self.keys.iter().find(|jwk| {
            jwk.get("use").and_then(Value::as_str) == Some("enc")
                || jwk.get("alg").and_then(Value::as_str) == Some("ECDH-ES")
        })
    }
}

/// "Shadow" type whose sole purpose is verifying the validity of a
/// deserialized [`JwkSet`] without a hand-written `Deserialize`.
#[derive(Deserialize, Debug)]
struct JwkSetUnverified {
    keys: Vec<JwkPublic>,
}

impl TryFrom<JwkSetUnverified> for JwkSet {
    type Error = &'static str;

    fn try_from(value: JwkSetUnverified) -> Result<Self, Self::Error> {
        let keys = value.keys;
        let jwk_with_kid_cnt = keys.iter().filter(|jwk| jwk.contains_key("kid")).count();

        if jwk_with_kid_cnt == 0 {
            return Ok(Self { keys });
        }
        if jwk_with_kid_cnt != keys.len() {
            return Err("Some of the provided JWKs contain kid parameter values and some don't");
        }

        let mut uniq = HashSet::new();
        for key in &keys {
            let kid = key
                .get("kid")
                .expect("all JWKs contain a `kid` at this point")
                .as_str()
                .ok_or("JWK contains a `kid` parameter that is not a string")?;
            if !uniq.insert(kid) {
                return Err("Provided JWKs contain duplicate kid parameter values");
            }
        }

        Ok(Self { keys })
    }
}

/// Computes the JWK SHA-256 Thumbprint (RFC 7638) of an EC public JWK,
/// returned base64url-encoded without padding.
///
/// The thumbprint hashes the JSON object containing exactly the required
/// members of an EC key (`crv`, `kty`, `x`, `y`), in lexicographic order,
/// with no whitespace.
///
/// # Errors
///
/// Returns an error when the JWK is not an EC key or misses required
/// members.
pub fn jwk_thumbprint(jwk: &JwkPublic) -> Result<String, JoseError> {
    let member = |name: &str| -> Result<&str, JoseError> {
        jwk.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| JoseError::InvalidJwk(format!("missing `{name}` member")))
    };

    let kty = member("kty")?;
    if kty != "EC" {
        return Err(JoseError::InvalidJwk(format!(
            "thumbprint only supports EC keys, got `{kty}`"
        )));
    }
    let crv = member("crv")?;
    let x = member("x")?;
    let y = member("y")?;

    // Members in lexicographic order, serialized without whitespace.
    let canonical = format!(r#"{{"crv":"{crv}","kty":"{kty}","x":"{x}","y":"{y}"}}"#);
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(base64_url_encode(digest))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // https://datatracker.ietf.org/doc/html/rfc7517#appendix-A.1
    #[test]
    fn jwk_set_example_deserializes() {
        let jwk_set = json!({"keys": [
            {"kty": "EC",
             "crv": "P-256",
             "x": "MKBCTNIcKUSDii11ySs3526iDZ8AiTo7Tu6KPAqv7D4",
             "y": "4Etl6SRW2YiLUrN5vfvVHuhp7x8PxltmWWlbbM4IFyM",
             "use": "enc",
             "kid": "1"},
            {"kty": "EC",
             "crv": "P-256",
             "x": "MKBCTNIcKUSDii11ySs3526iDZ8AiTo7Tu6KPAqv7D4",
             "y": "4Etl6SRW2YiLUrN5vfvVHuhp7x8PxltmWWlbbM4IFyM",
             "use": "sig",
             "kid": "2011-04-29"}
        ]});

        let deserialized: JwkSet = serde_json::from_value(jwk_set).unwrap();
        assert_eq!(deserialized.keys.len(), 2);
        assert!(deserialized.key_by_id("1").is_some());
        assert!(deserialized.key_by_id("nope").is_none());
        assert_eq!(
            deserialized
                .encryption_key()
                .and_then(|k| k.get("kid"))
                .and_then(Value::as_str),
            Some("1")
        );
    }

    #[test]
    fn duplicate_kid_is_rejected() {
        let jwk_set = json!({"keys": [{"kid": "1"}, {"kid": "1"}]});

        let error = serde_json::from_value::<JwkSet>(jwk_set).unwrap_err();
        assert!(error.to_string().contains("duplicate kid"));
    }

    #[test]
    fn mixed_kid_presence_is_rejected() {
        let jwk_set = json!({"keys": [{"kid": "1"}, {"key": "1"}]});

        let error = serde_json::from_value::<JwkSet>(jwk_set).unwrap_err();
        assert!(error.to_string().contains("some don't"));
    }

    /// Example from section B.2.6.1 of the OpenID4VP specification.
    #[test]
    fn thumbprint_matches_known_vector() {
        let Value::Object(jwk) = json!({
            "kty": "EC",
            "crv": "P-256",
            "x": "DxiH5Q4Yx3UrukE2lWCErq8N8bqC9CHLLrAwLz5BmE0",
            "y": "XtLM4-3h5o3HUH0MHVJV0kyq0iBlrBwlh8qEDMZ4-Pc",
            "use": "enc",
            "alg": "ECDH-ES",
            "kid": "1",
        }) else {
            unreachable!("JWK must be a JSON object")
        };

        let thumbprint = jwk_thumbprint(&jwk).unwrap();
        let thumbprint_hex = hex::encode(crate::jose::base64_url_decode(&thumbprint).unwrap());
        assert_eq!(
            thumbprint_hex,
            "4283ec927ae0f208daaa2d026a814f2b22dca52cf85ffa8f3f8626c6bd669047"
        );
    }

    #[test]
    fn thumbprint_rejects_non_ec_keys() {
        let Value::Object(jwk) = json!({"kty": "RSA", "n": "...", "e": "AQAB"}) else {
            unreachable!()
        };
        assert!(matches!(
            jwk_thumbprint(&jwk),
            Err(JoseError::InvalidJwk(_))
        ));
    }
}
