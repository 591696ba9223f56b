//! Disclosures: the salted, hashed claim containers of SD-JWT.

use core::fmt;
use std::collections::HashMap;

use serde_json::Value;
use sha2::{Digest as _, Sha256};

use crate::jose::{base64_url_decode, base64_url_encode};

use super::SdJwtError;

/// Base64url-encoded disclosure hash salt.
pub type Salt = String;

/// A disclosure for a JSON node, in both parsed form and the original
/// serialized form.
///
/// The serialized form is kept verbatim: digests are computed over the
/// transmitted bytes, never over a re-serialization.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct Disclosure {
    pub(crate) data: DisclosureData,
    serialized: String,
}

/// Parsed form of a disclosure.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum DisclosureData {
    /// A `[salt, name, value]` disclosure concealing an object property.
    KeyValue {
        /// Disclosure hash salt.
        salt: Salt,
        /// Claim name.
        key: String,
        /// Claim value.
        value: Value,
    },
    /// A `[salt, value]` disclosure concealing an array element.
    ArrayElement {
        /// Disclosure hash salt.
        salt: Salt,
        /// Element value.
        value: Value,
    },
}

impl TryFrom<String> for Disclosure {
    type Error = SdJwtError;

    fn try_from(serialized: String) -> Result<Self, Self::Error> {
        let decoded = base64_url_decode(&serialized)
            .map_err(|_| SdJwtError::InvalidDisclosure("not base64url".to_owned()))?;

        let array: Vec<Value> = serde_json::from_slice(&decoded)
            .map_err(|_| SdJwtError::InvalidDisclosure("not a JSON array".to_owned()))?;

        let data = match array.len() {
            3 => {
                let [salt, key, value]: [Value; 3] =
                    array.try_into().expect("length checked above");
                let Value::String(salt) = salt else {
                    return Err(SdJwtError::InvalidDisclosure(
                        "salt is not a string".to_owned(),
                    ));
                };
                let Value::String(key) = key else {
                    return Err(SdJwtError::InvalidDisclosure(
                        "claim name is not a string".to_owned(),
                    ));
                };
                DisclosureData::KeyValue { salt, key, value }
            }
            2 => {
                let [salt, value]: [Value; 2] = array.try_into().expect("length checked above");
                let Value::String(salt) = salt else {
                    return Err(SdJwtError::InvalidDisclosure(
                        "salt is not a string".to_owned(),
                    ));
                };
                DisclosureData::ArrayElement { salt, value }
            }
            n => {
                return Err(SdJwtError::InvalidDisclosure(format!(
                    "array has invalid length {n}"
                )))
            }
        };

        Ok(Self { data, serialized })
    }
}

impl fmt::Display for Disclosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            DisclosureData::KeyValue { salt, key, value } => {
                write!(f, "[{salt}, {key}, {value}]")
            }
            DisclosureData::ArrayElement { salt, value } => write!(f, "[{salt}, {value}]"),
        }
    }
}

impl Disclosure {
    /// Constructs a new disclosure from `salt`, an optional claim name and
    /// a claim value.
    #[must_use]
    pub fn new(salt: Salt, claim_name: Option<String>, claim_value: Value) -> Self {
        let input = if let Some(name) = &claim_name {
            format!("[\"{salt}\", \"{name}\", {claim_value}]")
        } else {
            format!("[\"{salt}\", {claim_value}]")
        };

        let serialized = base64_url_encode(input);

        let data = if let Some(name) = claim_name {
            DisclosureData::KeyValue {
                salt,
                key: name,
                value: claim_value,
            }
        } else {
            DisclosureData::ArrayElement {
                salt,
                value: claim_value,
            }
        };

        Self { data, serialized }
    }

    /// Generates a fresh random salt (128-bit, base64url).
    #[must_use]
    pub fn new_salt() -> Salt {
        let mut bytes = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
        base64_url_encode(bytes)
    }

    /// The concealed value.
    #[must_use]
    pub const fn value(&self) -> &Value {
        match &self.data {
            DisclosureData::KeyValue { value, .. } | DisclosureData::ArrayElement { value, .. } => {
                value
            }
        }
    }

    /// The claim name, for object-property disclosures.
    #[must_use]
    pub fn claim_name(&self) -> Option<&str> {
        match &self.data {
            DisclosureData::KeyValue { key, .. } => Some(key),
            DisclosureData::ArrayElement { .. } => None,
        }
    }

    /// The serialized (transmitted) form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Consumes `self`, returning the serialized form.
    #[must_use]
    pub fn into_string(self) -> String {
        self.serialized
    }

    /// The `sha-256` digest of the serialized form, base64url-encoded, as
    /// referenced from `_sd` arrays and `{"...": digest}` elements.
    #[must_use]
    pub fn digest(&self) -> String {
        base64_url_encode(Sha256::digest(self.serialized.as_bytes()))
    }
}

/// Table of disclosures by digest; detects digest collisions.
pub(crate) fn disclosures_by_digest(
    disclosures: &[Disclosure],
) -> Result<HashMap<String, usize>, SdJwtError> {
    let mut by_digest = HashMap::with_capacity(disclosures.len());
    for (index, disclosure) in disclosures.iter().enumerate() {
        if by_digest.insert(disclosure.digest(), index).is_some() {
            return Err(SdJwtError::DigestCollision);
        }
    }
    Ok(by_digest)
}
