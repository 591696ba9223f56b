//! Reconstruction of the full claim tree from an issuer payload and its
//! disclosures.
//!
//! Resolution walks the payload, replacing `_sd` digest arrays and
//! `{"...": <digest>}` array elements with the disclosed values. Alongside
//! the claims it produces a table mapping each concealable node's path to
//! the disclosure revealing it, which is what presentation selection
//! works from.

use std::collections::HashMap;

use serde_json::Value;

use super::{
    disclosure::disclosures_by_digest, ClaimPath, ClaimPathSegment, Disclosure, DisclosureData,
    JsonObject, SdJwtError, SD_ALG_SHA256,
};

const SD_KEY: &str = "_sd";
const SD_ALG_KEY: &str = "_sd_alg";
const ARRAY_DIGEST_KEY: &str = "...";

/// A credential's reconstructed claims plus its path→disclosure table.
#[derive(Debug)]
pub struct DecodedCredential {
    /// The full claim object, digests resolved, `_sd`/`_sd_alg` removed.
    pub claims: JsonObject,
    /// Concealable-node paths and the index (into the input disclosure
    /// slice) of the disclosure revealing each.
    entries: Vec<(ClaimPath, usize)>,
}

impl DecodedCredential {
    /// Paths of all concealable nodes.
    pub fn concealable_paths(&self) -> impl Iterator<Item = &ClaimPath> {
        self.entries.iter().map(|(path, _)| path)
    }

    /// Selects the disclosures covering the requested paths.
    ///
    /// A disclosure covers a requested path when the node it conceals
    /// lies on the path from the claim root to the requested node, i.e.
    /// revealing the requested node requires it. Returns the selected
    /// disclosure indices (sorted, deduplicated) and the requested paths
    /// that do not exist in the claims at all.
    #[must_use]
    pub fn disclosures_covering(&self, requested: &[ClaimPath]) -> (Vec<usize>, Vec<ClaimPath>) {
        let mut selected: Vec<usize> = Vec::new();
        let mut unmatched = Vec::new();

        for path in requested {
            if path.segments().is_empty() || path.resolve(&self.claims).is_none() {
                unmatched.push(path.clone());
                continue;
            }
            for (concealed_path, index) in &self.entries {
                if concealed_path.is_prefix_of(path) {
                    selected.push(*index);
                }
            }
        }

        selected.sort_unstable();
        selected.dedup();
        (selected, unmatched)
    }
}

/// Reconstructs the claim tree of `payload` using `disclosures`.
///
/// # Errors
///
/// Fails on digest collisions, disclosures of the wrong kind for their
/// position, duplicate claim names, a non-`sha-256` `_sd_alg`, and
/// disclosures the payload never references — all of which are tampering
/// signals for a holder that received the credential intact.
pub fn reconstruct(
    payload: &JsonObject,
    disclosures: &[Disclosure],
) -> Result<DecodedCredential, SdJwtError> {
    let by_digest = disclosures_by_digest(disclosures)?;

    let mut claims = payload.clone();
    if let Some(alg) = claims.remove(SD_ALG_KEY) {
        let alg = alg
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| SdJwtError::UnsupportedSdAlg(alg.to_string()))?;
        if alg != SD_ALG_SHA256 {
            return Err(SdJwtError::UnsupportedSdAlg(alg));
        }
    }

    let mut resolver = Resolver {
        disclosures,
        by_digest: &by_digest,
        used: vec![false; disclosures.len()],
        entries: Vec::new(),
    };
    resolver.process_object(&mut claims, &ClaimPath::root())?;

    let unused = resolver.used.iter().filter(|used| !**used).count();
    if unused > 0 {
        return Err(SdJwtError::UnusedDisclosures(unused));
    }

    Ok(DecodedCredential {
        claims,
        entries: resolver.entries,
    })
}

struct Resolver<'a> {
    disclosures: &'a [Disclosure],
    by_digest: &'a HashMap<String, usize>,
    used: Vec<bool>,
    entries: Vec<(ClaimPath, usize)>,
}

impl Resolver<'_> {
    /// Looks up a digest, enforcing that each disclosure is referenced at
    /// most once across the whole credential.
    fn take_disclosure(&mut self, digest: &str) -> Result<Option<usize>, SdJwtError> {
        let Some(&index) = self.by_digest.get(digest) else {
            return Ok(None);
        };
        if self.used[index] {
            return Err(SdJwtError::DigestCollision);
        }
        self.used[index] = true;
        Ok(Some(index))
    }

    fn process_object(&mut self, object: &mut JsonObject, path: &ClaimPath) -> Result<(), SdJwtError> {
        if let Some(sd) = object.remove(SD_KEY) {
            let Value::Array(digests) = sd else {
                return Err(SdJwtError::InvalidDisclosure(format!(
                    "`_sd` at {path} is not an array"
                )));
            };

            for digest in &digests {
                let digest = digest.as_str().ok_or_else(|| {
                    SdJwtError::InvalidDisclosure(format!("`_sd` entry at {path} is not a string"))
                })?;
                let Some(index) = self.take_disclosure(digest)? else {
                    // No disclosure provided: the claim stays concealed.
                    continue;
                };

                let DisclosureData::KeyValue { key, value, .. } = &self.disclosures[index].data
                else {
                    return Err(SdJwtError::DisclosureKindMismatch(path.to_string()));
                };
                if object.contains_key(key) {
                    return Err(SdJwtError::DuplicateClaim(key.clone()));
                }
                object.insert(key.clone(), value.clone());
                self.entries
                    .push((path.child(ClaimPathSegment::Key(key.clone())), index));
            }
        }

        // Recurse into every member, disclosed ones included: disclosed
        // values may themselves carry `_sd` or concealed array elements.
        for (key, value) in object.iter_mut() {
            let child = path.child(ClaimPathSegment::Key(key.clone()));
            self.process_value(value, &child)?;
        }
        Ok(())
    }

    fn process_value(&mut self, value: &mut Value, path: &ClaimPath) -> Result<(), SdJwtError> {
        match value {
            Value::Object(object) => self.process_object(object, path),
            Value::Array(array) => self.process_array(array, path),
            _ => Ok(()),
        }
    }

    fn process_array(&mut self, array: &mut Vec<Value>, path: &ClaimPath) -> Result<(), SdJwtError> {
        let elements = std::mem::take(array);
        for element in elements {
            match array_element_digest(&element)? {
                Some(digest) => {
                    let Some(index) = self.take_disclosure(&digest)? else {
                        // No disclosure provided: the element stays
                        // concealed and vanishes from the array.
                        continue;
                    };

                    let DisclosureData::ArrayElement { value, .. } =
                        &self.disclosures[index].data
                    else {
                        return Err(SdJwtError::DisclosureKindMismatch(path.to_string()));
                    };

                    let element_path =
                        path.child(ClaimPathSegment::Index(array.len() as u32));
                    self.entries.push((element_path.clone(), index));

                    let mut resolved = value.clone();
                    self.process_value(&mut resolved, &element_path)?;
                    array.push(resolved);
                }
                None => {
                    let element_path =
                        path.child(ClaimPathSegment::Index(array.len() as u32));
                    let mut element = element;
                    self.process_value(&mut element, &element_path)?;
                    array.push(element);
                }
            }
        }
        Ok(())
    }
}

/// Recognizes `{"...": "<digest>"}` array elements; the reserved key must
/// be alone in the object.
fn array_element_digest(element: &Value) -> Result<Option<String>, SdJwtError> {
    let Value::Object(object) = element else {
        return Ok(None);
    };
    let Some(digest) = object.get(ARRAY_DIGEST_KEY) else {
        return Ok(None);
    };
    if object.len() != 1 {
        return Err(SdJwtError::InvalidDisclosure(
            "array element mixes `...` with other keys".to_owned(),
        ));
    }
    let digest = digest.as_str().ok_or_else(|| {
        SdJwtError::InvalidDisclosure("array element digest is not a string".to_owned())
    })?;
    Ok(Some(digest.to_owned()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::claim_path;

    use super::*;

    fn key_value(name: &str, value: Value) -> Disclosure {
        Disclosure::new(Disclosure::new_salt(), Some(name.to_owned()), value)
    }

    fn array_element(value: Value) -> Disclosure {
        Disclosure::new(Disclosure::new_salt(), None, value)
    }

    fn object(value: Value) -> JsonObject {
        let Value::Object(object) = value else {
            panic!("expected an object")
        };
        object
    }

    #[test]
    fn flat_object_reconstruction() {
        let family = key_value("family_name", json!("Mustermann"));
        let given = key_value("given_name", json!("Erika"));
        let payload = object(json!({
            "_sd": [family.digest(), given.digest()],
            "_sd_alg": "sha-256",
            "iss": "https://issuer.example.com",
        }));

        let decoded = reconstruct(&payload, &[family, given]).unwrap();
        assert_eq!(decoded.claims.get("family_name"), Some(&json!("Mustermann")));
        assert_eq!(decoded.claims.get("given_name"), Some(&json!("Erika")));
        assert_eq!(decoded.claims.get("iss"), Some(&json!("https://issuer.example.com")));
        assert!(!decoded.claims.contains_key("_sd"));
        assert!(!decoded.claims.contains_key("_sd_alg"));
        assert_eq!(decoded.concealable_paths().count(), 2);
    }

    #[test]
    fn nested_concealment_builds_ancestor_chain() {
        let region = key_value("region", json!("Sachsen-Anhalt"));
        let address = key_value("address", json!({"_sd": [region.digest()], "country": "DE"}));
        let payload = object(json!({
            "_sd": [address.digest()],
            "_sd_alg": "sha-256",
        }));

        let decoded = reconstruct(&payload, &[address, region]).unwrap();
        assert_eq!(
            claim_path!["address", "region"].resolve(&decoded.claims),
            Some(&json!("Sachsen-Anhalt"))
        );

        // Requesting the nested claim selects the whole ancestor chain.
        let (selected, unmatched) =
            decoded.disclosures_covering(&[claim_path!["address", "region"]]);
        assert_eq!(selected, vec![0, 1]);
        assert!(unmatched.is_empty());

        // Requesting only the parent does not select the child.
        let (selected, _) = decoded.disclosures_covering(&[claim_path!["address"]]);
        assert_eq!(selected, vec![0]);
    }

    #[test]
    fn array_elements_are_resolved_and_reindexed() {
        let de = array_element(json!("DE"));
        let fr = array_element(json!("FR"));
        // The middle element has no disclosure available and vanishes.
        let payload = object(json!({
            "nationalities": [
                {"...": de.digest()},
                {"...": Disclosure::new("other-salt".to_owned(), None, json!("XX")).digest()},
                "PL",
                {"...": fr.digest()},
            ],
        }));

        let decoded = reconstruct(&payload, &[de, fr]).unwrap();
        assert_eq!(
            decoded.claims.get("nationalities"),
            Some(&json!(["DE", "PL", "FR"]))
        );

        let (selected, unmatched) =
            decoded.disclosures_covering(&[claim_path!["nationalities", 2u32]]);
        assert_eq!(selected, vec![1]);
        assert!(unmatched.is_empty());
    }

    #[test]
    fn nonexistent_requested_paths_are_reported_not_fatal() {
        let family = key_value("family_name", json!("Mustermann"));
        let payload = object(json!({"_sd": [family.digest()]}));

        let decoded = reconstruct(&payload, &[family]).unwrap();
        let (selected, unmatched) = decoded.disclosures_covering(&[
            claim_path!["family_name"],
            claim_path!["shoe_size"],
        ]);
        assert_eq!(selected, vec![0]);
        assert_eq!(unmatched, vec![claim_path!["shoe_size"]]);
    }

    #[test]
    fn unused_disclosure_is_an_error() {
        let family = key_value("family_name", json!("Mustermann"));
        let stray = key_value("stray", json!(1));
        let payload = object(json!({"_sd": [family.digest()]}));

        let result = reconstruct(&payload, &[family, stray]);
        assert!(matches!(result, Err(SdJwtError::UnusedDisclosures(1))));
    }

    #[test]
    fn duplicate_claim_is_an_error() {
        let family = key_value("family_name", json!("Mustermann"));
        let payload = object(json!({
            "_sd": [family.digest()],
            "family_name": "Already Here",
        }));

        let result = reconstruct(&payload, &[family]);
        assert!(matches!(result, Err(SdJwtError::DuplicateClaim(_))));
    }

    #[test]
    fn wrong_disclosure_kind_is_an_error() {
        let element = array_element(json!("DE"));
        let payload = object(json!({"_sd": [element.digest()]}));

        let result = reconstruct(&payload, &[element]);
        assert!(matches!(result, Err(SdJwtError::DisclosureKindMismatch(_))));
    }

    #[test]
    fn unsupported_sd_alg_is_an_error() {
        let payload = object(json!({"_sd_alg": "sha-512"}));
        let result = reconstruct(&payload, &[]);
        assert!(matches!(result, Err(SdJwtError::UnsupportedSdAlg(_))));
    }

    #[test]
    fn digest_referenced_twice_is_an_error() {
        let family = key_value("family_name", json!("Mustermann"));
        let payload = object(json!({
            "_sd": [family.digest()],
            "nested": {"_sd": [family.digest()]},
        }));

        let result = reconstruct(&payload, &[family]);
        assert!(matches!(
            result,
            Err(SdJwtError::DigestCollision | SdJwtError::DuplicateClaim(_))
        ));
    }
}
