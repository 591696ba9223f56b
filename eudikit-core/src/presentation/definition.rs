//! Presentation-exchange definitions and credential matching.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sd_jwt::{ClaimPath, CredentialView};

/// A presentation definition: what the verifier asks for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentationDefinition {
    /// Definition identifier, echoed in the submission.
    pub id: String,
    /// One entry per requested credential.
    pub input_descriptors: Vec<InputDescriptor>,
}

/// One requested credential with its claim constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDescriptor {
    /// Descriptor identifier, echoed in the submission.
    pub id: String,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Why the verifier requests this credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    /// Accepted credential formats; unchecked here (the wallet only
    /// stores formats it supports).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
    /// The field constraints.
    pub constraints: Constraints,
}

/// Constraints of an input descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    /// `required` asks the wallet to disclose no more than the fields
    /// below; this wallet always discloses minimally, so the value is
    /// informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_disclosure: Option<String>,
    /// Requested fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldConstraint>,
}

/// One requested field with its path alternatives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConstraint {
    /// JSONPath alternatives; the first resolving one wins.
    pub path: Vec<String>,
    /// Whether the field may be absent.
    #[serde(default)]
    pub optional: bool,
    /// JSON-Schema-style filter on the field value. `const` and `enum`
    /// are enforced; other keywords are ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

/// The candidates satisfying one input descriptor.
#[derive(Debug)]
pub struct DescriptorMatch {
    /// The descriptor these candidates satisfy.
    pub descriptor_id: String,
    /// Matching stored credentials, in wallet order.
    pub candidates: Vec<CandidateMatch>,
}

/// One credential satisfying a descriptor.
#[derive(Debug, Clone)]
pub struct CandidateMatch {
    /// Wallet-local credential id.
    pub credential_id: String,
    /// The claim paths that satisfied the descriptor's fields; these are
    /// exactly the paths a presentation will disclose.
    pub matched_paths: Vec<ClaimPath>,
}

/// Matches stored credentials against a presentation definition.
///
/// Pure and deterministic: a credential is a candidate for a descriptor
/// when every non-optional field has at least one `path` alternative
/// resolving against the credential's reconstructed claims (and passing
/// its filter). The caller — the UI layer — picks one candidate per
/// descriptor.
#[must_use]
pub fn match_credentials(
    definition: &PresentationDefinition,
    credentials: &[(String, CredentialView)],
) -> Vec<DescriptorMatch> {
    definition
        .input_descriptors
        .iter()
        .map(|descriptor| DescriptorMatch {
            descriptor_id: descriptor.id.clone(),
            candidates: credentials
                .iter()
                .filter_map(|(id, view)| {
                    match_descriptor(descriptor, view).map(|matched_paths| CandidateMatch {
                        credential_id: id.clone(),
                        matched_paths,
                    })
                })
                .collect(),
        })
        .collect()
}

/// Returns the matched paths when `view` satisfies `descriptor`.
fn match_descriptor(descriptor: &InputDescriptor, view: &CredentialView) -> Option<Vec<ClaimPath>> {
    let mut matched = Vec::new();

    for field in &descriptor.constraints.fields {
        let resolved = field.path.iter().find_map(|candidate| {
            let path = ClaimPath::parse(candidate).ok()?;
            let value = path.resolve(&view.claims)?;
            passes_filter(value, field.filter.as_ref()).then_some(path)
        });

        match resolved {
            Some(path) => matched.push(path),
            None if field.optional => {}
            None => return None,
        }
    }

    Some(matched)
}

/// Evaluates the supported subset of a field filter.
fn passes_filter(value: &Value, filter: Option<&Value>) -> bool {
    let Some(filter) = filter else { return true };

    if let Some(expected) = filter.get("const") {
        if value != expected {
            return false;
        }
    }
    if let Some(allowed) = filter.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return false;
        }
    }
    if let Some(expected_type) = filter.get("type").and_then(Value::as_str) {
        let type_matches = match expected_type {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !type_matches {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn view(claims: Value) -> CredentialView {
        let Value::Object(claims) = claims else {
            panic!("claims must be an object")
        };
        CredentialView {
            claims,
            issuer: None,
            vct: None,
            confirmation_jwk: None,
        }
    }

    fn pid_view() -> CredentialView {
        view(json!({
            "vct": "urn:eudi:pid:1",
            "family_name": "Mustermann",
            "given_name": "Erika",
            "address": {"region": "Sachsen-Anhalt"},
        }))
    }

    fn mdl_view() -> CredentialView {
        view(json!({
            "vct": "urn:eudi:mdl:1",
            "family_name": "Mustermann",
            "driving_privileges": ["B"],
        }))
    }

    fn definition(value: Value) -> PresentationDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn descriptor_matches_only_credentials_with_all_mandatory_fields() {
        let definition = definition(json!({
            "id": "pd-1",
            "input_descriptors": [{
                "id": "pid",
                "constraints": {"fields": [
                    {"path": ["$.family_name"]},
                    {"path": ["$.address.region"]},
                ]}
            }]
        }));
        let credentials = vec![
            ("cred-pid".to_owned(), pid_view()),
            ("cred-mdl".to_owned(), mdl_view()),
        ];

        let matches = match_credentials(&definition, &credentials);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].candidates.len(), 1);
        assert_eq!(matches[0].candidates[0].credential_id, "cred-pid");
        assert_eq!(
            matches[0].candidates[0].matched_paths,
            vec![
                ClaimPath::parse("$.family_name").unwrap(),
                ClaimPath::parse("$.address.region").unwrap(),
            ]
        );
    }

    #[test]
    fn optional_fields_do_not_disqualify() {
        let definition = definition(json!({
            "id": "pd-1",
            "input_descriptors": [{
                "id": "any",
                "constraints": {"fields": [
                    {"path": ["$.family_name"]},
                    {"path": ["$.address.region"], "optional": true},
                ]}
            }]
        }));
        let credentials = vec![("cred-mdl".to_owned(), mdl_view())];

        let matches = match_credentials(&definition, &credentials);
        assert_eq!(matches[0].candidates.len(), 1);
        // only the resolving field is disclosed
        assert_eq!(matches[0].candidates[0].matched_paths.len(), 1);
    }

    #[test]
    fn path_alternatives_take_the_first_resolving_one() {
        let definition = definition(json!({
            "id": "pd-1",
            "input_descriptors": [{
                "id": "any",
                "constraints": {"fields": [
                    {"path": ["$.surname", "$.family_name"]},
                ]}
            }]
        }));
        let credentials = vec![("cred-pid".to_owned(), pid_view())];

        let matches = match_credentials(&definition, &credentials);
        assert_eq!(
            matches[0].candidates[0].matched_paths,
            vec![ClaimPath::parse("$.family_name").unwrap()]
        );
    }

    #[test]
    fn const_filter_selects_by_credential_type() {
        let definition = definition(json!({
            "id": "pd-1",
            "input_descriptors": [{
                "id": "pid-only",
                "constraints": {"fields": [
                    {"path": ["$.vct"], "filter": {"type": "string", "const": "urn:eudi:pid:1"}},
                    {"path": ["$.family_name"]},
                ]}
            }]
        }));
        let credentials = vec![
            ("cred-pid".to_owned(), pid_view()),
            ("cred-mdl".to_owned(), mdl_view()),
        ];

        let matches = match_credentials(&definition, &credentials);
        assert_eq!(matches[0].candidates.len(), 1);
        assert_eq!(matches[0].candidates[0].credential_id, "cred-pid");
    }

    #[test]
    fn enum_filter_accepts_any_listed_value() {
        let definition = definition(json!({
            "id": "pd-1",
            "input_descriptors": [{
                "id": "either",
                "constraints": {"fields": [
                    {"path": ["$.vct"], "filter": {"enum": ["urn:eudi:pid:1", "urn:eudi:mdl:1"]}},
                ]}
            }]
        }));
        let credentials = vec![
            ("cred-pid".to_owned(), pid_view()),
            ("cred-mdl".to_owned(), mdl_view()),
        ];

        let matches = match_credentials(&definition, &credentials);
        assert_eq!(matches[0].candidates.len(), 2);
    }

    #[test]
    fn unmatched_descriptor_yields_empty_candidates() {
        let definition = definition(json!({
            "id": "pd-1",
            "input_descriptors": [{
                "id": "diploma",
                "constraints": {"fields": [{"path": ["$.degree"]}]}
            }]
        }));
        let credentials = vec![("cred-pid".to_owned(), pid_view())];

        let matches = match_credentials(&definition, &credentials);
        assert!(matches[0].candidates.is_empty());
    }
}
