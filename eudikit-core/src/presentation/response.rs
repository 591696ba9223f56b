//! Authorization response assembly and submission.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::WalletError,
    http::{protocol_error, HttpClient},
    jose::{self, JwkPublic},
};

use super::request::{ResolvedRequest, ResponseMode};

/// The `presentation_submission` descriptor map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentationSubmission {
    /// Submission identifier.
    pub id: String,
    /// The definition this submission answers.
    pub definition_id: String,
    /// Where each descriptor's presentation sits in the `vp_token`.
    pub descriptor_map: Vec<DescriptorMapEntry>,
}

/// One entry of the descriptor map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorMapEntry {
    /// The input descriptor id.
    pub id: String,
    /// Credential format of the presentation.
    pub format: String,
    /// JSONPath into the `vp_token` (`$` or `$[i]`).
    pub path: String,
}

/// Builds the submission for presentations in descriptor order.
#[must_use]
pub fn build_submission(
    definition_id: &str,
    descriptors: &[(String, String)],
) -> PresentationSubmission {
    let single = descriptors.len() == 1;
    PresentationSubmission {
        id: Uuid::new_v4().to_string(),
        definition_id: definition_id.to_owned(),
        descriptor_map: descriptors
            .iter()
            .enumerate()
            .map(|(index, (descriptor_id, format))| DescriptorMapEntry {
                id: descriptor_id.clone(),
                format: format.clone(),
                path: if single { "$".to_owned() } else { format!("$[{index}]") },
            })
            .collect(),
    }
}

/// Verifier response to a submission.
#[derive(Debug, Default, Deserialize)]
pub struct SubmissionOutcome {
    /// Where to send the user next, when the verifier provides one.
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

/// POSTs the presentation response per the request's `response_mode`.
///
/// `direct_post` form-posts `vp_token`, `presentation_submission` and
/// `state`; `direct_post.jwt` packs the same parameters into a JWE
/// encrypted to the verifier's key, with the request nonce as `apv`.
///
/// # Errors
///
/// Returns an error when encryption is required but no verifier key is
/// available, or the POST fails.
pub async fn submit(
    http: &HttpClient,
    request: &ResolvedRequest,
    vp_token: &Value,
    submission: &PresentationSubmission,
) -> Result<SubmissionOutcome, WalletError> {
    let vp_token_text = match vp_token {
        Value::String(single) => single.clone(),
        other => other.to_string(),
    };
    let submission_text = serde_json::to_string(submission)?;

    let mut form: Vec<(&str, String)> = Vec::new();
    match request.response_mode {
        ResponseMode::DirectPost => {
            form.push(("vp_token", vp_token_text));
            form.push(("presentation_submission", submission_text));
            if let Some(state) = &request.state {
                form.push(("state", state.clone()));
            }
        }
        ResponseMode::DirectPostJwt => {
            let encryption_jwk = verifier_encryption_jwk(request)?;
            let mut payload = json!({
                "vp_token": vp_token,
                "presentation_submission": submission,
            });
            if let Some(state) = &request.state {
                payload["state"] = Value::String(state.clone());
            }
            let jwe = jose::encrypt_ecdh_es(
                encryption_jwk,
                payload.to_string().as_bytes(),
                None,
                Some(request.nonce.as_bytes()),
            )
            .map_err(WalletError::Jose)?;
            form.push(("response", jwe));
        }
    }

    let response = http
        .handle(http.post(&request.response_uri).form(&form))
        .await?;
    let status = response.status();
    let url = response.url().to_string();
    let text = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(protocol_error(&url, status.as_u16(), &text));
    }

    if text.trim().is_empty() {
        return Ok(SubmissionOutcome::default());
    }
    Ok(serde_json::from_str(&text).unwrap_or_default())
}

fn verifier_encryption_jwk(request: &ResolvedRequest) -> Result<&JwkPublic, WalletError> {
    request
        .client_metadata
        .as_ref()
        .and_then(super::request::ClientMetadata::encryption_jwk)
        .ok_or_else(|| WalletError::InvalidInput {
            attribute: "client_metadata".to_owned(),
            reason: "direct_post.jwt requested without an encryption key".to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_presentation_submission_points_at_root() {
        let submission = build_submission(
            "pd-1",
            &[("pid".to_owned(), "vc+sd-jwt".to_owned())],
        );
        assert_eq!(submission.definition_id, "pd-1");
        assert_eq!(submission.descriptor_map.len(), 1);
        assert_eq!(submission.descriptor_map[0].path, "$");
    }

    #[test]
    fn multiple_presentations_are_indexed() {
        let submission = build_submission(
            "pd-1",
            &[
                ("pid".to_owned(), "vc+sd-jwt".to_owned()),
                ("mdl".to_owned(), "vc+sd-jwt".to_owned()),
            ],
        );
        assert_eq!(submission.descriptor_map[0].path, "$[0]");
        assert_eq!(submission.descriptor_map[1].path, "$[1]");
    }
}
