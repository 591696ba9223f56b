//! OpenID4VP presentation, wallet side.
//!
//! The flow: resolve the authorization request, match stored credentials
//! against the presentation definition, let the caller pick one
//! candidate per descriptor, then build the `SD-JWT+KB` presentations
//! disclosing exactly the matched claims and POST the response.

mod definition;
mod request;
mod response;

pub use definition::{
    match_credentials, CandidateMatch, Constraints, DescriptorMatch, FieldConstraint,
    InputDescriptor, PresentationDefinition,
};
pub use request::{resolve, ClientMetadata, ResolvedRequest, ResponseMode};
pub use response::{
    build_submission, DescriptorMapEntry, PresentationSubmission, SubmissionOutcome,
};

use std::sync::Arc;

use serde_json::Value;

use eudikit_store::StoredCredential;

use crate::{
    clock::now_or,
    error::WalletError,
    http::HttpClient,
    keystore::DeviceKeyManager,
    sd_jwt::{self, KeyBindingChallenge},
};

/// A resolved request with the wallet's matching credentials.
#[derive(Debug)]
pub struct MatchedRequest {
    /// The resolved authorization request.
    pub resolved: ResolvedRequest,
    /// Candidates per input descriptor, in definition order.
    pub matches: Vec<DescriptorMatch>,
}

impl MatchedRequest {
    /// Whether every descriptor has at least one candidate.
    #[must_use]
    pub fn is_fulfillable(&self) -> bool {
        self.matches.iter().all(|entry| !entry.candidates.is_empty())
    }
}

/// OpenID4VP wallet client.
pub struct PresentationClient {
    http: Arc<HttpClient>,
}

impl PresentationClient {
    /// Creates a client over the shared HTTP stack.
    #[must_use]
    pub const fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    /// Resolves an authorization request and matches the stored
    /// credentials against it.
    ///
    /// Credentials that fail to decode are skipped with a warning rather
    /// than failing the whole request.
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be resolved.
    pub async fn handle_request(
        &self,
        uri: &str,
        credentials: &[StoredCredential],
    ) -> Result<MatchedRequest, WalletError> {
        let resolved = request::resolve(&self.http, uri).await?;

        let mut views = Vec::with_capacity(credentials.len());
        for credential in credentials {
            match sd_jwt::decode_credential(&credential.compact) {
                Ok(view) => views.push((credential.id.clone(), view)),
                Err(error) => {
                    tracing::warn!(id = %credential.id, %error, "skipping undecodable credential");
                }
            }
        }

        let matches = definition::match_credentials(&resolved.presentation_definition, &views);
        tracing::info!(
            client_id = %resolved.client_id,
            descriptors = matches.len(),
            "resolved authorization request"
        );
        Ok(MatchedRequest { resolved, matches })
    }

    /// Builds and submits the presentations for the caller's selections
    /// (one credential id per descriptor id).
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::UnfulfillableRequest`] when a descriptor
    /// has no selection or the selected credential is not a candidate for
    /// it, and propagates signing/transport failures.
    pub async fn present(
        &self,
        request: &MatchedRequest,
        selections: &[(String, String)],
        credentials: &[StoredCredential],
        keys: &DeviceKeyManager,
        now: Option<u64>,
    ) -> Result<SubmissionOutcome, WalletError> {
        let now = now_or(now)?;
        let challenge = KeyBindingChallenge {
            aud: request.resolved.client_id.clone(),
            nonce: request.resolved.nonce.clone(),
        };

        let mut presentations: Vec<(String, String, String)> = Vec::new();
        for descriptor in &request.resolved.presentation_definition.input_descriptors {
            let unfulfillable = || WalletError::UnfulfillableRequest {
                descriptor_id: descriptor.id.clone(),
            };

            let (_, credential_id) = selections
                .iter()
                .find(|(descriptor_id, _)| *descriptor_id == descriptor.id)
                .ok_or_else(unfulfillable)?;
            let candidate = request
                .matches
                .iter()
                .find(|entry| entry.descriptor_id == descriptor.id)
                .and_then(|entry| {
                    entry
                        .candidates
                        .iter()
                        .find(|candidate| candidate.credential_id == *credential_id)
                })
                .ok_or_else(unfulfillable)?;
            let stored = credentials
                .iter()
                .find(|credential| credential.id == *credential_id)
                .ok_or_else(|| WalletError::CredentialNotFound {
                    id: credential_id.clone(),
                })?;

            let signer = keys.signer(&stored.key_alias)?;
            let presentation = sd_jwt::present(
                &stored.compact,
                &candidate.matched_paths,
                &challenge,
                &signer,
                now,
            )?;
            if !presentation.unmatched.is_empty() {
                tracing::warn!(
                    descriptor = %descriptor.id,
                    unmatched = presentation.unmatched.len(),
                    "presentation omits paths that vanished since matching"
                );
            }

            presentations.push((
                descriptor.id.clone(),
                stored.format.clone(),
                presentation.compact,
            ));
        }

        let vp_token = if presentations.len() == 1 {
            Value::String(presentations[0].2.clone())
        } else {
            Value::Array(
                presentations
                    .iter()
                    .map(|(_, _, compact)| Value::String(compact.clone()))
                    .collect(),
            )
        };
        let descriptors: Vec<(String, String)> = presentations
            .into_iter()
            .map(|(descriptor_id, format, _)| (descriptor_id, format))
            .collect();
        let submission = response::build_submission(
            &request.resolved.presentation_definition.id,
            &descriptors,
        );

        response::submit(&self.http, &request.resolved, &vp_token, &submission).await
    }
}
