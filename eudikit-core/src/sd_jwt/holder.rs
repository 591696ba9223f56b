//! Holder-side credential operations: decoding for matching, validation
//! on receipt, and presentation construction.

use std::str::FromStr as _;

use serde::Deserialize;
use serde_json::Value;

use crate::jose::{
    decode_jwt_part, jwk_thumbprint, verify_jwt_signature, Es256Verifier, JwkPublic, JwkSet,
    Signer, SigningAlgorithm,
};

use super::{
    key_binding::sign_kb_jwt, reconstruct, sd_hash, ClaimPath, Disclosure, JsonObject,
    KeyBindingChallenge, SdJwt, SdJwtError,
};

/// A decoded credential, ready for claim matching.
#[derive(Debug)]
pub struct CredentialView {
    /// Fully reconstructed claims.
    pub claims: JsonObject,
    /// The `iss` claim, when present.
    pub issuer: Option<String>,
    /// The `vct` (credential type) claim, when present.
    pub vct: Option<String>,
    /// The `cnf.jwk` holder binding, when present.
    pub confirmation_jwk: Option<JwkPublic>,
}

/// Outcome of building a presentation.
#[derive(Debug)]
pub struct Presentation {
    /// The `SD-JWT+KB` compact serialization to send.
    pub compact: String,
    /// Number of disclosures included.
    pub disclosed: usize,
    /// Requested paths that do not exist in the credential.
    pub unmatched: Vec<ClaimPath>,
}

/// Decodes a stored credential without verifying the issuer signature.
///
/// Matching against relying-party queries runs over credentials the
/// wallet already validated at issuance, so this skips the signature
/// work.
///
/// # Errors
///
/// Returns an error when the compact serialization, a disclosure or the
/// claim reconstruction is invalid.
pub fn decode_credential(compact: &str) -> Result<CredentialView, SdJwtError> {
    let sd_jwt = SdJwt::from_str(compact)?;
    let payload = sd_jwt.payload()?;
    let disclosures = parse_disclosures(&sd_jwt)?;
    let decoded = reconstruct(&payload, &disclosures)?;
    Ok(view(&payload, decoded.claims))
}

/// Validates a freshly issued credential: issuer signature, validity
/// window, holder binding, and claim reconstruction.
///
/// The wallet stores a credential only when this succeeds.
///
/// # Errors
///
/// Returns an error when any of the checks fail.
pub fn verify_credential(
    compact: &str,
    issuer_jwks: &JwkSet,
    expected_holder_jwk: Option<&JwkPublic>,
    now: u64,
) -> Result<CredentialView, SdJwtError> {
    let sd_jwt = SdJwt::from_str(compact)?;

    // Select the issuer key by `kid`; a single-key set needs no `kid`.
    let header: IssuerJwtHeader = {
        let header_part = sd_jwt
            .issuer_jwt()
            .split('.')
            .next()
            .ok_or_else(|| SdJwtError::InvalidJwt("empty issuer JWT".to_owned()))?;
        decode_jwt_part(header_part).map_err(|e| SdJwtError::InvalidJwt(e.to_string()))?
    };
    SigningAlgorithm::from_str(&header.alg)
        .map_err(|_| SdJwtError::Signature(format!("unsupported alg `{}`", header.alg)))?;
    let issuer_jwk = match &header.kid {
        Some(kid) => issuer_jwks
            .key_by_id(kid)
            .ok_or_else(|| SdJwtError::Signature(format!("no issuer key with kid `{kid}`")))?,
        None if issuer_jwks.keys.len() == 1 => &issuer_jwks.keys[0],
        None => {
            return Err(SdJwtError::Signature(
                "cannot select issuer key without kid".to_owned(),
            ))
        }
    };

    let _verified: jwt::Token<MinimalHeader, Value, jwt::token::Verified> =
        verify_jwt_signature(sd_jwt.issuer_jwt(), &Es256Verifier, issuer_jwk)
            .map_err(|e| SdJwtError::Signature(e.to_string()))?;

    let payload = sd_jwt.payload()?;

    if let Some(exp) = payload.get("exp").and_then(Value::as_u64) {
        if exp <= now {
            return Err(SdJwtError::NotValid(format!("expired at {exp}")));
        }
    }
    if let Some(nbf) = payload.get("nbf").and_then(Value::as_u64) {
        if nbf > now {
            return Err(SdJwtError::NotValid(format!("not valid before {nbf}")));
        }
    }

    let confirmation = confirmation_jwk(&payload);
    if let Some(expected) = expected_holder_jwk {
        let Some(actual) = &confirmation else {
            return Err(SdJwtError::MissingConfirmationKey);
        };
        let expected_thumbprint =
            jwk_thumbprint(expected).map_err(|e| SdJwtError::InvalidJwt(e.to_string()))?;
        let actual_thumbprint =
            jwk_thumbprint(actual).map_err(|e| SdJwtError::InvalidJwt(e.to_string()))?;
        if expected_thumbprint != actual_thumbprint {
            return Err(SdJwtError::ConfirmationKeyMismatch);
        }
    }

    let disclosures = parse_disclosures(&sd_jwt)?;
    let decoded = reconstruct(&payload, &disclosures)?;
    Ok(view(&payload, decoded.claims))
}

/// Builds an `SD-JWT+KB` presentation disclosing exactly the disclosures
/// covering `requested` paths.
///
/// Requested paths that do not exist in the credential are reported in
/// [`Presentation::unmatched`], not treated as errors; the caller decides
/// whether a partial presentation is acceptable.
///
/// # Errors
///
/// Returns an error when the credential is malformed or KB-JWT signing
/// fails.
pub fn present(
    compact: &str,
    requested: &[ClaimPath],
    challenge: &KeyBindingChallenge,
    signer: &dyn Signer,
    now: u64,
) -> Result<Presentation, SdJwtError> {
    let sd_jwt = SdJwt::from_str(compact)?;
    let payload = sd_jwt.payload()?;
    let disclosures = parse_disclosures(&sd_jwt)?;
    let decoded = reconstruct(&payload, &disclosures)?;

    let (selected, unmatched) = decoded.disclosures_covering(requested);
    let selected_serialized: Vec<String> = selected
        .iter()
        .map(|&index| sd_jwt.disclosures()[index].clone())
        .collect();

    let disclosed = selected_serialized.len();
    let prefix = SdJwt::new(sd_jwt.issuer_jwt().to_owned(), selected_serialized).to_string();
    let hash = sd_hash(&prefix);
    let kb_jwt = sign_kb_jwt(challenge, hash, now, signer)?;

    Ok(Presentation {
        compact: format!("{prefix}{kb_jwt}"),
        disclosed,
        unmatched,
    })
}

#[derive(Debug, Deserialize)]
struct IssuerJwtHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// Minimal header for signature verification; the full header (with
/// `typ: vc+sd-jwt` etc.) does not fit [`jwt::Header`].
#[derive(Debug, Deserialize)]
struct MinimalHeader {
    alg: jwt::AlgorithmType,
}

impl jwt::JoseHeader for MinimalHeader {
    fn algorithm_type(&self) -> jwt::AlgorithmType {
        self.alg
    }
}

fn parse_disclosures(sd_jwt: &SdJwt) -> Result<Vec<Disclosure>, SdJwtError> {
    sd_jwt
        .disclosures()
        .iter()
        .map(|serialized| Disclosure::try_from(serialized.clone()))
        .collect()
}

fn view(payload: &JsonObject, claims: JsonObject) -> CredentialView {
    CredentialView {
        issuer: payload
            .get("iss")
            .and_then(Value::as_str)
            .map(str::to_owned),
        vct: payload
            .get("vct")
            .and_then(Value::as_str)
            .map(str::to_owned),
        confirmation_jwk: confirmation_jwk(payload),
        claims,
    }
}

fn confirmation_jwk(payload: &JsonObject) -> Option<JwkPublic> {
    payload
        .get("cnf")
        .and_then(|cnf| cnf.get("jwk"))
        .and_then(Value::as_object)
        .cloned()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use openssl::{ec::EcKey, pkey::Private};
    use serde_json::json;

    use crate::claim_path;
    use crate::jose::{base64_url_encode, public_jwk_from_ec_key, sign_es256_raw};
    use crate::keystore::{DeviceKeyManager, DeviceKeySigner, KeyInfo, SoftwareKeyStore};
    use crate::sd_jwt::key_binding::validate_kb_jwt;
    use crate::sd_jwt::SdJwtKb;

    use super::*;

    pub(crate) const NOW: u64 = 1_700_000_000;
    const ISSUER: &str = "https://issuer.example.com";

    pub(crate) struct TestIssuer {
        key: EcKey<Private>,
        pub(crate) jwks: JwkSet,
    }

    impl TestIssuer {
        pub(crate) fn new() -> Self {
            let key = crate::jose::generate_ec_key().unwrap();
            let mut jwk = public_jwk_from_ec_key(&key, Some("issuer-key-1")).unwrap();
            jwk.insert("use".to_owned(), json!("sig"));
            Self {
                key,
                jwks: JwkSet { keys: vec![jwk] },
            }
        }

        /// Issues a PID-style SD-JWT bound to `holder_jwk`, with
        /// `family_name`, `given_name`, `address.region` and
        /// `nationalities[*]` selectively disclosable.
        pub(crate) fn issue(&self, holder_jwk: &JwkPublic) -> String {
            let family = Disclosure::new(
                Disclosure::new_salt(),
                Some("family_name".to_owned()),
                json!("Mustermann"),
            );
            let given = Disclosure::new(
                Disclosure::new_salt(),
                Some("given_name".to_owned()),
                json!("Erika"),
            );
            let region = Disclosure::new(
                Disclosure::new_salt(),
                Some("region".to_owned()),
                json!("Sachsen-Anhalt"),
            );
            let address = Disclosure::new(
                Disclosure::new_salt(),
                Some("address".to_owned()),
                json!({"_sd": [region.digest()], "country": "DE"}),
            );
            let de = Disclosure::new(Disclosure::new_salt(), None, json!("DE"));

            let payload = json!({
                "iss": ISSUER,
                "iat": NOW - 60,
                "exp": NOW + 86_400,
                "vct": "urn:eudi:pid:1",
                "_sd": [family.digest(), given.digest(), address.digest()],
                "nationalities": [{"...": de.digest()}],
                "_sd_alg": "sha-256",
                "cnf": {"jwk": holder_jwk},
            });

            let header = json!({"alg": "ES256", "typ": "vc+sd-jwt", "kid": "issuer-key-1"});
            let signing_input = format!(
                "{}.{}",
                base64_url_encode(header.to_string()),
                base64_url_encode(payload.to_string())
            );
            let signature = sign_es256_raw(&self.key, signing_input.as_bytes()).unwrap();
            let jwt = format!("{signing_input}.{}", base64_url_encode(signature));

            format!(
                "{jwt}~{}~{}~{}~{}~{}~",
                family.as_str(),
                given.as_str(),
                address.as_str(),
                region.as_str(),
                de.as_str()
            )
        }
    }

    pub(crate) fn holder() -> (DeviceKeySigner, KeyInfo) {
        let manager = DeviceKeyManager::new(Arc::new(SoftwareKeyStore::new()));
        let info = manager.obtain("holder-key").unwrap();
        (manager.signer("holder-key").unwrap(), info)
    }

    #[test]
    fn verify_accepts_a_well_formed_credential() {
        let issuer = TestIssuer::new();
        let (_, holder_info) = holder();
        let compact = issuer.issue(&holder_info.jwk);

        let view =
            verify_credential(&compact, &issuer.jwks, Some(&holder_info.jwk), NOW).unwrap();
        assert_eq!(view.issuer.as_deref(), Some(ISSUER));
        assert_eq!(view.vct.as_deref(), Some("urn:eudi:pid:1"));
        assert_eq!(view.claims.get("family_name"), Some(&json!("Mustermann")));
        assert_eq!(
            claim_path!["address", "region"].resolve(&view.claims),
            Some(&json!("Sachsen-Anhalt"))
        );
    }

    #[test]
    fn verify_rejects_a_foreign_issuer_key() {
        let issuer = TestIssuer::new();
        let other_issuer = TestIssuer::new();
        let (_, holder_info) = holder();
        let compact = issuer.issue(&holder_info.jwk);

        let result = verify_credential(&compact, &other_issuer.jwks, None, NOW);
        assert!(matches!(result, Err(SdJwtError::Signature(_))));
    }

    #[test]
    fn verify_rejects_an_expired_credential() {
        let issuer = TestIssuer::new();
        let (_, holder_info) = holder();
        let compact = issuer.issue(&holder_info.jwk);

        let result = verify_credential(&compact, &issuer.jwks, None, NOW + 200_000);
        assert!(matches!(result, Err(SdJwtError::NotValid(_))));
    }

    #[test]
    fn verify_rejects_a_foreign_holder_binding() {
        let issuer = TestIssuer::new();
        let (_, holder_info) = holder();
        let (_, other_info) = holder();
        let compact = issuer.issue(&holder_info.jwk);

        let result = verify_credential(&compact, &issuer.jwks, Some(&other_info.jwk), NOW);
        assert!(matches!(result, Err(SdJwtError::ConfirmationKeyMismatch)));
    }

    #[test]
    fn verify_rejects_a_tampered_payload() {
        let issuer = TestIssuer::new();
        let (_, holder_info) = holder();
        let compact = issuer.issue(&holder_info.jwk);

        // Swap the issuer JWT payload for a forged one.
        let (jwt, rest) = compact.split_once('~').unwrap();
        let mut jwt_parts: Vec<&str> = jwt.split('.').collect();
        let forged = base64_url_encode(json!({"iss": ISSUER, "admin": true}).to_string());
        jwt_parts[1] = &forged;
        let tampered = format!("{}~{rest}", jwt_parts.join("."));

        let result = verify_credential(&tampered, &issuer.jwks, None, NOW);
        assert!(matches!(result, Err(SdJwtError::Signature(_))));
    }

    #[test]
    fn present_discloses_exactly_the_requested_claims() {
        let issuer = TestIssuer::new();
        let (signer, holder_info) = holder();
        let compact = issuer.issue(&holder_info.jwk);

        let challenge = KeyBindingChallenge {
            aud: "https://verifier.example.org".to_owned(),
            nonce: "n-0S6_WzA2Mj".to_owned(),
        };
        let requested = [claim_path!["family_name"], claim_path!["address", "region"]];
        let presentation = present(&compact, &requested, &challenge, &signer, NOW).unwrap();
        assert!(presentation.unmatched.is_empty());
        // family_name + address + region; given_name and the nationality
        // stay concealed.
        assert_eq!(presentation.disclosed, 3);

        let parsed: SdJwtKb = presentation.compact.parse().unwrap();
        let prefix = parsed.sd_jwt.to_string();
        validate_kb_jwt(
            parsed.key_binding_jwt(),
            &holder_info.jwk,
            &challenge,
            NOW,
            &sd_hash(&prefix),
        )
        .unwrap();

        // The disclosed view contains the requested claims and only them.
        let disclosed_view = {
            let payload = parsed.sd_jwt.payload().unwrap();
            let disclosures = parse_disclosures(&parsed.sd_jwt).unwrap();
            reconstruct(&payload, &disclosures).unwrap().claims
        };
        assert_eq!(disclosed_view.get("family_name"), Some(&json!("Mustermann")));
        assert!(disclosed_view.get("given_name").is_none());
        assert_eq!(
            claim_path!["address", "region"].resolve(&disclosed_view),
            Some(&json!("Sachsen-Anhalt"))
        );
        assert_eq!(disclosed_view.get("nationalities"), Some(&json!([])));
    }

    #[test]
    fn present_reports_unmatched_paths() {
        let issuer = TestIssuer::new();
        let (signer, holder_info) = holder();
        let compact = issuer.issue(&holder_info.jwk);

        let challenge = KeyBindingChallenge {
            aud: "https://verifier.example.org".to_owned(),
            nonce: "nonce".to_owned(),
        };
        let requested = [claim_path!["shoe_size"]];
        let presentation = present(&compact, &requested, &challenge, &signer, NOW).unwrap();

        assert_eq!(presentation.disclosed, 0);
        assert_eq!(presentation.unmatched, vec![claim_path!["shoe_size"]]);
    }

    #[test]
    fn decode_without_verification_exposes_claims() {
        let issuer = TestIssuer::new();
        let (_, holder_info) = holder();
        let compact = issuer.issue(&holder_info.jwk);

        let view = decode_credential(&compact).unwrap();
        assert_eq!(view.claims.get("given_name"), Some(&json!("Erika")));
        assert!(view.confirmation_jwk.is_some());
    }
}
