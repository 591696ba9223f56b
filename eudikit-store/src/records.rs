//! Record types persisted in the vault.
//!
//! Records are CBOR-encoded as one table and encrypted as a single blob;
//! see [`crate::Vault`].

use serde::{Deserialize, Serialize};

/// The enrolled user's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Stable subject identifier assigned at enrollment.
    pub subject_id: String,
    /// Given name, when the user shared one.
    pub given_name: Option<String>,
    /// Family name, when the user shared one.
    pub family_name: Option<String>,
    /// Unix seconds at which enrollment completed.
    pub enrolled_at: u64,
    /// Alias of the device key provisioned for this user.
    pub key_alias: String,
}

/// An issued credential held by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Wallet-local credential id.
    pub id: String,
    /// Credential configuration id the credential was issued under.
    pub configuration_id: String,
    /// Issuer identifier (the `iss` of the issuer-signed JWT).
    pub issuer: String,
    /// Credential format, e.g. `vc+sd-jwt`.
    pub format: String,
    /// The credential in its compact serialization, disclosures included.
    pub compact: String,
    /// Alias of the device key the credential is bound to (`cnf.jwk`).
    pub key_alias: String,
    /// Unix seconds at which the credential was issued to the wallet.
    pub issued_at: u64,
    /// Human-readable name from the issuer's display metadata.
    pub display_name: Option<String>,
}

/// The wallet unit attestation issued by the wallet provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAttestation {
    /// The attestation JWT in compact serialization.
    pub jwt: String,
    /// Unix seconds after which the attestation is no longer usable.
    pub expires_at: u64,
}

/// Snapshot of a software-keystore key.
///
/// Only written by deployments using the software keystore; hardware-backed
/// keys never leave the platform keystore and have no record here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKey {
    /// Key alias.
    pub alias: String,
    /// Protection tier the key was created under.
    pub protection: String,
    /// PKCS#8/SEC1 PEM encoding of the private key.
    pub pem: Vec<u8>,
}

/// The full record table of a vault.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RecordTable {
    pub(crate) profile: Option<UserProfile>,
    pub(crate) credentials: Vec<StoredCredential>,
    pub(crate) attestation: Option<WalletAttestation>,
    pub(crate) keys: Vec<StoredKey>,
}
