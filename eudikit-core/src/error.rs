use thiserror::Error;

use crate::{jose::JoseError, keystore::KeystoreError, sd_jwt::SdJwtError};

/// Error outputs of the wallet core.
#[derive(Debug, Error)]
pub enum WalletError {
    /// The presented input is not valid for the requested operation.
    #[error("invalid {attribute}: {reason}")]
    InvalidInput {
        /// Name of the offending attribute.
        attribute: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Network request failure.
    #[error("network error for {url} (status {status:?}): {error}")]
    Network {
        /// Request URL.
        url: String,
        /// HTTP status, when a response was received.
        status: Option<u16>,
        /// Error detail.
        error: String,
    },

    /// An OAuth-style protocol error response from a server.
    #[error("protocol error `{code}`: {description}")]
    Protocol {
        /// The `error` code from the response body.
        code: String,
        /// The `error_description`, or an empty string.
        description: String,
    },

    /// JOSE processing failed.
    #[error(transparent)]
    Jose(#[from] JoseError),

    /// SD-JWT processing failed.
    #[error(transparent)]
    SdJwt(#[from] SdJwtError),

    /// Keystore operation failed.
    #[error(transparent)]
    Keystore(#[from] KeystoreError),

    /// Vault operation failed.
    #[error(transparent)]
    Store(#[from] eudikit_store::StoreError),

    /// The credential offer cannot be used by this wallet.
    #[error("unsupported credential offer: {0}")]
    UnsupportedOffer(String),

    /// The offer's pre-authorized grant requires a transaction code the
    /// caller did not supply.
    #[error("transaction code required")]
    TxCodeRequired,

    /// A required entry is missing from server metadata.
    #[error("issuer metadata is missing {0}")]
    MetadataMissing(String),

    /// The issued credential failed holder-side validation.
    #[error("issued credential rejected: {0}")]
    CredentialRejected(String),

    /// No stored credential satisfies the given input descriptor.
    #[error("no credential matches input descriptor `{descriptor_id}`")]
    UnfulfillableRequest {
        /// The descriptor that could not be satisfied.
        descriptor_id: String,
    },

    /// A referenced credential is not in the vault.
    #[error("credential {id} not found")]
    CredentialNotFound {
        /// Wallet-local credential id.
        id: String,
    },

    /// The browser auth flow did not complete before the deadline.
    #[error("authorization flow timed out")]
    AuthFlowTimedOut,

    /// The browser auth flow was superseded by a newer one.
    #[error("authorization flow cancelled")]
    AuthFlowCancelled,

    /// The browser auth flow completed with an error outcome.
    #[error("authorization flow failed: {0}")]
    AuthFlowFailed(String),

    /// A redirect callback arrived with an unknown `state` value.
    #[error("authorization callback state mismatch")]
    StateMismatch,

    /// A redirect callback arrived while no flow was pending.
    #[error("no pending authorization flow")]
    NoPendingFlow,

    /// The wallet is not enrolled yet.
    #[error("wallet is not enrolled")]
    NotEnrolled,

    /// System clock is unusable.
    #[error("unable to determine current time: {0}")]
    Clock(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for WalletError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}
