//! Error types for vault operations.

use thiserror::Error;

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while operating on the vault.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O operation on the vault file failed.
    #[error("vault i/o failed while {context}: {source}")]
    Io {
        /// What the vault was doing when the error occurred.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file does not start with the vault magic bytes.
    #[error("not a vault file (bad magic)")]
    InvalidMagic,

    /// The vault file uses an unsupported format version.
    #[error("unsupported vault version {found}, expected {expected}")]
    InvalidVersion {
        /// Version this build writes and reads.
        expected: u32,
        /// Version found in the file.
        found: u32,
    },

    /// A vault already exists at the target path.
    #[error("vault already exists")]
    AlreadyExists,

    /// No vault exists at the target path.
    #[error("vault not found")]
    NotFound,

    /// Record or file (de)serialization failed.
    #[error("vault serialization failed: {0}")]
    Serialization(String),

    /// AEAD encryption failed.
    #[error("vault encryption failed: {context}")]
    EncryptionFailed {
        /// What was being encrypted.
        context: String,
    },

    /// AEAD decryption failed. Either the key is wrong or the data was
    /// tampered with; both are hard errors.
    #[error("vault decryption failed: {context}")]
    DecryptionFailed {
        /// What was being decrypted.
        context: String,
    },

    /// The vault key sealer rejected the operation.
    #[error("vault key sealer failed: {0}")]
    Sealer(String),

    /// Lookup of a credential record failed.
    #[error("credential {id} not found")]
    CredentialNotFound {
        /// The credential id that was not found.
        id: String,
    },
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn encryption(context: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            context: context.into(),
        }
    }

    pub(crate) fn decryption(context: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            context: context.into(),
        }
    }
}
