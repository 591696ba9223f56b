//! Encrypted on-device storage for eudikit.
//!
//! The store keeps everything a wallet instance persists — the user profile,
//! issued credentials and the wallet unit attestation — in a single
//! file-backed vault. Every record is encrypted with XChaCha20-Poly1305
//! under a random vault key; the vault key itself is sealed by a
//! [`VaultKeySealer`], the seam behind which platform integrations place
//! their hardware-backed keystore (Android Keystore, iOS Keychain). A
//! software sealer is provided for development and tests.

mod crypto;
mod error;
mod format;
mod records;
mod sealer;
mod vault;

pub use crypto::VaultKey;
pub use error::{StoreError, StoreResult};
pub use records::{StoredCredential, StoredKey, UserProfile, WalletAttestation};
pub use sealer::{SoftwareSealer, VaultKeySealer};
pub use vault::{Vault, VaultId};
