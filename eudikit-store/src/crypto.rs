//! AEAD primitives for vault encryption.
//!
//! All vault contents are encrypted with XChaCha20-Poly1305. Associated
//! data binds each ciphertext to the vault it belongs to and to a domain
//! separation label, so records cannot be swapped between vaults or reused
//! in a different role within the same vault.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{error::StoreError, format::NONCE_SIZE, vault::VaultId, StoreResult};

/// Vault encryption key (256-bit).
///
/// Generated randomly when a vault is created and stored only in sealed
/// form. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey([u8; 32]);

impl VaultKey {
    /// Creates a vault key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generates a new random vault key.
    ///
    /// # Panics
    ///
    /// Panics if the system's random number generator fails.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Associated data: `vault_id || label`.
fn build_associated_data(vault_id: &VaultId, label: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(vault_id.as_bytes().len() + label.len());
    aad.extend_from_slice(vault_id.as_bytes());
    aad.extend_from_slice(label);
    aad
}

/// Generates a random XChaCha20-Poly1305 nonce.
///
/// # Panics
///
/// Panics if the system's random number generator fails.
pub(crate) fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce).expect("getrandom failed");
    nonce
}

/// Encrypts plaintext for vault storage.
///
/// Returns the ciphertext (with auth tag) and the random nonce used.
pub(crate) fn vault_encrypt(
    key: &VaultKey,
    vault_id: &VaultId,
    label: &[u8],
    plaintext: &[u8],
) -> StoreResult<(Vec<u8>, [u8; NONCE_SIZE])> {
    let cipher =
        XChaCha20Poly1305::new_from_slice(key.as_bytes()).expect("key length is always 32");

    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);
    let aad = build_associated_data(vault_id, label);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| StoreError::encryption("XChaCha20-Poly1305 encryption failed"))?;

    Ok((ciphertext, nonce_bytes))
}

/// Decrypts ciphertext from vault storage.
///
/// Fails when authentication fails, i.e. on a wrong key, tampered data or
/// mismatched associated data.
pub(crate) fn vault_decrypt(
    key: &VaultKey,
    vault_id: &VaultId,
    label: &[u8],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> StoreResult<Vec<u8>> {
    let cipher =
        XChaCha20Poly1305::new_from_slice(key.as_bytes()).expect("key length is always 32");

    let nonce = XNonce::from_slice(nonce);
    let aad = build_associated_data(vault_id, label);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| StoreError::decryption("XChaCha20-Poly1305 decryption failed"))
}
