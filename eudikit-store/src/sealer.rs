//! Sealing of the vault key.
//!
//! The vault key never touches disk in the clear. A [`VaultKeySealer`]
//! wraps (seals) it for storage inside the vault file header and unwraps
//! it on open. Platform integrations implement this trait on top of their
//! hardware keystore:
//!
//! - Android: Android Keystore AES key, `setIsStrongBoxBacked` where
//!   available
//! - iOS: Keychain Services with `kSecAttrAccessibleWhenUnlockedThisDeviceOnly`
//!
//! The device key behind a sealer MUST be non-exportable when the platform
//! supports it, and the sealer MUST use authenticated encryption with the
//! provided associated data included in the tag computation.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretBox};
use sha2::Sha256;

use crate::{crypto, error::StoreError, format::NONCE_SIZE, StoreResult};

/// Device-protected authenticated encryption for the vault key.
pub trait VaultKeySealer: Send + Sync {
    /// Seals (encrypts) `plaintext` with the device-bound key.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying keystore is unavailable or
    /// rejects the operation.
    fn seal(&self, associated_data: &[u8], plaintext: &[u8]) -> StoreResult<Vec<u8>>;

    /// Opens (decrypts) a previously sealed blob.
    ///
    /// # Errors
    ///
    /// Returns an error when authentication fails or the keystore is
    /// unavailable.
    fn open(&self, associated_data: &[u8], ciphertext: &[u8]) -> StoreResult<Vec<u8>>;
}

/// Software sealer deriving its sealing key from a caller-provided device
/// secret with HKDF-SHA256.
///
/// Not device-bound; intended for development, tests and platforms without
/// a hardware keystore.
pub struct SoftwareSealer {
    sealing_key: SecretBox<[u8; 32]>,
}

const HKDF_INFO: &[u8] = b"eudikit:software-sealer:v1";

impl SoftwareSealer {
    /// Derives a sealer from the given device secret.
    #[must_use]
    pub fn new(device_secret: &[u8]) -> Self {
        let hk = Hkdf::<Sha256>::new(None, device_secret);
        let mut okm = [0u8; 32];
        hk.expand(HKDF_INFO, &mut okm)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Self {
            sealing_key: SecretBox::new(Box::new(okm)),
        }
    }
}

impl VaultKeySealer for SoftwareSealer {
    fn seal(&self, associated_data: &[u8], plaintext: &[u8]) -> StoreResult<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new_from_slice(self.sealing_key.expose_secret())
            .expect("key length is always 32");

        let nonce_bytes = crypto::generate_nonce();
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|_| StoreError::Sealer("software seal failed".into()))?;

        // nonce || ciphertext
        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, associated_data: &[u8], ciphertext: &[u8]) -> StoreResult<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(StoreError::Sealer("sealed blob too short".into()));
        }
        let (nonce_bytes, body) = ciphertext.split_at(NONCE_SIZE);

        let cipher = XChaCha20Poly1305::new_from_slice(self.sealing_key.expose_secret())
            .expect("key length is always 32");

        cipher
            .decrypt(
                XNonce::from_slice(nonce_bytes),
                Payload {
                    msg: body,
                    aad: associated_data,
                },
            )
            .map_err(|_| StoreError::Sealer("software open failed (wrong secret or tampered)".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let sealer = SoftwareSealer::new(b"device secret");
        let sealed = sealer.seal(b"aad", b"vault key material").unwrap();
        assert_ne!(&sealed[NONCE_SIZE..], b"vault key material".as_slice());

        let opened = sealer.open(b"aad", &sealed).unwrap();
        assert_eq!(opened, b"vault key material");
    }

    #[test]
    fn different_secret_cannot_open() {
        let sealed = SoftwareSealer::new(b"secret a")
            .seal(b"aad", b"payload")
            .unwrap();

        let result = SoftwareSealer::new(b"secret b").open(b"aad", &sealed);
        assert!(matches!(result, Err(StoreError::Sealer(_))));
    }

    #[test]
    fn mismatched_aad_cannot_open() {
        let sealer = SoftwareSealer::new(b"device secret");
        let sealed = sealer.seal(b"aad one", b"payload").unwrap();

        let result = sealer.open(b"aad two", &sealed);
        assert!(matches!(result, Err(StoreError::Sealer(_))));
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let sealer = SoftwareSealer::new(b"device secret");
        let result = sealer.open(b"aad", &[0u8; 7]);
        assert!(matches!(result, Err(StoreError::Sealer(_))));
    }
}
