//! Device key management.
//!
//! The [`KeyStore`] trait is the seam to the platform keystore. Platform
//! integrations back it with hardware keys:
//!
//! - Android: Android Keystore, `setIsStrongBoxBacked(true)` for the
//!   [`KeyProtection::Hardware`] tier
//! - iOS: Secure Enclave keys via Keychain Services
//!
//! [`SoftwareKeyStore`](software::SoftwareKeyStore) is the in-process
//! fallback and the test double. [`DeviceKeyManager`] owns the
//! hardware-then-software fallback policy on top of whichever store the
//! host wires in.

mod software;

use std::sync::Arc;

use strum::{Display, EnumString};
use thiserror::Error;

pub use software::SoftwareKeyStore;

use crate::jose::{BoxError, JoseError, JwkPublic, Signer, SigningAlgorithm};

/// Protection tier of a device key, ordered strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum KeyProtection {
    /// Dedicated secure element (StrongBox-class hardware).
    Hardware,
    /// Trusted execution environment.
    Tee,
    /// In-process software key.
    Software,
}

impl KeyProtection {
    /// Tiers in fallback order, strongest first.
    pub const FALLBACK_ORDER: [Self; 3] = [Self::Hardware, Self::Tee, Self::Software];
}

/// Errors from keystore operations.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// No key exists under the given alias.
    #[error("key `{alias}` not found")]
    KeyNotFound {
        /// The missing alias.
        alias: String,
    },

    /// The requested protection tier is not available on this device.
    #[error("protection tier `{0}` is not available")]
    UnsupportedProtection(KeyProtection),

    /// No protection tier could satisfy a key request.
    #[error("no protection tier available for key `{alias}`")]
    NoTierAvailable {
        /// The alias that could not be provisioned.
        alias: String,
    },

    /// The keystore backend failed.
    #[error("keystore backend error: {0}")]
    Backend(String),
}

impl From<JoseError> for KeystoreError {
    fn from(value: JoseError) -> Self {
        Self::Backend(value.to_string())
    }
}

/// Description of a provisioned key.
#[derive(Debug, Clone)]
pub struct KeyInfo {
    /// The alias the key lives under.
    pub alias: String,
    /// Protection tier the key was created with.
    pub protection: KeyProtection,
    /// Public half as a JWK; `kid` is the RFC 7638 thumbprint.
    pub jwk: JwkPublic,
}

/// A platform keystore holding P-256 signing keys.
///
/// Private key material never crosses this interface; signing happens
/// behind it.
pub trait KeyStore: Send + Sync {
    /// Creates a P-256 key under `alias` with the requested protection.
    ///
    /// Generating an alias that already exists returns the existing key
    /// unchanged (idempotent); an alias, once bound, never silently
    /// changes protection tier.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::UnsupportedProtection`] when this store
    /// cannot provide the requested tier.
    fn generate(&self, alias: &str, protection: KeyProtection) -> Result<KeyInfo, KeystoreError>;

    /// Returns the key under `alias`, when present.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails.
    fn info(&self, alias: &str) -> Result<Option<KeyInfo>, KeystoreError>;

    /// Produces a raw JWS (`r || s`) ES256 signature over `message` with
    /// the key under `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::KeyNotFound`] for an unknown alias.
    fn sign(&self, alias: &str, message: &[u8]) -> Result<Vec<u8>, KeystoreError>;

    /// Deletes the key under `alias`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails.
    fn delete(&self, alias: &str) -> Result<(), KeystoreError>;
}

/// Policy layer owning alias provisioning and the
/// hardware-then-software fallback.
#[derive(Clone)]
pub struct DeviceKeyManager {
    store: Arc<dyn KeyStore>,
}

impl std::fmt::Debug for DeviceKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeyManager").finish_non_exhaustive()
    }
}

impl DeviceKeyManager {
    /// Creates a manager over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn KeyStore> {
        Arc::clone(&self.store)
    }

    /// Returns the existing key under `alias`, or provisions a new one
    /// trying [`KeyProtection::Hardware`], then [`KeyProtection::Tee`],
    /// then [`KeyProtection::Software`].
    ///
    /// The returned [`KeyInfo`] reports the tier actually achieved, so
    /// callers can refuse software keys where policy demands hardware.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::NoTierAvailable`] when every tier is
    /// refused, or the backend's error.
    pub fn obtain(&self, alias: &str) -> Result<KeyInfo, KeystoreError> {
        if let Some(existing) = self.store.info(alias)? {
            return Ok(existing);
        }

        for protection in KeyProtection::FALLBACK_ORDER {
            match self.store.generate(alias, protection) {
                Ok(info) => {
                    tracing::info!(alias, %protection, "provisioned device key");
                    return Ok(info);
                }
                Err(KeystoreError::UnsupportedProtection(tier)) => {
                    tracing::debug!(alias, %tier, "protection tier unavailable, falling back");
                }
                Err(other) => return Err(other),
            }
        }

        Err(KeystoreError::NoTierAvailable {
            alias: alias.to_owned(),
        })
    }

    /// Deletes and re-provisions the key under `alias`.
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`KeyStore::delete`] and
    /// [`DeviceKeyManager::obtain`].
    pub fn rotate(&self, alias: &str) -> Result<KeyInfo, KeystoreError> {
        self.store.delete(alias)?;
        self.obtain(alias)
    }

    /// Returns a [`Signer`] over the key under `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::KeyNotFound`] when the alias is not
    /// provisioned.
    pub fn signer(&self, alias: &str) -> Result<DeviceKeySigner, KeystoreError> {
        let info = self.store.info(alias)?.ok_or(KeystoreError::KeyNotFound {
            alias: alias.to_owned(),
        })?;
        Ok(DeviceKeySigner {
            store: Arc::clone(&self.store),
            info,
        })
    }
}

/// [`Signer`] implementation backed by a keystore alias.
pub struct DeviceKeySigner {
    store: Arc<dyn KeyStore>,
    info: KeyInfo,
}

impl DeviceKeySigner {
    /// The signing key's description.
    #[must_use]
    pub const fn info(&self) -> &KeyInfo {
        &self.info
    }
}

impl Signer for DeviceKeySigner {
    fn algorithm(&self) -> SigningAlgorithm {
        SigningAlgorithm::Es256
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, BoxError> {
        Ok(self.store.sign(&self.info.alias, message)?)
    }

    fn public_jwk(&self) -> Result<JwkPublic, BoxError> {
        Ok(self.info.jwk.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use crate::jose::Es256Verifier;
    use crate::jose::SignatureVerifier as _;

    use super::*;

    #[test]
    fn obtain_falls_back_to_software() {
        let manager = DeviceKeyManager::new(Arc::new(SoftwareKeyStore::new()));

        let info = manager.obtain("wallet-key").unwrap();
        assert_eq!(info.protection, KeyProtection::Software);
        assert_eq!(info.alias, "wallet-key");
        assert!(info.jwk.get("kid").is_some());
    }

    #[test]
    fn obtain_is_idempotent() {
        let manager = DeviceKeyManager::new(Arc::new(SoftwareKeyStore::new()));

        let first = manager.obtain("wallet-key").unwrap();
        let second = manager.obtain("wallet-key").unwrap();
        assert_eq!(first.jwk, second.jwk);
    }

    #[test]
    fn rotate_replaces_the_key() {
        let manager = DeviceKeyManager::new(Arc::new(SoftwareKeyStore::new()));

        let first = manager.obtain("wallet-key").unwrap();
        let second = manager.rotate("wallet-key").unwrap();
        assert_ne!(
            first.jwk.get("kid").and_then(Value::as_str),
            second.jwk.get("kid").and_then(Value::as_str)
        );
    }

    #[test]
    fn signer_produces_verifiable_signatures() {
        let manager = DeviceKeyManager::new(Arc::new(SoftwareKeyStore::new()));
        let info = manager.obtain("wallet-key").unwrap();
        let signer = manager.signer("wallet-key").unwrap();

        let signature = Signer::sign(&signer, b"message").unwrap();
        assert!(Es256Verifier
            .verify(b"message", &signature, &info.jwk)
            .unwrap());
    }

    #[test]
    fn signer_for_unknown_alias_fails() {
        let manager = DeviceKeyManager::new(Arc::new(SoftwareKeyStore::new()));
        assert!(matches!(
            manager.signer("missing"),
            Err(KeystoreError::KeyNotFound { .. })
        ));
    }
}
