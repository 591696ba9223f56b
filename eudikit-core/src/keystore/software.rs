//! In-process software keystore.

use std::{
    collections::HashMap,
    str::FromStr,
    sync::{Mutex, PoisonError},
};

use openssl::{ec::EcKey, pkey::Private};

use eudikit_store::StoredKey;

use crate::jose::{self, jwk_thumbprint};

use super::{KeyInfo, KeyProtection, KeyStore, KeystoreError};

struct SoftKey {
    key: EcKey<Private>,
    protection: KeyProtection,
}

/// [`KeyStore`] implementation holding P-256 keys in process memory.
///
/// Only the [`KeyProtection::Software`] tier is supported; requests for
/// hardware tiers return [`KeystoreError::UnsupportedProtection`], which
/// is what lets [`DeviceKeyManager`](super::DeviceKeyManager) exercise its
/// fallback. Keys can be snapshotted to [`StoredKey`] records for vault
/// persistence; deployments with a real platform keystore never do this.
#[derive(Default)]
pub struct SoftwareKeyStore {
    keys: Mutex<HashMap<String, SoftKey>>,
}

impl SoftwareKeyStore {
    /// Creates an empty software keystore.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a keystore from vault snapshots.
    ///
    /// # Errors
    ///
    /// Returns an error when a snapshot holds an invalid PEM or an
    /// unknown protection tier.
    pub fn from_snapshots(snapshots: &[StoredKey]) -> Result<Self, KeystoreError> {
        let store = Self::new();
        {
            let mut keys = store.lock();
            for snapshot in snapshots {
                let key = jose::ec_private_key_from_pem(&snapshot.pem)?;
                let protection = KeyProtection::from_str(&snapshot.protection).map_err(|_| {
                    KeystoreError::Backend(format!(
                        "unknown protection tier `{}` in key snapshot",
                        snapshot.protection
                    ))
                })?;
                keys.insert(snapshot.alias.clone(), SoftKey { key, protection });
            }
        }
        Ok(store)
    }

    /// Exports all keys as vault snapshot records.
    ///
    /// # Errors
    ///
    /// Returns an error when PEM serialization fails.
    pub fn snapshots(&self) -> Result<Vec<StoredKey>, KeystoreError> {
        let keys = self.lock();
        let mut snapshots = Vec::with_capacity(keys.len());
        for (alias, soft_key) in keys.iter() {
            snapshots.push(StoredKey {
                alias: alias.clone(),
                protection: soft_key.protection.to_string(),
                pem: jose::ec_private_key_to_pem(&soft_key.key)?,
            });
        }
        snapshots.sort_by(|a, b| a.alias.cmp(&b.alias));
        Ok(snapshots)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SoftKey>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn info_for(alias: &str, soft_key: &SoftKey) -> Result<KeyInfo, KeystoreError> {
        let bare_jwk = jose::public_jwk_from_ec_key(&soft_key.key, None)?;
        let kid = jwk_thumbprint(&bare_jwk)?;
        let jwk = jose::public_jwk_from_ec_key(&soft_key.key, Some(&kid))?;
        Ok(KeyInfo {
            alias: alias.to_owned(),
            protection: soft_key.protection,
            jwk,
        })
    }
}

impl KeyStore for SoftwareKeyStore {
    fn generate(&self, alias: &str, protection: KeyProtection) -> Result<KeyInfo, KeystoreError> {
        if protection != KeyProtection::Software {
            return Err(KeystoreError::UnsupportedProtection(protection));
        }

        let mut keys = self.lock();
        if let Some(existing) = keys.get(alias) {
            return Self::info_for(alias, existing);
        }

        let soft_key = SoftKey {
            key: jose::generate_ec_key()?,
            protection,
        };
        let info = Self::info_for(alias, &soft_key)?;
        keys.insert(alias.to_owned(), soft_key);
        Ok(info)
    }

    fn info(&self, alias: &str) -> Result<Option<KeyInfo>, KeystoreError> {
        let keys = self.lock();
        keys.get(alias)
            .map(|soft_key| Self::info_for(alias, soft_key))
            .transpose()
    }

    fn sign(&self, alias: &str, message: &[u8]) -> Result<Vec<u8>, KeystoreError> {
        let keys = self.lock();
        let soft_key = keys.get(alias).ok_or_else(|| KeystoreError::KeyNotFound {
            alias: alias.to_owned(),
        })?;
        Ok(jose::sign_es256_raw(&soft_key.key, message)?)
    }

    fn delete(&self, alias: &str) -> Result<(), KeystoreError> {
        self.lock().remove(alias);
        Ok(())
    }
}
