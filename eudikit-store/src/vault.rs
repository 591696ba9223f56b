//! The file-backed vault.
//!
//! A vault is a single file: magic, format version, then a CBOR body
//! holding the vault id, the sealed vault key and one encrypted record
//! table. Mutations rewrite the whole file through an atomic
//! write-to-temp-then-rename, so a crash mid-write leaves the previous
//! state intact. A wallet stores tens of records; rewriting the table
//! wholesale keeps the format auditable.

use std::{
    io::Write as _,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::{
    crypto::{self, VaultKey},
    error::StoreError,
    format::{LABEL_KEY_WRAP, LABEL_RECORDS, MAGIC, NONCE_SIZE, VERSION},
    records::RecordTable,
    sealer::VaultKeySealer,
    StoreResult, StoredCredential, StoredKey, UserProfile, WalletAttestation,
};

/// Identifier of a vault instance, bound into every ciphertext's
/// associated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultId([u8; 16]);

impl VaultId {
    /// Creates a vault id from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Generates a random vault id.
    ///
    /// # Panics
    ///
    /// Panics if the system's random number generator fails.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Returns the raw id bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Hex rendering, for logs and diagnostics.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// CBOR body of the vault file, following the magic and version.
#[derive(Serialize, Deserialize)]
struct VaultFileBody {
    vault_id: Vec<u8>,
    sealed_key: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

/// Handle to an open vault.
///
/// The handle is `Send + Sync`; an interior lock serializes mutations.
/// Every mutating call is durable on return: the record table has been
/// re-encrypted and the vault file atomically replaced.
pub struct Vault {
    path: PathBuf,
    vault_id: VaultId,
    key: VaultKey,
    sealer: Box<dyn VaultKeySealer>,
    records: RwLock<RecordTable>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("path", &self.path)
            .field("vault_id", &self.vault_id.to_hex())
            .finish_non_exhaustive()
    }
}

impl Vault {
    /// Creates a new vault at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when a file is already
    /// present at `path`, or an I/O, sealer or encryption error.
    pub fn create(path: impl AsRef<Path>, sealer: Box<dyn VaultKeySealer>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(StoreError::AlreadyExists);
        }

        let vault = Self {
            path,
            vault_id: VaultId::generate(),
            key: VaultKey::generate(),
            sealer,
            records: RwLock::new(RecordTable::default()),
        };
        let records = vault.read_lock().clone();
        vault.persist(&records)?;
        Ok(vault)
    }

    /// Opens an existing vault at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no file exists at `path`,
    /// [`StoreError::InvalidMagic`] / [`StoreError::InvalidVersion`] on a
    /// foreign or incompatible file, and a decryption error when the
    /// sealer cannot recover the vault key or any record fails
    /// authentication.
    pub fn open(path: impl AsRef<Path>, sealer: Box<dyn VaultKeySealer>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StoreError::NotFound);
        }

        let raw = std::fs::read(&path).map_err(|e| StoreError::io("reading vault file", e))?;
        if raw.len() < MAGIC.len() + 4 {
            return Err(StoreError::InvalidMagic);
        }
        let (magic, rest) = raw.split_at(MAGIC.len());
        if magic != MAGIC {
            return Err(StoreError::InvalidMagic);
        }
        let (version_bytes, body_bytes) = rest.split_at(4);
        let version = u32::from_be_bytes(
            version_bytes
                .try_into()
                .expect("split_at(4) yields exactly 4 bytes"),
        );
        if version != VERSION {
            return Err(StoreError::InvalidVersion {
                expected: VERSION,
                found: version,
            });
        }

        let body: VaultFileBody = ciborium::de::from_reader(body_bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let vault_id = VaultId::from_bytes(
            body.vault_id
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::Serialization("vault id has wrong length".into()))?,
        );
        let nonce: [u8; NONCE_SIZE] = body
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Serialization("nonce has wrong length".into()))?;

        let key_bytes = sealer.open(&key_wrap_aad(&vault_id), &body.sealed_key)?;
        let key_bytes: [u8; 32] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Sealer("unsealed vault key has wrong length".into()))?;
        let key = VaultKey::from_bytes(key_bytes);

        let plaintext =
            crypto::vault_decrypt(&key, &vault_id, LABEL_RECORDS, &nonce, &body.ciphertext)?;
        let records: RecordTable = ciborium::de::from_reader(plaintext.as_slice())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(Self {
            path,
            vault_id,
            key,
            sealer,
            records: RwLock::new(records),
        })
    }

    /// Opens the vault at `path`, creating it when absent.
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`Vault::open`] and [`Vault::create`].
    pub fn open_or_create(
        path: impl AsRef<Path>,
        sealer: Box<dyn VaultKeySealer>,
    ) -> StoreResult<Self> {
        if path.as_ref().exists() {
            Self::open(path, sealer)
        } else {
            Self::create(path, sealer)
        }
    }

    /// Returns the vault id.
    #[must_use]
    pub const fn id(&self) -> &VaultId {
        &self.vault_id
    }

    /// Returns the stored user profile, if any.
    #[must_use]
    pub fn profile(&self) -> Option<UserProfile> {
        self.read_lock().profile.clone()
    }

    /// Stores (or replaces) the user profile.
    ///
    /// # Errors
    ///
    /// Returns an error when persisting the vault fails; the in-memory
    /// state is left unchanged in that case.
    pub fn put_profile(&self, profile: UserProfile) -> StoreResult<()> {
        self.mutate(|records| {
            records.profile = Some(profile);
            Ok(())
        })
    }

    /// Lists all stored credentials.
    #[must_use]
    pub fn credentials(&self) -> Vec<StoredCredential> {
        self.read_lock().credentials.clone()
    }

    /// Returns the credential with the given id, if present.
    #[must_use]
    pub fn credential(&self, id: &str) -> Option<StoredCredential> {
        self.read_lock()
            .credentials
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    /// Inserts a credential, replacing any existing record with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error when persisting the vault fails.
    pub fn insert_credential(&self, credential: StoredCredential) -> StoreResult<()> {
        self.mutate(|records| {
            records.credentials.retain(|c| c.id != credential.id);
            records.credentials.push(credential);
            Ok(())
        })
    }

    /// Deletes the credential with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CredentialNotFound`] when no such credential
    /// exists, or an error when persisting the vault fails.
    pub fn delete_credential(&self, id: &str) -> StoreResult<()> {
        self.mutate(|records| {
            let before = records.credentials.len();
            records.credentials.retain(|c| c.id != id);
            if records.credentials.len() == before {
                return Err(StoreError::CredentialNotFound { id: id.to_owned() });
            }
            Ok(())
        })
    }

    /// Returns the wallet attestation, if any.
    #[must_use]
    pub fn attestation(&self) -> Option<WalletAttestation> {
        self.read_lock().attestation.clone()
    }

    /// Stores (or replaces) the wallet attestation.
    ///
    /// # Errors
    ///
    /// Returns an error when persisting the vault fails.
    pub fn put_attestation(&self, attestation: WalletAttestation) -> StoreResult<()> {
        self.mutate(|records| {
            records.attestation = Some(attestation);
            Ok(())
        })
    }

    /// Removes the wallet attestation.
    ///
    /// # Errors
    ///
    /// Returns an error when persisting the vault fails.
    pub fn clear_attestation(&self) -> StoreResult<()> {
        self.mutate(|records| {
            records.attestation = None;
            Ok(())
        })
    }

    /// Lists all software-keystore key snapshots.
    #[must_use]
    pub fn keys(&self) -> Vec<StoredKey> {
        self.read_lock().keys.clone()
    }

    /// Stores a key snapshot, replacing any existing one with the same alias.
    ///
    /// # Errors
    ///
    /// Returns an error when persisting the vault fails.
    pub fn put_key(&self, key: StoredKey) -> StoreResult<()> {
        self.mutate(|records| {
            records.keys.retain(|k| k.alias != key.alias);
            records.keys.push(key);
            Ok(())
        })
    }

    /// Deletes the key snapshot with the given alias, if present.
    ///
    /// # Errors
    ///
    /// Returns an error when persisting the vault fails.
    pub fn delete_key(&self, alias: &str) -> StoreResult<()> {
        self.mutate(|records| {
            records.keys.retain(|k| k.alias != alias);
            Ok(())
        })
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, RecordTable> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` to a copy of the record table, persists it, and only
    /// then commits it to memory, so memory never runs ahead of disk.
    fn mutate(&self, f: impl FnOnce(&mut RecordTable) -> StoreResult<()>) -> StoreResult<()> {
        let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        f(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    fn persist(&self, records: &RecordTable) -> StoreResult<()> {
        let mut plaintext = Vec::new();
        ciborium::ser::into_writer(records, &mut plaintext)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let (ciphertext, nonce) =
            crypto::vault_encrypt(&self.key, &self.vault_id, LABEL_RECORDS, &plaintext)?;
        let sealed_key = self
            .sealer
            .seal(&key_wrap_aad(&self.vault_id), self.key.as_bytes())?;

        let body = VaultFileBody {
            vault_id: self.vault_id.as_bytes().to_vec(),
            sealed_key,
            nonce: nonce.to_vec(),
            ciphertext,
        };

        let mut buffer = Vec::new();
        buffer.extend_from_slice(MAGIC);
        buffer.extend_from_slice(&VERSION.to_be_bytes());
        ciborium::ser::into_writer(&body, &mut buffer)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.atomic_replace(&buffer)
    }

    /// Writes `contents` to a sibling temp file, fsyncs it and renames it
    /// over the vault file.
    fn atomic_replace(&self, contents: &[u8]) -> StoreResult<()> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = std::fs::File::create(&tmp_path)
                .map_err(|e| StoreError::io("creating temp vault file", e))?;
            tmp.write_all(contents)
                .map_err(|e| StoreError::io("writing temp vault file", e))?;
            tmp.sync_all()
                .map_err(|e| StoreError::io("syncing temp vault file", e))?;
        }
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| StoreError::io("replacing vault file", e))
    }
}

fn key_wrap_aad(vault_id: &VaultId) -> Vec<u8> {
    let mut aad = Vec::with_capacity(16 + LABEL_KEY_WRAP.len());
    aad.extend_from_slice(vault_id.as_bytes());
    aad.extend_from_slice(LABEL_KEY_WRAP);
    aad
}

#[cfg(test)]
mod tests {
    use crate::SoftwareSealer;

    use super::*;

    fn sealer() -> Box<dyn VaultKeySealer> {
        Box::new(SoftwareSealer::new(b"test device secret"))
    }

    fn sample_credential(id: &str) -> StoredCredential {
        StoredCredential {
            id: id.to_owned(),
            configuration_id: "eu.europa.ec.eudi.pid_vc_sd_jwt".to_owned(),
            issuer: "https://issuer.example.com".to_owned(),
            format: "vc+sd-jwt".to_owned(),
            compact: "eyJhbGciOiJFUzI1NiJ9.e30.sig~WyJzYWx0IiwgImEiLCAxXQ~".to_owned(),
            key_alias: "wallet-key-1".to_owned(),
            issued_at: 1_700_000_000,
            display_name: Some("PID".to_owned()),
        }
    }

    #[test]
    fn create_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.vault");

        let vault = Vault::create(&path, sealer()).unwrap();
        let id = *vault.id();
        vault.insert_credential(sample_credential("cred-1")).unwrap();
        vault
            .put_profile(UserProfile {
                subject_id: "subject-1".to_owned(),
                given_name: Some("Erika".to_owned()),
                family_name: Some("Mustermann".to_owned()),
                enrolled_at: 1_700_000_000,
                key_alias: "wallet-key-1".to_owned(),
            })
            .unwrap();
        drop(vault);

        let reopened = Vault::open(&path, sealer()).unwrap();
        assert_eq!(*reopened.id(), id);
        assert_eq!(reopened.credentials().len(), 1);
        assert_eq!(
            reopened.profile().unwrap().given_name.as_deref(),
            Some("Erika")
        );
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.vault");
        Vault::create(&path, sealer()).unwrap();

        let result = Vault::create(&path, sealer());
        assert!(matches!(result, Err(StoreError::AlreadyExists)));
    }

    #[test]
    fn open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Vault::open(dir.path().join("nope.vault"), sealer());
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[test]
    fn open_with_wrong_secret_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.vault");
        Vault::create(&path, sealer()).unwrap();

        let result = Vault::open(&path, Box::new(SoftwareSealer::new(b"other secret")));
        assert!(matches!(result, Err(StoreError::Sealer(_))));
    }

    #[test]
    fn foreign_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.vault");
        std::fs::write(&path, b"definitely not a vault").unwrap();

        let result = Vault::open(&path, sealer());
        assert!(matches!(result, Err(StoreError::InvalidMagic)));
    }

    #[test]
    fn tampered_file_fails_authentication() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.vault");
        let vault = Vault::create(&path, sealer()).unwrap();
        vault.insert_credential(sample_credential("cred-1")).unwrap();
        drop(vault);

        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        std::fs::write(&path, &raw).unwrap();

        let result = Vault::open(&path, sealer());
        assert!(matches!(
            result,
            Err(StoreError::DecryptionFailed { .. } | StoreError::Serialization(_))
        ));
    }

    #[test]
    fn credential_crud() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::create(dir.path().join("wallet.vault"), sealer()).unwrap();

        vault.insert_credential(sample_credential("cred-1")).unwrap();
        vault.insert_credential(sample_credential("cred-2")).unwrap();
        assert_eq!(vault.credentials().len(), 2);
        assert!(vault.credential("cred-1").is_some());

        // upsert keeps a single record per id
        let mut updated = sample_credential("cred-1");
        updated.display_name = Some("Updated".to_owned());
        vault.insert_credential(updated).unwrap();
        assert_eq!(vault.credentials().len(), 2);
        assert_eq!(
            vault.credential("cred-1").unwrap().display_name.as_deref(),
            Some("Updated")
        );

        vault.delete_credential("cred-2").unwrap();
        assert!(vault.credential("cred-2").is_none());

        let result = vault.delete_credential("cred-2");
        assert!(matches!(
            result,
            Err(StoreError::CredentialNotFound { .. })
        ));
    }

    #[test]
    fn attestation_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::create(dir.path().join("wallet.vault"), sealer()).unwrap();

        assert!(vault.attestation().is_none());
        vault
            .put_attestation(WalletAttestation {
                jwt: "eyJhbGciOiJFUzI1NiJ9.e30.sig".to_owned(),
                expires_at: 1_800_000_000,
            })
            .unwrap();
        assert!(vault.attestation().is_some());

        vault.clear_attestation().unwrap();
        assert!(vault.attestation().is_none());
    }

    #[test]
    fn key_snapshots_replace_by_alias() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::create(dir.path().join("wallet.vault"), sealer()).unwrap();

        vault
            .put_key(StoredKey {
                alias: "wallet-key-1".to_owned(),
                protection: "software".to_owned(),
                pem: b"pem one".to_vec(),
            })
            .unwrap();
        vault
            .put_key(StoredKey {
                alias: "wallet-key-1".to_owned(),
                protection: "software".to_owned(),
                pem: b"pem two".to_vec(),
            })
            .unwrap();

        let keys = vault.keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].pem, b"pem two");

        vault.delete_key("wallet-key-1").unwrap();
        assert!(vault.keys().is_empty());
    }
}
