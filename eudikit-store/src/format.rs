//! On-disk constants for the vault file format.

/// Magic bytes at the start of every vault file.
pub(crate) const MAGIC: &[u8; 4] = b"EUKV";

/// Format version this build reads and writes.
pub(crate) const VERSION: u32 = 1;

/// XChaCha20-Poly1305 nonce size in bytes.
pub(crate) const NONCE_SIZE: usize = 24;

/// Associated-data label for the encrypted record table.
pub(crate) const LABEL_RECORDS: &[u8] = b"eudikit:records";

/// Associated-data label for wrapping the vault key with the sealer.
pub(crate) const LABEL_KEY_WRAP: &[u8] = b"eudikit:vault-key-wrap";
