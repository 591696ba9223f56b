//! Core functionality of an EUDI-style identity wallet.
//!
//! `eudikit-core` is the protocol and cryptography engine a wallet app
//! links against: device key management with a hardware-then-software
//! fallback policy, JOSE plumbing (JWS/JWT/JWE), SD-JWT selective
//! disclosure, OpenID4VCI issuance, OpenID4VP presentation, backend
//! sessions and the single-flight browser auth-flow coordinator. UI,
//! navigation and FFI binding layers live in the hosting app, above this
//! crate.
//!
//! The entry point is [`Wallet`]; hosts wire in a platform
//! [`keystore::KeyStore`], an [`eudikit_store::Vault`] and a
//! [`coordinator::UrlOpener`]:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use eudikit_core::{coordinator::UrlOpener, keystore::SoftwareKeyStore, Environment, Wallet,
//!     WalletConfig, WalletError};
//! use eudikit_store::{SoftwareSealer, Vault};
//!
//! struct BrowserOpener;
//! impl UrlOpener for BrowserOpener {
//!     fn open(&self, url: &url::Url) -> Result<(), WalletError> {
//!         println!("open {url} in a browser");
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let vault = Arc::new(Vault::open_or_create(
//!     "wallet.vault",
//!     Box::new(SoftwareSealer::new(b"device secret")),
//! )?);
//! let wallet = Wallet::new(
//!     WalletConfig::for_environment(Environment::Staging),
//!     Arc::new(SoftwareKeyStore::new()),
//!     vault,
//!     Box::new(BrowserOpener),
//! )?;
//! # Ok(())
//! # }
//! ```

use strum::{Display, EnumString};

pub mod attestation;
mod clock;
pub mod coordinator;
mod error;
pub mod http;
pub mod issuance;
pub mod jose;
pub mod keystore;
pub mod presentation;
pub mod sd_jwt;
pub mod session;
mod wallet;

pub use error::WalletError;
pub use wallet::{Wallet, WalletConfig};

/// Deployment environment a wallet instance talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    /// Pre-production backends.
    Staging,
    /// Production backends.
    Production,
}
