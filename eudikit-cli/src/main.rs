//! Developer CLI for the eudikit wallet core.
//!
//! Drives the holder flows against real or local issuers and verifiers:
//! enrollment, credential offers, credential management and
//! selective-disclosure presentations. Keys live in the software
//! keystore, snapshotted into the vault, so the CLI is self-contained —
//! and explicitly not a hardware-backed wallet.

use std::{
    io::Write as _,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use clap::{Parser, Subcommand};
use eyre::{bail, eyre, WrapErr as _};
use url::Url;

use eudikit_core::{
    coordinator::{AuthCallback, AuthFlowCoordinator, UrlOpener},
    keystore::SoftwareKeyStore,
    sd_jwt, Environment, Wallet, WalletConfig, WalletError,
};
use eudikit_store::{SoftwareSealer, Vault};

#[derive(Parser)]
#[command(name = "eudikit", version, about = "Developer CLI for the eudikit wallet core")]
struct Cli {
    /// Path of the wallet vault file.
    #[arg(long, env = "EUDIKIT_VAULT_PATH")]
    vault_path: Option<PathBuf>,

    /// Deployment environment.
    #[arg(long, env = "EUDIKIT_ENVIRONMENT", default_value = "staging")]
    environment: Environment,

    /// Override the wallet-provider backend base URL.
    #[arg(long, env = "EUDIKIT_BACKEND_URL")]
    backend_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enroll this wallet instance with the wallet provider.
    Enroll {
        /// Given name to store in the profile.
        #[arg(long)]
        given_name: Option<String>,
        /// Family name to store in the profile.
        #[arg(long)]
        family_name: Option<String>,
    },
    /// Accept a credential offer URI.
    Offer {
        /// The `openid-credential-offer://` URI.
        uri: String,
        /// Transaction code, when the offer requires one.
        #[arg(long)]
        tx_code: Option<String>,
    },
    /// Manage stored credentials.
    #[command(subcommand)]
    Credentials(CredentialsCommand),
    /// Answer a relying party's `openid4vp://` authorization request.
    Present {
        /// The authorization request URI.
        uri: String,
        /// Explicit selections as `descriptor_id=credential_id`;
        /// descriptors with a single candidate are selected
        /// automatically.
        #[arg(long = "select", value_parser = parse_selection)]
        selections: Vec<(String, String)>,
    },
    /// Inspect the device key.
    #[command(subcommand)]
    Keys(KeysCommand),
}

#[derive(Subcommand)]
enum CredentialsCommand {
    /// List stored credentials.
    List,
    /// Show one credential's claims.
    Show {
        /// The credential id.
        id: String,
    },
    /// Delete a credential.
    Delete {
        /// The credential id.
        id: String,
    },
}

#[derive(Subcommand)]
enum KeysCommand {
    /// Print the device key as a public JWK.
    Show,
}

fn parse_selection(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(descriptor, credential)| (descriptor.to_owned(), credential.to_owned()))
        .ok_or_else(|| format!("expected descriptor_id=credential_id, got `{value}`"))
}

/// Prints the authorization URL and waits for the user to paste the
/// redirect URI, then feeds it into the coordinator.
///
/// The coordinator slot is filled right after the wallet is assembled;
/// it is leaked because the opener must be `'static` inside the wallet.
struct PromptOpener {
    coordinator: &'static OnceLock<Arc<AuthFlowCoordinator>>,
}

impl UrlOpener for PromptOpener {
    fn open(&self, url: &Url) -> Result<(), WalletError> {
        println!("Open this URL in your browser:\n\n  {url}\n");
        print!("Paste the redirect URI here: ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .map_err(|e| WalletError::InvalidInput {
                attribute: "redirect".to_owned(),
                reason: e.to_string(),
            })?;
        let redirect = Url::parse(line.trim()).map_err(|e| WalletError::InvalidInput {
            attribute: "redirect".to_owned(),
            reason: e.to_string(),
        })?;

        let coordinator = self
            .coordinator
            .get()
            .ok_or(WalletError::NoPendingFlow)?;
        coordinator.complete(AuthCallback::from_redirect_url(&redirect))
    }
}

fn data_dir() -> eyre::Result<PathBuf> {
    let dir = dirs::data_dir()
        .ok_or_else(|| eyre!("no platform data directory"))?
        .join("eudikit");
    std::fs::create_dir_all(&dir).wrap_err("creating the eudikit data directory")?;
    Ok(dir)
}

/// Loads (or creates) the device secret the software sealer derives its
/// key from. A platform wallet would use the hardware keystore instead.
fn device_secret(dir: &Path) -> eyre::Result<Vec<u8>> {
    let path = dir.join("device-secret");
    if path.exists() {
        return std::fs::read(&path).wrap_err("reading device secret");
    }

    let mut secret = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut secret);
    std::fs::write(&path, secret).wrap_err("writing device secret")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .wrap_err("restricting device secret permissions")?;
    }
    Ok(secret.to_vec())
}

struct CliWallet {
    wallet: Wallet,
    vault: Arc<Vault>,
    keystore: Arc<SoftwareKeyStore>,
}

impl CliWallet {
    fn open(cli: &Cli) -> eyre::Result<Self> {
        let dir = data_dir()?;
        let vault_path = cli
            .vault_path
            .clone()
            .unwrap_or_else(|| dir.join("wallet.vault"));
        let secret = device_secret(&dir)?;

        let vault = Arc::new(
            Vault::open_or_create(&vault_path, Box::new(SoftwareSealer::new(&secret)))
                .wrap_err("opening the wallet vault")?,
        );
        let keystore = Arc::new(
            SoftwareKeyStore::from_snapshots(&vault.keys())
                .wrap_err("restoring the software keystore")?,
        );

        let mut config = WalletConfig::for_environment(cli.environment);
        if let Some(backend_url) = &cli.backend_url {
            config.backend_base_url = backend_url.clone();
        }

        let coordinator_slot: &'static OnceLock<Arc<AuthFlowCoordinator>> =
            Box::leak(Box::new(OnceLock::new()));
        let opener = Box::new(PromptOpener {
            coordinator: coordinator_slot,
        });

        let wallet = Wallet::new(
            config,
            Arc::clone(&keystore) as Arc<dyn eudikit_core::keystore::KeyStore>,
            Arc::clone(&vault),
            opener,
        )
        .wrap_err("assembling the wallet")?;
        let _ = coordinator_slot.set(wallet.coordinator());

        let cli_wallet = Self {
            wallet,
            vault,
            keystore,
        };
        // The device key may have just been provisioned; keep the vault
        // snapshot in step from the start.
        cli_wallet.save_keys()?;
        Ok(cli_wallet)
    }

    /// Persists software-keystore snapshots after operations that may
    /// have created keys.
    fn save_keys(&self) -> eyre::Result<()> {
        for snapshot in self.keystore.snapshots().wrap_err("exporting keys")? {
            self.vault.put_key(snapshot).wrap_err("persisting keys")?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cli_wallet = CliWallet::open(&cli)?;
    let wallet = &cli_wallet.wallet;

    match cli.command {
        Command::Enroll {
            given_name,
            family_name,
        } => {
            let profile = wallet.enroll(given_name, family_name, None).await?;
            println!("Enrolled as subject {}", profile.subject_id);
        }
        Command::Offer { uri, tx_code } => {
            let issued = wallet.accept_offer(&uri, tx_code, None).await?;
            println!(
                "Stored credential {} ({})",
                issued.credential.id,
                issued
                    .credential
                    .display_name
                    .as_deref()
                    .unwrap_or(&issued.credential.configuration_id)
            );
            println!("{}", serde_json::to_string_pretty(&issued.claims)?);
        }
        Command::Credentials(command) => match command {
            CredentialsCommand::List => {
                let credentials = wallet.credentials();
                if credentials.is_empty() {
                    println!("No credentials stored.");
                }
                for credential in credentials {
                    println!(
                        "{}  {}  issued {}  ({})",
                        credential.id,
                        credential
                            .display_name
                            .as_deref()
                            .unwrap_or(&credential.configuration_id),
                        credential.issued_at,
                        credential.issuer,
                    );
                }
            }
            CredentialsCommand::Show { id } => {
                let credential = wallet
                    .credential(&id)
                    .ok_or_else(|| eyre!("credential {id} not found"))?;
                let view = sd_jwt::decode_credential(&credential.compact)?;
                println!("{}", serde_json::to_string_pretty(&view.claims)?);
            }
            CredentialsCommand::Delete { id } => {
                wallet.delete_credential(&id)?;
                println!("Deleted credential {id}");
            }
        },
        Command::Present { uri, selections } => {
            let matched = wallet.handle_authorization_request(&uri).await?;

            let mut resolved_selections = selections;
            for entry in &matched.matches {
                if resolved_selections
                    .iter()
                    .any(|(descriptor, _)| *descriptor == entry.descriptor_id)
                {
                    continue;
                }
                match entry.candidates.as_slice() {
                    [only] => {
                        resolved_selections
                            .push((entry.descriptor_id.clone(), only.credential_id.clone()));
                    }
                    [] => bail!(
                        "no stored credential matches descriptor `{}`",
                        entry.descriptor_id
                    ),
                    many => bail!(
                        "descriptor `{}` has {} candidates; pick one with --select",
                        entry.descriptor_id,
                        many.len()
                    ),
                }
            }

            let outcome = wallet.present(&matched, &resolved_selections, None).await?;
            match outcome.redirect_uri {
                Some(redirect_uri) => println!("Presented. Continue at: {redirect_uri}"),
                None => println!("Presented."),
            }
        }
        Command::Keys(KeysCommand::Show) => {
            let key = wallet.device_key()?;
            println!("alias:      {}", key.alias);
            println!("protection: {}", key.protection);
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::Value::Object(key.jwk))?
            );
        }
    }

    Ok(())
}
