//! The wallet façade.
//!
//! [`Wallet`] wires keystore, vault, backend session, attestation,
//! issuance and presentation together into the holder API a hosting app
//! calls. It owns exactly one [`DeviceKeyManager`] and one [`Vault`].

use std::sync::Arc;

use uuid::Uuid;

use eudikit_store::{StoredCredential, UserProfile, Vault};

use crate::{
    attestation::AttestationManager,
    clock::now_or,
    coordinator::{AuthFlowCoordinator, UrlOpener},
    error::WalletError,
    http::HttpClient,
    issuance::{AcceptOffer, IssuanceClient, IssuedCredential},
    keystore::{DeviceKeyManager, KeyInfo, KeyStore},
    presentation::{MatchedRequest, PresentationClient, SubmissionOutcome},
    Environment,
};

/// Static configuration of a wallet instance.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Deployment environment.
    pub environment: Environment,
    /// Base URL of the wallet-provider backend.
    pub backend_base_url: String,
    /// OAuth client id the wallet identifies as.
    pub client_id: String,
    /// Redirect URI registered for the wallet's deep links.
    pub redirect_uri: String,
    /// Alias of the device key everything is bound to.
    pub key_alias: String,
}

impl WalletConfig {
    /// Returns the stock configuration for an environment.
    #[must_use]
    pub fn for_environment(environment: Environment) -> Self {
        let backend_base_url = match environment {
            Environment::Staging => "https://wallet-backend.stage.eudikit.dev".to_owned(),
            Environment::Production => "https://wallet-backend.eudikit.dev".to_owned(),
        };
        Self {
            environment,
            backend_base_url,
            client_id: "eudikit-wallet".to_owned(),
            redirect_uri: "eudikit://callback".to_owned(),
            key_alias: "eudikit-device-key".to_owned(),
        }
    }
}

/// The holder API.
pub struct Wallet {
    config: WalletConfig,
    keys: DeviceKeyManager,
    vault: Arc<Vault>,
    session: crate::session::SessionManager,
    attestations: AttestationManager,
    issuance: IssuanceClient,
    presentations: PresentationClient,
    coordinator: Arc<AuthFlowCoordinator>,
    opener: Box<dyn UrlOpener>,
}

impl Wallet {
    /// Assembles a wallet over the host-provided keystore, vault and URL
    /// opener.
    ///
    /// The device key under [`WalletConfig::key_alias`] is provisioned
    /// here (idempotently), recording the achieved protection tier.
    ///
    /// # Errors
    ///
    /// Returns an error when key provisioning fails.
    pub fn new(
        config: WalletConfig,
        keystore: Arc<dyn KeyStore>,
        vault: Arc<Vault>,
        opener: Box<dyn UrlOpener>,
    ) -> Result<Self, WalletError> {
        let http = Arc::new(HttpClient::new());
        let keys = DeviceKeyManager::new(keystore);
        let key = keys.obtain(&config.key_alias)?;
        tracing::info!(protection = %key.protection, "wallet device key ready");

        let session = crate::session::SessionManager::new(
            Arc::clone(&http),
            config.backend_base_url.clone(),
            keys.signer(&config.key_alias)?,
        );
        let attestations =
            AttestationManager::new(config.backend_base_url.clone(), Arc::clone(&vault));
        let issuance = IssuanceClient::new(
            Arc::clone(&http),
            config.client_id.clone(),
            config.redirect_uri.clone(),
        );
        let presentations = PresentationClient::new(Arc::clone(&http));

        Ok(Self {
            config,
            keys,
            vault,
            session,
            attestations,
            issuance,
            presentations,
            coordinator: Arc::new(AuthFlowCoordinator::new()),
            opener,
        })
    }

    /// The coordinator the host delivers redirect deep links into.
    #[must_use]
    pub fn coordinator(&self) -> Arc<AuthFlowCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// The provisioned device key.
    ///
    /// # Errors
    ///
    /// Returns an error when the keystore backend fails.
    pub fn device_key(&self) -> Result<KeyInfo, WalletError> {
        Ok(self.keys.obtain(&self.config.key_alias)?)
    }

    /// The stored user profile, when enrolled.
    #[must_use]
    pub fn profile(&self) -> Option<UserProfile> {
        self.vault.profile()
    }

    /// Enrolls the user: provisions the device key, writes the profile,
    /// and obtains the wallet unit attestation from the provider.
    ///
    /// Enrolling an already-enrolled wallet returns the existing profile
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error when key provisioning, persistence or the
    /// attestation exchange fails.
    pub async fn enroll(
        &self,
        given_name: Option<String>,
        family_name: Option<String>,
        now: Option<u64>,
    ) -> Result<UserProfile, WalletError> {
        if let Some(existing) = self.vault.profile() {
            tracing::info!("wallet already enrolled");
            return Ok(existing);
        }

        let now = now_or(now)?;
        let key = self.keys.obtain(&self.config.key_alias)?;

        let profile = UserProfile {
            subject_id: Uuid::new_v4().to_string(),
            given_name,
            family_name,
            enrolled_at: now,
            key_alias: key.alias,
        };
        self.vault.put_profile(profile.clone())?;

        let signer = self.keys.signer(&self.config.key_alias)?;
        self.attestations
            .ensure(&self.session, &signer, Some(now))
            .await?;

        tracing::info!(subject = %profile.subject_id, "enrollment complete");
        Ok(profile)
    }

    /// Runs the issuance flow for a credential offer and stores the
    /// resulting credential.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotEnrolled`] before enrollment, and
    /// propagates flow errors.
    pub async fn accept_offer(
        &self,
        offer_uri: &str,
        tx_code: Option<String>,
        now: Option<u64>,
    ) -> Result<IssuedCredential, WalletError> {
        let profile = self.vault.profile().ok_or(WalletError::NotEnrolled)?;
        let signer = self.keys.signer(&profile.key_alias)?;
        let attestation = self
            .attestations
            .ensure(&self.session, &signer, now)
            .await?;

        let issued = self
            .issuance
            .accept_offer(AcceptOffer {
                offer_uri,
                tx_code,
                signer: &signer,
                coordinator: &self.coordinator,
                opener: self.opener.as_ref(),
                attestation: Some(&attestation),
                now,
            })
            .await?;

        self.vault.insert_credential(issued.credential.clone())?;
        tracing::info!(id = %issued.credential.id, "credential stored");
        Ok(issued)
    }

    /// Resolves a relying party's authorization request and matches it
    /// against the stored credentials.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors.
    pub async fn handle_authorization_request(
        &self,
        uri: &str,
    ) -> Result<MatchedRequest, WalletError> {
        self.presentations
            .handle_request(uri, &self.vault.credentials())
            .await
    }

    /// Presents the selected credentials for a matched request.
    ///
    /// # Errors
    ///
    /// Propagates matching, signing and submission errors.
    pub async fn present(
        &self,
        request: &MatchedRequest,
        selections: &[(String, String)],
        now: Option<u64>,
    ) -> Result<SubmissionOutcome, WalletError> {
        self.presentations
            .present(
                request,
                selections,
                &self.vault.credentials(),
                &self.keys,
                now,
            )
            .await
    }

    /// Lists the stored credentials.
    #[must_use]
    pub fn credentials(&self) -> Vec<StoredCredential> {
        self.vault.credentials()
    }

    /// Returns one stored credential.
    #[must_use]
    pub fn credential(&self, id: &str) -> Option<StoredCredential> {
        self.vault.credential(id)
    }

    /// Deletes a stored credential.
    ///
    /// # Errors
    ///
    /// Returns an error when the credential does not exist or persistence
    /// fails.
    pub fn delete_credential(&self, id: &str) -> Result<(), WalletError> {
        Ok(self.vault.delete_credential(id)?)
    }
}
