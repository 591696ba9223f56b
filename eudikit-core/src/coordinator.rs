//! Browser auth-flow coordination.
//!
//! Protocol flows that bounce through an external user agent (custom tab,
//! system browser) suspend on a [`PendingAuthFlow`] until the host
//! delivers the redirect callback. At most one flow is ever pending:
//! beginning a new one cancels the previous — a fresh deep link
//! supersedes a stale tab, never the other way around.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tokio::sync::oneshot;
use url::Url;

use crate::error::WalletError;

/// Deadline for an external auth flow to complete.
pub const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Seam through which flows hand authorization URLs to the hosting app,
/// which opens them in an external user agent (custom tab, system
/// browser).
pub trait UrlOpener: Send + Sync {
    /// Opens `url` in the user's browser.
    ///
    /// # Errors
    ///
    /// Returns an error when no user agent could be launched.
    fn open(&self, url: &Url) -> Result<(), WalletError>;
}

/// Parameters delivered on the redirect back into the wallet.
#[derive(Debug, Clone)]
pub struct AuthCallback {
    /// The `state` parameter, when present.
    pub state: Option<String>,
    /// All query parameters of the redirect URI.
    pub params: HashMap<String, String>,
}

impl AuthCallback {
    /// Extracts the callback from a redirect URL's query parameters.
    #[must_use]
    pub fn from_redirect_url(url: &Url) -> Self {
        let params: HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self {
            state: params.get("state").cloned(),
            params,
        }
    }

    /// Returns a single parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

#[derive(Debug)]
enum FlowOutcome {
    Completed(AuthCallback),
    Failed(String),
    Cancelled,
}

struct PendingSlot {
    state: String,
    tx: oneshot::Sender<FlowOutcome>,
}

/// Single-flight coordinator bridging external-browser callbacks back
/// into suspended protocol flows.
pub struct AuthFlowCoordinator {
    pending: Mutex<Option<PendingSlot>>,
    timeout: Duration,
}

impl Default for AuthFlowCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthFlowCoordinator {
    /// Creates a coordinator with [`DEFAULT_FLOW_TIMEOUT`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_FLOW_TIMEOUT)
    }

    /// Creates a coordinator with an explicit timeout.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(None),
            timeout,
        }
    }

    /// Registers a flow identified by its `state` parameter and returns
    /// the handle the caller awaits.
    ///
    /// A previously pending flow is cancelled: its
    /// [`PendingAuthFlow::wait`] resolves to
    /// [`WalletError::AuthFlowCancelled`].
    pub fn begin(&self, state: impl Into<String>) -> PendingAuthFlow<'_> {
        let state = state.into();
        let (tx, rx) = oneshot::channel();

        let mut pending = self.lock();
        if let Some(previous) = pending.take() {
            tracing::debug!("superseding pending authorization flow");
            let _ = previous.tx.send(FlowOutcome::Cancelled);
        }
        *pending = Some(PendingSlot {
            state: state.clone(),
            tx,
        });

        PendingAuthFlow {
            coordinator: self,
            state,
            rx,
        }
    }

    /// Delivers a redirect callback to the pending flow.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NoPendingFlow`] when nothing is pending and
    /// [`WalletError::StateMismatch`] when the callback's `state` does not
    /// match — the pending flow is left in place in that case.
    pub fn complete(&self, callback: AuthCallback) -> Result<(), WalletError> {
        let mut pending = self.lock();
        let Some(slot) = pending.as_ref() else {
            return Err(WalletError::NoPendingFlow);
        };
        if callback.state.as_deref() != Some(slot.state.as_str()) {
            return Err(WalletError::StateMismatch);
        }

        let slot = pending.take().expect("checked above");
        // The receiver may have timed out concurrently; nothing to do then.
        let _ = slot.tx.send(FlowOutcome::Completed(callback));
        Ok(())
    }

    /// Resolves the pending flow with an error outcome (user cancel in
    /// the browser, error redirect).
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NoPendingFlow`] when nothing is pending.
    pub fn fail(&self, error: impl Into<String>) -> Result<(), WalletError> {
        let mut pending = self.lock();
        let Some(slot) = pending.take() else {
            return Err(WalletError::NoPendingFlow);
        };
        let _ = slot.tx.send(FlowOutcome::Failed(error.into()));
        Ok(())
    }

    /// Whether a flow is currently pending.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<PendingSlot>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears the slot after a timeout, but only if it still belongs to
    /// the timed-out flow.
    fn clear_if_state(&self, state: &str) {
        let mut pending = self.lock();
        if pending.as_ref().is_some_and(|slot| slot.state == state) {
            *pending = None;
        }
    }
}

impl std::fmt::Debug for AuthFlowCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFlowCoordinator")
            .field("timeout", &self.timeout)
            .field("has_pending", &self.has_pending())
            .finish()
    }
}

/// Handle to a pending authorization flow.
#[must_use = "await the flow or the callback is lost"]
pub struct PendingAuthFlow<'a> {
    coordinator: &'a AuthFlowCoordinator,
    state: String,
    rx: oneshot::Receiver<FlowOutcome>,
}

impl PendingAuthFlow<'_> {
    /// Suspends until the callback arrives, the flow is superseded, or
    /// the coordinator's timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::AuthFlowTimedOut`],
    /// [`WalletError::AuthFlowCancelled`] or
    /// [`WalletError::AuthFlowFailed`] for the respective outcomes.
    pub async fn wait(self) -> Result<AuthCallback, WalletError> {
        match tokio::time::timeout(self.coordinator.timeout, self.rx).await {
            Err(_elapsed) => {
                self.coordinator.clear_if_state(&self.state);
                Err(WalletError::AuthFlowTimedOut)
            }
            // Sender dropped without resolution: coordinator was dropped.
            Ok(Err(_)) => Err(WalletError::AuthFlowCancelled),
            Ok(Ok(FlowOutcome::Completed(callback))) => Ok(callback),
            Ok(Ok(FlowOutcome::Failed(error))) => Err(WalletError::AuthFlowFailed(error)),
            Ok(Ok(FlowOutcome::Cancelled)) => Err(WalletError::AuthFlowCancelled),
        }
    }
}
