use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::sync::broadcast;
use tracing::info;

use super::authenticator::RequestAuthenticator;
use super::credentials::{CredentialKey, CredentialStore};
use super::epoch::SessionEpoch;
use super::refresh::RefreshCoordinator;
use super::terminator::SessionTerminator;

/// Capacity of the session event channel. Lagging subscribers only miss
/// older events.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Explicit logout
    Logout,
    /// The refresh token could not be exchanged for a new access token
    RefreshFailed,
    /// A request replayed with a renewed access token was rejected again
    ReplayRejected,
}

/// Session lifecycle notifications for the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn {
        at: DateTime<Utc>,
    },
    /// Credentials were cleared; the application should navigate to `redirect_to`.
    LoggedOut {
        redirect_to: String,
        reason: TerminationReason,
        at: DateTime<Utc>,
    },
}

/// Per-session context: credential store, refresh coordination and
/// termination. Independent sessions can coexist in one process.
pub struct Session {
    store: Arc<dyn CredentialStore>,
    epoch: Arc<SessionEpoch>,
    refresh: RefreshCoordinator,
    terminator: SessionTerminator,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        client: Client,
        refresh_url: String,
        login_route: &str,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let epoch = Arc::new(SessionEpoch::new());
        Self {
            refresh: RefreshCoordinator::new(
                client,
                refresh_url,
                Arc::clone(&store),
                Arc::clone(&epoch),
            ),
            terminator: SessionTerminator::new(
                Arc::clone(&store),
                Arc::clone(&epoch),
                login_route,
                events.clone(),
            ),
            store,
            epoch,
            events,
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn refresh(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    pub fn terminator(&self) -> &SessionTerminator {
        &self.terminator
    }

    /// Advances on every login and termination
    pub fn epoch(&self) -> u64 {
        self.epoch.current()
    }

    pub fn authenticator(&self) -> RequestAuthenticator {
        RequestAuthenticator::new(Arc::clone(&self.store))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current access token, `None` if absent or unreadable
    pub fn access_token(&self) -> Option<String> {
        self.store.get(CredentialKey::AccessToken).ok().flatten()
    }

    /// Both credentials are present
    pub fn is_authenticated(&self) -> bool {
        CredentialKey::ALL
            .iter()
            .all(|key| matches!(self.store.get(*key), Ok(Some(_))))
    }

    /// Store a freshly issued credential pair and re-arm termination.
    ///
    /// Starts a new epoch, so a refresh left over from the previous session
    /// cannot overwrite the new pair.
    pub fn establish(&self, access: &str, refresh: &str) -> Result<()> {
        self.epoch.advance(|| -> Result<()> {
            self.store
                .set(CredentialKey::AccessToken, access)
                .context("Failed to store access token")?;
            self.store
                .set(CredentialKey::RefreshToken, refresh)
                .context("Failed to store refresh token")?;
            Ok(())
        })?;
        self.terminator.rearm();

        info!("Session established");
        let _ = self.events.send(SessionEvent::LoggedIn { at: Utc::now() });
        Ok(())
    }

    /// End the session. Returns `false` if it was already terminated.
    pub fn terminate(&self, reason: TerminationReason) -> bool {
        self.terminator.terminate(reason)
    }
}
