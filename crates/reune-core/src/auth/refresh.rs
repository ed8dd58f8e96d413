//! Single-flight exchange of the refresh token for a new access token.
//!
//! Every caller that asks for a fresh credential while an exchange is running
//! awaits that same exchange and receives the identical outcome. A new
//! exchange can only start once the previous one has finished, or once the
//! session it was started for has ended.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::credentials::{CredentialKey, CredentialStore};
use super::epoch::SessionEpoch;

/// Why a refresh exchange did not produce a new access token.
///
/// Cloneable so a single outcome can be handed to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token stored")]
    MissingRefreshToken,

    #[error("Refresh token rejected (status {status})")]
    Rejected { status: u16 },

    #[error("Refresh request failed: {0}")]
    Transport(String),

    #[error("Invalid refresh response: {0}")]
    MalformedResponse(String),

    #[error("Credential store error: {0}")]
    Store(String),

    /// The session was terminated or replaced while the exchange was running;
    /// its result was discarded
    #[error("Session ended during token refresh")]
    SessionEnded,
}

pub type RefreshOutcome = Result<String, RefreshError>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

enum RefreshState {
    Idle,
    InFlight {
        generation: u64,
        epoch: u64,
        flight: SharedRefresh,
    },
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
    /// Present when the server rotates refresh tokens
    #[serde(default)]
    refresh: Option<String>,
}

pub struct RefreshCoordinator {
    client: Client,
    refresh_url: String,
    store: Arc<dyn CredentialStore>,
    epoch: Arc<SessionEpoch>,
    state: Arc<Mutex<RefreshState>>,
    generation: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        client: Client,
        refresh_url: String,
        store: Arc<dyn CredentialStore>,
        epoch: Arc<SessionEpoch>,
    ) -> Self {
        Self {
            client,
            refresh_url,
            store,
            epoch,
            state: Arc::new(Mutex::new(RefreshState::Idle)),
            generation: AtomicU64::new(0),
        }
    }

    /// Whether an exchange is currently running
    pub fn is_in_flight(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(*state, RefreshState::InFlight { .. })
    }

    /// Obtain a new access token, joining the running exchange if there is one.
    ///
    /// On success the new token is already in the credential store when this
    /// returns. Failures are not retried. An exchange overtaken by the end of
    /// the session stores nothing and yields `RefreshError::SessionEnded`.
    pub async fn ensure_fresh_credential(&self) -> RefreshOutcome {
        self.join_or_start().await
    }

    fn join_or_start(&self) -> SharedRefresh {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let epoch = self.epoch.current();

        if let RefreshState::InFlight {
            generation,
            epoch: started,
            flight,
        } = &*state
        {
            if *started == epoch {
                debug!(generation, "Joining in-flight token refresh");
                return flight.clone();
            }
            // Left over from an ended session, it will discard its own result
            debug!(generation, "Superseding token refresh from an ended session");
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let exchange = exchange(
            self.client.clone(),
            self.refresh_url.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.epoch),
            epoch,
        );
        let slot = Arc::clone(&self.state);

        let flight = async move {
            let outcome = exchange.await;

            // Back to Idle before any waiter resumes
            let mut state = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(&*state, RefreshState::InFlight { generation: current, .. } if *current == generation)
            {
                *state = RefreshState::Idle;
            }
            outcome
        }
        .boxed()
        .shared();

        debug!(generation, "Starting token refresh");
        *state = RefreshState::InFlight {
            generation,
            epoch,
            flight: flight.clone(),
        };
        flight
    }
}

async fn exchange(
    client: Client,
    refresh_url: String,
    store: Arc<dyn CredentialStore>,
    epoch: Arc<SessionEpoch>,
    started: u64,
) -> RefreshOutcome {
    let refresh_token = match store.get(CredentialKey::RefreshToken) {
        Ok(Some(token)) => token,
        Ok(None) => {
            debug!("No refresh token stored, skipping exchange");
            return Err(RefreshError::MissingRefreshToken);
        }
        Err(e) => return Err(RefreshError::Store(format!("{:#}", e))),
    };

    let response = client
        .post(&refresh_url)
        .json(&RefreshRequest {
            refresh: &refresh_token,
        })
        .send()
        .await
        .map_err(|e| {
            warn!(error = %e, "Token refresh request failed");
            RefreshError::Transport(e.to_string())
        })?;

    let status = response.status();
    if !status.is_success() {
        warn!(status = status.as_u16(), "Token refresh rejected");
        return Err(RefreshError::Rejected {
            status: status.as_u16(),
        });
    }

    let body: RefreshResponse = response
        .json()
        .await
        .map_err(|e| RefreshError::MalformedResponse(e.to_string()))?;
    if body.access.is_empty() {
        return Err(RefreshError::MalformedResponse(
            "empty access token".to_string(),
        ));
    }

    let stored = epoch.write_if_current(started, || -> Result<(), RefreshError> {
        store
            .set(CredentialKey::AccessToken, &body.access)
            .map_err(|e| RefreshError::Store(format!("{:#}", e)))?;
        if let Some(rotated) = body.refresh.as_deref().filter(|t| !t.is_empty()) {
            store
                .set(CredentialKey::RefreshToken, rotated)
                .map_err(|e| RefreshError::Store(format!("{:#}", e)))?;
            debug!("Refresh token rotated");
        }
        Ok(())
    });
    match stored {
        Some(result) => result?,
        None => {
            info!("Session ended during token refresh, discarding new access token");
            return Err(RefreshError::SessionEnded);
        }
    }

    info!("Access token refreshed");
    Ok(body.access)
}
