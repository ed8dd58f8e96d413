use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::credentials::{CredentialKey, CredentialStore};
use super::epoch::SessionEpoch;
use super::session::{SessionEvent, TerminationReason};

/// Ends a session: clears both credentials and tells subscribers to
/// navigate to the login route.
///
/// Only the first call after a login has any effect, so concurrent failing
/// requests produce exactly one logout notification. Terminating also
/// advances the session epoch, so refreshes still running cannot write their
/// token back into the cleared store.
pub struct SessionTerminator {
    store: Arc<dyn CredentialStore>,
    epoch: Arc<SessionEpoch>,
    login_route: String,
    armed: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionTerminator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        epoch: Arc<SessionEpoch>,
        login_route: impl Into<String>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            store,
            epoch,
            login_route: login_route.into(),
            armed: AtomicBool::new(true),
            events,
        }
    }

    /// Whether the session has been terminated since the last login
    pub fn is_terminated(&self) -> bool {
        !self.armed.load(Ordering::Acquire)
    }

    /// Allow the next termination to take effect again (after a login)
    pub fn rearm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    /// Clear stored credentials and emit `SessionEvent::LoggedOut`.
    ///
    /// Returns `false` when the session was already terminated.
    pub fn terminate(&self, reason: TerminationReason) -> bool {
        if !self.armed.swap(false, Ordering::AcqRel) {
            debug!(?reason, "Session already terminated");
            return false;
        }

        self.epoch.advance(|| {
            for key in CredentialKey::ALL {
                if let Err(e) = self.store.delete(key) {
                    warn!(key = %key, error = %e, "Failed to clear credential");
                }
            }
        });

        match reason {
            TerminationReason::Logout => info!("Logged out"),
            _ => warn!(?reason, redirect_to = %self.login_route, "Session terminated"),
        }

        // No subscribers is fine
        let _ = self.events.send(SessionEvent::LoggedOut {
            redirect_to: self.login_route.clone(),
            reason,
            at: Utc::now(),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;

    fn terminator(store: Arc<dyn CredentialStore>) -> (SessionTerminator, broadcast::Receiver<SessionEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (SessionTerminator::new(store, Arc::new(SessionEpoch::new()), "/login", tx), rx)
    }

    #[test]
    fn test_terminate_clears_credentials_and_notifies() {
        let store = Arc::new(MemoryCredentialStore::with_credentials("A1", "R1"));
        let (terminator, mut rx) = terminator(store.clone());

        assert!(terminator.terminate(TerminationReason::RefreshFailed));

        assert_eq!(store.get(CredentialKey::AccessToken).unwrap(), None);
        assert_eq!(store.get(CredentialKey::RefreshToken).unwrap(), None);
        match rx.try_recv().unwrap() {
            SessionEvent::LoggedOut { redirect_to, reason, .. } => {
                assert_eq!(redirect_to, "/login");
                assert_eq!(reason, TerminationReason::RefreshFailed);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_terminate_advances_epoch_once() {
        let store = Arc::new(MemoryCredentialStore::with_credentials("A1", "R1"));
        let epoch = Arc::new(SessionEpoch::new());
        let (tx, _rx) = broadcast::channel(16);
        let terminator = SessionTerminator::new(store, Arc::clone(&epoch), "/login", tx);

        let before = epoch.current();
        terminator.terminate(TerminationReason::Logout);
        terminator.terminate(TerminationReason::Logout);

        assert_eq!(epoch.current(), before + 1);
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let store = Arc::new(MemoryCredentialStore::with_credentials("A1", "R1"));
        let (terminator, mut rx) = terminator(store);

        assert!(terminator.terminate(TerminationReason::ReplayRejected));
        assert!(!terminator.terminate(TerminationReason::ReplayRejected));
        assert!(terminator.is_terminated());

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_terminate_notifies_once() {
        let store = Arc::new(MemoryCredentialStore::with_credentials("A1", "R1"));
        let (terminator, mut rx) = terminator(store);
        let terminator = Arc::new(terminator);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let terminator = Arc::clone(&terminator);
                tokio::spawn(async move { terminator.terminate(TerminationReason::RefreshFailed) })
            })
            .collect();

        let mut effective = 0;
        for handle in handles {
            if handle.await.unwrap() {
                effective += 1;
            }
        }

        assert_eq!(effective, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_rearm_allows_next_termination() {
        let store = Arc::new(MemoryCredentialStore::with_credentials("A1", "R1"));
        let (terminator, _rx) = terminator(store);

        assert!(terminator.terminate(TerminationReason::Logout));
        terminator.rearm();
        assert!(!terminator.is_terminated());
        assert!(terminator.terminate(TerminationReason::Logout));
    }
}
