//! Authentication module for managing session credentials.
//!
//! This module provides:
//! - `CredentialStore`: durable storage for the access and refresh tokens
//! - `RequestAuthenticator`: stamps the access token onto outgoing requests
//! - `RefreshCoordinator`: single-flight refresh token exchange
//! - `SessionTerminator`: clears credentials and signals a logout
//! - `SessionEpoch`: invalidates refreshes that outlive their session
//! - `Session`: the per-session context tying these together

pub mod authenticator;
pub mod credentials;
pub mod epoch;
pub mod refresh;
pub mod session;
pub mod terminator;

pub use authenticator::RequestAuthenticator;
pub use credentials::{
    open_store, CredentialKey, CredentialStore, FileCredentialStore, KeyringCredentialStore,
    MemoryCredentialStore,
};
pub use epoch::SessionEpoch;
pub use refresh::{RefreshCoordinator, RefreshError, RefreshOutcome};
pub use session::{Session, SessionEvent, TerminationReason};
pub use terminator::SessionTerminator;
