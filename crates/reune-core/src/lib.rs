//! reune core - authenticated API client for the reune backend.
//!
//! The client attaches a short-lived access token to every request,
//! exchanges the refresh token for a new access token when the backend
//! rejects it (once, shared by all concurrently failing requests), replays
//! the rejected requests, and ends the session when renewal is impossible.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError, PendingRequest};
pub use auth::{CredentialKey, CredentialStore, Session, SessionEvent, TerminationReason};
pub use config::Config;
