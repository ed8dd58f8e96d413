use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderValue};
use tracing::warn;

use super::credentials::{CredentialKey, CredentialStore};

/// Pre-send hook that stamps the current access token onto outgoing requests.
#[derive(Clone)]
pub struct RequestAuthenticator {
    store: Arc<dyn CredentialStore>,
}

impl RequestAuthenticator {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Current access token. A store read error counts as absent.
    pub fn current_token(&self) -> Option<String> {
        match self.store.get(CredentialKey::AccessToken) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read access token, sending request unauthenticated");
                None
            }
        }
    }

    /// Set `Authorization: Bearer <token>` when an access token is stored,
    /// leaving the headers untouched otherwise. Returns the token stamped.
    pub fn authenticate(&self, headers: &mut HeaderMap) -> Option<String> {
        let token = self.current_token()?;
        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(header::AUTHORIZATION, value);
                Some(token)
            }
            Err(_) => {
                warn!("Stored access token is not a valid header value, sending request unauthenticated");
                None
            }
        }
    }
}
