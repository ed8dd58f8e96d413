use std::sync::Arc;

use reqwest::{Client, Response};
use tracing::debug;

use super::request::{resolve_url, PendingRequest};
use super::ApiError;
use crate::auth::RequestAuthenticator;

/// Stamps and sends a single request. No interception happens here.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Arc<str>,
    authenticator: RequestAuthenticator,
}

impl HttpTransport {
    pub fn new(client: Client, base_url: &str, authenticator: RequestAuthenticator) -> Self {
        Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            authenticator,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a path relative to the base URL
    pub fn url(&self, path: &str) -> String {
        resolve_url(&self.base_url, path)
    }

    /// Stamp the current access token onto `request` and send it.
    ///
    /// Transport failures come back as `ApiError::NetworkError`; every HTTP
    /// status, including 401, is returned as a response.
    pub async fn send(&self, request: &mut PendingRequest) -> Result<Response, ApiError> {
        let mut headers = request.headers().clone();
        let stamped = self.authenticator.authenticate(&mut headers);
        let authenticated = stamped.is_some();
        request.set_stamped_with(stamped);

        let url = self.url(request.url());
        let mut builder = self
            .client
            .request(request.method().clone(), &url)
            .headers(headers);
        if let Some(body) = request.body_bytes() {
            builder = builder.body(body.to_vec());
        }

        let response = builder.send().await?;
        debug!(
            method = %request.method(),
            url = %url,
            status = response.status().as_u16(),
            authenticated,
            retried = request.is_retried(),
            "Request completed"
        );
        Ok(response)
    }
}
