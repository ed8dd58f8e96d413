//! API client for communicating with the reune REST API.
//!
//! This module provides the `ApiClient` struct for making authenticated
//! API requests. Every request goes through the same pipeline: stamp the
//! access token, send, and on a 401 refresh the token once and replay.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info};

use super::interceptor::ResponseErrorInterceptor;
use super::request::{resolve_url, PendingRequest};
use super::transport::HttpTransport;
use super::ApiError;
use crate::auth::{open_store, CredentialStore, Session, TerminationReason};
use crate::config::Config;

// ============================================================================
// Constants
// ============================================================================

/// Token pair endpoint, relative to the API base URL
const LOGIN_PATH: &str = "token/";

/// Refresh endpoint, relative to the API base URL
const REFRESH_PATH: &str = "token/refresh/";

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenPair {
    access: String,
    refresh: String,
}

/// Authenticated API client.
/// Clone is cheap - the HTTP client and session are shared.
#[derive(Clone)]
pub struct ApiClient {
    transport: HttpTransport,
    interceptor: ResponseErrorInterceptor,
    session: Arc<Session>,
}

impl ApiClient {
    /// Create a client using the credential backend selected in `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = open_store(config.credential_backend)?;
        Self::new(config, store)
    }

    /// Create a client persisting credentials in `store`
    pub fn new(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let base_url = config.api_base_url()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let session = Arc::new(Session::new(
            store,
            client.clone(),
            resolve_url(base_url, REFRESH_PATH),
            &config.login_route,
        ));
        let transport = HttpTransport::new(client, base_url, session.authenticator());
        let interceptor = ResponseErrorInterceptor::new(transport.clone(), Arc::clone(&session));

        debug!(base_url, "API client created");
        Ok(Self {
            transport,
            interceptor,
            session,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    /// Obtain a token pair with username and password and start a session
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let url = self.transport.url(LOGIN_PATH);

        let response = self
            .transport
            .client()
            .post(&url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let pair: TokenPair = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse token response: {}", e)))?;

        self.session
            .establish(&pair.access, &pair.refresh)
            .map_err(|e| ApiError::Credentials(format!("{:#}", e)))?;

        info!(username, "Login successful");
        Ok(())
    }

    /// Clear the session. Returns `false` if it had already ended.
    pub fn logout(&self) -> bool {
        self.session.terminate(TerminationReason::Logout)
    }

    /// Send a request through the authentication pipeline.
    ///
    /// Any non-401 status is returned unchanged. A 401 is recovered by one
    /// token refresh and replay; if that is impossible the session is ended
    /// and `Unauthorized` (refresh failed) or `ReplayFailure` is returned.
    pub async fn send(&self, mut request: PendingRequest) -> Result<Response, ApiError> {
        let response = self.transport.send(&mut request).await?;
        self.interceptor.intercept(request, response).await
    }

    /// Check if response is successful, returning an error with body if not.
    ///
    /// Responses from `send` have already been through the interceptor, so a
    /// 401 only maps to `Unauthorized` here for the login request, which is
    /// sent without the authentication pipeline.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: PendingRequest) -> Result<T, ApiError> {
        let url = request.url().to_string();
        let response = Self::check_response(self.send(request).await?).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e)))
    }

    // ===== Typed helpers =====

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(PendingRequest::get(path)).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(PendingRequest::post(path).json(body)?).await
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(PendingRequest::put(path).json(body)?).await
    }

    pub async fn patch_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(PendingRequest::patch(path).json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        Self::check_response(self.send(PendingRequest::delete(path)).await?).await?;
        Ok(())
    }
}
