use std::sync::Arc;

use reqwest::{Response, StatusCode};
use tracing::{debug, warn};

use super::request::PendingRequest;
use super::transport::HttpTransport;
use super::ApiError;
use crate::auth::{RefreshError, Session, TerminationReason};

/// Post-response hook that recovers from an expired access token.
///
/// A 401 on a request that has not been retried yet triggers one refresh
/// (shared with any other request failing at the same time) and one replay.
/// A 401 on the replay, or a failed refresh, ends the session. A request
/// whose session ended while it waited for the refresh is not replayed.
#[derive(Clone)]
pub struct ResponseErrorInterceptor {
    transport: HttpTransport,
    session: Arc<Session>,
}

impl ResponseErrorInterceptor {
    pub fn new(transport: HttpTransport, session: Arc<Session>) -> Self {
        Self { transport, session }
    }

    pub async fn intercept(
        &self,
        mut request: PendingRequest,
        response: Response,
    ) -> Result<Response, ApiError> {
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        if request.is_retried() {
            return Err(self.reject_replay(&request));
        }
        request.mark_retried();
        let epoch = self.session.epoch();

        // Another request may have renewed the token after this one was sent
        let current = self.session.access_token();
        let renewed = current.is_some() && current.as_deref() != request.stamped_with();

        if renewed {
            debug!(url = %request.url(), "Access token already renewed, replaying");
        } else {
            match self.session.refresh().ensure_fresh_credential().await {
                Ok(_) => {}
                Err(RefreshError::SessionEnded) => {
                    debug!(url = %request.url(), "Session ended during refresh, not replaying");
                    return Err(ApiError::Unauthorized);
                }
                Err(e) => {
                    warn!(url = %request.url(), error = %e, "Token refresh failed, ending session");
                    self.session.terminate(TerminationReason::RefreshFailed);
                    return Err(ApiError::Unauthorized);
                }
            }
        }

        if self.session.epoch() != epoch {
            debug!(url = %request.url(), "Session ended before replay, not replaying");
            return Err(ApiError::Unauthorized);
        }

        let replay = self.transport.send(&mut request).await?;
        if replay.status() == StatusCode::UNAUTHORIZED {
            return Err(self.reject_replay(&request));
        }
        Ok(replay)
    }

    fn reject_replay(&self, request: &PendingRequest) -> ApiError {
        warn!(
            method = %request.method(),
            url = %request.url(),
            "Replayed request rejected, ending session"
        );
        self.session.terminate(TerminationReason::ReplayRejected);
        ApiError::ReplayFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;
    use reqwest::Client;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn setup(server: &MockServer, store: Arc<MemoryCredentialStore>) -> ResponseErrorInterceptor {
        let base_url = format!("{}/api", server.uri());
        let session = Arc::new(Session::new(
            store,
            Client::new(),
            format!("{}/token/refresh/", base_url),
            "/login",
        ));
        let transport = HttpTransport::new(Client::new(), &base_url, session.authenticator());
        ResponseErrorInterceptor::new(transport, session)
    }

    async fn unauthorized(server: &MockServer) -> Response {
        Client::new()
            .get(format!("{}/api/clima/", server.uri()))
            .bearer_auth("A1")
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_replays_without_refresh_when_token_already_renewed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/clima/"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/clima/"))
            .and(header("authorization", "Bearer A2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/token/refresh/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        // Another request already swapped A1 for A2
        let store = Arc::new(MemoryCredentialStore::with_credentials("A2", "R1"));
        let interceptor = setup(&server, store);

        let mut request = PendingRequest::get("clima/");
        request.set_stamped_with(Some("A1".to_string()));
        let response = unauthorized(&server).await;

        let replayed = interceptor.intercept(request, response).await.unwrap();
        assert_eq!(replayed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_retried_request_is_not_retried_again() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/clima/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::with_credentials("A1", "R1"));
        let interceptor = setup(&server, store);
        let mut events = interceptor.session.subscribe();

        let mut request = PendingRequest::get("clima/");
        request.mark_retried();
        let response = unauthorized(&server).await;

        let result = interceptor.intercept(request, response).await;
        assert!(matches!(result, Err(ApiError::ReplayFailure)));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert!(!interceptor.session.is_authenticated());
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::with_credentials("A1", "R1"));
        let interceptor = setup(&server, store);
        let response = Client::new()
            .get(format!("{}/api/clima/", server.uri()))
            .send()
            .await
            .unwrap();

        let result = interceptor
            .intercept(PendingRequest::get("clima/"), response)
            .await
            .unwrap();
        assert_eq!(result.status(), StatusCode::NO_CONTENT);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
