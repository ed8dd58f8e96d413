//! REST API client module for the reune backend.
//!
//! This module provides the `ApiClient` for communicating with the
//! reune API. Requests carry a JWT bearer access token; expired tokens
//! are renewed through the refresh endpoint transparently.

pub mod client;
pub mod error;
pub mod interceptor;
pub mod request;
pub mod transport;

pub use client::ApiClient;
pub use error::ApiError;
pub use interceptor::ResponseErrorInterceptor;
pub use request::{PendingRequest, RetryState};
pub use transport::HttpTransport;
